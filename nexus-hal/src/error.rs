use thiserror::Error;

/// Код возврата драйвера. `0` — успех.
pub type ErrorCode = u32;

pub const ERR_OK: ErrorCode = 0x0000;
pub const ERR_INIT: ErrorCode = 0x0001;
pub const ERR_TYP: ErrorCode = 0x0003;
pub const ERR_FNCNOTSUPPORTED: ErrorCode = 0x0004;
pub const ERR_INVALIDHANDLE: ErrorCode = 0x0009;
pub const ERR_BOARDNOTFOUND: ErrorCode = 0x000A;
pub const ERR_BOARDINUSE: ErrorCode = 0x000B;
pub const ERR_ABORT: ErrorCode = 0x0020;
pub const ERR_BUFFERSIZE: ErrorCode = 0x0044;
pub const ERR_INVALIDPARAM: ErrorCode = 0x0046;
pub const ERR_REG: ErrorCode = 0x0100;
pub const ERR_VALUE: ErrorCode = 0x0101;
pub const ERR_FEATURE: ErrorCode = 0x0102;
pub const ERR_SEQUENCE: ErrorCode = 0x0103;
pub const ERR_READABORT: ErrorCode = 0x0104;
pub const ERR_NOACCESS: ErrorCode = 0x0105;
pub const ERR_TIMEOUT: ErrorCode = 0x0107;
pub const ERR_CALLTYPE: ErrorCode = 0x0108;
pub const ERR_SETUP: ErrorCode = 0x010B;
pub const ERR_CLOCKNOTLOCKED: ErrorCode = 0x010C;
pub const ERR_CHANNEL: ErrorCode = 0x0110;
pub const ERR_NOTIFYSIZE: ErrorCode = 0x0111;
pub const ERR_RUNNING: ErrorCode = 0x0120;
pub const ERR_PRETRIGGERLEN: ErrorCode = 0x0140;
pub const ERR_DIRMISMATCH: ErrorCode = 0x0141;
pub const ERR_DMALOCKED: ErrorCode = 0x0204;
pub const ERR_MEMALLOC: ErrorCode = 0x0205;
pub const ERR_FIFOBUFOVERRUN: ErrorCode = 0x0300;
pub const ERR_FIFOHWOVERRUN: ErrorCode = 0x0301;
pub const ERR_FIFOFINISHED: ErrorCode = 0x0302;
pub const ERR_FIFOSETUP: ErrorCode = 0x0309;

/// Статическая таблица кодов ошибок драйвера.
static ERROR_TABLE: &[(ErrorCode, &str)] = &[
    (ERR_OK, "Execution OK, no error"),
    (ERR_INIT, "Error while initializing the card"),
    (ERR_TYP, "Initialization only: the type of board is unknown"),
    (ERR_FNCNOTSUPPORTED, "Function is not supported by the driver or hardware"),
    (ERR_INVALIDHANDLE, "The used handle is not valid"),
    (ERR_BOARDNOTFOUND, "No card found"),
    (ERR_BOARDINUSE, "The card is already in use by another process"),
    (ERR_ABORT, "Abort of wait function"),
    (ERR_BUFFERSIZE, "Buffer size is not sufficient"),
    (ERR_INVALIDPARAM, "The parameter is not valid"),
    (ERR_REG, "The register is not valid for this card"),
    (ERR_VALUE, "The value is not valid for this register"),
    (ERR_FEATURE, "The feature is not installed on this card"),
    (ERR_SEQUENCE, "The command sequence is not valid"),
    (ERR_READABORT, "Data read is not allowed after aborting the acquisition"),
    (ERR_NOACCESS, "Access to this register is denied"),
    (ERR_TIMEOUT, "A timeout occurred while waiting for an interrupt"),
    (ERR_CALLTYPE, "The access to the register is only allowed with 64 bit calls"),
    (ERR_SETUP, "The current card setup is not valid"),
    (ERR_CLOCKNOTLOCKED, "Synchronization to external clock failed"),
    (ERR_CHANNEL, "The channel number is not valid"),
    (ERR_NOTIFYSIZE, "The notify size is not valid for the buffer"),
    (ERR_RUNNING, "Command not allowed while the card is running"),
    (ERR_PRETRIGGERLEN, "The pretrigger length is not valid"),
    (ERR_DIRMISMATCH, "The transfer direction does not match the card mode"),
    (ERR_DMALOCKED, "DMA buffer is locked by another process"),
    (ERR_MEMALLOC, "Memory allocation failed"),
    (ERR_FIFOBUFOVERRUN, "Host buffer overrun in FIFO mode"),
    (ERR_FIFOHWOVERRUN, "On-board memory overrun in FIFO mode"),
    (ERR_FIFOFINISHED, "FIFO transfer has been finished"),
    (ERR_FIFOSETUP, "FIFO setup is not valid"),
];

/// Текст ошибки по коду драйвера.
pub fn error_text(code: ErrorCode) -> &'static str {
    ERROR_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, msg)| *msg)
        .unwrap_or("Unknown error")
}

pub type HalResult<T> = std::result::Result<T, HalError>;

/// Ошибки обращения к карте.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// Ненулевой код возврата драйвера. Карта уже остановлена.
    #[error("Hardware command error 0x{code:04x} on {card}: {message}")]
    Command {
        card: String,
        code: ErrorCode,
        message: &'static str,
    },

    /// Истекло время ожидания DMA (можно повторить)
    #[error("DMA wait timed out on {0}")]
    Timeout(String),
}

impl HalError {
    pub fn command<S: Into<String>>(
        card: S,
        code: ErrorCode,
    ) -> Self {
        Self::Command {
            card: card.into(),
            code,
            message: error_text(code),
        }
    }

    /// Код драйвера
    pub fn code(&self) -> ErrorCode {
        match self {
            HalError::Command { code, .. } => *code,
            HalError::Timeout(_) => ERR_TIMEOUT,
        }
    }

    /// Ошибку можно переждать повторным опросом
    pub fn is_timeout(&self) -> bool {
        matches!(self, HalError::Timeout(_))
    }
}
