use log::{debug, error};

use crate::{
    error_text, status_flags, BufferKind, Direction, ErrorCode, Hal, HalError, HalResult, Register,
    ERR_OK, ERR_TIMEOUT, M2CMD_CARD_STOP, M2CMD_DATA_WAITDMA, SPC_M2STATUS,
};

/// Открытая карта с проверкой кодов возврата.
///
/// Любой ненулевой код пишется в лог, сразу же следует команда остановки
/// карты, и вызывающему возвращается [`HalError::Command`]. Повторов нет.
pub struct Card<H: Hal> {
    hal: H,
    name: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<H: Hal> Card<H> {
    /// Открывает карту по пути устройства.
    pub fn open(
        mut hal: H,
        path: &str,
        name: &str,
    ) -> HalResult<Self> {
        let code = hal.open(path);

        if code != ERR_OK {
            error!(
                "Failed to open {name} at {path}: 0x{code:04x} {}",
                error_text(code)
            );
            return Err(HalError::command(name, code));
        }

        debug!("Opened {name} at {path}");

        Ok(Self {
            hal,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Проверяет код возврата драйвера.
    pub fn check(
        &mut self,
        code: ErrorCode,
    ) -> HalResult<()> {
        if code == ERR_OK {
            return Ok(());
        }

        error!(
            "{}: driver error 0x{code:04x} ({}); stopping card",
            self.name,
            error_text(code)
        );
        self.hal.issue_command(M2CMD_CARD_STOP);

        Err(HalError::command(&self.name, code))
    }

    pub fn set_i32(
        &mut self,
        register: Register,
        value: i32,
    ) -> HalResult<()> {
        let code = self.hal.set_param_i32(register, value);
        self.check(code)
    }

    pub fn set_i64(
        &mut self,
        register: Register,
        value: i64,
    ) -> HalResult<()> {
        let code = self.hal.set_param_i64(register, value);
        self.check(code)
    }

    pub fn get_i32(
        &mut self,
        register: Register,
    ) -> HalResult<i32> {
        match self.hal.get_param_i32(register) {
            Ok(v) => Ok(v),
            Err(code) => self.check(code).map(|_| 0),
        }
    }

    pub fn get_i64(
        &mut self,
        register: Register,
    ) -> HalResult<i64> {
        match self.hal.get_param_i64(register) {
            Ok(v) => Ok(v),
            Err(code) => self.check(code).map(|_| 0),
        }
    }

    pub fn command(
        &mut self,
        mask: i32,
    ) -> HalResult<()> {
        let code = self.hal.issue_command(mask);
        self.check(code)
    }

    /// Ждёт уведомления DMA.
    ///
    /// Таймаут возвращается как [`HalError::Timeout`] без остановки карты:
    /// вызывающий просто опрашивает снова.
    pub fn wait_dma(&mut self) -> HalResult<()> {
        match self.hal.issue_command(M2CMD_DATA_WAITDMA) {
            ERR_OK => Ok(()),
            ERR_TIMEOUT => Err(HalError::Timeout(self.name.clone())),
            code => self.check(code),
        }
    }

    pub fn define_transfer(
        &mut self,
        kind: BufferKind,
        direction: Direction,
        notify_size: usize,
        buffer: &mut [u8],
    ) -> HalResult<()> {
        let length = buffer.len();
        let code = self
            .hal
            .define_transfer(kind, direction, notify_size, buffer, 0, length);
        self.check(code)
    }

    pub fn available(
        &mut self,
        kind: BufferKind,
    ) -> HalResult<(usize, usize)> {
        match self.hal.available(kind) {
            Ok(v) => Ok(v),
            Err(code) => self.check(code).map(|_| (0, 0)),
        }
    }

    pub fn acknowledge(
        &mut self,
        kind: BufferKind,
        len: usize,
    ) -> HalResult<()> {
        let code = self.hal.acknowledge(kind, len);
        self.check(code)
    }

    pub fn sync_dma(
        &mut self,
        kind: BufferKind,
        buffer: &mut [u8],
    ) {
        self.hal.sync_dma(kind, buffer);
    }

    /// Читает регистр статуса.
    pub fn status(&mut self) -> HalResult<i32> {
        self.get_i32(SPC_M2STATUS)
    }

    /// Пишет статус карты в лог.
    pub fn log_status(&mut self) -> HalResult<()> {
        let status = self.status()?;
        debug!(
            "{} status 0x{status:04x}: {:?}",
            self.name,
            status_flags(status)
        );
        Ok(())
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    /// Закрывает карту и возвращает драйвер.
    pub fn close(mut self) -> H {
        self.hal.close();
        debug!("Closed {}", self.name);
        self.hal
    }
}
