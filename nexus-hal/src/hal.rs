use crate::{
    ErrorCode, Register, SPC_DATA_AVAIL_CARD_LEN, SPC_DATA_AVAIL_USER_LEN,
    SPC_DATA_AVAIL_USER_POS, SPC_M2CMD, SPC_TS_AVAIL_CARD_LEN, SPC_TS_AVAIL_USER_LEN,
    SPC_TS_AVAIL_USER_POS,
};

/// Тип DMA буфера карты.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Отсчёты
    Data,
    /// Метки времени (дополнительный буфер)
    Timestamp,
}

/// Направление передачи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToCard,
    CardToHost,
}

/// Доступ к драйверу карты.
///
/// Каждый вызов возвращает код драйвера; `0` — успех. Экземпляр владеет
/// дескриптором открытой карты.
///
/// Кольцевой буфер принадлежит движку. `define_transfer` регистрирует его
/// адрес: движок держит буфер на месте до остановки DMA и не передаёт его
/// никому. `sync_dma` временно одалживает буфер реализации (после записи на
/// передаче и перед чтением на приёме); реализация не хранит ссылку. Для
/// настоящего драйвера DMA работает с зарегистрированной памятью и вызов
/// ничего не делает.
pub trait Hal: Send {
    /// Открывает карту по пути устройства (`/dev/spcm0`)
    fn open(
        &mut self,
        path: &str,
    ) -> ErrorCode;

    fn close(&mut self);

    fn get_param_i32(
        &mut self,
        register: Register,
    ) -> Result<i32, ErrorCode>;

    fn get_param_i64(
        &mut self,
        register: Register,
    ) -> Result<i64, ErrorCode>;

    fn set_param_i32(
        &mut self,
        register: Register,
        value: i32,
    ) -> ErrorCode;

    fn set_param_i64(
        &mut self,
        register: Register,
        value: i64,
    ) -> ErrorCode;

    /// Регистрирует DMA передачу для буфера `buffer`.
    fn define_transfer(
        &mut self,
        kind: BufferKind,
        direction: Direction,
        notify_size: usize,
        buffer: &mut [u8],
        offset: u64,
        length: usize,
    ) -> ErrorCode;

    /// Выполняет команду (маска `M2CMD_*`).
    fn issue_command(
        &mut self,
        mask: i32,
    ) -> ErrorCode {
        self.set_param_i32(SPC_M2CMD, mask)
    }

    /// Доступные пользователю байты и позиция в буфере.
    fn available(
        &mut self,
        kind: BufferKind,
    ) -> Result<(usize, usize), ErrorCode> {
        let (len_reg, pos_reg) = match kind {
            BufferKind::Data => (SPC_DATA_AVAIL_USER_LEN, SPC_DATA_AVAIL_USER_POS),
            BufferKind::Timestamp => (SPC_TS_AVAIL_USER_LEN, SPC_TS_AVAIL_USER_POS),
        };
        let len = self.get_param_i64(len_reg)?;
        let pos = self.get_param_i64(pos_reg)?;

        Ok((len.max(0) as usize, pos.max(0) as usize))
    }

    /// Возвращает карте `len` обработанных байт.
    fn acknowledge(
        &mut self,
        kind: BufferKind,
        len: usize,
    ) -> ErrorCode {
        let reg = match kind {
            BufferKind::Data => SPC_DATA_AVAIL_CARD_LEN,
            BufferKind::Timestamp => SPC_TS_AVAIL_CARD_LEN,
        };
        self.set_param_i64(reg, len as i64)
    }

    /// Синхронизирует содержимое кольцевого буфера с картой.
    fn sync_dma(
        &mut self,
        _kind: BufferKind,
        _buffer: &mut [u8],
    ) {
    }
}
