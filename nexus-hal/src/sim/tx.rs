use std::{thread, time::Duration};

use log::debug;

use super::{ring_read, SimRegisters};
use crate::{
    BufferKind, Direction, ErrorCode, Hal, Register, ERR_INVALIDPARAM, ERR_OK, ERR_SEQUENCE,
    ERR_TIMEOUT, M2CMD_CARD_RESET, M2CMD_CARD_START, M2CMD_CARD_STOP, M2CMD_DATA_STARTDMA,
    M2CMD_DATA_STOPDMA, M2CMD_DATA_WAITDMA, M2STAT_CARD_READY, M2STAT_DATA_BLOCKREADY,
    SPC_CHCOUNT, SPC_DATA_AVAIL_CARD_LEN, SPC_DATA_AVAIL_USER_LEN, SPC_DATA_AVAIL_USER_POS,
    SPC_M2CMD, SPC_M2STATUS, SPC_PCITYP, SPC_TIMEOUT,
};

/// Тип карты генератора, который сообщает симулятор.
pub const SIM_TX_CARD_TYPE: i64 = 0x0007_6570;

/// Симулятор карты генератора (режим FIFO воспроизведения).
///
/// Все подтверждённые байты сразу попадают в поток `output()` в порядке
/// подтверждения. Свободное место возвращается по `drain_per_wait` байт за
/// каждый вызов ожидания DMA, что моделирует управление потоком.
#[derive(Debug, Default)]
pub struct SimulatedTxCard {
    regs: SimRegisters,
    ring: Vec<u8>,
    notify_size: usize,
    user_pos: usize,
    pending: usize,
    drain_per_wait: Option<usize>,
    dma_running: bool,
    running: bool,
    output: Vec<u8>,
    waits: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SimulatedTxCard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сколько байт карта воспроизводит за одно ожидание DMA
    /// (по умолчанию notify).
    pub fn with_drain_per_wait(
        mut self,
        bytes: usize,
    ) -> Self {
        self.drain_per_wait = Some(bytes);
        self
    }

    /// Возвращать `code` на любую команду с битами `mask`.
    pub fn with_fault(
        mut self,
        mask: i32,
        code: ErrorCode,
    ) -> Self {
        self.regs.inject_fault(mask, code);
        self
    }

    /// Поток байт, принятых картой к воспроизведению.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn registers(&self) -> &SimRegisters {
        &self.regs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn waits(&self) -> u64 {
        self.waits
    }

    /// Подтверждённые байты, которые карта ещё не воспроизвела.
    pub fn unplayed(&self) -> usize {
        self.pending
    }

    fn drain(&mut self) -> ErrorCode {
        self.waits += 1;

        if self.pending == 0 {
            let ms = self.regs.get(SPC_TIMEOUT).clamp(0, 10) as u64;
            thread::sleep(Duration::from_millis(ms));
            return ERR_TIMEOUT;
        }

        let step = self.drain_per_wait.unwrap_or(self.notify_size).max(1);
        self.pending -= step.min(self.pending);
        ERR_OK
    }

    fn command(
        &mut self,
        mask: i32,
    ) -> ErrorCode {
        if mask & M2CMD_CARD_RESET != 0 {
            self.running = false;
            self.dma_running = false;
            self.pending = 0;
            self.user_pos = 0;
        }

        if mask & M2CMD_DATA_STARTDMA != 0 {
            if self.ring.is_empty() {
                return ERR_SEQUENCE;
            }
            self.dma_running = true;
        }

        if mask & M2CMD_CARD_START != 0 {
            self.running = true;
        }

        if mask & (M2CMD_CARD_STOP | M2CMD_DATA_STOPDMA) != 0 {
            self.running = false;
            self.dma_running = mask & M2CMD_DATA_STOPDMA == 0 && self.dma_running;
        }

        if mask & M2CMD_DATA_WAITDMA != 0 {
            if !self.dma_running {
                return ERR_SEQUENCE;
            }
            return self.drain();
        }

        ERR_OK
    }
}

impl Hal for SimulatedTxCard {
    fn open(
        &mut self,
        _path: &str,
    ) -> ErrorCode {
        self.regs.set_open(true);
        ERR_OK
    }

    fn close(&mut self) {
        self.regs.set_open(false);
    }

    fn get_param_i32(
        &mut self,
        register: Register,
    ) -> Result<i32, ErrorCode> {
        self.get_param_i64(register).map(|v| v as i32)
    }

    fn get_param_i64(
        &mut self,
        register: Register,
    ) -> Result<i64, ErrorCode> {
        Ok(match register {
            SPC_PCITYP => SIM_TX_CARD_TYPE,
            SPC_CHCOUNT => self.regs.channel_count() as i64,
            SPC_DATA_AVAIL_USER_LEN => (self.ring.len() - self.pending) as i64,
            SPC_DATA_AVAIL_USER_POS => self.user_pos as i64,
            SPC_M2STATUS => {
                let mut status = 0;
                if !self.running {
                    status |= M2STAT_CARD_READY;
                }
                if self.ring.len() - self.pending >= self.notify_size {
                    status |= M2STAT_DATA_BLOCKREADY;
                }
                status as i64
            }
            other => self.regs.get(other),
        })
    }

    fn set_param_i32(
        &mut self,
        register: Register,
        value: i32,
    ) -> ErrorCode {
        self.set_param_i64(register, value as i64)
    }

    fn set_param_i64(
        &mut self,
        register: Register,
        value: i64,
    ) -> ErrorCode {
        self.regs.set(register, value);

        if register == SPC_M2CMD {
            let fault = self.regs.fault_for(value as i32);
            if fault != ERR_OK {
                return fault;
            }
            return self.command(value as i32);
        }

        if register == SPC_DATA_AVAIL_CARD_LEN {
            let len = value.max(0) as usize;
            if len > self.ring.len() - self.pending {
                return ERR_INVALIDPARAM;
            }
            self.output
                .extend_from_slice(&ring_read(&self.ring, self.user_pos, len));
            self.user_pos = (self.user_pos + len) % self.ring.len().max(1);
            self.pending += len;
        }

        ERR_OK
    }

    fn define_transfer(
        &mut self,
        kind: BufferKind,
        direction: Direction,
        notify_size: usize,
        buffer: &mut [u8],
        offset: u64,
        length: usize,
    ) -> ErrorCode {
        if kind != BufferKind::Data || direction != Direction::HostToCard || offset != 0 {
            return ERR_INVALIDPARAM;
        }

        if notify_size == 0 || length != buffer.len() || length % notify_size != 0 {
            return ERR_INVALIDPARAM;
        }

        debug!("sim tx: transfer of {length} bytes, notify {notify_size}");

        self.ring = vec![0; length];
        self.notify_size = notify_size;
        self.user_pos = 0;
        self.pending = 0;
        ERR_OK
    }

    fn sync_dma(
        &mut self,
        kind: BufferKind,
        buffer: &mut [u8],
    ) {
        if kind == BufferKind::Data && buffer.len() == self.ring.len() {
            self.ring.copy_from_slice(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledged_bytes_are_output_in_order() {
        let mut card = SimulatedTxCard::new();
        let mut ring: Vec<u8> = (0..16).collect();

        assert_eq!(
            card.define_transfer(
                BufferKind::Data,
                Direction::HostToCard,
                4,
                &mut ring,
                0,
                16
            ),
            ERR_OK
        );
        card.sync_dma(BufferKind::Data, &mut ring);
        assert_eq!(card.acknowledge(BufferKind::Data, 16), ERR_OK);
        assert_eq!(card.output(), ring.as_slice());
        assert_eq!(card.available(BufferKind::Data), Ok((0, 0)));

        assert_eq!(
            card.issue_command(M2CMD_DATA_STARTDMA | M2CMD_DATA_WAITDMA),
            ERR_OK
        );
        assert_eq!(card.available(BufferKind::Data), Ok((4, 0)));
    }

    #[test]
    fn test_over_acknowledge_rejected() {
        let mut card = SimulatedTxCard::new();
        let mut ring = vec![0u8; 8];
        card.define_transfer(BufferKind::Data, Direction::HostToCard, 4, &mut ring, 0, 8);

        assert_eq!(card.acknowledge(BufferKind::Data, 8), ERR_OK);
        assert_eq!(card.acknowledge(BufferKind::Data, 4), ERR_INVALIDPARAM);
    }

    #[test]
    fn test_wait_without_dma_is_sequence_error() {
        let mut card = SimulatedTxCard::new();
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_SEQUENCE);
    }

    #[test]
    fn test_fault_injection() {
        let mut card = SimulatedTxCard::new().with_fault(M2CMD_CARD_START, ERR_INVALIDPARAM);

        assert_eq!(card.issue_command(M2CMD_CARD_START), ERR_INVALIDPARAM);
        assert!(!card.is_running());
        assert!(card.registers().issued(M2CMD_CARD_START));
    }
}
