use std::{thread, time::Duration};

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use super::{ring_write, SimRegisters};
use crate::{
    BufferKind, Direction, ErrorCode, Hal, Register, ERR_INVALIDPARAM, ERR_OK, ERR_SEQUENCE,
    ERR_TIMEOUT, M2CMD_CARD_RESET, M2CMD_CARD_START, M2CMD_CARD_STOP, M2CMD_DATA_STARTDMA,
    M2CMD_DATA_STOPDMA, M2CMD_DATA_WAITDMA, M2STAT_CARD_READY, M2STAT_CARD_TRIGGER,
    M2STAT_DATA_BLOCKREADY, SPC_CHCOUNT, SPC_DATA_AVAIL_CARD_LEN, SPC_DATA_AVAIL_USER_LEN,
    SPC_DATA_AVAIL_USER_POS, SPC_M2CMD, SPC_M2STATUS, SPC_PCITYP, SPC_POSTTRIGGER,
    SPC_PRETRIGGER, SPC_TIMEOUT, SPC_TS_AVAIL_CARD_LEN, SPC_TS_AVAIL_USER_LEN,
    SPC_TS_AVAIL_USER_POS, TIMESTAMP_RECORD_BYTES,
};

/// Тип карты дигитайзера, который сообщает симулятор.
pub const SIM_RX_CARD_TYPE: i64 = 0x0007_4420;

/// Значение, которым заполняются pre/post-trigger отсчёты.
pub const SIM_TRIGGER_FILL: i16 = 0x5555;

/// Одно окно сценария: метка начала (такты часов) и отсчёты по каналам.
#[derive(Debug, Clone, PartialEq)]
pub struct SimGate {
    pub start_tick: u64,
    pub channels: Vec<Vec<i16>>,
}

impl SimGate {
    pub fn new(
        start_tick: u64,
        channels: Vec<Vec<i16>>,
    ) -> Self {
        Self {
            start_tick,
            channels,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Кольцо симулятора: копия DMA буфера и его счётчики.
#[derive(Debug, Default)]
struct SimRing {
    mirror: Vec<u8>,
    fill: usize,
    user_pos: usize,
}

impl SimRing {
    fn free(&self) -> usize {
        self.mirror.len() - self.fill
    }

    fn push(
        &mut self,
        bytes: &[u8],
    ) {
        let at = self.user_pos + self.fill;
        ring_write(&mut self.mirror, at, bytes);
        self.fill += bytes.len();
    }

    fn release(
        &mut self,
        len: usize,
    ) -> ErrorCode {
        if len > self.fill {
            return ERR_INVALIDPARAM;
        }
        self.fill -= len;
        self.user_pos = (self.user_pos + len) % self.mirror.len().max(1);
        ERR_OK
    }

    fn reset(&mut self) {
        self.fill = 0;
        self.user_pos = 0;
    }
}

/// Симулятор дигитайзера в режиме gated FIFO с метками времени.
///
/// По команде старта сценарий окон разворачивается в поток байт: для
/// каждого окна `pre_trigger` отсчётов заполнителя, отсчёты окна и
/// `post_trigger` отсчётов заполнителя, каналы чередуются. Пара меток
/// времени окна публикуется, как только поток доходит до начала окна.
/// Каждое ожидание DMA выдаёт не больше notify байт.
#[derive(Debug, Default)]
pub struct SimulatedRxCard {
    regs: SimRegisters,
    script: Vec<SimGate>,
    truncate_last: Option<usize>,
    notify_size: usize,
    data: SimRing,
    timestamps: SimRing,
    stream: Vec<u8>,
    segment_starts: Vec<usize>,
    produced: usize,
    released_gates: usize,
    dma_running: bool,
    running: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SimulatedRxCard {
    pub fn new(script: Vec<SimGate>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// Последнее окно обрывается после `samples` отсчётов.
    pub fn with_truncated_last(
        mut self,
        samples: usize,
    ) -> Self {
        self.truncate_last = Some(samples);
        self
    }

    pub fn with_fault(
        mut self,
        mask: i32,
        code: ErrorCode,
    ) -> Self {
        self.regs.inject_fault(mask, code);
        self
    }

    /// Заменяет сценарий (действует со следующего старта).
    pub fn set_script(
        &mut self,
        script: Vec<SimGate>,
    ) {
        self.script = script;
    }

    pub fn registers(&self) -> &SimRegisters {
        &self.regs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Весь поток был выдан в кольцо.
    pub fn exhausted(&self) -> bool {
        self.produced >= self.stream.len()
    }

    fn build_stream(&mut self) {
        let channels = self.regs.channel_count().max(1);
        let pre = self.regs.get(SPC_PRETRIGGER).max(0) as usize;
        let post = self.regs.get(SPC_POSTTRIGGER).max(0) as usize;
        let last = self.script.len().saturating_sub(1);

        self.stream.clear();
        self.segment_starts.clear();

        for (g, gate) in self.script.iter().enumerate() {
            self.segment_starts.push(self.stream.len());

            let (samples, post) = match self.truncate_last {
                Some(k) if g == last => (k.min(gate.len()), 0),
                _ => (gate.len(), post),
            };

            for _ in 0..pre * channels {
                self.stream.write_i16::<LittleEndian>(SIM_TRIGGER_FILL).ok();
            }

            for i in 0..samples {
                for ch in 0..channels {
                    let v = gate
                        .channels
                        .get(ch)
                        .and_then(|c| c.get(i))
                        .copied()
                        .unwrap_or(0);
                    self.stream.write_i16::<LittleEndian>(v).ok();
                }
            }

            for _ in 0..post * channels {
                self.stream.write_i16::<LittleEndian>(SIM_TRIGGER_FILL).ok();
            }
        }

        self.produced = 0;
        self.released_gates = 0;
        self.data.reset();
        self.timestamps.reset();

        debug!(
            "sim rx: {} gates, {} stream bytes, pre={pre} post={post} channels={channels}",
            self.script.len(),
            self.stream.len()
        );
    }

    fn release_timestamps(&mut self) {
        while self.released_gates < self.script.len() {
            let g = self.released_gates;
            let started = self.segment_starts[g] < self.produced || self.exhausted();

            if !started || self.timestamps.free() < 2 * TIMESTAMP_RECORD_BYTES {
                break;
            }

            let gate = &self.script[g];
            let t0 = gate.start_tick;
            let t1 = t0 + gate.len() as u64;

            let mut record = Vec::with_capacity(2 * TIMESTAMP_RECORD_BYTES);
            for tick in [t0, t1] {
                record.write_u64::<LittleEndian>(tick).ok();
                record.write_u64::<LittleEndian>(0).ok();
            }

            self.timestamps.push(&record);
            self.released_gates += 1;
        }
    }

    fn produce(&mut self) -> ErrorCode {
        let n = self
            .notify_size
            .max(1)
            .min(self.data.free())
            .min(self.stream.len() - self.produced);

        if n == 0 {
            let ms = self.regs.get(SPC_TIMEOUT).clamp(0, 10) as u64;
            thread::sleep(Duration::from_millis(ms));
            self.release_timestamps();
            return ERR_TIMEOUT;
        }

        let chunk = self.stream[self.produced..self.produced + n].to_vec();
        self.data.push(&chunk);
        self.produced += n;
        self.release_timestamps();

        ERR_OK
    }

    fn command(
        &mut self,
        mask: i32,
    ) -> ErrorCode {
        if mask & M2CMD_CARD_RESET != 0 {
            self.running = false;
            self.dma_running = false;
            self.data.reset();
            self.timestamps.reset();
        }

        if mask & M2CMD_DATA_STARTDMA != 0 {
            if self.data.mirror.is_empty() {
                return ERR_SEQUENCE;
            }
            self.dma_running = true;
        }

        if mask & M2CMD_CARD_START != 0 {
            self.build_stream();
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
            if !self.running {
                return ERR_TIMEOUT;
            }
            return self.produce();
        }

        ERR_OK
    }
}

impl Hal for SimulatedRxCard {
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
            SPC_PCITYP => SIM_RX_CARD_TYPE,
            SPC_CHCOUNT => self.regs.channel_count() as i64,
            SPC_DATA_AVAIL_USER_LEN => self.data.fill as i64,
            SPC_DATA_AVAIL_USER_POS => self.data.user_pos as i64,
            SPC_TS_AVAIL_USER_LEN => self.timestamps.fill as i64,
            SPC_TS_AVAIL_USER_POS => self.timestamps.user_pos as i64,
            SPC_M2STATUS => {
                let mut status = 0;
                if self.running {
                    status |= M2STAT_CARD_TRIGGER;
                } else {
                    status |= M2STAT_CARD_READY;
                }
                if self.data.fill >= self.notify_size.max(1) {
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

        match register {
            SPC_M2CMD => {
                let fault = self.regs.fault_for(value as i32);
                if fault != ERR_OK {
                    return fault;
                }
                self.command(value as i32)
            }
            SPC_DATA_AVAIL_CARD_LEN => self.data.release(value.max(0) as usize),
            SPC_TS_AVAIL_CARD_LEN => self.timestamps.release(value.max(0) as usize),
            _ => ERR_OK,
        }
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
        if direction != Direction::CardToHost || offset != 0 || length != buffer.len() {
            return ERR_INVALIDPARAM;
        }

        match kind {
            BufferKind::Data => {
                if notify_size == 0 || length % notify_size != 0 {
                    return ERR_INVALIDPARAM;
                }
                self.data = SimRing {
                    mirror: vec![0; length],
                    ..Default::default()
                };
                self.notify_size = notify_size;
            }
            BufferKind::Timestamp => {
                if length % (2 * TIMESTAMP_RECORD_BYTES) != 0 {
                    return ERR_INVALIDPARAM;
                }
                self.timestamps = SimRing {
                    mirror: vec![0; length],
                    ..Default::default()
                };
            }
        }

        ERR_OK
    }

    fn sync_dma(
        &mut self,
        kind: BufferKind,
        buffer: &mut [u8],
    ) {
        let mirror = match kind {
            BufferKind::Data => &self.data.mirror,
            BufferKind::Timestamp => &self.timestamps.mirror,
        };

        if buffer.len() == mirror.len() {
            buffer.copy_from_slice(mirror);
        }
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};

    use super::*;
    use crate::{SPC_CHENABLE, SPC_TIMEOUT};

    fn started_card(
        script: Vec<SimGate>,
        data_len: usize,
    ) -> (SimulatedRxCard, Vec<u8>, Vec<u8>) {
        let mut card = SimulatedRxCard::new(script);
        let mut data = vec![0u8; data_len];
        let mut ts = vec![0u8; 64];

        card.set_param_i32(SPC_CHENABLE, 0b11);
        card.set_param_i32(SPC_PRETRIGGER, 1);
        card.set_param_i32(SPC_POSTTRIGGER, 1);
        card.set_param_i32(SPC_TIMEOUT, 0);
        card.define_transfer(
            BufferKind::Data,
            Direction::CardToHost,
            8,
            &mut data,
            0,
            data_len,
        );
        card.define_transfer(
            BufferKind::Timestamp,
            Direction::CardToHost,
            0,
            &mut ts,
            0,
            64,
        );
        card.issue_command(M2CMD_CARD_START | M2CMD_DATA_STARTDMA);

        (card, data, ts)
    }

    #[test]
    fn test_stream_layout_and_timestamps() {
        let script = vec![SimGate::new(100, vec![vec![1, 2], vec![-1, -2]])];
        let (mut card, mut data, mut ts) = started_card(script, 32);

        // (1 pre + 2 + 1 post) * 2 канала * 2 байта = 16 байт, по 8 за ожидание
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_OK);
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_OK);
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_TIMEOUT);
        assert!(card.exhausted());

        assert_eq!(card.available(BufferKind::Data), Ok((16, 0)));
        assert_eq!(card.available(BufferKind::Timestamp), Ok((32, 0)));

        card.sync_dma(BufferKind::Data, &mut data);
        let mut samples = [0i16; 8];
        LittleEndian::read_i16_into(&data[..16], &mut samples);
        assert_eq!(
            samples,
            [
                SIM_TRIGGER_FILL,
                SIM_TRIGGER_FILL,
                1,
                -1,
                2,
                -2,
                SIM_TRIGGER_FILL,
                SIM_TRIGGER_FILL
            ]
        );

        card.sync_dma(BufferKind::Timestamp, &mut ts);
        assert_eq!(LittleEndian::read_u64(&ts[0..8]), 100);
        assert_eq!(LittleEndian::read_u64(&ts[16..24]), 102);
    }

    #[test]
    fn test_release_frees_space() {
        let script = vec![SimGate::new(0, vec![vec![0; 8], vec![0; 8]])];
        let (mut card, _, _) = started_card(script, 16);

        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_OK);
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_OK);
        // Кольцо заполнено
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_TIMEOUT);

        assert_eq!(card.acknowledge(BufferKind::Data, 8), ERR_OK);
        assert_eq!(card.available(BufferKind::Data), Ok((8, 8)));
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_OK);
        assert_eq!(card.acknowledge(BufferKind::Data, 32), ERR_INVALIDPARAM);
    }

    #[test]
    fn test_truncated_last_gate() {
        let script = vec![SimGate::new(0, vec![vec![7; 4], vec![7; 4]])];
        let (mut card, _, _) = started_card(script, 64);
        card.truncate_last = Some(1);
        card.issue_command(M2CMD_CARD_START);

        // 1 pre + 1 отсчёт, без post-trigger: 8 байт
        assert_eq!(card.issue_command(M2CMD_DATA_WAITDMA), ERR_OK);
        assert!(card.exhausted());
        assert_eq!(card.available(BufferKind::Data), Ok((8, 0)));
        assert_eq!(card.available(BufferKind::Timestamp), Ok((32, 0)));
    }
}
