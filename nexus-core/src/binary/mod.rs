//! Типизированные представления байтовых буферов.
//!
//! Все буферы DMA хранят отсчёты int16 в порядке little-endian с шагом
//! 2 байта. Кольцевой буфер принадлежит одному движку и не разделяется;
//! представления здесь только копируют данные из него или в него.

pub mod read;
pub mod write;

pub use read::*;
pub use write::*;

use nexus_types::{UnrolledSequence, NUM_TX_CHANNELS};

use crate::{decode_analog, decode_digital};

/// Бинарные операции над развёрнутой последовательностью.
pub trait UnrolledSequenceExt {
    /// Поток байт для генератора: блоки подряд, little-endian.
    fn to_le_bytes(&self) -> Vec<u8>;

    /// Аналоговые значения канала блока. Для каналов 1..=3 старший бит
    /// снимается.
    fn analog(
        &self,
        block: usize,
        channel: usize,
    ) -> Vec<i16>;

    /// Цифровой сигнал канала 1..=3 блока.
    fn digital(
        &self,
        block: usize,
        channel: usize,
    ) -> Vec<bool>;
}

impl UnrolledSequenceExt for UnrolledSequence {
    fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes());
        for block in &self.blocks {
            out.extend_from_slice(&samples_to_le_bytes(block));
        }
        out
    }

    fn analog(
        &self,
        block: usize,
        channel: usize,
    ) -> Vec<i16> {
        let raw = self.channel(block, channel);
        if channel == 0 || channel >= NUM_TX_CHANNELS {
            return raw;
        }
        raw.into_iter().map(decode_analog).collect()
    }

    fn digital(
        &self,
        block: usize,
        channel: usize,
    ) -> Vec<bool> {
        self.channel(block, channel)
            .into_iter()
            .map(decode_digital)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_le_layout() {
        let bytes = samples_to_le_bytes(&[1, -2, 0x1234]);

        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(read_samples_le(&bytes), vec![1, -2, 0x1234]);
        assert_eq!(read_samples_le(&bytes[..5]), vec![1, -2]);
    }

    #[test]
    fn test_read_timestamp() {
        let mut record = [0u8; 16];
        record[..8].copy_from_slice(&40_000u64.to_le_bytes());

        assert_eq!(read_timestamp(&record), Some(40_000));
        assert_eq!(read_timestamp(&record[..4]), None);
    }

    #[test]
    fn test_sequence_views() {
        let seq = UnrolledSequence {
            blocks: vec![vec![100, i16::MIN, 2, 0x4000]],
            dwell_time: 1e-7,
            ..Default::default()
        };

        assert_eq!(seq.to_le_bytes().len(), 8);
        assert_eq!(seq.analog(0, 0), vec![100]);
        assert_eq!(seq.analog(0, 1), vec![0]);
        assert_eq!(seq.analog(0, 2), vec![4]);
        assert_eq!(seq.analog(0, 3), vec![i16::MIN]);
        assert_eq!(seq.digital(0, 1), vec![true]);
        assert_eq!(seq.digital(0, 3), vec![false]);
    }
}
