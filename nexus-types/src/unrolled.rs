/// Количество каналов генератора: RF, Gx, Gy, Gz.
pub const NUM_TX_CHANNELS: usize = 4;

/// Байт на один отсчёт одного канала.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Развёрнутая последовательность: по одному массиву int16 на блок.
///
/// Отсчёты каналов чередуются `[rf, gx, gy, gz]` на каждую позицию. В битах
/// 15 каналов Gx/Gy/Gz хранятся цифровые сигналы (строб АЦП, опорный такт,
/// разблокировка RF); канал RF не упакован.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnrolledSequence {
    /// Блоки по `4 × n_samples` отсчётов
    pub blocks: Vec<Vec<i16>>,
    /// Суммарное количество отсчётов на канал
    pub sample_count: u64,
    /// Период дискретизации (секунды)
    pub dwell_time: f64,
    /// Частота Лармора, использованная при синтезе (Гц)
    pub larmor_frequency: f64,
    /// Длительность последовательности (секунды)
    pub duration: f64,
    /// Количество ADC событий
    pub adc_count: usize,
    pub rf_to_volt: f64,
    pub grad_to_volt: f64,
}

impl UnrolledSequence {
    /// Отсчётов на канал в каждом блоке.
    pub fn samples_per_block(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .map(|b| b.len() / NUM_TX_CHANNELS)
            .collect()
    }

    /// Размер всей последовательности в байтах.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.len() * BYTES_PER_SAMPLE).sum()
    }

    /// Сырые отсчёты одного канала блока.
    pub fn channel(
        &self,
        block: usize,
        channel: usize,
    ) -> Vec<i16> {
        self.blocks
            .get(block)
            .map(|b| {
                b.iter()
                    .skip(channel)
                    .step_by(NUM_TX_CHANNELS)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Частота дискретизации (Гц)
    pub fn sample_rate(&self) -> f64 {
        1.0 / self.dwell_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_deinterleave() {
        let seq = UnrolledSequence {
            blocks: vec![vec![1, 2, 3, 4, 5, 6, 7, 8], vec![9, 10, 11, 12]],
            sample_count: 3,
            dwell_time: 5e-8,
            ..Default::default()
        };

        assert_eq!(seq.channel(0, 0), vec![1, 5]);
        assert_eq!(seq.channel(0, 3), vec![4, 8]);
        assert_eq!(seq.channel(1, 2), vec![11]);
        assert!(seq.channel(2, 0).is_empty());
        assert_eq!(seq.samples_per_block(), vec![2, 1]);
        assert_eq!(seq.total_bytes(), 24);
    }
}
