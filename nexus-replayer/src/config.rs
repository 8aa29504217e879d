use nexus_core::RingBuffer;
use nexus_types::{ConsoleError, ConsoleResult, BYTES_PER_SAMPLE, NUM_TX_CHANNELS};

/// Конфигурация карты генератора и кольцевого буфера передачи.
#[derive(Debug, Clone, PartialEq)]
pub struct TxConfig {
    /// Путь к устройству
    pub device_path: String,
    /// Частота дискретизации (Гц)
    pub sample_rate: u64,
    /// Размер кольцевого буфера (байт)
    pub ring_size: usize,
    /// Гранулярность DMA уведомлений (байт)
    pub notify_size: usize,
    /// Размах выхода каналов RF, Gx, Gy, Gz (мВ)
    pub max_amplitude: [i32; NUM_TX_CHANNELS],
    /// Тип выходного фильтра каналов
    pub filter: [i32; NUM_TX_CHANNELS],
    /// Воспроизводить последовательность по кругу до остановки
    pub loop_playback: bool,
    /// Таймаут ожидания DMA на карте (мс)
    pub dma_timeout_ms: u32,
    /// Интервал вывода прогресса (секунды)
    pub stats_interval_secs: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TxConfig {
    /// Размер одного кадра (4 канала по 2 байта).
    pub const fn frame_bytes() -> usize {
        BYTES_PER_SAMPLE * NUM_TX_CHANNELS
    }

    /// Период дискретизации (секунды).
    pub fn dwell_time(&self) -> f64 {
        1.0 / self.sample_rate as f64
    }

    /// Пределы выхода каналов для развёртки.
    pub fn output_limits(&self) -> [f64; NUM_TX_CHANNELS] {
        self.max_amplitude.map(|v| v as f64)
    }

    /// Проверяет конфигурацию до обращения к карте.
    pub fn validate(&self) -> ConsoleResult<()> {
        if self.sample_rate == 0 {
            return Err(ConsoleError::validation("Tx sample rate must be > 0"));
        }

        if let Some(ch) = self.max_amplitude.iter().position(|&a| a <= 0) {
            return Err(ConsoleError::validation(format!(
                "Tx max amplitude of channel {ch} must be > 0, got {}",
                self.max_amplitude[ch]
            )));
        }

        RingBuffer::check_geometry(self.ring_size, self.notify_size, Self::frame_bytes())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для TxConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/spcm0".to_string(),
            sample_rate: 20_000_000,
            ring_size: 16 * 1024 * 1024,
            notify_size: 1024 * 1024, // 1/16 кольца
            max_amplitude: [200, 6000, 6000, 6000],
            filter: [0; NUM_TX_CHANNELS],
            loop_playback: false,
            dma_timeout_ms: 10,
            stats_interval_secs: 5,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
