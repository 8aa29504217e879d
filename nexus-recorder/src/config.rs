use nexus_core::RingBuffer;
use nexus_hal::TIMESTAMP_RECORD_BYTES;
use nexus_types::{ConsoleError, ConsoleResult, BYTES_PER_SAMPLE};

/// Максимальное количество каналов дигитайзера.
pub const MAX_RX_CHANNELS: usize = 4;

/// Размер пары меток времени одного окна (байт).
pub const TIMESTAMP_PAIR_BYTES: usize = 2 * TIMESTAMP_RECORD_BYTES;

/// Конфигурация дигитайзера и буферов приёма.
#[derive(Debug, Clone, PartialEq)]
pub struct RxConfig {
    /// Путь к устройству
    pub device_path: String,
    /// Частота дискретизации (Гц)
    pub sample_rate: u64,
    /// Количество включённых каналов
    pub channels: usize,
    /// Диапазон входа каждого канала (мВ)
    pub max_amplitude: Vec<i32>,
    /// Согласование входа 50 Ом
    pub termination_50_ohm: bool,
    /// Отсчётов до триггера в каждом окне
    pub pre_trigger: usize,
    /// Отсчётов после конца окна (отбрасываются)
    pub post_trigger: usize,
    /// Размер кольцевого буфера данных (байт)
    pub ring_size: usize,
    /// Гранулярность DMA уведомлений буфера данных (байт)
    pub notify_size: usize,
    /// Размер буфера меток времени (байт)
    pub ts_ring_size: usize,
    /// Гранулярность уведомлений буфера меток времени (байт)
    pub ts_notify_size: usize,
    /// Сколько ждать данные окна после его меток времени (мс)
    pub gate_timeout_ms: u64,
    /// Таймаут ожидания DMA на карте (мс)
    pub dma_timeout_ms: u32,
    /// Ёмкость очереди окон
    pub queue_capacity: usize,
    /// Интервал вывода прогресса (секунды)
    pub stats_interval_secs: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RxConfig {
    /// Размер кадра: по одному отсчёту на канал.
    pub fn frame_bytes(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels
    }

    /// Масштаб каналов (мВ на единицу АЦП).
    pub fn rx_scaling(&self) -> Vec<f64> {
        self.max_amplitude
            .iter()
            .map(|&amp| amp as f64 / 32768.0)
            .collect()
    }

    /// Проверяет конфигурацию до обращения к карте.
    pub fn validate(&self) -> ConsoleResult<()> {
        if self.sample_rate == 0 {
            return Err(ConsoleError::validation("Rx sample rate must be > 0"));
        }

        if !(1..=MAX_RX_CHANNELS).contains(&self.channels) || !self.channels.is_power_of_two() {
            return Err(ConsoleError::validation(format!(
                "Rx channel count must be 1, 2 or 4, got {}",
                self.channels
            )));
        }

        if self.max_amplitude.len() != self.channels {
            return Err(ConsoleError::validation(format!(
                "Rx max amplitude list has {} entries for {} channels",
                self.max_amplitude.len(),
                self.channels
            )));
        }

        if self.max_amplitude.iter().any(|&a| a <= 0) {
            return Err(ConsoleError::validation("Rx max amplitude must be > 0"));
        }

        if self.queue_capacity == 0 {
            return Err(ConsoleError::validation("Gate queue capacity must be > 0"));
        }

        RingBuffer::check_geometry(self.ring_size, self.notify_size, self.frame_bytes())?;
        RingBuffer::check_geometry(self.ts_ring_size, self.ts_notify_size, TIMESTAMP_PAIR_BYTES)?;

        // Хвост меньше notify остаётся неподтверждённым
        if self.ring_size < 2 * self.notify_size {
            return Err(ConsoleError::buffer_alignment(format!(
                "Rx ring buffer {} must hold at least two notify chunks of {}",
                self.ring_size, self.notify_size
            )));
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для RxConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/spcm1".to_string(),
            sample_rate: 20_000_000,
            channels: 2,
            max_amplitude: vec![200, 200],
            termination_50_ohm: true,
            pre_trigger: 8,
            post_trigger: 2048, // 4096 / channels
            ring_size: 16 * 1024 * 1024,
            notify_size: 4096,
            ts_ring_size: 8192,
            ts_notify_size: 4096,
            gate_timeout_ms: 1000,
            dma_timeout_ms: 10,
            queue_capacity: 256,
            stats_interval_secs: 5,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
