use thiserror::Error;

/// Результат для операций консоли, не связанных с железом.
pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;

/// Ошибки подготовки данных: проверка входа, синтез отсчётов, выравнивание
/// буферов. Все они фатальны и возникают до первого обращения к HAL.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Неверная форма входных данных или пределов
    #[error("Validation error: {0}")]
    Validation(String),

    /// Форма сигнала превышает настроенный предел канала
    #[error("Amplitude exceeded on channel {channel}: peak {peak:.4} > 1.0")]
    AmplitudeExceeded { channel: usize, peak: f64 },

    /// Размер кольцевого буфера не кратен notify или размеру кадра
    #[error("Buffer alignment error: {0}")]
    BufferAlignment(String),

    /// Число синтезированных отсчётов не совпадает с длиной блока
    #[error("Sample count mismatch: expected {expected}, found {found}")]
    SampleCount { expected: usize, found: usize },

    /// Ошибки ввода/вывода (автоконвертируются из std::io::Error)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибки (де)сериализации параметров
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsoleError {
    /// Удобные конструкторы
    pub fn validation<S: Into<String>>(s: S) -> Self {
        Self::Validation(s.into())
    }

    pub fn buffer_alignment<S: Into<String>>(s: S) -> Self {
        Self::BufferAlignment(s.into())
    }
}
