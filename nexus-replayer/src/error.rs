use nexus_hal::HalError;
use nexus_types::ConsoleError;
use thiserror::Error;

pub type ReplayResult<T> = std::result::Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Ненулевой код драйвера; карта уже остановлена
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    /// Неверная конфигурация или данные последовательности
    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),

    /// Операция недопустима в текущем состоянии движка
    #[error("Invalid engine state: {0}")]
    State(String),

    /// Рабочий поток завершился паникой
    #[error("Tx worker thread panicked")]
    WorkerPanicked,
}

impl ReplayError {
    pub fn state<S: Into<String>>(s: S) -> Self {
        Self::State(s.into())
    }
}
