use nexus_hal::HalError;
use nexus_types::ConsoleError;
use thiserror::Error;

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// Ненулевой код драйвера; карта уже остановлена
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    /// Неверная конфигурация приёмника
    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),

    /// Данные окна не пришли до таймаута. Неполное окно уже в очереди
    #[error("Gate {index} aborted: {received} of {expected} samples received")]
    GateAborted {
        index: usize,
        received: usize,
        expected: usize,
    },

    /// Очередь окон закрыта или остановлена при заполнении
    #[error("Gate queue error: {0}")]
    Queue(String),

    /// Операция недопустима в текущем состоянии движка
    #[error("Invalid engine state: {0}")]
    State(String),

    /// Рабочий поток завершился паникой
    #[error("Rx worker thread panicked")]
    WorkerPanicked,
}

impl RecorderError {
    pub fn queue<S: Into<String>>(s: S) -> Self {
        Self::Queue(s.into())
    }

    pub fn state<S: Into<String>>(s: S) -> Self {
        Self::State(s.into())
    }
}
