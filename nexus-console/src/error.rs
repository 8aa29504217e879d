use nexus_recorder::RecorderError;
use nexus_replayer::ReplayError;
use nexus_types::ConsoleError;
use thiserror::Error;

use crate::AcquisitionData;

pub type ControlResult<T> = std::result::Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Собрано меньше окон, чем ожидалось. Полученные данные сохранены
    #[error("Acquisition incomplete: {received} of {expected} gates captured")]
    AcquisitionIncomplete {
        received: usize,
        expected: usize,
        data: Box<AcquisitionData>,
    },

    /// Последовательность ещё не задана
    #[error("No sequence configured")]
    NotConfigured,

    #[error("Tx error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Rx error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),
}

impl ControlError {
    /// Частичные данные, если они есть.
    pub fn into_partial(self) -> Option<AcquisitionData> {
        match self {
            ControlError::AcquisitionIncomplete { data, .. } => Some(*data),
            _ => None,
        }
    }
}
