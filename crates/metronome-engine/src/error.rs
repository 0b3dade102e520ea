use metronome_task::ScheduleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
