use crate::core::types::SubsystemId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NexusError {
    #[error("Subsystem already registered: {0}")]
    DuplicateSubsystem(SubsystemId),

    #[error("Invalid integration rule: {0}")]
    InvalidRule(String),

    #[error("Subsystem {id} failed: {message}")]
    SubsystemFailure { id: SubsystemId, message: String },

    #[error("Subsystem {0} timed out")]
    Timeout(SubsystemId),

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Emergency stop engaged; external intervention required")]
    EmergencyStopped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NexusError>;
