use thiserror::Error;

/// Infrastructure failures raised by storage, configuration, and the recurrence engine.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// Batch generation left the series without the occurrence it just promised.
    /// Never a user error; callers must abort the surrounding unit of work.
    #[error("Recurrence invariant violated: {0}")]
    BrokenInvariant(String),
}

impl LedgerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::BrokenInvariant(_))
    }
}
