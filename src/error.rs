use thiserror::Error;

/// Errors that can occur while driving the page or managing the batch.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A bounded wait ran out before its condition held.
    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    /// The run's cancellation token was signalled.
    #[error("Automation was cancelled")]
    Cancelled,

    /// The searched entity legitimately does not exist on the target site.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An optional sub-stage could not finish; the main entity still exists.
    #[error("Sub-step failed: {0}")]
    SubstepFailed(String),

    /// The page did not have the shape a stage relies on.
    #[error("Unexpected page structure: {0}")]
    Structure(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Wrong page: {0}")]
    WrongPage(String),

    #[error("Control channel error: {0}")]
    Channel(String),

    #[error("{0}")]
    Other(String),
}

impl AutomationError {
    /// Whether the batch may continue after this error.
    ///
    /// `NotFound` and `SubstepFailed` skip the current item, `Cancelled` halts
    /// but keeps the queue intact. Everything else stops the batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AutomationError::NotFound(_)
                | AutomationError::SubstepFailed(_)
                | AutomationError::Cancelled
        )
    }
}

impl From<anyhow::Error> for AutomationError {
    fn from(err: anyhow::Error) -> Self {
        AutomationError::Other(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
