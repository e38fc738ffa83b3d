//! Error taxonomy for the decision engine.
//!
//! Only `Configuration` is fatal. Candidate-level errors (`InsufficientData`,
//! `DegenerateLeg`) are expected and normally swallowed by the caller;
//! collaborator errors are retried, logged and reported through the notifier.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Not enough bars to form a full evaluation window.
    #[error("insufficient data: need {needed} bars, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// A candidate pattern has a zero-length leg.
    #[error("degenerate leg {leg}")]
    DegenerateLeg { leg: &'static str },

    #[error("price feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("{op} timed out after {secs}s")]
    Timeout { op: String, secs: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Collaborator failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::FeedUnavailable(_) | CoreError::Execution(_) | CoreError::Timeout { .. }
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::Timeout { op: "http".to_string(), secs: 0 }
        } else {
            CoreError::FeedUnavailable(err.to_string())
        }
    }
}
