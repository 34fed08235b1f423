//! Error taxonomy shared by both processes.
//!
//! Every failure is fatal to whoever issued the call: nothing here is retried.
//! Stale turn reports are not errors at all; the callback drops them.

use thiserror::Error;

/// Result type for worker, controller and transport operations
pub type GolResult<T> = Result<T, GolError>;

#[derive(Debug, Error)]
pub enum GolError {
    /// Listening on or dialling an endpoint failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A remote call failed after it was issued.
    #[error("call {method} failed: {message}")]
    Call { method: String, message: String },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid world: {0}")]
    InvalidWorld(String),

    #[error("worker busy: a run is already in progress")]
    Busy,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl GolError {
    pub fn call(method: &str, message: impl Into<String>) -> Self {
        GolError::Call {
            method: method.to_string(),
            message: message.into(),
        }
    }
}
