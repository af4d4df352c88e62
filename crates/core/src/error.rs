use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("No schema registered for event type: {0}")]
    UnknownEventType(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
