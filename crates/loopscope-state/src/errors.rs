use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid state payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}
