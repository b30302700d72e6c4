//! Streaming error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
