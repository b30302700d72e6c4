//! Control-plane error types.

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("api error ({code}): {reason}")]
    Api { code: u16, reason: String },

    #[error("client error: {0}")]
    Client(String),

    #[error("manifest render error: {0}")]
    Render(String),

    #[error("watch feed error: {0}")]
    Feed(String),
}

impl ClusterError {
    /// Whether the control plane rejected the request itself (4xx other than 404).
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClusterError::Api { code, .. } if (400..500).contains(code))
    }
}
