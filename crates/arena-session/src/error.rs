//! Session engine error types.

use thiserror::Error;

use arena_cluster::{ClusterError, ResourceKind};
use arena_core::SessionId;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid rate {0}: must be a finite number >= 0")]
    InvalidRate(f64),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("teardown of session {session} incomplete, failed to delete: {}", kind_list(.failures))]
    Teardown {
        session: SessionId,
        failures: Vec<ResourceKind>,
    },
}

impl SessionError {
    pub fn unknown_session(session: &SessionId) -> Self {
        SessionError::NotFound(format!("session {session}"))
    }
}

fn kind_list(kinds: &[ResourceKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
