//! Messages pushed to streaming clients.
//!
//! Messages are JSON objects tagged by an uppercase `type` field:
//!
//! ```text
//! {"type":"CONNECTED","message":"..."}
//! {"type":"ADDED","pod":"snake-abc-1","phase":"Running"}
//! {"type":"METRICS","cpu_percent":12.5,"memory_percent":40.0,"requests_per_sec":100.0,"running_pods":1,"network_io":"N/A"}
//! {"type":"ERROR","message":"..."}
//! ```

use serde::Serialize;

use arena_core::SessionId;
use arena_metrics::MetricsSnapshot;

use crate::bridge::WatchEvent;
use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamMessage {
    Connected { message: String },
    Added { pod: String, phase: String },
    Modified { pod: String, phase: String },
    Deleted { pod: String, phase: String },
    Metrics(MetricsSnapshot),
    Error { message: String },
}

impl StreamMessage {
    pub fn connected(session: &SessionId) -> Self {
        StreamMessage::Connected {
            message: format!("streaming session {session}"),
        }
    }

    pub fn connected_namespace(namespace: &str) -> Self {
        StreamMessage::Connected {
            message: format!("streaming pods in namespace {namespace}"),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<WatchEvent> for StreamMessage {
    fn from(event: WatchEvent) -> Self {
        match event {
            WatchEvent::Added(pod) => StreamMessage::Added {
                pod: pod.name,
                phase: pod.phase,
            },
            WatchEvent::Modified(pod) => StreamMessage::Modified {
                pod: pod.name,
                phase: pod.phase,
            },
            WatchEvent::Deleted(pod) => StreamMessage::Deleted {
                pod: pod.name,
                phase: pod.phase,
            },
            WatchEvent::Error(message) => StreamMessage::Error { message },
        }
    }
}
