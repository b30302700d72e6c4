//! arena-stream — live session streams.
//!
//! One [`StreamController`] runs per client connection and owns the
//! session for as long as the connection lives:
//!
//! ```text
//!  ControlPlane::watch_pods ──► WatchBridge task ──mpsc──┐
//!                                                        ▼
//!  client frames ───────────────────────────────► StreamController ──► StreamSink
//!                                                        ▲   (CONNECTED, ADDED, MODIFIED,
//!  metrics tick ──► MetricsAggregator::snapshot ─────────┘    DELETED, METRICS, ERROR)
//!
//!  exit (disconnect | feed end | send failure) ──► SessionLease ──► SessionManager::kill
//! ```

pub mod bridge;
pub mod controller;
pub mod error;
pub mod message;

pub use bridge::{WatchBridge, WatchEvent};
pub use controller::{ClientFrames, ClientSignal, ExitReason, SessionLease, StreamController, StreamSink};
pub use error::StreamError;
pub use message::StreamMessage;
