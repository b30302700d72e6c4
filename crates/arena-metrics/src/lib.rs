//! arena-metrics — utilization metrics for Chaos Arena sessions.
//!
//! Turns the declared limits and sampled usage of a session's pods into
//! a single utilization snapshot, and renders registry state for
//! Prometheus scraping.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator
//!   ├── list_pods(game_id=<id>)   ← control plane
//!   ├── pod_usage(pod)            ← control plane, optional per pod
//!   └── snapshot() → MetricsSnapshot (percentages, running pods)
//!
//! quantity
//!   └── parse_cpu() / parse_memory() → cores / bytes
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod prometheus;
pub mod quantity;

pub use aggregator::{MetricsAggregator, MetricsSnapshot, NETWORK_IO_UNAVAILABLE};
pub use prometheus::{SessionGauges, render_prometheus};
pub use quantity::{QuantityError, parse_cpu, parse_memory};
