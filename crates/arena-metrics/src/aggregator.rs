//! Per-session utilization snapshots.
//!
//! Usage samples are best-effort: when any running pod has no sample the
//! aggregate usage for that resource is estimated as a fixed share of the
//! aggregate limit.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use arena_cluster::{ControlPlane, PodInfo, PodUsage};
use arena_core::SessionId;

use crate::quantity::{parse_cpu, parse_memory};

/// Network I/O is not measured; snapshots always carry this marker.
pub const NETWORK_IO_UNAVAILABLE: &str = "N/A";

/// One utilization reading for a session. Values are rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub requests_per_sec: f64,
    pub running_pods: usize,
    pub network_io: String,
}

impl MetricsSnapshot {
    /// The snapshot reported when the session's pods cannot be listed.
    pub fn empty(requests_per_sec: f64) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            requests_per_sec: round2(requests_per_sec),
            running_pods: 0,
            network_io: NETWORK_IO_UNAVAILABLE.to_string(),
        }
    }
}

/// Accumulated limits and usage across the running pods of a session.
#[derive(Debug, Default)]
struct Totals {
    cpu_limit: f64,
    memory_limit: f64,
    cpu_usage: f64,
    memory_usage: f64,
    missing_samples: bool,
    running: usize,
}

impl Totals {
    fn add_limits(&mut self, pod: &PodInfo) {
        self.cpu_limit += quantity_or_zero(pod.cpu_limit.as_deref(), parse_cpu);
        self.memory_limit += quantity_or_zero(pod.memory_limit.as_deref(), parse_memory);
        self.running += 1;
    }

    fn add_usage(&mut self, usage: Option<PodUsage>) {
        let Some(usage) = usage else {
            self.missing_samples = true;
            return;
        };
        for container in &usage.containers {
            self.cpu_usage += quantity_or_zero(container.cpu.as_deref(), parse_cpu);
            self.memory_usage += quantity_or_zero(container.memory.as_deref(), parse_memory);
        }
    }

    fn snapshot(self, fallback_ratio: f64, requests_per_sec: f64) -> MetricsSnapshot {
        let (cpu_usage, memory_usage) = if self.missing_samples {
            (self.cpu_limit * fallback_ratio, self.memory_limit * fallback_ratio)
        } else {
            (self.cpu_usage, self.memory_usage)
        };
        MetricsSnapshot {
            cpu_percent: round2(percent(cpu_usage, self.cpu_limit)),
            memory_percent: round2(percent(memory_usage, self.memory_limit)),
            requests_per_sec: round2(requests_per_sec),
            running_pods: self.running,
            network_io: NETWORK_IO_UNAVAILABLE.to_string(),
        }
    }
}

/// Computes [`MetricsSnapshot`]s for sessions living in one namespace.
#[derive(Clone)]
pub struct MetricsAggregator {
    cluster: Arc<dyn ControlPlane>,
    namespace: String,
    fallback_ratio: f64,
}

impl MetricsAggregator {
    pub fn new(cluster: Arc<dyn ControlPlane>, namespace: impl Into<String>, fallback_ratio: f64) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            fallback_ratio,
        }
    }

    /// Snapshot the running pods of `session`. `requests_per_sec` is the
    /// session's configured target rate and is reported as-is.
    pub async fn snapshot(&self, session: &SessionId, requests_per_sec: f64) -> MetricsSnapshot {
        let selector = session.label_selector();
        let pods = match self.cluster.list_pods(&self.namespace, Some(&selector)).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(session_id = %session, error = %e, "failed to list pods for metrics");
                return MetricsSnapshot::empty(requests_per_sec);
            }
        };

        let running: Vec<&PodInfo> = pods.iter().filter(|p| p.is_running()).collect();
        let samples = join_all(running.iter().map(|pod| self.usage_of(pod))).await;

        let mut totals = Totals::default();
        for (pod, usage) in running.into_iter().zip(samples) {
            totals.add_limits(pod);
            totals.add_usage(usage);
        }
        totals.snapshot(self.fallback_ratio, requests_per_sec)
    }

    async fn usage_of(&self, pod: &PodInfo) -> Option<PodUsage> {
        match self.cluster.pod_usage(&self.namespace, &pod.name).await {
            Ok(usage) => usage,
            Err(e) => {
                debug!(pod = %pod.name, error = %e, "usage sample unavailable");
                None
            }
        }
    }
}

fn quantity_or_zero<E: std::fmt::Display>(
    quantity: Option<&str>,
    parse: fn(&str) -> Result<f64, E>,
) -> f64 {
    let Some(quantity) = quantity else {
        return 0.0;
    };
    parse(quantity).unwrap_or_else(|e| {
        debug!(%quantity, error = %e, "ignoring malformed quantity");
        0.0
    })
}

fn percent(usage: f64, limit: f64) -> f64 {
    if limit > 0.0 { usage / limit * 100.0 } else { 0.0 }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
