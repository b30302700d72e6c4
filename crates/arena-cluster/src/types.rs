//! Cluster-facing types shared by both control-plane implementations.

use std::collections::BTreeMap;
use std::fmt;

use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

use crate::error::ClusterResult;

pub const PHASE_RUNNING: &str = "Running";
pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_UNKNOWN: &str = "Unknown";

/// The subset of a pod the engine cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Declared limits of the pod's first container, as quantity strings.
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

impl PodInfo {
    pub fn new(name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            labels: BTreeMap::new(),
            cpu_limit: None,
            memory_limit: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_limits(mut self, cpu: Option<&str>, memory: Option<&str>) -> Self {
        self.cpu_limit = cpu.map(str::to_string);
        self.memory_limit = memory.map(str::to_string);
        self
    }

    pub fn is_running(&self) -> bool {
        self.phase == PHASE_RUNNING
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodEventKind {
    Added,
    Modified,
    Deleted,
}

/// One change received from a pod feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PodEvent {
    pub kind: PodEventKind,
    pub pod: PodInfo,
}

/// Asynchronous pod change feed.
pub type PodFeed = BoxStream<'static, ClusterResult<PodEvent>>;

/// Usage of one container as reported by the metrics API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodUsage {
    pub containers: Vec<ContainerUsage>,
}

impl PodUsage {
    pub fn single(cpu: &str, memory: &str) -> Self {
        Self {
            containers: vec![ContainerUsage {
                cpu: Some(cpu.to_string()),
                memory: Some(memory.to_string()),
            }],
        }
    }
}

/// The four kinds of resource a session owns, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    Service,
    Autoscaler,
    Ingress,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::Autoscaler,
        ResourceKind::Ingress,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Autoscaler => "horizontalpodautoscaler",
            ResourceKind::Ingress => "ingress",
        };
        f.write_str(s)
    }
}

/// A rendered resource ready for submission.
#[derive(Debug, Clone)]
pub enum SessionResource {
    Deployment(Deployment),
    Service(Service),
    Autoscaler(HorizontalPodAutoscaler),
    Ingress(Ingress),
}

impl SessionResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            SessionResource::Deployment(_) => ResourceKind::Deployment,
            SessionResource::Service(_) => ResourceKind::Service,
            SessionResource::Autoscaler(_) => ResourceKind::Autoscaler,
            SessionResource::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn name(&self) -> &str {
        let name = match self {
            SessionResource::Deployment(d) => d.metadata.name.as_deref(),
            SessionResource::Service(s) => s.metadata.name.as_deref(),
            SessionResource::Autoscaler(a) => a.metadata.name.as_deref(),
            SessionResource::Ingress(i) => i.metadata.name.as_deref(),
        };
        name.unwrap_or_default()
    }
}

/// Whether `labels` satisfy an equality selector such as `app=x,game_id=y`.
///
/// `None` and the empty selector match everything. Terms without `=` are
/// treated as existence checks.
pub fn selector_matches(selector: Option<&str>, labels: &BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}
