//! Simulated cluster.
//!
//! `InMemoryControlPlane` keeps pods and session resources in memory and
//! behaves like a tiny Kubernetes: creating a Deployment materializes its
//! pods, deleting a pod owned by a live Deployment materializes a
//! replacement, and every pod change is broadcast to open watch feeds. It
//! backs the test suites and the daemon's `--simulate` mode.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::control::ControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{
    PHASE_RUNNING, PodEvent, PodEventKind, PodFeed, PodInfo, PodUsage, ResourceKind,
    SessionResource, selector_matches,
};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum FeedItem {
    Event { namespace: String, event: PodEvent },
    Error(String),
    Close,
}

#[derive(Debug, Clone)]
struct StoredPod {
    info: PodInfo,
    owner: Option<String>,
}

#[derive(Debug, Clone)]
struct PodTemplate {
    labels: BTreeMap<String, String>,
    cpu_limit: Option<String>,
    memory_limit: Option<String>,
}

impl PodTemplate {
    fn from_deployment(deployment: &Deployment) -> Self {
        let template = deployment.spec.as_ref().map(|s| &s.template);
        let limits = template
            .and_then(|t| t.spec.as_ref())
            .and_then(|s| s.containers.first())
            .and_then(|c| c.resources.as_ref())
            .and_then(|r| r.limits.as_ref());
        Self {
            labels: template
                .and_then(|t| t.metadata.as_ref())
                .and_then(|m| m.labels.clone())
                .unwrap_or_default(),
            cpu_limit: limits.and_then(|l| l.get("cpu")).map(|q| q.0.clone()),
            memory_limit: limits.and_then(|l| l.get("memory")).map(|q| q.0.clone()),
        }
    }
}

type Key = (String, String);

#[derive(Default)]
struct ClusterState {
    pods: BTreeMap<Key, StoredPod>,
    resources: BTreeSet<(String, ResourceKind, String)>,
    templates: BTreeMap<Key, PodTemplate>,
    usage: HashMap<Key, PodUsage>,
    usage_unavailable: bool,
    failing_kind: Option<ResourceKind>,
}

struct Inner {
    state: Mutex<ClusterState>,
    feed: broadcast::Sender<FeedItem>,
    replicas: u32,
    seq: AtomicU64,
}

/// In-memory `ControlPlane`. Cloning shares the same simulated cluster.
#[derive(Clone)]
pub struct InMemoryControlPlane {
    inner: Arc<Inner>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlPlane {
    /// A simulated cluster that runs one pod per Deployment.
    pub fn new() -> Self {
        Self::with_replicas(1)
    }

    /// A simulated cluster that runs `replicas` pods per Deployment.
    pub fn with_replicas(replicas: u32) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ClusterState::default()),
                feed,
                replicas,
                seq: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, namespace: &str, kind: PodEventKind, pod: &PodInfo) {
        // No open feeds is not an error.
        let _ = self.inner.feed.send(FeedItem::Event {
            namespace: namespace.to_string(),
            event: PodEvent {
                kind,
                pod: pod.clone(),
            },
        });
    }

    fn spawn_pod(&self, state: &mut ClusterState, namespace: &str, owner: &str, template: &PodTemplate) {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let info = PodInfo {
            name: format!("{owner}-{seq:05x}"),
            phase: PHASE_RUNNING.to_string(),
            labels: template.labels.clone(),
            cpu_limit: template.cpu_limit.clone(),
            memory_limit: template.memory_limit.clone(),
        };
        self.emit(namespace, PodEventKind::Added, &info);
        state.pods.insert(
            (namespace.to_string(), info.name.clone()),
            StoredPod {
                info,
                owner: Some(owner.to_string()),
            },
        );
    }

    // ── Test and simulation hooks ──────────────────────────────────

    /// Add a free-standing pod (no owning Deployment).
    pub fn insert_pod(&self, namespace: &str, pod: PodInfo) {
        let mut state = self.state();
        self.emit(namespace, PodEventKind::Added, &pod);
        state.pods.insert(
            (namespace.to_string(), pod.name.clone()),
            StoredPod {
                info: pod,
                owner: None,
            },
        );
    }

    /// Change a pod's phase. Returns false if the pod does not exist.
    pub fn set_phase(&self, namespace: &str, name: &str, phase: &str) -> bool {
        let mut state = self.state();
        let Some(stored) = state.pods.get_mut(&(namespace.to_string(), name.to_string())) else {
            return false;
        };
        stored.info.phase = phase.to_string();
        let info = stored.info.clone();
        self.emit(namespace, PodEventKind::Modified, &info);
        true
    }

    pub fn set_usage(&self, namespace: &str, name: &str, usage: PodUsage) {
        self.state()
            .usage
            .insert((namespace.to_string(), name.to_string()), usage);
    }

    /// Make `pod_usage` fail as if the metrics API were not installed.
    pub fn set_usage_available(&self, available: bool) {
        self.state().usage_unavailable = !available;
    }

    /// Make deletes of existing resources of `kind` fail with a server error.
    pub fn fail_deletes_of(&self, kind: Option<ResourceKind>) {
        self.state().failing_kind = kind;
    }

    /// Push an error to every open feed.
    pub fn inject_feed_error(&self, message: &str) {
        let _ = self.inner.feed.send(FeedItem::Error(message.to_string()));
    }

    /// End every open feed.
    pub fn close_feeds(&self) {
        let _ = self.inner.feed.send(FeedItem::Close);
    }

    pub fn has_resource(&self, namespace: &str, kind: ResourceKind, name: &str) -> bool {
        self.state()
            .resources
            .contains(&(namespace.to_string(), kind, name.to_string()))
    }

    pub fn resource_count(&self, namespace: &str) -> usize {
        self.state()
            .resources
            .iter()
            .filter(|(ns, _, _)| ns == namespace)
            .count()
    }

    pub fn pods(&self, namespace: &str) -> Vec<PodInfo> {
        self.state()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, stored)| stored.info.clone())
            .collect()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn list_pods(&self, namespace: &str, selector: Option<&str>) -> ClusterResult<Vec<PodInfo>> {
        Ok(self
            .pods(namespace)
            .into_iter()
            .filter(|pod| selector_matches(selector, &pod.labels))
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        let stored = state
            .pods
            .remove(&key)
            .ok_or_else(|| ClusterError::NotFound(format!("pod {name}")))?;
        state.usage.remove(&key);
        self.emit(namespace, PodEventKind::Deleted, &stored.info);

        // The owning Deployment replaces the pod, as a ReplicaSet would.
        if let Some(owner) = stored.owner {
            let template = state
                .templates
                .get(&(namespace.to_string(), owner.clone()))
                .cloned();
            if let Some(template) = template {
                self.spawn_pod(&mut state, namespace, &owner, &template);
            }
        }
        Ok(())
    }

    async fn watch_pods(&self, namespace: &str, selector: Option<&str>) -> ClusterResult<PodFeed> {
        let rx = self.inner.feed.subscribe();
        let namespace = namespace.to_string();
        let selector = selector.map(str::to_string);

        let feed = stream::unfold(rx, move |mut rx| {
            let namespace = namespace.clone();
            let selector = selector.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(FeedItem::Event { namespace: ns, event }) => {
                            if ns == namespace && selector_matches(selector.as_deref(), &event.pod.labels) {
                                return Some((Ok(event), rx));
                            }
                        }
                        Ok(FeedItem::Error(message)) => {
                            return Some((Err(ClusterError::Feed(message)), rx));
                        }
                        Ok(FeedItem::Close) | Err(RecvError::Closed) => return None,
                        Err(RecvError::Lagged(skipped)) => {
                            let message = format!("feed lagged, {skipped} events dropped");
                            return Some((Err(ClusterError::Feed(message)), rx));
                        }
                    }
                }
            }
        });
        Ok(feed.boxed())
    }

    async fn pod_usage(&self, namespace: &str, name: &str) -> ClusterResult<Option<PodUsage>> {
        let state = self.state();
        if state.usage_unavailable {
            return Err(ClusterError::Api {
                code: 503,
                reason: "metrics API unavailable".to_string(),
            });
        }
        Ok(state
            .usage
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, namespace: &str, resource: &SessionResource) -> ClusterResult<()> {
        let mut state = self.state();
        let name = resource.name().to_string();
        let key = (namespace.to_string(), resource.kind(), name.clone());
        if state.resources.contains(&key) {
            return Err(ClusterError::Api {
                code: 409,
                reason: format!("{} {name} already exists", resource.kind()),
            });
        }
        state.resources.insert(key);

        if let SessionResource::Deployment(deployment) = resource {
            let template = PodTemplate::from_deployment(deployment);
            for _ in 0..self.inner.replicas {
                self.spawn_pod(&mut state, namespace, &name, &template);
            }
            state
                .templates
                .insert((namespace.to_string(), name.clone()), template);
        }
        debug!(kind = %resource.kind(), %name, %namespace, "simulated resource created");
        Ok(())
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> ClusterResult<bool> {
        let mut state = self.state();
        let key = (namespace.to_string(), kind, name.to_string());
        if !state.resources.contains(&key) {
            return Ok(false);
        }
        if state.failing_kind == Some(kind) {
            return Err(ClusterError::Api {
                code: 500,
                reason: format!("simulated failure deleting {kind} {name}"),
            });
        }
        state.resources.remove(&key);

        if kind == ResourceKind::Deployment {
            state.templates.remove(&(namespace.to_string(), name.to_string()));
            let owned: Vec<Key> = state
                .pods
                .iter()
                .filter(|((ns, _), pod)| ns == namespace && pod.owner.as_deref() == Some(name))
                .map(|(key, _)| key.clone())
                .collect();
            for key in owned {
                if let Some(stored) = state.pods.remove(&key) {
                    state.usage.remove(&key);
                    self.emit(namespace, PodEventKind::Deleted, &stored.info);
                }
            }
        }
        debug!(%kind, %name, %namespace, "simulated resource deleted");
        Ok(true)
    }
}
