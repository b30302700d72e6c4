//! Session lifecycle operations against the control plane and the registry.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{error, info, warn};

use arena_cluster::{
    ClusterError, ControlPlane, ManifestParams, PodInfo, ResourceKind, SessionManifests,
};
use arena_core::{ArenaConfig, SessionId};

use crate::emitter::{LoadEmitter, RequestFn};
use crate::error::{SessionError, SessionResult};
use crate::registry::{RateChange, SessionRegistry, SessionView};

/// Result of one eat event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EatOutcome {
    pub eat_count: u64,
    /// Name of the pod deleted by this event, if any.
    pub deleted_pod: Option<String>,
}

impl EatOutcome {
    pub fn pod_deleted(&self) -> bool {
        self.deleted_pod.is_some()
    }
}

/// Result of one load request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub requests_per_sec: f64,
    /// Whether this request started the session's emitter.
    pub emitter_started: bool,
}

pub struct SessionManager {
    cluster: Arc<dyn ControlPlane>,
    registry: SessionRegistry,
    emitter: LoadEmitter,
    config: Arc<ArenaConfig>,
}

impl SessionManager {
    /// A manager whose emitters send requests through `send`.
    pub fn new(cluster: Arc<dyn ControlPlane>, config: Arc<ArenaConfig>, send: RequestFn) -> Self {
        let registry = SessionRegistry::new();
        let emitter = LoadEmitter::new(registry.clone(), send, config.clone());
        Self {
            cluster,
            registry,
            emitter,
            config,
        }
    }

    /// A manager whose emitters issue real HTTP requests.
    pub fn with_http(cluster: Arc<dyn ControlPlane>, config: Arc<ArenaConfig>) -> Self {
        let registry = SessionRegistry::new();
        let emitter = LoadEmitter::http(registry.clone(), config.clone());
        Self {
            cluster,
            registry,
            emitter,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn cluster(&self) -> Arc<dyn ControlPlane> {
        self.cluster.clone()
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Create a session's resources and register it.
    ///
    /// Resources are submitted in order and a failure is surfaced as-is;
    /// resources created before the failure are left in place.
    pub async fn init(&self) -> SessionResult<SessionId> {
        let session = SessionId::generate();
        let manifests = SessionManifests::render(ManifestParams {
            session: &session,
            namespace: &self.config.namespace,
            domain: &self.config.domain,
            image: &self.config.image,
        })?;

        for resource in manifests.into_resources() {
            self.cluster.create(&self.config.namespace, &resource).await?;
        }
        self.registry.register(session.clone()).await;

        info!(session_id = %session, namespace = %self.config.namespace, "session initialized");
        Ok(session)
    }

    /// Count an eat event and delete one Running pod every `delete_interval` events.
    pub async fn eat(&self, session: &SessionId) -> SessionResult<EatOutcome> {
        let eat_count = self.registry.record_eat(session).await?;
        if eat_count % self.config.delete_interval.max(1) != 0 {
            return Ok(EatOutcome {
                eat_count,
                deleted_pod: None,
            });
        }

        let selector = session.label_selector();
        let pods = self
            .cluster
            .list_pods(&self.config.namespace, Some(&selector))
            .await?;
        if pods.is_empty() {
            return Err(SessionError::NotFound(format!("pods of session {session}")));
        }

        let Some(victim) = pods.iter().find(|p| p.is_running()) else {
            info!(session_id = %session, eat_count, "no running pod to delete");
            return Ok(EatOutcome {
                eat_count,
                deleted_pod: None,
            });
        };
        self.cluster
            .delete_pod(&self.config.namespace, &victim.name)
            .await?;

        info!(session_id = %session, eat_count, pod = %victim.name, "pod eaten");
        Ok(EatOutcome {
            eat_count,
            deleted_pod: Some(victim.name.clone()),
        })
    }

    /// Raise the target rate by the configured increment, or set it, and
    /// make sure the session's emitter is running.
    pub async fn load(&self, session: &SessionId, rate: Option<f64>) -> SessionResult<LoadOutcome> {
        let change = match rate {
            Some(rate) if !rate.is_finite() || rate < 0.0 => {
                return Err(SessionError::InvalidRate(rate));
            }
            Some(rate) => RateChange::Set(rate),
            None => RateChange::Increment(self.config.load_increment),
        };

        let requests_per_sec = self.registry.update_rate(session, change).await?;
        let emitter_started = self
            .registry
            .ensure_emitter(session, |stop| self.emitter.spawn(session.clone(), stop))
            .await?;

        info!(session_id = %session, requests_per_sec, emitter_started, "load updated");
        Ok(LoadOutcome {
            requests_per_sec,
            emitter_started,
        })
    }

    /// Delete all of a session's resources and forget it.
    ///
    /// Missing resources are fine, so repeating a kill is not an error. The
    /// registry entry is purged even when a deletion fails.
    pub async fn kill(&self, session: &SessionId) -> SessionResult<()> {
        let name = session.resource_name();
        let mut failures = Vec::new();

        for kind in ResourceKind::ALL {
            match self.cluster.delete(&self.config.namespace, kind, &name).await {
                Ok(_) | Err(ClusterError::NotFound(_)) => {}
                Err(e) => {
                    error!(session_id = %session, %kind, error = %e, "failed to delete session resource");
                    failures.push(kind);
                }
            }
        }

        let existed = self.registry.remove(session).await.is_some();
        if !failures.is_empty() {
            return Err(SessionError::Teardown {
                session: session.clone(),
                failures,
            });
        }
        info!(session_id = %session, existed, "session killed");
        Ok(())
    }

    pub async fn describe(&self, session: &SessionId) -> SessionResult<SessionView> {
        self.registry
            .get(session)
            .await
            .ok_or_else(|| SessionError::unknown_session(session))
    }

    pub async fn sessions(&self) -> Vec<SessionView> {
        self.registry.list().await
    }

    // ── Chaos ───────────────────────────────────────────────────────

    /// Delete one pod of the chaos namespace picked uniformly at random.
    pub async fn chaos_random(&self) -> SessionResult<String> {
        let namespace = self.config.chaos_namespace();
        let pods = self.cluster.list_pods(namespace, None).await?;
        let victim = pods
            .choose(&mut rand::rng())
            .map(|p| p.name.clone())
            .ok_or_else(|| SessionError::NotFound(format!("pods in namespace {namespace}")))?;

        self.cluster.delete_pod(namespace, &victim).await?;
        warn!(pod = %victim, %namespace, "chaos: random pod deleted");
        Ok(victim)
    }

    pub async fn list_pods(&self) -> SessionResult<Vec<PodInfo>> {
        Ok(self
            .cluster
            .list_pods(self.config.chaos_namespace(), None)
            .await?)
    }

    pub async fn delete_pod(&self, name: &str) -> SessionResult<()> {
        let namespace = self.config.chaos_namespace();
        self.cluster
            .delete_pod(namespace, name)
            .await
            .map_err(|e| match e {
                ClusterError::NotFound(_) => SessionError::NotFound(format!("pod {name}")),
                other => other.into(),
            })?;
        info!(pod = %name, %namespace, "pod deleted");
        Ok(())
    }
}
