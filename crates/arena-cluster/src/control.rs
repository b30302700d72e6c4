//! The `ControlPlane` trait.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::types::{PodFeed, PodInfo, PodUsage, ResourceKind, SessionResource};

/// Operations the session engine performs against the cluster.
///
/// Implementations must be cheap to share (`Arc<dyn ControlPlane>`); every
/// call is independent and carries the namespace it targets.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// List pods, optionally filtered by an equality label selector (`k=v,k2=v2`).
    async fn list_pods(&self, namespace: &str, selector: Option<&str>) -> ClusterResult<Vec<PodInfo>>;

    /// Delete one pod. Returns `ClusterError::NotFound` if it does not exist.
    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Open a change feed of pod events. The stream ends when the feed ends;
    /// an `Err` item means the feed failed and no further items follow.
    async fn watch_pods(&self, namespace: &str, selector: Option<&str>) -> ClusterResult<PodFeed>;

    /// Latest usage sample for a pod. `Ok(None)` means no sample exists yet;
    /// an error means the usage source is unavailable.
    async fn pod_usage(&self, namespace: &str, name: &str) -> ClusterResult<Option<PodUsage>>;

    /// Submit a rendered session resource.
    async fn create(&self, namespace: &str, resource: &SessionResource) -> ClusterResult<()>;

    /// Delete a session resource. Returns `false` if it was already absent.
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> ClusterResult<bool>;
}
