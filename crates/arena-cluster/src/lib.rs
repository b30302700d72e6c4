//! arena-cluster — the control-plane boundary of Chaos Arena.
//!
//! Everything the session engine needs from the cluster goes through the
//! [`ControlPlane`] trait: listing, watching and deleting pods, reading pod
//! usage samples, and creating or deleting the four resources a session
//! owns. Two implementations ship here:
//!
//! ```text
//! ControlPlane
//!   ├── KubeControlPlane      kube client, in-cluster or kubeconfig
//!   └── InMemoryControlPlane  simulated cluster (tests, --simulate)
//! ```
//!
//! Session manifests are rendered from askama templates in `templates/`
//! and parsed into typed `k8s-openapi` objects before submission.

pub mod control;
pub mod error;
pub mod kubernetes;
pub mod manifests;
pub mod memory;
pub mod types;

pub use control::ControlPlane;
pub use error::{ClusterError, ClusterResult};
pub use kubernetes::KubeControlPlane;
pub use manifests::{ManifestParams, SessionManifests};
pub use memory::InMemoryControlPlane;
pub use types::*;
