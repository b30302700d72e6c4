//! Session manifests — askama templates rendered into typed objects.

use askama::Template;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use serde::de::DeserializeOwned;

use arena_core::SessionId;

use crate::error::{ClusterError, ClusterResult};
use crate::types::SessionResource;

/// Inputs shared by all four templates.
#[derive(Debug, Clone, Copy)]
pub struct ManifestParams<'a> {
    pub session: &'a SessionId,
    pub namespace: &'a str,
    pub domain: &'a str,
    pub image: &'a str,
}

#[derive(Template)]
#[template(path = "deployment.yaml", escape = "none")]
struct DeploymentTemplate<'a> {
    name: &'a str,
    namespace: &'a str,
    session_id: &'a str,
    image: &'a str,
}

#[derive(Template)]
#[template(path = "service.yaml", escape = "none")]
struct ServiceTemplate<'a> {
    name: &'a str,
    namespace: &'a str,
    session_id: &'a str,
}

#[derive(Template)]
#[template(path = "autoscaling.yaml", escape = "none")]
struct AutoscalerTemplate<'a> {
    name: &'a str,
    namespace: &'a str,
    session_id: &'a str,
}

#[derive(Template)]
#[template(path = "ingress.yaml", escape = "none")]
struct IngressTemplate<'a> {
    name: &'a str,
    namespace: &'a str,
    session_id: &'a str,
    domain: &'a str,
}

/// The rendered resources of one session.
#[derive(Debug, Clone)]
pub struct SessionManifests {
    pub deployment: Deployment,
    pub service: Service,
    pub autoscaler: HorizontalPodAutoscaler,
    pub ingress: Ingress,
}

impl SessionManifests {
    pub fn render(params: ManifestParams<'_>) -> ClusterResult<Self> {
        let name = params.session.resource_name();
        let session_id = params.session.as_str();

        let deployment = parse(
            "deployment",
            DeploymentTemplate {
                name: &name,
                namespace: params.namespace,
                session_id,
                image: params.image,
            }
            .render(),
        )?;
        let service = parse(
            "service",
            ServiceTemplate {
                name: &name,
                namespace: params.namespace,
                session_id,
            }
            .render(),
        )?;
        let autoscaler = parse(
            "autoscaler",
            AutoscalerTemplate {
                name: &name,
                namespace: params.namespace,
                session_id,
            }
            .render(),
        )?;
        let ingress = parse(
            "ingress",
            IngressTemplate {
                name: &name,
                namespace: params.namespace,
                session_id,
                domain: params.domain,
            }
            .render(),
        )?;

        Ok(Self {
            deployment,
            service,
            autoscaler,
            ingress,
        })
    }

    /// Resources in submission order.
    pub fn into_resources(self) -> [SessionResource; 4] {
        [
            SessionResource::Deployment(self.deployment),
            SessionResource::Service(self.service),
            SessionResource::Autoscaler(self.autoscaler),
            SessionResource::Ingress(self.ingress),
        ]
    }
}

fn parse<T: DeserializeOwned>(what: &str, rendered: askama::Result<String>) -> ClusterResult<T> {
    let text = rendered.map_err(|e| ClusterError::Render(format!("{what}: {e}")))?;
    serde_yaml::from_str(&text).map_err(|e| ClusterError::Render(format!("{what}: {e}")))
}
