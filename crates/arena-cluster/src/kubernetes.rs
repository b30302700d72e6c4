//! `ControlPlane` backed by a live Kubernetes API server.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
    WatchEvent, WatchParams,
};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::control::ControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{
    ContainerUsage, PHASE_UNKNOWN, PodEvent, PodEventKind, PodFeed, PodInfo, PodUsage,
    ResourceKind, SessionResource,
};

/// Server-side watch window. The API server closes a watch after this many
/// seconds; the feed transparently reopens it from the last seen version.
const WATCH_WINDOW_SECS: u32 = 290;

/// Pause before a watch is reopened.
const RESUME_DELAY: Duration = Duration::from_secs(1);

/// Status code of a watch whose resourceVersion has been compacted away.
const EXPIRED: u16 = 410;

#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster credentials, falling back to the local kubeconfig.
    pub async fn connect() -> ClusterResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        info!("kubernetes client initialized");
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_named<K>(&self, namespace: &str, object: &K) -> ClusterResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), object)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, object.meta().name.as_deref().unwrap_or("resource")))
    }

    async fn delete_named<K>(&self, namespace: &str, name: &str) -> ClusterResult<bool>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(map_kube_error(e, name)),
        }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn list_pods(&self, namespace: &str, selector: Option<&str>) -> ClusterResult<Vec<PodInfo>> {
        let pods = self
            .pods(namespace)
            .list(&list_params(selector))
            .await
            .map_err(|e| map_kube_error(e, namespace))?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, name))
    }

    async fn watch_pods(&self, namespace: &str, selector: Option<&str>) -> ClusterResult<PodFeed> {
        let mut params = WatchParams::default().timeout(WATCH_WINDOW_SECS);
        if let Some(selector) = selector {
            params = params.labels(selector);
        }

        let mut state = FeedState {
            api: self.pods(namespace),
            params,
            relist: list_params(selector).limit(1),
            version: String::new(),
            inner: None,
            reopen: false,
            done: false,
        };
        // Start from the current list version so only changes after it are fed.
        state.refresh_version().await?;
        Ok(resuming_feed(state))
    }

    async fn pod_usage(&self, namespace: &str, name: &str) -> ClusterResult<Option<PodUsage>> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);

        let object = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, name))?;
        Ok(object.map(|o| parse_usage(&o.data)))
    }

    async fn create(&self, namespace: &str, resource: &SessionResource) -> ClusterResult<()> {
        debug!(kind = %resource.kind(), name = resource.name(), %namespace, "creating resource");
        match resource {
            SessionResource::Deployment(d) => self.create_named(namespace, d).await,
            SessionResource::Service(s) => self.create_named(namespace, s).await,
            SessionResource::Autoscaler(a) => self.create_named(namespace, a).await,
            SessionResource::Ingress(i) => self.create_named(namespace, i).await,
        }
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> ClusterResult<bool> {
        match kind {
            ResourceKind::Deployment => self.delete_named::<Deployment>(namespace, name).await,
            ResourceKind::Service => self.delete_named::<Service>(namespace, name).await,
            ResourceKind::Autoscaler => {
                self.delete_named::<HorizontalPodAutoscaler>(namespace, name).await
            }
            ResourceKind::Ingress => self.delete_named::<Ingress>(namespace, name).await,
        }
    }
}

fn list_params(selector: Option<&str>) -> ListParams {
    match selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

fn map_kube_error(err: kube::Error, what: &str) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(what.to_string()),
        kube::Error::Api(resp) => ClusterError::Api {
            code: resp.code,
            reason: resp.message,
        },
        other => ClusterError::Client(other.to_string()),
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    let limits = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.as_ref());

    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| PHASE_UNKNOWN.to_string()),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        cpu_limit: limits.and_then(|l| l.get("cpu")).map(|q| q.0.clone()),
        memory_limit: limits.and_then(|l| l.get("memory")).map(|q| q.0.clone()),
    }
}

/// Extract container usage from a `metrics.k8s.io` PodMetrics body.
fn parse_usage(data: &serde_json::Value) -> PodUsage {
    let containers = data
        .get("containers")
        .and_then(serde_json::Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .filter_map(|c| c.get("usage"))
                .map(|usage| ContainerUsage {
                    cpu: usage.get("cpu").and_then(|v| v.as_str()).map(str::to_string),
                    memory: usage.get("memory").and_then(|v| v.as_str()).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    PodUsage { containers }
}

struct FeedState {
    api: Api<Pod>,
    params: WatchParams,
    relist: ListParams,
    version: String,
    inner: Option<BoxStream<'static, kube::Result<WatchEvent<Pod>>>>,
    reopen: bool,
    done: bool,
}

impl FeedState {
    /// Re-list to pick up a resourceVersion the server still holds.
    async fn refresh_version(&mut self) -> ClusterResult<()> {
        let listed = self
            .api
            .list(&self.relist)
            .await
            .map_err(|e| map_kube_error(e, "pods"))?;
        self.version = listed.metadata.resource_version.unwrap_or_else(|| "0".to_string());
        Ok(())
    }

    fn observe(&mut self, kind: PodEventKind, pod: Pod) -> ClusterResult<PodEvent> {
        if let Some(version) = pod.metadata.resource_version.clone() {
            self.version = version;
        }
        Ok(PodEvent {
            kind,
            pod: pod_info(&pod),
        })
    }

    fn fail(&mut self, err: ClusterError) -> ClusterResult<PodEvent> {
        self.done = true;
        Err(err)
    }
}

/// A pod feed that survives server-side watch expiry and ends on the first
/// other error. Changes made while a watch is being reopened after a 410
/// are not replayed.
fn resuming_feed(state: FeedState) -> PodFeed {
    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            if st.inner.is_none() {
                if st.reopen {
                    tokio::time::sleep(RESUME_DELAY).await;
                }
                st.reopen = true;
                match st.api.watch(&st.params, &st.version).await {
                    Ok(events) => st.inner = Some(events.boxed()),
                    Err(kube::Error::Api(resp)) if resp.code == EXPIRED => {
                        debug!(version = %st.version, "watch version expired, re-listing");
                        if let Err(e) = st.refresh_version().await {
                            let item = st.fail(e);
                            return Some((item, st));
                        }
                        continue;
                    }
                    Err(e) => {
                        let item = st.fail(map_kube_error(e, "pods"));
                        return Some((item, st));
                    }
                }
            }

            let next = match st.inner.as_mut() {
                Some(inner) => inner.next().await,
                None => None,
            };

            let item = match next {
                Some(Ok(WatchEvent::Added(pod))) => st.observe(PodEventKind::Added, pod),
                Some(Ok(WatchEvent::Modified(pod))) => st.observe(PodEventKind::Modified, pod),
                Some(Ok(WatchEvent::Deleted(pod))) => st.observe(PodEventKind::Deleted, pod),
                Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                    st.version = bookmark.metadata.resource_version;
                    continue;
                }
                Some(Ok(WatchEvent::Error(resp))) if resp.code == EXPIRED => {
                    debug!(version = %st.version, "watch version expired, re-listing");
                    st.inner = None;
                    if let Err(e) = st.refresh_version().await {
                        st.fail(e)
                    } else {
                        continue;
                    }
                }
                Some(Ok(WatchEvent::Error(resp))) => st.fail(ClusterError::Feed(resp.message)),
                Some(Err(e)) => st.fail(ClusterError::Feed(e.to_string())),
                None => {
                    debug!(version = %st.version, "watch window closed, reopening");
                    st.inner = None;
                    continue;
                }
            };
            return Some((item, st));
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_parsed_from_pod_metrics() {
        let body = serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "15s",
            "containers": [
                {"name": "snake", "usage": {"cpu": "12m", "memory": "8Mi"}},
                {"name": "sidecar", "usage": {"cpu": "250000n"}}
            ]
        });
        let usage = parse_usage(&body);
        assert_eq!(usage.containers.len(), 2);
        assert_eq!(usage.containers[0].cpu.as_deref(), Some("12m"));
        assert_eq!(usage.containers[1].memory, None);
    }

    #[test]
    fn usage_without_containers_is_empty() {
        let usage = parse_usage(&serde_json::json!({}));
        assert!(usage.containers.is_empty());
    }

    #[test]
    fn pod_info_reads_phase_and_limits() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "snake-abc-1", "labels": {"game_id": "abc"}},
            "spec": {"containers": [{
                "name": "snake",
                "resources": {"limits": {"cpu": "100m", "memory": "24Mi"}}
            }]},
            "status": {"phase": "Running"}
        }))
        .unwrap();

        let info = pod_info(&pod);
        assert_eq!(info.name, "snake-abc-1");
        assert!(info.is_running());
        assert_eq!(info.cpu_limit.as_deref(), Some("100m"));
        assert_eq!(info.memory_limit.as_deref(), Some("24Mi"));
        assert_eq!(info.labels.get("game_id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn pod_without_status_is_unknown() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "bare"}
        }))
        .unwrap();
        assert_eq!(pod_info(&pod).phase, PHASE_UNKNOWN);
    }

    // ── Watch resumption against a scripted API server ────────

    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    use kube::client::Body;

    const EXPIRED_EVENT: &str = r#"{"type":"ERROR","object":{"apiVersion":"v1","kind":"Status","metadata":{},"status":"Failure","message":"too old resource version","reason":"Expired","code":410}}"#;
    const FAILED_EVENT: &str = r#"{"type":"ERROR","object":{"apiVersion":"v1","kind":"Status","metadata":{},"status":"Failure","message":"etcd unavailable","reason":"InternalError","code":500}}"#;
    const ADDED_EVENT: &str = r#"{"type":"ADDED","object":{"apiVersion":"v1","kind":"Pod","metadata":{"name":"p1","resourceVersion":"6","labels":{"game_id":"abc"}},"status":{"phase":"Running"}}}"#;

    fn pod_list(version: &str) -> String {
        format!(r#"{{"apiVersion":"v1","kind":"PodList","metadata":{{"resourceVersion":"{version}"}},"items":[]}}"#)
    }

    /// Lists answer with version 1, then 5. `on_watch` answers watches by version.
    fn scripted_client(log: Arc<Mutex<Vec<String>>>, on_watch: fn(&str) -> String) -> Client {
        let service = tower::service_fn(move |req: http::Request<Body>| {
            let log = log.clone();
            async move {
                let query = req.uri().query().unwrap_or_default().to_string();
                let mut seen = log.lock().unwrap();
                let version = query
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("resourceVersion="))
                    .unwrap_or_default()
                    .to_string();
                let body = if query.split('&').any(|kv| kv == "watch=true") {
                    on_watch(&version)
                } else {
                    let lists = seen.iter().filter(|q| !q.contains("watch=true")).count();
                    pod_list(if lists == 0 { "1" } else { "5" })
                };
                seen.push(query);
                Ok::<_, Infallible>(http::Response::new(Body::from(body.into_bytes())))
            }
        });
        Client::new(service, "snake")
    }

    fn watch_requests(log: &Mutex<Vec<String>>) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|q| q.contains("watch=true"))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn expired_watch_relists_and_resumes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = scripted_client(log.clone(), |version| match version {
            "1" => format!("{EXPIRED_EVENT}\n"),
            "5" => format!("{ADDED_EVENT}\n"),
            _ => String::new(),
        });
        let cluster = KubeControlPlane::new(client);

        let mut feed = cluster.watch_pods("snake", Some("game_id=abc")).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(10), feed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, PodEventKind::Added);
        assert_eq!(event.pod.name, "p1");

        let watches = watch_requests(&log);
        assert!(watches[0].contains("resourceVersion=1"));
        assert!(watches[1].contains("resourceVersion=5"));
    }

    #[tokio::test]
    async fn other_watch_errors_end_the_feed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = scripted_client(log.clone(), |_| format!("{FAILED_EVENT}\n"));
        let cluster = KubeControlPlane::new(client);

        let mut feed = cluster.watch_pods("snake", None).await.unwrap();
        let item = tokio::time::timeout(Duration::from_secs(10), feed.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item, Err(ClusterError::Feed(m)) if m.contains("etcd unavailable")));
        assert!(feed.next().await.is_none());
        assert_eq!(watch_requests(&log).len(), 1);
    }

    #[tokio::test]
    async fn closed_window_reopens_after_a_pause() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = scripted_client(log.clone(), |_| String::new());
        let cluster = KubeControlPlane::new(client);

        let mut feed = cluster.watch_pods("snake", None).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(1500), feed.next()).await;
        assert!(pending.is_err());

        let watches = watch_requests(&log).len();
        assert!((1..=3).contains(&watches), "{watches} watch requests");
    }
}
