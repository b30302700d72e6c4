//! Streaming session controller.
//!
//! One controller runs per client connection. It multiplexes client
//! frames, bridge events and a metrics tick onto the client's sink, and
//! when the loop ends for any reason the session is torn down.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use arena_core::SessionId;
use arena_metrics::MetricsAggregator;
use arena_session::{SessionManager, SessionResult};

use crate::bridge::{DEFAULT_CAPACITY, WatchBridge, WatchEvent};
use crate::error::StreamError;
use crate::message::StreamMessage;

/// Outbound half of a client connection.
#[async_trait]
pub trait StreamSink: Send {
    async fn send(&mut self, message: &StreamMessage) -> Result<(), StreamError>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

/// What the client side of a connection did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
    /// A frame arrived. Its content is ignored.
    Frame,
    /// The client closed the connection, errored, or went away.
    Closed,
}

/// Inbound half of a client connection.
#[async_trait]
pub trait ClientFrames: Send {
    async fn next_frame(&mut self) -> ClientSignal;
}

/// Why a streaming session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    ClientDisconnected,
    FeedTerminated,
    SendFailed(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::ClientDisconnected => f.write_str("client disconnected"),
            ExitReason::FeedTerminated => f.write_str("pod feed terminated"),
            ExitReason::SendFailed(reason) => write!(f, "send failed: {reason}"),
        }
    }
}

/// Scoped ownership of a session's lifetime.
///
/// [`release`](SessionLease::release) kills the session. If the lease is
/// dropped without being released, the kill is spawned onto the runtime.
pub struct SessionLease {
    manager: Option<Arc<SessionManager>>,
    session: SessionId,
}

impl SessionLease {
    pub fn acquire(manager: Arc<SessionManager>, session: SessionId) -> Self {
        Self {
            manager: Some(manager),
            session,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub async fn release(mut self) -> SessionResult<()> {
        match self.manager.take() {
            Some(manager) => teardown(&manager, &self.session).await,
            None => Ok(()),
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session_id = %session, "session lease dropped, tearing down in background");
                handle.spawn(async move {
                    let _ = teardown(&manager, &session).await;
                });
            }
            Err(_) => error!(session_id = %session, "session lease dropped outside a runtime, resources leaked"),
        }
    }
}

async fn teardown(manager: &SessionManager, session: &SessionId) -> SessionResult<()> {
    let result = manager.kill(session).await;
    if let Err(e) = &result {
        error!(session_id = %session, error = %e, "session teardown incomplete");
    }
    result
}

pub struct StreamController {
    manager: Arc<SessionManager>,
    aggregator: MetricsAggregator,
    metrics_interval: Duration,
    bridge_capacity: usize,
}

impl StreamController {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let config = manager.config();
        let aggregator = MetricsAggregator::new(
            manager.cluster(),
            config.namespace.clone(),
            config.usage_fallback_ratio,
        );
        let metrics_interval = config.metrics_interval();
        Self {
            manager,
            aggregator,
            metrics_interval,
            bridge_capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Stream `session` to one client until the connection or the feed ends,
    /// then tear the session down.
    pub async fn run<S, C>(&self, session: SessionId, sink: &mut S, frames: &mut C) -> ExitReason
    where
        S: StreamSink,
        C: ClientFrames,
    {
        let lease = SessionLease::acquire(self.manager.clone(), session.clone());
        let namespace = self.manager.config().namespace.clone();
        let mut bridge = WatchBridge::start(
            self.manager.cluster(),
            namespace.clone(),
            Some(session.label_selector()),
            self.bridge_capacity,
        );
        info!(session_id = %session, "stream opened");

        let reason = self.pump(&namespace, Some(&session), &mut bridge, sink, frames).await;

        bridge.stop();
        sink.close().await;
        info!(session_id = %session, %reason, "stream closed");
        let _ = lease.release().await;
        reason
    }

    /// Stream every pod change in the chaos namespace. No session is bound
    /// to the connection and no metrics are sent.
    pub async fn run_namespace<S, C>(&self, sink: &mut S, frames: &mut C) -> ExitReason
    where
        S: StreamSink,
        C: ClientFrames,
    {
        let namespace = self.manager.config().chaos_namespace().to_string();
        let mut bridge = WatchBridge::start(
            self.manager.cluster(),
            namespace.clone(),
            None,
            self.bridge_capacity,
        );
        info!(%namespace, "pod stream opened");

        let reason = self.pump(&namespace, None, &mut bridge, sink, frames).await;

        bridge.stop();
        sink.close().await;
        info!(%namespace, %reason, "pod stream closed");
        reason
    }

    async fn pump<S, C>(
        &self,
        namespace: &str,
        session: Option<&SessionId>,
        bridge: &mut WatchBridge,
        sink: &mut S,
        frames: &mut C,
    ) -> ExitReason
    where
        S: StreamSink,
        C: ClientFrames,
    {
        if let Err(e) = self.greet(namespace, session, sink).await {
            return ExitReason::SendFailed(e.to_string());
        }

        let mut tick = tokio::time::interval_at(Instant::now() + self.metrics_interval, self.metrics_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let outgoing = tokio::select! {
                signal = frames.next_frame() => match signal {
                    ClientSignal::Frame => continue,
                    ClientSignal::Closed => return ExitReason::ClientDisconnected,
                },
                event = bridge.recv() => match event {
                    Some(event) => {
                        if let WatchEvent::Error(message) = &event {
                            warn!(%namespace, %message, "pod feed error");
                        }
                        StreamMessage::from(event)
                    }
                    None => return ExitReason::FeedTerminated,
                },
                _ = tick.tick(), if session.is_some() => {
                    let Some(session) = session else { continue };
                    let rate = self.manager.registry().target_rate(session).await.unwrap_or(0.0);
                    StreamMessage::Metrics(self.aggregator.snapshot(session, rate).await)
                }
            };

            if let Err(e) = sink.send(&outgoing).await {
                debug!(%namespace, error = %e, "stream send failed");
                return ExitReason::SendFailed(e.to_string());
            }
        }
    }

    /// Send the greeting and one synthetic `ADDED` per existing pod.
    async fn greet<S: StreamSink>(
        &self,
        namespace: &str,
        session: Option<&SessionId>,
        sink: &mut S,
    ) -> Result<(), StreamError> {
        let greeting = match session {
            Some(session) => StreamMessage::connected(session),
            None => StreamMessage::connected_namespace(namespace),
        };
        sink.send(&greeting).await?;

        let selector = session.map(SessionId::label_selector);
        let cluster = self.manager.cluster();
        match cluster.list_pods(namespace, selector.as_deref()).await {
            Ok(pods) => {
                for pod in pods {
                    sink.send(&StreamMessage::from(WatchEvent::Added(pod))).await?;
                }
            }
            Err(e) => {
                warn!(%namespace, error = %e, "failed to list pods for stream");
                sink.send(&StreamMessage::error(format!("failed to list pods: {e}"))).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use arena_cluster::{InMemoryControlPlane, PHASE_RUNNING, PodInfo, PodUsage};
    use arena_core::ArenaConfig;
    use arena_session::{RequestFn, RequestFuture};
    use tokio::sync::mpsc;

    struct ChannelSink {
        tx: mpsc::UnboundedSender<StreamMessage>,
        closed: bool,
    }

    #[async_trait]
    impl StreamSink for ChannelSink {
        async fn send(&mut self, message: &StreamMessage) -> Result<(), StreamError> {
            self.tx
                .send(message.clone())
                .map_err(|_| StreamError::Closed)
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    struct ChannelFrames(mpsc::UnboundedReceiver<ClientSignal>);

    #[async_trait]
    impl ClientFrames for ChannelFrames {
        async fn next_frame(&mut self) -> ClientSignal {
            self.0.recv().await.unwrap_or(ClientSignal::Closed)
        }
    }

    struct Harness {
        cluster: InMemoryControlPlane,
        manager: Arc<SessionManager>,
    }

    fn harness() -> Harness {
        let cluster = InMemoryControlPlane::new();
        let send: RequestFn = Arc::new(|_url: String| -> RequestFuture { Box::pin(async { Ok(()) }) });
        let manager = Arc::new(SessionManager::new(
            Arc::new(cluster.clone()),
            Arc::new(ArenaConfig::default()),
            send,
        ));
        Harness { cluster, manager }
    }

    struct Connection {
        messages: mpsc::UnboundedReceiver<StreamMessage>,
        client: mpsc::UnboundedSender<ClientSignal>,
        task: tokio::task::JoinHandle<ExitReason>,
    }

    fn connect(controller: StreamController, session: SessionId) -> Connection {
        let (tx, messages) = mpsc::unbounded_channel();
        let (client, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut sink = ChannelSink { tx, closed: false };
            let mut frames = ChannelFrames(rx);
            let reason = controller.run(session, &mut sink, &mut frames).await;
            assert!(sink.closed);
            reason
        });
        Connection {
            messages,
            client,
            task,
        }
    }

    fn connect_namespace(controller: StreamController) -> Connection {
        let (tx, messages) = mpsc::unbounded_channel();
        let (client, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut sink = ChannelSink { tx, closed: false };
            let mut frames = ChannelFrames(rx);
            let reason = controller.run_namespace(&mut sink, &mut frames).await;
            assert!(sink.closed);
            reason
        });
        Connection {
            messages,
            client,
            task,
        }
    }

    async fn next(conn: &mut Connection) -> StreamMessage {
        tokio::time::timeout(Duration::from_secs(2), conn.messages.recv())
            .await
            .expect("message within timeout")
            .expect("stream still open")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn slow_metrics(h: &Harness) -> StreamController {
        StreamController::new(h.manager.clone()).with_metrics_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn greets_lists_and_tears_down_on_disconnect() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        let mut conn = connect(slow_metrics(&h), session.clone());

        assert!(matches!(next(&mut conn).await, StreamMessage::Connected { .. }));
        match next(&mut conn).await {
            StreamMessage::Added { pod, phase } => {
                assert!(pod.starts_with(&session.resource_name()));
                assert_eq!(phase, "Running");
            }
            other => panic!("expected ADDED, got {other:?}"),
        }

        conn.client.send(ClientSignal::Frame).unwrap();
        drop(conn.client);
        assert_eq!(conn.task.await.unwrap(), ExitReason::ClientDisconnected);

        assert!(!h.manager.registry().contains(&session).await);
        assert_eq!(h.cluster.resource_count("snake"), 0);
    }

    #[tokio::test]
    async fn forwards_pod_changes() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        let mut conn = connect(slow_metrics(&h), session.clone());
        next(&mut conn).await;
        next(&mut conn).await;
        settle().await;

        let pod = h.cluster.pods("snake")[0].name.clone();
        h.cluster.set_phase("snake", &pod, "Failed");
        assert_eq!(
            next(&mut conn).await,
            StreamMessage::Modified {
                pod: pod.clone(),
                phase: "Failed".into()
            }
        );

        h.manager.eat(&session).await.unwrap();
        h.manager.eat(&session).await.unwrap();
        // Third eat finds no Running pod, so nothing is deleted.
        assert!(!h.manager.eat(&session).await.unwrap().pod_deleted());

        drop(conn.client);
        assert_eq!(conn.task.await.unwrap(), ExitReason::ClientDisconnected);
    }

    #[tokio::test]
    async fn feed_failure_reports_error_and_kills_session() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        let mut conn = connect(slow_metrics(&h), session.clone());
        next(&mut conn).await;
        next(&mut conn).await;
        settle().await;

        h.cluster.inject_feed_error("watch expired");
        match next(&mut conn).await {
            StreamMessage::Error { message } => assert!(message.contains("watch expired")),
            other => panic!("expected ERROR, got {other:?}"),
        }
        assert_eq!(conn.task.await.unwrap(), ExitReason::FeedTerminated);
        assert!(!h.manager.registry().contains(&session).await);
    }

    #[tokio::test]
    async fn periodic_metrics_snapshots() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        let pod = h.cluster.pods("snake")[0].name.clone();
        h.cluster.set_usage("snake", &pod, PodUsage::single("50m", "12Mi"));
        h.manager.load(&session, Some(25.0)).await.unwrap();

        let controller = StreamController::new(h.manager.clone()).with_metrics_interval(Duration::from_millis(30));
        let mut conn = connect(controller, session.clone());
        next(&mut conn).await;
        next(&mut conn).await;

        match next(&mut conn).await {
            StreamMessage::Metrics(snapshot) => {
                assert_eq!(snapshot.cpu_percent, 50.0);
                assert_eq!(snapshot.memory_percent, 50.0);
                assert_eq!(snapshot.requests_per_sec, 25.0);
                assert_eq!(snapshot.running_pods, 1);
                assert_eq!(snapshot.network_io, "N/A");
            }
            other => panic!("expected METRICS, got {other:?}"),
        }
        drop(conn.client);
        conn.task.await.unwrap();
    }

    #[tokio::test]
    async fn send_failure_ends_stream_and_kills_session() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        let conn = connect(slow_metrics(&h), session.clone());
        drop(conn.messages);

        assert!(matches!(conn.task.await.unwrap(), ExitReason::SendFailed(_)));
        assert!(!h.manager.registry().contains(&session).await);
    }

    #[tokio::test]
    async fn dropped_lease_tears_down_in_background() {
        let h = harness();
        let session = h.manager.init().await.unwrap();

        let lease = SessionLease::acquire(h.manager.clone(), session.clone());
        assert_eq!(lease.session(), &session);
        drop(lease);
        settle().await;

        assert!(!h.manager.registry().contains(&session).await);
        assert_eq!(h.cluster.resource_count("snake"), 0);
    }

    #[tokio::test]
    async fn cancelled_stream_still_tears_down() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        let mut conn = connect(slow_metrics(&h), session.clone());
        next(&mut conn).await;

        conn.task.abort();
        let _ = conn.task.await;
        settle().await;
        assert!(!h.manager.registry().contains(&session).await);
    }

    #[tokio::test]
    async fn namespace_stream_covers_all_pods_without_teardown() {
        let h = harness();
        let session = h.manager.init().await.unwrap();
        h.cluster.insert_pod("snake", PodInfo::new("stray", PHASE_RUNNING));

        let controller = StreamController::new(h.manager.clone()).with_metrics_interval(Duration::from_millis(10));
        let mut conn = connect_namespace(controller);
        match next(&mut conn).await {
            StreamMessage::Connected { message } => assert!(message.contains("snake")),
            other => panic!("expected CONNECTED, got {other:?}"),
        }
        let mut listed = Vec::new();
        for _ in 0..2 {
            match next(&mut conn).await {
                StreamMessage::Added { pod, .. } => listed.push(pod),
                other => panic!("expected ADDED, got {other:?}"),
            }
        }
        assert!(listed.contains(&"stray".to_string()));
        assert!(listed.iter().any(|p| p.starts_with(&session.resource_name())));
        settle().await;

        h.cluster.set_phase("snake", "stray", "Failed");
        assert_eq!(
            next(&mut conn).await,
            StreamMessage::Modified {
                pod: "stray".into(),
                phase: "Failed".into()
            }
        );

        drop(conn.client);
        assert_eq!(conn.task.await.unwrap(), ExitReason::ClientDisconnected);
        assert!(h.manager.registry().contains(&session).await);
    }
}
