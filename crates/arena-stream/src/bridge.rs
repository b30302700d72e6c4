//! Watch bridge — republishes a cluster pod feed onto a bounded channel.
//!
//! The feed is consumed by a dedicated task; the consumer only ever reads
//! the channel. When the feed ends or fails without a stop request, the
//! task pushes one final [`WatchEvent::Error`] and exits, which closes the
//! channel. Dropping the bridge signals stop without waiting.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use arena_cluster::{ControlPlane, PodEventKind, PodInfo};

pub const DEFAULT_CAPACITY: usize = 256;

/// One change forwarded by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(PodInfo),
    Modified(PodInfo),
    Deleted(PodInfo),
    Error(String),
}

pub struct WatchBridge {
    events: mpsc::Receiver<WatchEvent>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatchBridge {
    /// Open a pod feed for `namespace`/`selector` on a new task.
    pub fn start(
        cluster: Arc<dyn ControlPlane>,
        namespace: impl Into<String>,
        selector: Option<String>,
        capacity: usize,
    ) -> Self {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let (stop, stop_rx) = watch::channel(false);
        let namespace = namespace.into();
        let task = tokio::spawn(run_bridge(cluster, namespace, selector, tx, stop_rx));
        Self { events, stop, task }
    }

    /// Next event, or `None` once the feed has terminated.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Ask the bridge task to exit. Does not wait.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_bridge(
    cluster: Arc<dyn ControlPlane>,
    namespace: String,
    selector: Option<String>,
    tx: mpsc::Sender<WatchEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let opened = tokio::select! {
        opened = cluster.watch_pods(&namespace, selector.as_deref()) => opened,
        _ = stop.changed() => return,
    };
    let mut feed = match opened {
        Ok(feed) => feed,
        Err(e) => {
            warn!(%namespace, error = %e, "failed to open pod feed");
            push_final(&tx, &stop, e.to_string()).await;
            return;
        }
    };
    debug!(%namespace, selector = ?selector, "watch bridge started");

    loop {
        let item = tokio::select! {
            item = feed.next() => item,
            _ = stop.changed() => break,
        };
        let event = match item {
            Some(Ok(event)) => match event.kind {
                PodEventKind::Added => WatchEvent::Added(event.pod),
                PodEventKind::Modified => WatchEvent::Modified(event.pod),
                PodEventKind::Deleted => WatchEvent::Deleted(event.pod),
            },
            Some(Err(e)) => {
                warn!(%namespace, error = %e, "pod feed failed");
                push_final(&tx, &stop, e.to_string()).await;
                return;
            }
            None => {
                push_final(&tx, &stop, "pod feed ended".to_string()).await;
                return;
            }
        };

        tokio::select! {
            sent = tx.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = stop.changed() => break,
        }
    }
    debug!(%namespace, "watch bridge stopped");
}

async fn push_final(tx: &mpsc::Sender<WatchEvent>, stop: &watch::Receiver<bool>, message: String) {
    if *stop.borrow() {
        return;
    }
    let _ = tx.send(WatchEvent::Error(message)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use arena_cluster::{InMemoryControlPlane, PHASE_RUNNING};

    fn start(cluster: &InMemoryControlPlane) -> WatchBridge {
        WatchBridge::start(
            Arc::new(cluster.clone()),
            "snake",
            Some("game_id=abc".to_string()),
            DEFAULT_CAPACITY,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn pod(name: &str) -> PodInfo {
        PodInfo::new(name, PHASE_RUNNING).with_label("game_id", "abc")
    }

    #[tokio::test]
    async fn forwards_events_in_order() {
        let cluster = InMemoryControlPlane::new();
        let mut bridge = start(&cluster);
        settle().await;

        cluster.insert_pod("snake", pod("a"));
        cluster.set_phase("snake", "a", "Failed");
        cluster.insert_pod("snake", pod("b"));

        assert!(matches!(bridge.recv().await, Some(WatchEvent::Added(p)) if p.name == "a"));
        assert!(matches!(bridge.recv().await, Some(WatchEvent::Modified(p)) if p.phase == "Failed"));
        assert!(matches!(bridge.recv().await, Some(WatchEvent::Added(p)) if p.name == "b"));
    }

    #[tokio::test]
    async fn feed_error_yields_final_error_then_closes() {
        let cluster = InMemoryControlPlane::new();
        let mut bridge = start(&cluster);
        settle().await;

        cluster.inject_feed_error("connection reset");
        assert!(matches!(bridge.recv().await, Some(WatchEvent::Error(m)) if m.contains("connection reset")));
        assert_eq!(bridge.recv().await, None);
    }

    #[tokio::test]
    async fn feed_end_yields_final_error() {
        let cluster = InMemoryControlPlane::new();
        let mut bridge = start(&cluster);
        settle().await;

        cluster.close_feeds();
        assert!(matches!(bridge.recv().await, Some(WatchEvent::Error(_))));
        assert_eq!(bridge.recv().await, None);
    }

    #[tokio::test]
    async fn stop_ends_without_error() {
        let cluster = InMemoryControlPlane::new();
        let mut bridge = start(&cluster);
        settle().await;

        bridge.stop();
        assert_eq!(bridge.recv().await, None);
        settle().await;
        assert!(bridge.is_finished());
    }
}
