//! Session registry — the single owner of per-session mutable state.
//!
//! Every mutation happens under the write lock, so readers observe a
//! session either fully present (with its emitter handle) or fully absent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use arena_core::SessionId;

use crate::error::{SessionError, SessionResult};

/// Stop signal and task handle of a running load emitter.
pub struct EmitterHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EmitterHandle {
    pub fn new(stop: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the emitter to stop without waiting for it.
    pub fn stop(self) {
        let _ = self.stop.send(true);
    }
}

/// How a load request changes the target rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateChange {
    Increment(f64),
    Set(f64),
}

struct SessionEntry {
    eat_count: u64,
    target_rate: f64,
    created_at: u64,
    rate_updated_at: Option<u64>,
    last_request_at: Option<u64>,
    emitter: Option<EmitterHandle>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            eat_count: 0,
            target_rate: 0.0,
            created_at: epoch_secs(),
            rate_updated_at: None,
            last_request_at: None,
            emitter: None,
        }
    }

    fn emitter_running(&self) -> bool {
        self.emitter.as_ref().is_some_and(EmitterHandle::is_running)
    }

    fn view(&self, session_id: &SessionId) -> SessionView {
        SessionView {
            session_id: session_id.clone(),
            eat_count: self.eat_count,
            target_rate: self.target_rate,
            created_at: self.created_at,
            rate_updated_at: self.rate_updated_at,
            last_request_at: self.last_request_at,
            emitter_running: self.emitter_running(),
        }
    }
}

/// Read-only copy of one session's state. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub eat_count: u64,
    pub target_rate: f64,
    pub created_at: u64,
    pub rate_updated_at: Option<u64>,
    pub last_request_at: Option<u64>,
    pub emitter_running: bool,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session with zeroed counters. Returns false if it already exists.
    pub async fn register(&self, session: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session) {
            return false;
        }
        debug!(session_id = %session, "session registered");
        sessions.insert(session, SessionEntry::new());
        true
    }

    pub async fn contains(&self, session: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session)
    }

    pub async fn get(&self, session: &SessionId) -> Option<SessionView> {
        let sessions = self.sessions.read().await;
        sessions.get(session).map(|entry| entry.view(session))
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionView> {
        let sessions = self.sessions.read().await;
        let mut views: Vec<SessionView> = sessions.iter().map(|(id, entry)| entry.view(id)).collect();
        views.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.as_str().cmp(b.session_id.as_str()))
        });
        views
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Increment the eat counter and return its new value.
    pub async fn record_eat(&self, session: &SessionId) -> SessionResult<u64> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session)
            .ok_or_else(|| SessionError::unknown_session(session))?;
        entry.eat_count += 1;
        Ok(entry.eat_count)
    }

    /// Apply a rate change and return the new target rate.
    pub async fn update_rate(&self, session: &SessionId, change: RateChange) -> SessionResult<f64> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session)
            .ok_or_else(|| SessionError::unknown_session(session))?;
        entry.target_rate = match change {
            RateChange::Increment(step) => entry.target_rate + step,
            RateChange::Set(rate) => rate,
        };
        entry.rate_updated_at = Some(epoch_secs());
        Ok(entry.target_rate)
    }

    /// Current target rate, or `None` once the session is gone.
    pub async fn target_rate(&self, session: &SessionId) -> Option<f64> {
        let sessions = self.sessions.read().await;
        sessions.get(session).map(|entry| entry.target_rate)
    }

    /// Record a completed synthetic request.
    pub async fn touch_request(&self, session: &SessionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session) {
            entry.last_request_at = Some(epoch_secs());
        }
    }

    /// Start an emitter for `session` unless a live one exists.
    ///
    /// `start` receives the stop signal and must spawn the emitter task. It
    /// runs under the write lock, so concurrent callers start at most one
    /// emitter. Returns whether a new emitter was started.
    pub async fn ensure_emitter<F>(&self, session: &SessionId, start: F) -> SessionResult<bool>
    where
        F: FnOnce(watch::Receiver<bool>) -> JoinHandle<()>,
    {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session)
            .ok_or_else(|| SessionError::unknown_session(session))?;
        if entry.emitter_running() {
            return Ok(false);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = start(stop_rx);
        if let Some(dead) = entry.emitter.replace(EmitterHandle::new(stop_tx, task)) {
            dead.stop();
        }
        debug!(session_id = %session, "load emitter started");
        Ok(true)
    }

    /// Remove a session, stopping its emitter. Returns the final view.
    pub async fn remove(&self, session: &SessionId) -> Option<SessionView> {
        let mut sessions = self.sessions.write().await;
        let mut entry = sessions.remove(session)?;
        let view = entry.view(session);
        if let Some(emitter) = entry.emitter.take() {
            emitter.stop();
        }
        debug!(session_id = %session, "session removed");
        Some(view)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
