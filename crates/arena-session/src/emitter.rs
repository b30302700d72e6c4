//! Load emitter — background task issuing synthetic requests for a session.
//!
//! The target rate is read from the registry on every iteration, so rate
//! changes take effect without restarting the task. The task exits when
//! its stop signal fires or when the session disappears from the registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use arena_core::{ArenaConfig, SessionId};

use crate::registry::SessionRegistry;

/// Longest pause between two requests. Slower rates are clamped to it.
pub const MAX_PAUSE: Duration = Duration::from_secs(60);

pub type RequestFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Sends one synthetic request to the given URL.
pub type RequestFn = Arc<dyn Fn(String) -> RequestFuture + Send + Sync>;

#[derive(Clone)]
pub struct LoadEmitter {
    registry: SessionRegistry,
    send: RequestFn,
    config: Arc<ArenaConfig>,
}

impl LoadEmitter {
    pub fn new(registry: SessionRegistry, send: RequestFn, config: Arc<ArenaConfig>) -> Self {
        Self {
            registry,
            send,
            config,
        }
    }

    /// An emitter that issues real HTTP requests.
    pub fn http(registry: SessionRegistry, config: Arc<ArenaConfig>) -> Self {
        Self::new(
            registry,
            Arc::new(|url: String| -> RequestFuture { Box::pin(http_get(url)) }),
            config,
        )
    }

    /// Spawn the emitter task for `session`.
    pub fn spawn(&self, session: SessionId, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let url = self.config.ingress_url(&session);
        let run = EmitterLoop {
            registry: self.registry.clone(),
            send: self.send.clone(),
            session,
            url,
            timeout: self.config.request_timeout(),
            idle_poll: self.config.idle_poll(),
        };
        tokio::spawn(run.run(stop))
    }
}

struct EmitterLoop {
    registry: SessionRegistry,
    send: RequestFn,
    session: SessionId,
    url: String,
    timeout: Duration,
    idle_poll: Duration,
}

impl EmitterLoop {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        debug!(session_id = %self.session, url = %self.url, "load emitter running");

        loop {
            if *stop.borrow() {
                break;
            }
            let Some(rate) = self.registry.target_rate(&self.session).await else {
                debug!(session_id = %self.session, "session gone, load emitter exiting");
                break;
            };

            let pause = if rate > 0.0 {
                tokio::select! {
                    result = tokio::time::timeout(self.timeout, (self.send)(self.url.clone())) => {
                        self.record(result).await;
                    }
                    _ = stop.changed() => break,
                }
                pause_for(rate)
            } else {
                self.idle_poll
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = stop.changed() => break,
            }
        }

        debug!(session_id = %self.session, "load emitter stopped");
    }

    async fn record(&self, result: Result<Result<(), String>, tokio::time::error::Elapsed>) {
        match result {
            Ok(Ok(())) => self.registry.touch_request(&self.session).await,
            Ok(Err(e)) => debug!(session_id = %self.session, error = %e, "synthetic request failed"),
            Err(_) => debug!(session_id = %self.session, "synthetic request timed out"),
        }
    }
}

/// Pause between requests at `rate` requests per second.
fn pause_for(rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / rate)
        .unwrap_or(MAX_PAUSE)
        .min(MAX_PAUSE)
}

/// Issue one `GET` over HTTP/1.1. Any response counts as delivered.
pub async fn http_get(url: String) -> Result<(), String> {
    let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| e.to_string())?;
    let authority = uri
        .authority()
        .cloned()
        .ok_or_else(|| format!("missing host in {url}"))?;
    let port = authority.port_u16().unwrap_or(80);

    let stream = tokio::net::TcpStream::connect((authority.host(), port))
        .await
        .map_err(|e| format!("connect: {e}"))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header(http::header::HOST, authority.as_str())
        .header(http::header::USER_AGENT, "arena-load/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| e.to_string())?;

    let resp = sender.send_request(req).await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        debug!(status = %resp.status(), %url, "synthetic request non-2xx");
    }
    Ok(())
}
