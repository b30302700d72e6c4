//! WebSocket adapter for session streams.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use arena_stream::{ClientFrames, ClientSignal, StreamError, StreamMessage, StreamSink};

use crate::AppState;
use crate::handlers::parse_session;

/// GET /session/{id}/stream
pub async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match parse_session(&id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };

    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = socket.split();
        let mut sink = WsSink(tx);
        let mut frames = WsFrames(rx);
        let reason = state.streams.run(session.clone(), &mut sink, &mut frames).await;
        debug!(session_id = %session, %reason, "websocket finished");
    })
}

/// GET /stream
pub async fn stream_pods(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = socket.split();
        let mut sink = WsSink(tx);
        let mut frames = WsFrames(rx);
        let reason = state.streams.run_namespace(&mut sink, &mut frames).await;
        debug!(%reason, "pod websocket finished");
    })
}

struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl StreamSink for WsSink {
    async fn send(&mut self, message: &StreamMessage) -> Result<(), StreamError> {
        let text = message.to_json()?;
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
        let _ = self.0.close().await;
    }
}

struct WsFrames(SplitStream<WebSocket>);

#[async_trait]
impl ClientFrames for WsFrames {
    async fn next_frame(&mut self) -> ClientSignal {
        match self.0.next().await {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => ClientSignal::Closed,
            Some(Ok(_)) => ClientSignal::Frame,
        }
    }
}
