//! The client transport: a WebSocket at `/ws/stream`. Binary frames become
//! audio frames; JSON control frames drive session lifecycle.
//!
//! The socket is split once into a connection-level writer task (owns the
//! sink half for the whole connection) and a receiver loop (owns the stream
//! half). A session's events reach the writer through a small forwarder task
//! that relays its event sink onto the connection's outbound channel; this
//! keeps the writer reachable even after a session ends, so a rejection for
//! an unknown or already-ended session still reaches the client.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::llm::LlmAdapter;
use crate::adapters::stt::SttAdapter;
use crate::audio::AudioFrame;
use crate::error::OrchestratorError;
use crate::events::{EventSource, SinkEvent, SinkFrame};
use crate::orchestrator::SessionOrchestrator;
use crate::persistence::PersistenceSink;
use crate::session::{ControlMessage, SessionHandle};

use super::{auth, ServerState};

/// The connection-level outbound channel: everything written to the
/// client funnels through here, whether it came from a session's event
/// sink or from a boundary-level rejection that has no session to route
/// through.
type OutboundTx = mpsc::Sender<String>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientControl {
    #[serde(rename = "SESSION_START")]
    SessionStart {
        #[serde(rename = "sessionId")]
        session_id: Option<Uuid>,
        #[serde(default)]
        language: Option<String>,
    },
    #[serde(rename = "SESSION_END")]
    SessionEnd {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !auth::is_authorized(&state, &query) {
        return Response::builder()
            .status(axum::http::StatusCode::UNAUTHORIZED)
            .body(axum::body::Body::empty())
            .unwrap();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(run_writer(ws_tx, out_rx));
    let mut forwarder: Option<tokio::task::JoinHandle<()>> = None;
    let mut current_session: Option<(Uuid, Arc<SessionHandle>)> = None;

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Binary(data) => {
                let Some((session_id, handle)) = current_session.as_ref() else {
                    continue;
                };
                let now_ms = chrono::Utc::now().timestamp_millis();
                match AudioFrame::new(data.to_vec(), 16_000, 1, now_ms) {
                    Ok(frame) => {
                        handle.touch(now_ms);
                        if handle.frame_tx.send(frame).await.is_err() {
                            send_error_frame(&out_tx, *session_id, OrchestratorError::SessionNotFound(*session_id), now_ms).await;
                            current_session = None;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed audio frame"),
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientControl>(&text) {
                Ok(ClientControl::SessionStart { session_id, language }) => {
                    let session_id = session_id.unwrap_or_else(Uuid::new_v4);
                    let (handle, sink_rx) =
                        start_session(&state, session_id, language.unwrap_or_else(|| "en".into()));
                    current_session = Some((session_id, handle));
                    if let Some(prior) = forwarder.replace(tokio::spawn(run_forwarder(sink_rx, out_tx.clone()))) {
                        prior.abort();
                    }
                }
                Ok(ClientControl::SessionEnd { session_id }) => {
                    if let Some(handle) = state.sessions.get(&session_id) {
                        let _ = handle.control_tx.send(ControlMessage::End).await;
                    } else {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        send_error_frame(&out_tx, session_id, OrchestratorError::SessionNotFound(session_id), now_ms).await;
                    }
                }
                Ok(ClientControl::Heartbeat { session_id }) => {
                    if let Some(handle) = state.sessions.get(&session_id) {
                        handle.touch(chrono::Utc::now().timestamp_millis());
                    } else {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        send_error_frame(&out_tx, session_id, OrchestratorError::SessionNotFound(session_id), now_ms).await;
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed control frame"),
            },
            Message::Close(_) => {
                info!("client closed the connection");
                break;
            }
            _ => {}
        }
    }

    if let Some((session_id, handle)) = current_session {
        let _ = handle.control_tx.send(ControlMessage::End).await;
        state.sessions.remove(&session_id);
    }
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    writer.abort();
}

/// Builds and sends an `error` frame directly on the connection's outbound
/// channel. Used at points where a client message references a session that
/// no longer has a live event sink to route an error through — an unknown
/// `sessionId` on `SESSION_END`/`HEARTBEAT`, or an audio frame arriving after
/// the session's orchestrator has already exited.
async fn send_error_frame(out_tx: &OutboundTx, session_id: Uuid, err: OrchestratorError, now_ms: i64) {
    let Some(message) = err.sink_message() else { return };
    let frame = SinkFrame {
        session_id,
        timestamp: now_ms,
        event: SinkEvent::Error { message },
    };
    let _ = out_tx.send(frame.to_wire_json()).await;
}

/// Spawns the per-session orchestrator task and registers it, returning the
/// handle plus the receiving end of its event sink for the forwarder task.
fn start_session(
    state: &ServerState,
    session_id: Uuid,
    language: String,
) -> (Arc<SessionHandle>, EventSource) {
    let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(256);
    let (control_tx, control_rx) = mpsc::channel::<ControlMessage>(8);
    let (sink, sink_rx) = crate::events::channel(256);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let handle = SessionHandle::new(session_id, now_ms, frame_tx, control_tx);
    let handle = state.sessions.start(handle);

    let stt: Arc<dyn SttAdapter> = state.stt_adapter.clone();
    let llm: Arc<dyn LlmAdapter> = state.llm_adapter.clone();
    let persistence: Arc<dyn PersistenceSink> = state.persistence.clone();
    let config = state.config.clone();

    tokio::spawn(async move {
        let orchestrator =
            SessionOrchestrator::new(session_id, language, &config, stt, llm, persistence, sink);
        orchestrator.run(frame_rx, control_rx).await;
    });

    (handle, sink_rx)
}

/// Owns the WebSocket sink half for the entire connection, independent of
/// any one session's lifetime, so a boundary-level error frame can still
/// reach the client after its session has ended.
async fn run_writer(mut ws_tx: SplitSink<WebSocket, Message>, mut out_rx: mpsc::Receiver<String>) {
    while let Some(text) = out_rx.recv().await {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

/// Forwards one session's event sink into the connection's outbound
/// channel. Exits (without touching the connection writer) once the
/// session's sink closes.
async fn run_forwarder(mut sink_rx: EventSource, out_tx: OutboundTx) {
    while let Some(frame) = sink_rx.recv().await {
        if out_tx.send(frame.to_wire_json()).await.is_err() {
            break;
        }
    }
}
