//! A per-session, typed, ordered channel from the orchestrator to the
//! client-facing boundary.

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// One of the typed events the orchestrator emits for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    SessionStarted,
    SessionEnded,
    TranscriptPartial { text: String, confidence: f32 },
    TranscriptFinal { text: String, confidence: f32 },
    AiThinking,
    AiDelta { token: String },
    AiDone { text: String },
    AiInterrupted,
    Error { message: String },
}

impl SinkEvent {
    /// The wire constant: `TRANSCRIPT_PARTIAL`, `ASSISTANT_DELTA`, etc.
    pub fn wire_type(&self) -> &'static str {
        match self {
            SinkEvent::SessionStarted => "SESSION_STARTED",
            SinkEvent::SessionEnded => "SESSION_ENDED",
            SinkEvent::TranscriptPartial { .. } => "TRANSCRIPT_PARTIAL",
            SinkEvent::TranscriptFinal { .. } => "TRANSCRIPT_FINAL",
            SinkEvent::AiThinking => "AI_THINKING",
            SinkEvent::AiDelta { .. } => "ASSISTANT_DELTA",
            SinkEvent::AiDone { .. } => "ASSISTANT_DONE",
            SinkEvent::AiInterrupted => "AI_INTERRUPTED",
            SinkEvent::Error { .. } => "ERROR",
        }
    }

    pub fn wire_payload(&self) -> Value {
        match self {
            SinkEvent::SessionStarted | SinkEvent::SessionEnded | SinkEvent::AiThinking | SinkEvent::AiInterrupted => {
                Value::Null
            }
            SinkEvent::TranscriptPartial { text, confidence } | SinkEvent::TranscriptFinal { text, confidence } => {
                json!({ "text": text, "confidence": confidence })
            }
            SinkEvent::AiDelta { token } => json!(token),
            SinkEvent::AiDone { text } => json!(text),
            SinkEvent::Error { message } => json!(message),
        }
    }
}

/// One emitted event with its session id and emission timestamp, matching
/// the wire shape `{type, sessionId, payload, timestamp}`.
#[derive(Debug, Clone)]
pub struct SinkFrame {
    pub session_id: Uuid,
    pub timestamp: i64,
    pub event: SinkEvent,
}

#[derive(Serialize)]
struct WireFrame<'a> {
    #[serde(rename = "type")]
    type_: &'a str,
    #[serde(rename = "sessionId")]
    session_id: Uuid,
    payload: Value,
    timestamp: i64,
}

impl SinkFrame {
    pub fn to_wire_json(&self) -> String {
        let wire = WireFrame {
            type_: self.event.wire_type(),
            session_id: self.session_id,
            payload: self.event.wire_payload(),
            timestamp: self.timestamp,
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }
}

/// A per-session ordered channel. The orchestrator is the sole producer;
/// the boundary's writer task is the sole consumer, so delivery order
/// equals emission order by construction of an mpsc channel.
pub type EventSink = tokio::sync::mpsc::Sender<SinkFrame>;
pub type EventSource = tokio::sync::mpsc::Receiver<SinkFrame>;

pub fn channel(capacity: usize) -> (EventSink, EventSource) {
    tokio::sync::mpsc::channel(capacity)
}
