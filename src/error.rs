//! Typed error kinds for the orchestrator.
//!
//! Boundary code (server handlers, adapters) wraps these in `anyhow::Result`
//! with `.context(...)`; the state machine itself matches on the variants to
//! decide which sink event to emit (see `error::OrchestratorError::sink_message`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("speech-to-text transient error: {0}")]
    SttTransient(String),

    #[error("speech-to-text fatal error: {0}")]
    SttFatal(String),

    #[error("language model transient error: {0}")]
    LlmTransient(String),

    #[error("generation cancelled")]
    LlmCancelled,

    #[error("persistence sink error: {0}")]
    Persistence(String),

    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("session idle timeout")]
    IdleTimeout,
}

impl OrchestratorError {
    /// The text the sink's `error` event should carry.
    /// Returns `None` for kinds that are never surfaced as an `error` event.
    pub fn sink_message(&self) -> Option<String> {
        match self {
            OrchestratorError::MalformedFrame(_) => None,
            OrchestratorError::Persistence(_) => None,
            OrchestratorError::LlmCancelled => None,
            other => Some(other.to_string()),
        }
    }
}
