//! Orchestration states. User speech arriving while the assistant is
//! speaking collapses straight back to `Listening` rather than passing
//! through a dedicated interrupted state (see DESIGN.md).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Listening,
    ProcessingSpeech,
    DetectingPause,
    AiProcessing,
    AiResponding,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        OrchestratorState::Listening
    }
}
