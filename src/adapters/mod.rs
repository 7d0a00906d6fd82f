//! Narrow, replaceable surfaces for the STT and LLM providers. Each ships
//! with a deterministic mock used by the orchestrator's tests.

pub mod llm;
pub mod stt;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-shot, idempotent cancellation signal shared between the
/// orchestrator and an in-flight LLM generation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Idempotent: cancelling an already-cancelled token is a no-op.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_cancellation_is_a_no_op() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
