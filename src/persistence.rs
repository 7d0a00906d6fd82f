//! Fire-and-forget persistence sink. Failures here are always swallowed —
//! persistence must never surface to the client or block a state
//! transition.

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn record(
        &self,
        session: Uuid,
        user_text: &str,
        reply: &str,
        model: &str,
        tokens_used: Option<u32>,
        processing_ms: u64,
    ) -> anyhow::Result<()>;
}

pub struct LoggingPersistenceSink;

#[async_trait]
impl PersistenceSink for LoggingPersistenceSink {
    async fn record(
        &self,
        session: Uuid,
        user_text: &str,
        reply: &str,
        model: &str,
        tokens_used: Option<u32>,
        processing_ms: u64,
    ) -> anyhow::Result<()> {
        tracing::info!(
            %session,
            model,
            ?tokens_used,
            processing_ms,
            user_chars = user_text.len(),
            reply_chars = reply.len(),
            "turn completed"
        );
        Ok(())
    }
}
