//! Streaming speech-to-text adapter.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// A callback delivered by the STT stream. For a given handle, callbacks
/// are delivered in emission order; a `Final` implies all earlier
/// `Partial`s for the same utterance have already been delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum SttCallback {
    Partial { text: String, confidence: f32 },
    Final { text: String, confidence: f32 },
    Error { message: String },
    Closed,
}

/// A live streaming session with the STT provider.
#[async_trait]
pub trait SttStream: Send {
    /// Forward raw audio bytes to the provider.
    async fn send(&mut self, payload: &[u8]) -> anyhow::Result<()>;

    /// Await the next callback. Returns `None` once the stream is
    /// permanently closed and will never produce another callback.
    async fn recv(&mut self) -> Option<SttCallback>;

    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Opens streaming STT sessions.
#[async_trait]
pub trait SttAdapter: Send + Sync {
    async fn start(
        &self,
        session: Uuid,
        sample_rate: u32,
        language: &str,
    ) -> anyhow::Result<Box<dyn SttStream>>;
}

/// A deterministic stand-in used by tests and by the default binary until a
/// real vendor adapter is wired in. Each call to `start` consumes the next
/// preset script of callbacks (or falls back to echoing nothing), so a test
/// can drive the orchestrator through a scripted conversation.
pub struct MockSttAdapter {
    scripts: Mutex<VecDeque<Vec<SttCallback>>>,
}

impl MockSttAdapter {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a script of callbacks to hand out to the next `start` call.
    pub fn push_script(&self, script: Vec<SttCallback>) {
        self.scripts.lock().unwrap().push_back(script);
    }
}

impl Default for MockSttAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttAdapter for MockSttAdapter {
    async fn start(
        &self,
        _session: Uuid,
        _sample_rate: u32,
        _language: &str,
    ) -> anyhow::Result<Box<dyn SttStream>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(MockSttStream {
            pending: script.into(),
            stopped: false,
        }))
    }
}

struct MockSttStream {
    pending: VecDeque<SttCallback>,
    stopped: bool,
}

#[async_trait]
impl SttStream for MockSttStream {
    async fn send(&mut self, _payload: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<SttCallback> {
        if self.stopped {
            return None;
        }
        match self.pending.pop_front() {
            Some(cb) => Some(cb),
            None => std::future::pending().await,
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.stopped = true;
        self.pending.clear();
        Ok(())
    }
}
