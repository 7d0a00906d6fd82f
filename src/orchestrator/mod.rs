//! The per-session state machine driving VAD, transcript assembly, the
//! STT/LLM adapters, and interrupt arbitration. Interruption is a
//! cancellation token rather than a polled bool, so a stale generation
//! can never race a fresh one into the event sink.

pub mod state;

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapters::llm::{GenerationOutcome, LlmAdapter};
use crate::adapters::stt::{SttAdapter, SttCallback, SttStream};
use crate::adapters::CancellationToken;
use crate::audio::AudioFrame;
use crate::config::Config;
use crate::error::OrchestratorError;
use crate::events::{EventSink, SinkEvent};
use crate::persistence::PersistenceSink;
use crate::session::ControlMessage;
use crate::transcript::TranscriptStore;
use crate::vad::Vad;

pub use state::OrchestratorState;

/// Internal messages produced by a spawned generation task. Tagged with a
/// generation id so events from a cancelled/superseded generation can be
/// told apart from the current one and discarded.
enum GenerationMsg {
    Token(u64, String),
    Done(u64, GenerationOutcome),
    Error(u64, String),
}

/// The generation currently in flight, plus the exact prompt it was given.
/// Keeping the prompt here (rather than re-reading the transcript later)
/// means the persisted turn always reflects what the model actually saw,
/// even if later transcript confirmations land before generation finishes.
struct InFlightGeneration {
    token: CancellationToken,
    id: u64,
    prompt: String,
}

pub struct SessionOrchestrator {
    session_id: Uuid,
    language: String,
    vad: Vad,
    transcript: TranscriptStore,
    state: OrchestratorState,
    in_flight: Option<InFlightGeneration>,
    next_generation_id: u64,
    stt_stream: Option<Box<dyn SttStream>>,
    stt_adapter: Arc<dyn SttAdapter>,
    llm_adapter: Arc<dyn LlmAdapter>,
    persistence: Arc<dyn PersistenceSink>,
    sink: EventSink,
    generation_tx: mpsc::Sender<GenerationMsg>,
    generation_rx: mpsc::Receiver<GenerationMsg>,
    sample_rate: u32,
    last_known_time_ms: i64,
    ended: bool,
}

impl SessionOrchestrator {
    pub fn new(
        session_id: Uuid,
        language: impl Into<String>,
        config: &Config,
        stt_adapter: Arc<dyn SttAdapter>,
        llm_adapter: Arc<dyn LlmAdapter>,
        persistence: Arc<dyn PersistenceSink>,
        sink: EventSink,
    ) -> Self {
        let (generation_tx, generation_rx) = mpsc::channel(64);
        Self {
            session_id,
            language: language.into(),
            vad: Vad::new(config.vad.clone()),
            transcript: TranscriptStore::new(config.transcript.confirmed_bound),
            state: OrchestratorState::Listening,
            in_flight: None,
            next_generation_id: 0,
            stt_stream: None,
            stt_adapter,
            llm_adapter,
            persistence,
            sink,
            generation_tx,
            generation_rx,
            sample_rate: 16_000,
            last_known_time_ms: 0,
            ended: false,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Emits `session.started` and opens the STT stream. Call once before
    /// feeding frames.
    pub async fn start(&mut self) {
        self.emit(SinkEvent::SessionStarted).await;
        self.ensure_stt_open().await;
    }

    async fn emit(&mut self, event: SinkEvent) {
        let frame = crate::events::SinkFrame {
            session_id: self.session_id,
            timestamp: self.last_known_time_ms,
            event,
        };
        let _ = self.sink.send(frame).await;
    }

    async fn ensure_stt_open(&mut self) {
        if self.stt_stream.is_some() {
            return;
        }
        match self
            .stt_adapter
            .start(self.session_id, self.sample_rate, &self.language)
            .await
        {
            Ok(stream) => self.stt_stream = Some(stream),
            Err(e) => {
                if let Some(msg) = OrchestratorError::SttTransient(e.to_string()).sink_message() {
                    self.emit(SinkEvent::Error { message: msg }).await;
                }
            }
        }
    }

    /// The main driving loop: serializes frames, STT callbacks, and
    /// generation events into one stream of per-session steps. Only this
    /// loop ever mutates orchestrator state, so there is no need for
    /// internal locking.
    pub async fn run(
        mut self,
        mut frame_rx: mpsc::Receiver<AudioFrame>,
        mut control_rx: mpsc::Receiver<ControlMessage>,
    ) {
        self.start().await;
        loop {
            if self.ended {
                break;
            }
            let stt_recv = Self::next_stt_callback(&mut self.stt_stream);
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(frame) => self.handle_frame(frame).await,
                        None => break,
                    }
                }
                control = control_rx.recv() => {
                    match control {
                        Some(ControlMessage::End) | None => {
                            self.end_session().await;
                        }
                    }
                }
                cb = stt_recv => {
                    if let Some(cb) = cb {
                        self.handle_stt_callback(cb).await;
                    } else {
                        self.stt_stream = None;
                    }
                }
                msg = self.generation_rx.recv(), if self.in_flight.is_some() => {
                    if let Some(msg) = msg {
                        self.handle_generation_msg(msg).await;
                    }
                }
            }
        }
    }

    async fn next_stt_callback(stream: &mut Option<Box<dyn SttStream>>) -> Option<SttCallback> {
        match stream {
            Some(s) => s.recv().await,
            None => std::future::pending().await,
        }
    }

    pub async fn handle_frame(&mut self, frame: AudioFrame) {
        self.last_known_time_ms = frame.captured_at_ms();
        let vad_result = self.vad.process(&frame);

        // Step 2: interruption takes priority but never short-circuits the
        // rest of the step — the frame still advances transcription below.
        if vad_result.should_interrupt_ai() {
            self.interrupt_ai().await;
        }

        // Step 3: forward to STT, reopening the stream if needed.
        self.ensure_stt_open().await;
        if let Some(stream) = self.stt_stream.as_mut() {
            if stream.send(frame.payload()).await.is_err() {
                self.stt_stream = None;
                if let Some(msg) = OrchestratorError::SttTransient("send failed".into()).sink_message() {
                    self.emit(SinkEvent::Error { message: msg }).await;
                }
            }
        }

        // Step 4: trigger AI if this pause is significant and nothing is
        // already in flight.
        if vad_result.should_trigger_ai() && self.in_flight.is_none() {
            self.trigger_ai().await;
        }

        // Step 5: table-driven state update for events the AI-generation
        // lifecycle doesn't already own.
        use crate::vad::VadEvent::*;
        match vad_result.event {
            SpeechStarted | SpeechContinuing => self.state = OrchestratorState::ProcessingSpeech,
            PauseStarted | ShortPause => self.state = OrchestratorState::DetectingPause,
            SignificantPause | Waiting | Timeout | AiSpeaking | UserInterrupted => {}
        }
    }

    async fn handle_stt_callback(&mut self, cb: SttCallback) {
        match cb {
            SttCallback::Partial { text, confidence } => {
                self.transcript.update_live(text.clone(), confidence, self.last_known_time_ms);
                self.emit(SinkEvent::TranscriptPartial { text, confidence }).await;
            }
            SttCallback::Final { text, confidence } => {
                self.transcript
                    .confirm_buffer(text.clone(), confidence, self.last_known_time_ms);
                self.emit(SinkEvent::TranscriptFinal { text, confidence }).await;
            }
            SttCallback::Error { message } => {
                if let Some(msg) = OrchestratorError::SttTransient(message).sink_message() {
                    self.emit(SinkEvent::Error { message: msg }).await;
                }
            }
            SttCallback::Closed => {
                self.stt_stream = None;
            }
        }
    }

    async fn trigger_ai(&mut self) {
        let context = self.transcript.context();
        if !context.has_content {
            return;
        }

        let token = CancellationToken::new();
        let generation_id = self.next_generation_id;
        self.next_generation_id += 1;
        let prompt = context.full_text();
        self.in_flight = Some(InFlightGeneration {
            token: token.clone(),
            id: generation_id,
            prompt: prompt.clone(),
        });
        self.state = OrchestratorState::AiProcessing;
        self.emit(SinkEvent::AiThinking).await;
        self.vad.on_ai_response_started();

        let llm = self.llm_adapter.clone();
        let tx = self.generation_tx.clone();
        let session_id = self.session_id;
        let language = self.language.clone();

        tokio::spawn(async move {
            let mut on_token = |t: &str| {
                let _ = tx.try_send(GenerationMsg::Token(generation_id, t.to_string()));
            };
            match llm.generate(session_id, &prompt, &language, token, &mut on_token).await {
                Ok(Some(outcome)) => {
                    let _ = tx.send(GenerationMsg::Done(generation_id, outcome)).await;
                }
                Ok(None) => { /* cancelled: no further events for this generation */ }
                Err(e) => {
                    let _ = tx.send(GenerationMsg::Error(generation_id, e.to_string())).await;
                }
            }
        });
    }

    async fn handle_generation_msg(&mut self, msg: GenerationMsg) {
        let current_generation = self.in_flight.as_ref().map(|g| g.id);

        match msg {
            GenerationMsg::Token(gen, text) => {
                if current_generation != Some(gen) {
                    return;
                }
                if self.state == OrchestratorState::AiProcessing {
                    self.state = OrchestratorState::AiResponding;
                }
                self.emit(SinkEvent::AiDelta { token: text }).await;
            }
            GenerationMsg::Done(gen, outcome) => {
                if current_generation != Some(gen) {
                    return;
                }
                self.emit(SinkEvent::AiDone {
                    text: outcome.content.clone(),
                })
                .await;
                let persistence = self.persistence.clone();
                let session_id = self.session_id;
                let user_text = self
                    .in_flight
                    .as_ref()
                    .map(|g| g.prompt.clone())
                    .unwrap_or_default();
                let model = outcome.model.clone();
                let tokens_used = outcome.tokens_used;
                let processing_ms = outcome.processing_ms;
                let reply = outcome.content;
                tokio::spawn(async move {
                    if let Err(e) = persistence
                        .record(session_id, &user_text, &reply, &model, tokens_used, processing_ms)
                        .await
                    {
                        tracing::warn!(%session_id, error = %e, "persistence failed");
                    }
                });
                self.in_flight = None;
                self.state = OrchestratorState::Listening;
                self.vad.on_ai_response_finished();
            }
            GenerationMsg::Error(gen, message) => {
                if current_generation != Some(gen) {
                    return;
                }
                if let Some(msg) = OrchestratorError::LlmTransient(message).sink_message() {
                    self.emit(SinkEvent::Error { message: msg }).await;
                }
                self.in_flight = None;
                self.state = OrchestratorState::Listening;
                self.vad.on_ai_response_finished();
            }
        }
    }

    /// Cancels the in-flight generation, triggered by a user-speech
    /// interruption.
    async fn interrupt_ai(&mut self) {
        let Some(generation) = self.in_flight.take() else {
            return;
        };
        generation.token.cancel();
        self.state = OrchestratorState::Listening;
        self.vad.on_ai_response_finished();
        self.emit(SinkEvent::AiInterrupted).await;
    }

    async fn end_session(&mut self) {
        if let Some(generation) = self.in_flight.take() {
            generation.token.cancel();
        }
        if let Some(stream) = self.stt_stream.as_mut() {
            let _ = stream.stop().await;
        }
        self.stt_stream = None;
        self.transcript.clear();
        self.emit(SinkEvent::SessionEnded).await;
        self.ended = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::MockLlmAdapter;
    use crate::adapters::stt::MockSttAdapter;
    use crate::persistence::LoggingPersistenceSink;

    fn pcm_frame(samples: &[i16], ts: i64) -> AudioFrame {
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        AudioFrame::new(payload, 16_000, 1, ts).unwrap()
    }

    fn silence(ts: i64) -> AudioFrame {
        pcm_frame(&[0, 0, 0, 0], ts)
    }

    fn speech(ts: i64) -> AudioFrame {
        pcm_frame(&[12000, -12000, 12000, -12000], ts)
    }

    fn new_test_orchestrator(
        llm: Arc<dyn LlmAdapter>,
    ) -> (SessionOrchestrator, mpsc::Receiver<crate::events::SinkFrame>) {
        let config = Config::default();
        let (sink, sink_rx) = crate::events::channel(64);
        let stt = Arc::new(MockSttAdapter::new());
        stt.push_script(vec![]);
        let persistence = Arc::new(LoggingPersistenceSink);
        let orchestrator = SessionOrchestrator::new(
            Uuid::new_v4(),
            "en",
            &config,
            stt,
            llm,
            persistence,
            sink,
        );
        (orchestrator, sink_rx)
    }

    #[tokio::test]
    async fn trigger_without_content_does_not_transition() {
        let llm = Arc::new(MockLlmAdapter::new(vec!["hi".into()]));
        let (mut orchestrator, _rx) = new_test_orchestrator(llm);
        orchestrator.start().await;
        // Silence accumulates to SIGNIFICANT_PAUSE with no confirmed/live text.
        orchestrator.handle_frame(speech(0)).await;
        orchestrator.handle_frame(silence(1)).await;
        orchestrator.handle_frame(silence(3001)).await;
        assert!(orchestrator.in_flight.is_none());
    }

    #[tokio::test]
    async fn significant_pause_with_content_triggers_generation() {
        let llm = Arc::new(MockLlmAdapter::new(vec!["hi".into(), " there".into()]));
        let (mut orchestrator, mut rx) = new_test_orchestrator(llm);
        orchestrator.start().await;
        orchestrator
            .handle_stt_callback(SttCallback::Final {
                text: "hello".into(),
                confidence: 0.9,
            })
            .await;
        orchestrator.handle_frame(speech(0)).await;
        orchestrator.handle_frame(silence(1)).await;
        orchestrator.handle_frame(silence(3001)).await;
        assert!(orchestrator.in_flight.is_some());

        // Drain generation events manually (no full run() loop in this test).
        for _ in 0..2 {
            let msg = orchestrator.generation_rx.recv().await.unwrap();
            orchestrator.handle_generation_msg(msg).await;
        }
        let msg = orchestrator.generation_rx.recv().await.unwrap();
        orchestrator.handle_generation_msg(msg).await;

        assert_eq!(orchestrator.state(), OrchestratorState::Listening);
        assert!(orchestrator.in_flight.is_none());

        let mut saw_done = false;
        while let Ok(frame) = rx.try_recv() {
            if matches!(frame.event, SinkEvent::AiDone { .. }) {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn interruption_cancels_in_flight_generation() {
        let llm = Arc::new(MockLlmAdapter::new(vec!["hi".into()]));
        let (mut orchestrator, _rx) = new_test_orchestrator(llm);
        orchestrator.start().await;
        orchestrator
            .handle_stt_callback(SttCallback::Final {
                text: "hello".into(),
                confidence: 0.9,
            })
            .await;
        orchestrator.handle_frame(speech(0)).await;
        orchestrator.handle_frame(silence(1)).await;
        orchestrator.handle_frame(silence(3001)).await;
        assert!(orchestrator.in_flight.is_some());

        // The cancellation token inside `in_flight` belongs to the spawned
        // generation; interrupting marks it cancelled without waiting.
        orchestrator.handle_frame(speech(3100)).await;
        assert!(orchestrator.in_flight.is_none());
        assert_eq!(orchestrator.state(), OrchestratorState::Listening);
    }
}
