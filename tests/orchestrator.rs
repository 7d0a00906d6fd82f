//! End-to-end scenarios driving `SessionOrchestrator::run` over real
//! channels.

use std::sync::Arc;
use std::time::Duration;

use convo_orchestrator::adapters::llm::MockLlmAdapter;
use convo_orchestrator::adapters::stt::{MockSttAdapter, SttCallback};
use convo_orchestrator::audio::AudioFrame;
use convo_orchestrator::config::Config;
use convo_orchestrator::events::{self, SinkEvent};
use convo_orchestrator::persistence::LoggingPersistenceSink;
use convo_orchestrator::session::{ControlMessage, SessionHandle, SessionRegistry};
use convo_orchestrator::SessionOrchestrator;
use tokio::sync::mpsc;
use uuid::Uuid;

fn pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn silence_frame(ts: i64) -> AudioFrame {
    AudioFrame::new(pcm(&[0, 0, 0, 0]), 16_000, 1, ts).unwrap()
}

fn speech_frame(ts: i64) -> AudioFrame {
    AudioFrame::new(pcm(&[12_000, -12_000, 12_000, -12_000]), 16_000, 1, ts).unwrap()
}

async fn next_event(rx: &mut mpsc::Receiver<events::SinkFrame>) -> SinkEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a sink event")
        .expect("sink closed unexpectedly")
        .event
}

async fn drain_until<F: Fn(&SinkEvent) -> bool>(
    rx: &mut mpsc::Receiver<events::SinkFrame>,
    predicate: F,
) -> SinkEvent {
    loop {
        let event = next_event(rx).await;
        if predicate(&event) {
            return event;
        }
    }
}

struct Harness {
    frame_tx: mpsc::Sender<AudioFrame>,
    control_tx: mpsc::Sender<ControlMessage>,
    sink_rx: mpsc::Receiver<events::SinkFrame>,
}

fn spawn_session(stt: Arc<MockSttAdapter>, llm: Arc<MockLlmAdapter>) -> Harness {
    let config = Config::default();
    let (sink, sink_rx) = events::channel(128);
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(8);
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
    tokio::spawn(orchestrator.run(frame_rx, control_rx));

    Harness {
        frame_tx,
        control_tx,
        sink_rx,
    }
}

#[tokio::test]
async fn simple_turn_produces_transcript_and_reply() {
    let stt = Arc::new(MockSttAdapter::new());
    stt.push_script(vec![
        SttCallback::Partial {
            text: "hel".into(),
            confidence: 0.4,
        },
        SttCallback::Final {
            text: "hello there".into(),
            confidence: 0.9,
        },
    ]);
    let llm = Arc::new(MockLlmAdapter::new(vec!["Hi".into(), " yourself".into()]));
    let mut h = spawn_session(stt, llm);

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::SessionStarted);
    assert!(matches!(
        drain_until(&mut h.sink_rx, |e| matches!(e, SinkEvent::TranscriptPartial { .. })).await,
        SinkEvent::TranscriptPartial { .. }
    ));
    assert!(matches!(
        drain_until(&mut h.sink_rx, |e| matches!(e, SinkEvent::TranscriptFinal { .. })).await,
        SinkEvent::TranscriptFinal { .. }
    ));

    h.frame_tx.send(speech_frame(0)).await.unwrap();
    h.frame_tx.send(silence_frame(1)).await.unwrap();
    h.frame_tx.send(silence_frame(1201)).await.unwrap(); // 1.2s pause -> SIGNIFICANT_PAUSE

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::AiThinking);
    let first_delta = next_event(&mut h.sink_rx).await;
    assert!(matches!(first_delta, SinkEvent::AiDelta { .. }));
    let done = drain_until(&mut h.sink_rx, |e| matches!(e, SinkEvent::AiDone { .. })).await;
    match done {
        SinkEvent::AiDone { text } => assert_eq!(text, "Hi yourself"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn short_pause_does_not_trigger_a_second_generation() {
    let stt = Arc::new(MockSttAdapter::new());
    stt.push_script(vec![SttCallback::Final {
        text: "are you there".into(),
        confidence: 0.9,
    }]);
    let llm = Arc::new(MockLlmAdapter::new(vec!["yes".into()]));
    let mut h = spawn_session(stt, llm);

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::SessionStarted);
    drain_until(&mut h.sink_rx, |e| matches!(e, SinkEvent::TranscriptFinal { .. })).await;

    // speech, 400ms silence (short pause, no trigger), more speech, then a
    // 1.2s pause that does trigger.
    h.frame_tx.send(speech_frame(0)).await.unwrap();
    h.frame_tx.send(silence_frame(1)).await.unwrap();
    h.frame_tx.send(silence_frame(401)).await.unwrap();
    h.frame_tx.send(speech_frame(450)).await.unwrap();
    h.frame_tx.send(silence_frame(451)).await.unwrap();
    h.frame_tx.send(silence_frame(1651)).await.unwrap();

    let mut thinking_count = 0;
    let done = loop {
        let event = next_event(&mut h.sink_rx).await;
        if matches!(event, SinkEvent::AiThinking) {
            thinking_count += 1;
        }
        if matches!(event, SinkEvent::AiDone { .. }) {
            break event;
        }
    };
    assert!(matches!(done, SinkEvent::AiDone { .. }));
    assert_eq!(thinking_count, 1, "short pause must not have triggered a generation");
}

#[tokio::test]
async fn interruption_stops_the_stream_and_resumes_listening() {
    let stt = Arc::new(MockSttAdapter::new());
    stt.push_script(vec![SttCallback::Final {
        text: "tell me a long story".into(),
        confidence: 0.9,
    }]);
    // Enough tokens that the interruption lands mid-stream.
    let tokens: Vec<String> = (0..50).map(|i| format!(" word{i}")).collect();
    let llm = Arc::new(MockLlmAdapter::new(tokens));
    let mut h = spawn_session(stt, llm);

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::SessionStarted);
    drain_until(&mut h.sink_rx, |e| matches!(e, SinkEvent::TranscriptFinal { .. })).await;

    h.frame_tx.send(speech_frame(0)).await.unwrap();
    h.frame_tx.send(silence_frame(1)).await.unwrap();
    h.frame_tx.send(silence_frame(1201)).await.unwrap();

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::AiThinking);
    // Let a couple of deltas land before interrupting.
    let _ = next_event(&mut h.sink_rx).await;
    let _ = next_event(&mut h.sink_rx).await;

    h.frame_tx.send(speech_frame(1300)).await.unwrap();

    let interrupted = drain_until(&mut h.sink_rx, |e| {
        matches!(e, SinkEvent::AiInterrupted) || matches!(e, SinkEvent::AiDone { .. })
    })
    .await;
    assert_eq!(interrupted, SinkEvent::AiInterrupted);

    // No AI_DONE should ever follow for the cancelled generation.
    let result = tokio::time::timeout(Duration::from_millis(200), h.sink_rx.recv()).await;
    if let Ok(Some(frame)) = result {
        assert!(
            !matches!(frame.event, SinkEvent::AiDone { .. }),
            "a cancelled generation must never emit AI_DONE"
        );
    }
}

#[tokio::test]
async fn llm_error_mid_stream_surfaces_error_and_resets_state() {
    let stt = Arc::new(MockSttAdapter::new());
    stt.push_script(vec![SttCallback::Final {
        text: "hello".into(),
        confidence: 0.9,
    }]);
    let llm = Arc::new(MockLlmAdapter::failing_after(
        vec!["Hi".into(), " there".into(), " friend".into()],
        2,
    ));
    let mut h = spawn_session(stt, llm);

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::SessionStarted);
    drain_until(&mut h.sink_rx, |e| matches!(e, SinkEvent::TranscriptFinal { .. })).await;

    h.frame_tx.send(speech_frame(0)).await.unwrap();
    h.frame_tx.send(silence_frame(1)).await.unwrap();
    h.frame_tx.send(silence_frame(1201)).await.unwrap();

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::AiThinking);
    let mut delta_count = 0;
    let error_event = loop {
        let event = next_event(&mut h.sink_rx).await;
        match event {
            SinkEvent::AiDelta { .. } => delta_count += 1,
            SinkEvent::Error { .. } => break event,
            other => panic!("unexpected event before error: {other:?}"),
        }
    };
    assert_eq!(delta_count, 2, "the two emitted deltas remain visible");
    assert!(matches!(error_event, SinkEvent::Error { .. }));
}

#[tokio::test]
async fn session_end_emits_session_ended_once() {
    let stt = Arc::new(MockSttAdapter::new());
    stt.push_script(vec![]);
    let llm = Arc::new(MockLlmAdapter::new(vec![]));
    let mut h = spawn_session(stt, llm);

    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::SessionStarted);
    h.control_tx.send(ControlMessage::End).await.unwrap();
    assert_eq!(next_event(&mut h.sink_rx).await, SinkEvent::SessionEnded);
}

#[tokio::test]
async fn idle_session_is_ended_via_the_registry_sweep_path() {
    let stt = Arc::new(MockSttAdapter::new());
    stt.push_script(vec![]);
    let llm = Arc::new(MockLlmAdapter::new(vec![]));
    let config = Config::default();
    let (sink, mut sink_rx) = events::channel(128);
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(8);
    let persistence = Arc::new(LoggingPersistenceSink);
    let session_id = Uuid::new_v4();

    // Mirrors how the server registers a session and later sweeps it: the
    // orchestrator itself never sees the registry, only the `ControlMessage`
    // the sweep sends once a handle is found idle.
    let registry = SessionRegistry::new();
    registry.start(SessionHandle::new(session_id, 0, frame_tx, control_tx));

    let orchestrator =
        SessionOrchestrator::new(session_id, "en", &config, stt, llm, persistence, sink);
    tokio::spawn(orchestrator.run(frame_rx, control_rx));

    assert_eq!(next_event(&mut sink_rx).await, SinkEvent::SessionStarted);

    let idle_timeout_ms = 1_000;
    let expired = registry.expired(idle_timeout_ms + 1, idle_timeout_ms as u64);
    assert_eq!(expired, vec![session_id]);
    for id in expired {
        let handle = registry.remove(&id).expect("swept session must still be registered");
        handle.control_tx.send(ControlMessage::End).await.unwrap();
    }
    assert!(registry.get(&session_id).is_none());

    assert_eq!(next_event(&mut sink_rx).await, SinkEvent::SessionEnded);
}

#[tokio::test]
async fn concurrent_sessions_do_not_leak_events_across_each_other() {
    let stt_a = Arc::new(MockSttAdapter::new());
    stt_a.push_script(vec![SttCallback::Final {
        text: "session a".into(),
        confidence: 0.9,
    }]);
    let stt_b = Arc::new(MockSttAdapter::new());
    stt_b.push_script(vec![SttCallback::Final {
        text: "session b".into(),
        confidence: 0.9,
    }]);
    let llm_a = Arc::new(MockLlmAdapter::new(vec!["alpha".into()]));
    let llm_b = Arc::new(MockLlmAdapter::new(vec!["beta".into()]));

    let mut a = spawn_session(stt_a, llm_a);
    let mut b = spawn_session(stt_b, llm_b);

    assert_eq!(next_event(&mut a.sink_rx).await, SinkEvent::SessionStarted);
    assert_eq!(next_event(&mut b.sink_rx).await, SinkEvent::SessionStarted);
    drain_until(&mut a.sink_rx, |e| matches!(e, SinkEvent::TranscriptFinal { .. })).await;
    drain_until(&mut b.sink_rx, |e| matches!(e, SinkEvent::TranscriptFinal { .. })).await;

    a.frame_tx.send(speech_frame(0)).await.unwrap();
    a.frame_tx.send(silence_frame(1)).await.unwrap();
    a.frame_tx.send(silence_frame(1201)).await.unwrap();
    b.frame_tx.send(speech_frame(0)).await.unwrap();
    b.frame_tx.send(silence_frame(1)).await.unwrap();
    b.frame_tx.send(silence_frame(1201)).await.unwrap();

    let done_a = drain_until(&mut a.sink_rx, |e| matches!(e, SinkEvent::AiDone { .. })).await;
    let done_b = drain_until(&mut b.sink_rx, |e| matches!(e, SinkEvent::AiDone { .. })).await;

    match (done_a, done_b) {
        (SinkEvent::AiDone { text: ta }, SinkEvent::AiDone { text: tb }) => {
            assert_eq!(ta, "alpha");
            assert_eq!(tb, "beta");
        }
        _ => unreachable!(),
    }
}
