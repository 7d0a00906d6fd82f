//! Voice-Activity Detector (C2): per-frame speech/silence classification
//! with pause-duration banding.

use std::collections::VecDeque;

use crate::audio::AudioFrame;
use crate::config::VadConfig;

/// Classified transition for a single processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechContinuing,
    UserInterrupted,
    ShortPause,
    PauseStarted,
    SignificantPause,
    Waiting,
    Timeout,
    AiSpeaking,
}

/// The immutable outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub speech: bool,
    pub energy: f32,
    pub confidence: f32,
    pub threshold: f32,
    pub silence_duration_ms: i64,
    pub speech_duration_ms: i64,
    pub timestamp_ms: i64,
    pub event: VadEvent,
}

impl VadResult {
    pub fn should_trigger_ai(&self) -> bool {
        self.event == VadEvent::SignificantPause
    }

    pub fn should_interrupt_ai(&self) -> bool {
        self.event == VadEvent::UserInterrupted
    }
}

/// Per-session voice-activity detector. Owned exclusively by that session's
/// orchestrator worker, so it needs no internal synchronization — the
/// single-writer-per-session contract is enforced one level up.
pub struct Vad {
    config: VadConfig,
    baseline: f32,
    is_speaking: bool,
    silence_since_ms: Option<i64>,
    speech_since_ms: Option<i64>,
    ai_speaking: bool,
    history: VecDeque<VadResult>,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            baseline: 0.0,
            is_speaking: false,
            silence_since_ms: None,
            speech_since_ms: None,
            ai_speaking: false,
            history: VecDeque::new(),
        }
    }

    /// Classify one frame. O(1) beyond the frame's own energy computation.
    pub fn process(&mut self, frame: &AudioFrame) -> VadResult {
        let now = frame.captured_at_ms();
        let energy = frame.rms_energy();
        let threshold = self.config.base_energy_threshold.max(2.0 * self.baseline);
        let is_speech = energy > threshold;

        let result = if is_speech {
            let event = if self.ai_speaking {
                VadEvent::UserInterrupted
            } else if self.is_speaking {
                VadEvent::SpeechContinuing
            } else {
                self.speech_since_ms = Some(now);
                VadEvent::SpeechStarted
            };
            self.is_speaking = true;
            self.silence_since_ms = None;
            let speech_duration_ms = now - self.speech_since_ms.unwrap_or(now);
            let confidence = if threshold > 0.0 {
                (energy / threshold).min(1.0)
            } else {
                1.0
            };
            VadResult {
                speech: true,
                energy,
                confidence,
                threshold,
                silence_duration_ms: 0,
                speech_duration_ms,
                timestamp_ms: now,
                event,
            }
        } else {
            // Baseline adapts only on classified silence, so speech never
            // raises it and suppresses later detection.
            self.baseline = 0.95 * self.baseline + 0.05 * energy;
            if self.is_speaking {
                self.silence_since_ms = Some(now);
                self.is_speaking = false;
            }
            let silence_start = self.silence_since_ms.unwrap_or(now);
            let silence_duration_ms = now - silence_start;
            let event = if self.ai_speaking {
                VadEvent::AiSpeaking
            } else {
                self.classify_pause(silence_duration_ms)
            };
            let confidence = if threshold > 0.0 {
                (1.0 - energy / threshold).clamp(0.0, 1.0)
            } else {
                1.0
            };
            VadResult {
                speech: false,
                energy,
                confidence,
                threshold,
                silence_duration_ms,
                speech_duration_ms: 0,
                timestamp_ms: now,
                event,
            }
        };

        self.history.push_back(result);
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }

        result
    }

    /// Boundary rule: an exact-boundary duration uses the *lower* band.
    fn classify_pause(&self, silence_duration_ms: i64) -> VadEvent {
        let c = &self.config;
        if silence_duration_ms <= c.pause_short_ms as i64 {
            VadEvent::ShortPause
        } else if silence_duration_ms <= c.pause_hold_ms as i64 {
            VadEvent::PauseStarted
        } else if silence_duration_ms <= c.pause_trigger_ms as i64 {
            VadEvent::SignificantPause
        } else if silence_duration_ms <= c.pause_timeout_ms as i64 {
            VadEvent::Waiting
        } else {
            VadEvent::Timeout
        }
    }

    /// Invoked by the orchestrator when it starts streaming an AI reply.
    pub fn on_ai_response_started(&mut self) {
        self.ai_speaking = true;
    }

    /// Invoked by the orchestrator when an AI reply finishes or is cancelled.
    pub fn on_ai_response_finished(&mut self) {
        self.ai_speaking = false;
    }

    pub fn history(&self) -> &VecDeque<VadResult> {
        &self.history
    }
}
