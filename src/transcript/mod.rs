//! Transcript Buffer Manager (C3): per-session live + confirmed segment store.

use std::collections::VecDeque;

/// Whether a segment is still being revised by the STT adapter or is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    Live,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub confidence: f32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub finality: Finality,
}

/// A consistent snapshot of the assembled context.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub confirmed_text: String,
    pub live_text: String,
    pub has_content: bool,
}

/// One live (tentative) segment plus a bounded, append-only confirmed list.
///
/// Confirmed segments never mutate after insertion and concatenate in
/// insertion order; `context()` always returns a consistent snapshot
/// because it only ever reads, never partially updates, the two fields.
pub struct TranscriptStore {
    confirmed_bound: usize,
    live: Option<TranscriptSegment>,
    confirmed: VecDeque<TranscriptSegment>,
}

impl TranscriptStore {
    pub fn new(confirmed_bound: usize) -> Self {
        Self {
            confirmed_bound,
            live: None,
            confirmed: VecDeque::new(),
        }
    }

    /// Replaces the live segment wholesale.
    pub fn update_live(&mut self, text: impl Into<String>, confidence: f32, now_ms: i64) {
        self.live = Some(TranscriptSegment {
            text: text.into(),
            confidence,
            start_ms: now_ms,
            end_ms: now_ms,
            finality: Finality::Live,
        });
    }

    /// Appends a confirmed segment and clears the live one, returning the
    /// appended segment. Overflow of the bounded list drops the oldest.
    pub fn confirm_buffer(
        &mut self,
        text: impl Into<String>,
        confidence: f32,
        now_ms: i64,
    ) -> TranscriptSegment {
        let segment = TranscriptSegment {
            text: text.into(),
            confidence,
            start_ms: now_ms,
            end_ms: now_ms,
            finality: Finality::Confirmed,
        };
        self.confirmed.push_back(segment.clone());
        while self.confirmed.len() > self.confirmed_bound {
            self.confirmed.pop_front();
        }
        self.live = None;
        segment
    }

    /// Assembles the concatenation of confirmed segments, joined by a single
    /// space after trimming each, with the live segment appended (leading
    /// space) if non-empty.
    pub fn context(&self) -> Context {
        let confirmed_text = self
            .confirmed
            .iter()
            .map(|s| s.text.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let live_text = self
            .live
            .as_ref()
            .map(|s| s.text.trim().to_string())
            .unwrap_or_default();

        let has_content = !confirmed_text.is_empty() || !live_text.is_empty();

        Context {
            confirmed_text,
            live_text,
            has_content,
        }
    }

    /// Drops all segments. Called on session end.
    pub fn clear(&mut self) {
        self.live = None;
        self.confirmed.clear();
    }

    pub fn confirmed_segments(&self) -> impl Iterator<Item = &TranscriptSegment> {
        self.confirmed.iter()
    }
}

impl Context {
    /// The full text sent to the LLM: confirmed text with the live segment
    /// appended (but never persisted) if present.
    pub fn full_text(&self) -> String {
        if self.live_text.is_empty() {
            self.confirmed_text.clone()
        } else if self.confirmed_text.is_empty() {
            self.live_text.clone()
        } else {
            format!("{} {}", self.confirmed_text, self.live_text)
        }
    }
}
