//! Audio frame (C1): an immutable carrier of a PCM window.

use std::sync::atomic::{AtomicU64, Ordering};

static FRAME_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// An immutable 16-bit PCM audio frame with derived energy measures.
///
/// Constructed once per inbound chunk and never retained past the step
/// that consumes it; downstream components (VAD, STT) read it, they don't
/// own it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    payload: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    sequence: u64,
    captured_at_ms: i64,
}

impl AudioFrame {
    /// Builds a frame, assigning it the next process-wide sequence number.
    ///
    /// `captured_at_ms` is milliseconds since the Unix epoch.
    pub fn new(
        payload: Vec<u8>,
        sample_rate: u32,
        channels: u16,
        captured_at_ms: i64,
    ) -> anyhow::Result<Self> {
        if payload.is_empty() {
            anyhow::bail!("audio frame payload must not be empty");
        }
        if sample_rate == 0 {
            anyhow::bail!("audio frame sample rate must be positive");
        }
        if channels == 0 {
            anyhow::bail!("audio frame channel count must be positive");
        }
        let frame_bytes = channels as usize * 2;
        if payload.len() % frame_bytes != 0 {
            anyhow::bail!(
                "audio frame payload length {} is not a multiple of channels*2 ({})",
                payload.len(),
                frame_bytes
            );
        }

        Ok(Self {
            payload,
            sample_rate,
            channels,
            sequence: FRAME_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            captured_at_ms,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    /// Duration of the frame in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        let samples = self.payload.len() / (self.channels as usize * 2);
        (samples as f64 / self.sample_rate as f64) * 1000.0
    }

    fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
    }

    /// Root-mean-square energy over normalized [-1, 1] samples, in [0, 1].
    pub fn rms_energy(&self) -> f32 {
        let mut sum_sq = 0f64;
        let mut count = 0usize;
        for sample in self.samples() {
            let normalized = sample as f64 / 32768.0;
            sum_sq += normalized * normalized;
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        (sum_sq / count as f64).sqrt() as f32
    }

    /// Peak absolute amplitude over normalized [-1, 1] samples, in [0, 1].
    pub fn peak_amplitude(&self) -> f32 {
        self.samples()
            .map(|s| (s as f32 / 32768.0).abs())
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn rejects_misaligned_payload() {
        let err = AudioFrame::new(vec![0u8; 3], 16_000, 1, 0).unwrap_err();
        assert!(err.to_string().contains("not a multiple"));
    }

    #[test]
    fn all_zero_payload_has_zero_energy() {
        let frame = AudioFrame::new(pcm(&[0, 0, 0, 0]), 16_000, 1, 0).unwrap();
        assert_eq!(frame.rms_energy(), 0.0);
        assert_eq!(frame.peak_amplitude(), 0.0);
    }

    #[test]
    fn saturated_payload_has_peak_near_one() {
        let frame = AudioFrame::new(pcm(&[i16::MIN, i16::MAX, i16::MIN, i16::MAX]), 16_000, 1, 0).unwrap();
        assert!(frame.peak_amplitude() > 0.99);
        assert!(frame.rms_energy() > 0.9);
    }

    #[test]
    fn sequence_numbers_are_monotonic_and_unique() {
        let a = AudioFrame::new(pcm(&[1, 2]), 16_000, 1, 0).unwrap();
        let b = AudioFrame::new(pcm(&[3, 4]), 16_000, 1, 0).unwrap();
        assert!(b.sequence() > a.sequence());
    }

    #[test]
    fn byte_round_trip_is_stable() {
        let payload = pcm(&[100, -200, 300, -400]);
        let a = AudioFrame::new(payload.clone(), 16_000, 1, 0).unwrap();
        let b = AudioFrame::new(payload.clone(), 16_000, 1, 0).unwrap();
        assert_eq!(a.payload(), b.payload());
        assert_eq!(a.payload(), payload.as_slice());
    }
}
