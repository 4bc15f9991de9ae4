//! Utterance segmentation driven by voice activity edges

use std::collections::VecDeque;
use std::time::Duration;

/// A complete utterance between a rising and a falling activity edge
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Interleaved samples, including pre-roll
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Utterance {
    /// Length of the utterance
    #[must_use]
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / usize::from(self.channels.max(1));
        let nanos = frames as u128 * 1_000_000_000 / u128::from(self.sample_rate.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Collects samples while speech is active and emits them when it ends
///
/// Detection only rises after the minimum speech duration, so a pre-roll
/// of recent audio is kept and prepended to each utterance.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    sample_rate: u32,
    channels: u16,
    pre_roll: VecDeque<f32>,
    pre_roll_capacity: usize,
    min_samples: usize,
    max_samples: usize,
    buffer: Vec<f32>,
    in_speech: bool,
}

impl UtteranceSegmenter {
    /// Create a segmenter keeping `pre_roll` of audio before each rising edge
    /// and dropping utterances shorter than `min_utterance`
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16, pre_roll: Duration, min_utterance: Duration) -> Self {
        Self {
            sample_rate,
            channels,
            pre_roll: VecDeque::new(),
            pre_roll_capacity: samples_for(sample_rate, channels, pre_roll),
            min_samples: samples_for(sample_rate, channels, min_utterance),
            max_samples: usize::MAX,
            buffer: Vec::new(),
            in_speech: false,
        }
    }

    /// Cut utterances that grow past `max`, e.g. under steady noise that
    /// keeps the detector active
    ///
    /// A zero duration leaves utterances unbounded.
    #[must_use]
    pub fn with_max_utterance(mut self, max: Duration) -> Self {
        self.max_samples = if max.is_zero() {
            usize::MAX
        } else {
            samples_for(self.sample_rate, self.channels, max).max(1)
        };
        self
    }

    /// Push one frame together with the detector output for it
    pub fn push(&mut self, samples: &[f32], speech: bool) -> Option<Utterance> {
        match (self.in_speech, speech) {
            (false, false) => {
                self.remember(samples);
                None
            }
            (false, true) => {
                self.in_speech = true;
                self.buffer.clear();
                self.buffer.extend(self.pre_roll.drain(..));
                self.buffer.extend_from_slice(samples);
                None
            }
            (true, true) => {
                self.buffer.extend_from_slice(samples);
                if self.buffer.len() < self.max_samples {
                    return None;
                }
                // Still speaking; the next frame starts a fresh utterance
                tracing::debug!(samples = self.buffer.len(), "utterance hit the length cap");
                self.finish()
            }
            (true, false) => {
                self.buffer.extend_from_slice(samples);
                self.in_speech = false;
                self.finish()
            }
        }
    }

    /// Whether an utterance is being collected
    #[must_use]
    pub const fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Drop any partial utterance and pre-roll
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.buffer.clear();
        self.pre_roll.clear();
    }

    fn remember(&mut self, samples: &[f32]) {
        self.pre_roll.extend(samples.iter().copied());
        let excess = self.pre_roll.len().saturating_sub(self.pre_roll_capacity);
        self.pre_roll.drain(..excess);
    }

    fn finish(&mut self) -> Option<Utterance> {
        let samples = std::mem::take(&mut self.buffer);
        if samples.len() < self.min_samples {
            tracing::trace!(samples = samples.len(), "utterance too short, dropped");
            return None;
        }

        tracing::debug!(samples = samples.len(), "utterance complete");
        Some(Utterance {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

fn samples_for(sample_rate: u32, channels: u16, d: Duration) -> usize {
    let frames = u128::from(sample_rate) * d.as_millis() / 1000;
    usize::try_from(frames)
        .unwrap_or(usize::MAX)
        .saturating_mul(usize::from(channels.max(1)))
}
