//! Voice activity detection
//!
//! A small timing state machine over RMS samples. It does no I/O: callers
//! feed it one RMS value per processing frame together with the frame time,
//! and it answers whether speech is currently present.
//!
//! With detection enabled the output has hysteresis on both edges:
//! speech must persist for `min_speech_duration_ms` before the output rises,
//! and silence must persist for longer than `max_silence_duration_ms` before
//! it falls. Short dips inside an utterance keep the previous answer.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Activity threshold on the 0-100 level scale when hysteresis is disabled
pub const SIMPLE_LEVEL_THRESHOLD: f32 = 1.0;

/// Scale applied to raw RMS when mapping to the 0-100 level scale
pub const LEVEL_SCALE: f32 = 500.0;

/// Map a raw RMS value onto the 0-100 level scale
#[must_use]
pub fn rms_to_level(rms: f32) -> f32 {
    (rms * LEVEL_SCALE).clamp(0.0, 100.0)
}

/// Voice activity detection settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    /// Use the hysteresis state machine; otherwise a plain level threshold
    pub enabled: bool,
    /// RMS above which a frame counts as speech
    pub threshold: f32,
    /// Speech must last this long before activity is reported
    pub min_speech_duration_ms: u64,
    /// Silence longer than this ends an utterance
    pub max_silence_duration_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.01,
            min_speech_duration_ms: 250,
            max_silence_duration_ms: 500,
        }
    }
}

impl VadSettings {
    /// Check that the threshold is a usable RMS value
    ///
    /// # Errors
    ///
    /// Returns `Error::Vad` if the threshold is negative, not finite, or
    /// above full scale
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::Vad(format!(
                "threshold {} is outside 0.0..=1.0",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Transient detector state, cleared on reset
#[derive(Debug, Clone, Copy, Default)]
struct VadRuntimeState {
    speech_started_at: Option<Instant>,
    last_above_threshold_at: Option<Instant>,
}

/// Detects speech presence from a stream of RMS samples
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    settings: VadSettings,
    runtime: VadRuntimeState,
    active: bool,
}

impl VoiceActivityDetector {
    /// Create a detector with the given settings
    #[must_use]
    pub fn new(settings: VadSettings) -> Self {
        Self {
            settings,
            runtime: VadRuntimeState::default(),
            active: false,
        }
    }

    /// Feed one RMS sample observed at `now`, returning whether speech is present
    pub fn process(&mut self, rms: f32, now: Instant) -> bool {
        if !self.settings.enabled {
            self.active = rms_to_level(rms) > SIMPLE_LEVEL_THRESHOLD;
            return self.active;
        }

        if rms > self.settings.threshold {
            self.runtime.last_above_threshold_at = Some(now);
            let started = *self.runtime.speech_started_at.get_or_insert(now);

            if !self.active
                && now.saturating_duration_since(started) >= self.min_speech_duration()
            {
                tracing::trace!(rms, "speech started");
                self.active = true;
            }
        } else if self.runtime.speech_started_at.is_some() {
            let last_above = self.runtime.last_above_threshold_at.unwrap_or(now);

            if now.saturating_duration_since(last_above) > self.max_silence_duration() {
                if self.active {
                    tracing::trace!(rms, "speech ended");
                }
                self.runtime.speech_started_at = None;
                self.active = false;
            }
        }

        self.active
    }

    /// Last reported activity
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Current settings
    #[must_use]
    pub const fn settings(&self) -> &VadSettings {
        &self.settings
    }

    /// Replace the settings; the in-flight utterance state is kept
    pub const fn set_settings(&mut self, settings: VadSettings) {
        self.settings = settings;
    }

    /// Clear all timing state
    pub fn reset(&mut self) {
        self.runtime = VadRuntimeState::default();
        self.active = false;
    }

    const fn min_speech_duration(&self) -> Duration {
        Duration::from_millis(self.settings.min_speech_duration_ms)
    }

    const fn max_silence_duration(&self) -> Duration {
        Duration::from_millis(self.settings.max_silence_duration_ms)
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new(VadSettings::default())
    }
}

/// Root-mean-square energy of a buffer
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
