//! Audio capture and enhancement
//!
//! Acquires the microphone, runs each captured buffer through a small
//! processing graph (gain, high-pass, level analysis) and publishes the
//! latest audio level and voice-activity flag.

mod graph;
mod microphone;
mod pipeline;
mod resample;
mod segmenter;
mod wav;

use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use graph::{GraphParams, ProcessingGraph};
pub use microphone::{
    AudioFrame, CpalMicrophone, FrameSink, Microphone, MicrophoneRequest, MicrophoneStream,
    PermissionState,
};
pub use pipeline::{AudioPipeline, FrameProcessor, PipelineConfig, PipelineStats};
pub use resample::StreamingResampler;
pub use segmenter::{Utterance, UtteranceSegmenter};
pub use wav::samples_to_wav;

/// Default capture sample rate (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Microphone and enhancement settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProcessingSettings {
    /// Apply the high-pass filter to cut rumble and hum
    pub noise_reduction: bool,
    /// Ask the platform for echo cancellation
    pub echo_cancellation: bool,
    /// Normalize input level adaptively
    pub auto_gain_control: bool,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Capture channel count
    pub channel_count: u16,
}

impl Default for AudioProcessingSettings {
    fn default() -> Self {
        Self {
            noise_reduction: true,
            echo_cancellation: true,
            auto_gain_control: true,
            sample_rate: SAMPLE_RATE,
            channel_count: 1,
        }
    }
}

impl AudioProcessingSettings {
    /// Merge a partial update, returning whether the capture format changed
    pub fn apply(&mut self, update: &AudioSettingsUpdate) -> bool {
        let before = (self.sample_rate, self.channel_count);

        if let Some(v) = update.noise_reduction {
            self.noise_reduction = v;
        }
        if let Some(v) = update.echo_cancellation {
            self.echo_cancellation = v;
        }
        if let Some(v) = update.auto_gain_control {
            self.auto_gain_control = v;
        }
        if let Some(v) = update.sample_rate {
            self.sample_rate = v;
        }
        if let Some(v) = update.channel_count {
            self.channel_count = v;
        }

        before != (self.sample_rate, self.channel_count)
    }
}

/// Partial update for [`AudioProcessingSettings`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettingsUpdate {
    pub noise_reduction: Option<bool>,
    pub echo_cancellation: Option<bool>,
    pub auto_gain_control: Option<bool>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
}

/// Latest audio level, produced once per processing callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevelFrame {
    /// Level on a 0-100 scale
    pub level: f32,
    /// Voice activity after detection
    pub voice_detected: bool,
    /// When the frame was processed
    pub emitted_at: Instant,
}

impl AudioLevelFrame {
    /// A silent frame stamped now
    #[must_use]
    pub fn silent() -> Self {
        Self {
            level: 0.0,
            voice_detected: false,
            emitted_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_reports_format_change() {
        let mut settings = AudioProcessingSettings::default();

        let changed = settings.apply(&AudioSettingsUpdate {
            noise_reduction: Some(false),
            ..AudioSettingsUpdate::default()
        });
        assert!(!changed);
        assert!(!settings.noise_reduction);

        let changed = settings.apply(&AudioSettingsUpdate {
            sample_rate: Some(48000),
            ..AudioSettingsUpdate::default()
        });
        assert!(changed);
        assert_eq!(settings.sample_rate, 48000);
    }
}
