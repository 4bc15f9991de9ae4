//! Text-to-speech playback
//!
//! A remote synthesis request produces an audio clip, the clip is loaded
//! into an [`AudioSink`] and played through a [`PlaybackHandle`]. The
//! [`TtsController`] keeps at most one utterance alive and releases every
//! clip it loads exactly once.

mod client;
mod controller;
mod sink;

use serde::{Deserialize, Serialize};

pub use client::{HttpSynthesizer, SynthesizedAudio, Synthesizer};
pub use controller::{TtsController, TtsState};
pub use sink::{
    AudioClip, AudioSink, ClipId, CpalSink, PlaybackEvent, PlaybackHandle, PlaybackListener,
    decode_clip,
};

/// Voice shaping parameters sent with each synthesis request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub speaker_boost: bool,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            speaker_boost: true,
        }
    }
}

/// Playback preferences for synthesized replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub voice_preset: String,
    pub model_id: String,
    pub voice_params: VoiceParams,
    /// Start playback as soon as the clip is ready
    pub auto_play: bool,
    /// Output volume, 0.0-1.0
    pub volume: f32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice_preset: "rachel".to_string(),
            model_id: "eleven_turbo_v2".to_string(),
            voice_params: VoiceParams::default(),
            auto_play: true,
            volume: 1.0,
        }
    }
}

impl TtsSettings {
    /// Merge a partial update, clamping the volume into range
    pub fn apply(&mut self, update: TtsSettingsUpdate) {
        if let Some(v) = update.voice_preset {
            self.voice_preset = v;
        }
        if let Some(v) = update.model_id {
            self.model_id = v;
        }
        if let Some(v) = update.voice_params {
            self.voice_params = v;
        }
        if let Some(v) = update.auto_play {
            self.auto_play = v;
        }
        if let Some(v) = update.volume {
            self.volume = v.clamp(0.0, 1.0);
        }
    }
}

/// Partial update for [`TtsSettings`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsSettingsUpdate {
    pub voice_preset: Option<String>,
    pub model_id: Option<String>,
    pub voice_params: Option<VoiceParams>,
    pub auto_play: Option<bool>,
    pub volume: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_clamps_volume() {
        let mut settings = TtsSettings::default();
        settings.apply(TtsSettingsUpdate {
            volume: Some(3.0),
            voice_preset: Some("adam".into()),
            ..TtsSettingsUpdate::default()
        });

        assert!((settings.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(settings.voice_preset, "adam");
        assert!(settings.auto_play);
    }
}
