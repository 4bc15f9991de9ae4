//! Platform speech recognition and synthesis behind one contract
//!
//! The [`SpeechBridge`] drives a [`RecognitionEngine`] and a
//! [`SynthesisEngine`], normalizes their error codes into
//! [`VoiceErrorKind`] and publishes a single [`SpeechState`].

mod bridge;
mod recognizer;
mod synthesizer;
mod transcriber;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use bridge::{SpeechBridge, SpeechState};
pub use recognizer::TranscribingRecognizer;
pub use synthesizer::{CommandSynthesizer, UnavailableSynthesizer};
pub use transcriber::{Transcriber, WhisperTranscriber};

use crate::Result;
use crate::audio::PermissionState;
use crate::error::VoiceErrorKind;

/// Recognition preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Keep listening after the first final result
    pub continuous: bool,
    /// Report partial transcripts while the user speaks
    pub interim_results: bool,
    /// BCP-47 language tag
    pub language: String,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            continuous: false,
            interim_results: true,
            language: "en-US".to_string(),
        }
    }
}

/// Partial update for [`RecognitionSettings`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionSettingsUpdate {
    pub continuous: Option<bool>,
    pub interim_results: Option<bool>,
    pub language: Option<String>,
}

/// Local synthesis preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Speaking rate, 1.0 is normal
    pub rate: f32,
    /// Pitch, 1.0 is normal
    pub pitch: f32,
    /// Volume, 0.0-1.0
    pub volume: f32,
    /// Engine-specific voice name
    pub voice: Option<String>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
        }
    }
}

/// Partial update for [`SynthesisSettings`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSettingsUpdate {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    pub voice: Option<Option<String>>,
}

impl RecognitionSettings {
    pub fn apply(&mut self, update: RecognitionSettingsUpdate) {
        if let Some(v) = update.continuous {
            self.continuous = v;
        }
        if let Some(v) = update.interim_results {
            self.interim_results = v;
        }
        if let Some(v) = update.language {
            self.language = v;
        }
    }
}

impl SynthesisSettings {
    pub fn apply(&mut self, update: SynthesisSettingsUpdate) {
        if let Some(v) = update.rate {
            self.rate = v.clamp(0.1, 10.0);
        }
        if let Some(v) = update.pitch {
            self.pitch = v.clamp(0.0, 2.0);
        }
        if let Some(v) = update.volume {
            self.volume = v.clamp(0.0, 1.0);
        }
        if let Some(v) = update.voice {
            self.voice = v;
        }
    }
}

/// Events emitted by a recognition engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result { transcript: String, is_final: bool },
    /// Platform error code such as `not-allowed` or `no-speech`
    Error(String),
    /// Recognition stopped
    End,
}

/// Events emitted by a synthesis engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started,
    Ended,
    Error(String),
}

pub type RecognitionListener = Arc<dyn Fn(RecognitionEvent) + Send + Sync>;
pub type SynthesisListener = Arc<dyn Fn(SynthesisEvent) + Send + Sync>;

/// Speech-to-text engine
pub trait RecognitionEngine: Send + Sync {
    /// Begin recognition, reporting through `listener` until `End`
    ///
    /// # Errors
    ///
    /// Returns error if recognition cannot start
    fn start(&self, settings: &RecognitionSettings, listener: RecognitionListener) -> Result<()>;

    /// Stop recognition; the engine emits `End` when done
    fn stop(&self);

    /// Microphone permission, without prompting
    fn permission_state(&self) -> PermissionState;
}

/// Text-to-speech engine
pub trait SynthesisEngine: Send + Sync {
    /// Speak `text`, reporting through `listener`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis cannot start
    fn speak(&self, text: &str, settings: &SynthesisSettings, listener: SynthesisListener)
    -> Result<()>;

    /// Stop the current utterance without emitting further events
    fn cancel(&self);

    /// # Errors
    ///
    /// Returns error if the engine cannot pause
    fn pause(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns error if the engine cannot resume
    fn resume(&self) -> Result<()>;
}

/// Normalize a platform recognition error code
#[must_use]
pub fn classify_recognition_error(code: &str) -> VoiceErrorKind {
    match code {
        "not-allowed" | "permission-denied" => VoiceErrorKind::PermissionDenied,
        "no-speech" => VoiceErrorKind::NoSpeechDetected,
        "audio-capture" => VoiceErrorKind::DeviceUnavailable,
        "network" => VoiceErrorKind::NetworkFailure,
        "service-not-allowed" => VoiceErrorKind::ServiceUnavailable,
        _ => VoiceErrorKind::Unknown,
    }
}

/// Platform code reported for a crate error
#[must_use]
pub const fn recognition_error_code(kind: VoiceErrorKind) -> &'static str {
    match kind {
        VoiceErrorKind::PermissionDenied => "not-allowed",
        VoiceErrorKind::NoSpeechDetected => "no-speech",
        VoiceErrorKind::DeviceUnavailable => "audio-capture",
        VoiceErrorKind::NetworkFailure => "network",
        VoiceErrorKind::ServiceUnavailable => "service-not-allowed",
        VoiceErrorKind::DecodeFailure | VoiceErrorKind::ProtocolError | VoiceErrorKind::Unknown => {
            "aborted"
        }
    }
}
