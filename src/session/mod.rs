//! Voice session orchestration
//!
//! A [`VoiceSession`] picks one listening backend for its lifetime, sends
//! finalized transcripts to the [`Assistant`], prepares the reply for
//! speech and plays it, and publishes a [`CombinedVoiceState`] merged from
//! every subsystem it drives.

mod assistant;
mod intent;
mod mode;
mod orchestrator;
mod playback;
mod sanitize;
mod summarizer;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use assistant::{Assistant, AssistantReply, HttpAssistant};
pub use intent::{Navigator, Screen, detect_navigation};
pub use mode::{AdvancedCapture, CaptureSources, VoiceCapture, VoiceMode};
pub use orchestrator::{SessionParts, TurnOutcome, VoiceSession};
pub use playback::{ClipFormat, ClipPlayer};
pub use sanitize::sanitize_for_speech;
pub use summarizer::{HttpSummarizer, Summarizer, SummaryStyle, prepare_reply, truncate_to_words};

use crate::error::VoiceErrorKind;
use crate::speech::SpeechState;
use crate::transport::{ConnectionQuality, ConnectionState, TransportStatus};
use crate::tts::TtsState;

/// Voice preferences for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Stream audio to the realtime server
    pub realtime_mode: bool,
    /// Use the local enhancement pipeline
    pub advanced_processing: bool,
    /// Speak assistant replies
    pub voice_output: bool,
    /// Summarize long replies before speaking them
    pub auto_summarize: bool,
    pub summary_max_words: usize,
    pub summary_style: SummaryStyle,
    /// Replies longer than this many characters get summarized
    pub long_reply_chars: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            realtime_mode: false,
            advanced_processing: false,
            voice_output: true,
            auto_summarize: true,
            summary_max_words: 60,
            summary_style: SummaryStyle::default(),
            long_reply_chars: 280,
        }
    }
}

/// Enhancement pipeline status as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdvancedStatus {
    pub running: bool,
    pub level: f32,
    pub voice_detected: bool,
    pub error: Option<VoiceErrorKind>,
}

/// Session-owned turn state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnState {
    pub processing: bool,
    /// Last transcript submitted to the assistant
    pub transcript: String,
    pub error: Option<VoiceErrorKind>,
}

/// Everything the combined view is merged from
#[derive(Debug, Clone, Copy)]
pub struct StateSources<'a> {
    pub mode: VoiceMode,
    pub speech: &'a SpeechState,
    pub tts: Option<&'a TtsState>,
    pub advanced: Option<&'a AdvancedStatus>,
    pub transport: Option<&'a TransportStatus>,
    pub turn: &'a TurnState,
    pub server_audio_playing: bool,
}

/// Read-only projection of the whole voice session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedVoiceState {
    pub mode: VoiceMode,
    /// Backend currently listening; basic when a realtime session has no
    /// server connection
    pub listening_source: VoiceMode,
    pub is_listening: bool,
    pub is_speaking: bool,
    pub is_processing: bool,
    pub current_transcript: String,
    /// First error in precedence order, as a user-facing message
    pub error: Option<String>,
    /// Advanced mode only
    pub audio_level: Option<f32>,
    /// Realtime mode only
    pub connection_quality: Option<ConnectionQuality>,
    /// Realtime mode only
    pub latency: Option<Duration>,
}

impl CombinedVoiceState {
    /// Merge subsystem states; only the active mode contributes listening
    /// state and extras
    #[must_use]
    pub fn merge(sources: &StateSources<'_>) -> Self {
        let transport = sources
            .transport
            .filter(|_| sources.mode == VoiceMode::Realtime);
        let advanced = sources
            .advanced
            .filter(|_| sources.mode == VoiceMode::Advanced);

        let listening_source = match sources.mode {
            VoiceMode::Realtime
                if sources.speech.is_listening && !transport.is_some_and(|t| t.is_connected) =>
            {
                VoiceMode::Basic
            }
            mode => mode,
        };

        let is_listening = match listening_source {
            VoiceMode::Basic => sources.speech.is_listening,
            VoiceMode::Advanced => advanced.is_some_and(|a| a.running),
            VoiceMode::Realtime => transport.is_some_and(|t| t.is_transmitting),
        };

        let is_speaking = sources.tts.is_some_and(|t| t.is_playing)
            || sources.speech.is_speaking
            || sources.server_audio_playing;

        // Transport errors stay hidden while a reconnect is still pending
        let transport_error = transport.and_then(|t| {
            let settled = t.state == ConnectionState::Error
                || (t.state == ConnectionState::Disconnected && !t.reconnect_pending);
            (settled && t.last_error.is_some()).then_some(VoiceErrorKind::NetworkFailure)
        });

        let listening_error = match (sources.mode, listening_source) {
            (VoiceMode::Realtime, VoiceMode::Basic) => sources.speech.error_kind.or(transport_error),
            (_, VoiceMode::Basic) => sources.speech.error_kind,
            (_, VoiceMode::Advanced) => advanced.and_then(|a| a.error),
            (_, VoiceMode::Realtime) => transport_error,
        };

        let error = listening_error
            .or(sources.turn.error)
            .or_else(|| sources.tts.and_then(|t| t.error_kind))
            .or(sources.speech.error_kind)
            .map(|kind| kind.user_message().to_string());

        let current_transcript = if sources.turn.transcript.is_empty() {
            sources.speech.interim_transcript.clone()
        } else {
            sources.turn.transcript.clone()
        };

        Self {
            mode: sources.mode,
            listening_source,
            is_listening,
            is_speaking,
            is_processing: sources.turn.processing,
            current_transcript,
            error,
            audio_level: advanced.map(|a| a.level),
            connection_quality: transport.filter(|t| t.is_connected).map(|t| t.quality),
            latency: transport.and_then(|t| t.latency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources<'a>(
        mode: VoiceMode,
        speech: &'a SpeechState,
        turn: &'a TurnState,
    ) -> StateSources<'a> {
        StateSources {
            mode,
            speech,
            tts: None,
            advanced: None,
            transport: None,
            turn,
            server_audio_playing: false,
        }
    }

    #[test]
    fn extras_only_for_active_mode() {
        let speech = SpeechState::default();
        let turn = TurnState::default();
        let advanced = AdvancedStatus {
            running: true,
            level: 42.0,
            ..AdvancedStatus::default()
        };

        let mut input = sources(VoiceMode::Basic, &speech, &turn);
        input.advanced = Some(&advanced);
        let state = CombinedVoiceState::merge(&input);
        assert_eq!(state.audio_level, None);
        assert!(!state.is_listening);

        input.mode = VoiceMode::Advanced;
        let state = CombinedVoiceState::merge(&input);
        assert_eq!(state.audio_level, Some(42.0));
        assert!(state.is_listening);
        assert_eq!(state.connection_quality, None);
    }

    #[test]
    fn listening_source_error_wins() {
        let speech = SpeechState {
            error_kind: Some(VoiceErrorKind::NoSpeechDetected),
            ..SpeechState::default()
        };
        let turn = TurnState {
            error: Some(VoiceErrorKind::ServiceUnavailable),
            ..TurnState::default()
        };

        let state = CombinedVoiceState::merge(&sources(VoiceMode::Basic, &speech, &turn));
        assert_eq!(
            state.error.as_deref(),
            Some(VoiceErrorKind::NoSpeechDetected.user_message())
        );
    }

    #[test]
    fn transport_error_hidden_while_reconnecting() {
        let speech = SpeechState::default();
        let turn = TurnState::default();
        let mut status = TransportStatus {
            state: ConnectionState::Disconnected,
            last_error: Some("connection reset".into()),
            reconnect_pending: true,
            ..TransportStatus::default()
        };

        let mut input = sources(VoiceMode::Realtime, &speech, &turn);
        input.transport = Some(&status);
        assert_eq!(CombinedVoiceState::merge(&input).error, None);

        status.reconnect_pending = false;
        let mut input = sources(VoiceMode::Realtime, &speech, &turn);
        input.transport = Some(&status);
        let state = CombinedVoiceState::merge(&input);
        assert_eq!(
            state.error.as_deref(),
            Some(VoiceErrorKind::NetworkFailure.user_message())
        );
        assert!(!state.error.unwrap_or_default().contains("reset"));
    }

    #[test]
    fn realtime_without_server_listens_through_speech() {
        let speech = SpeechState {
            is_listening: true,
            ..SpeechState::default()
        };
        let turn = TurnState::default();
        let mut status = TransportStatus {
            state: ConnectionState::Disconnected,
            last_error: Some("connection refused".into()),
            ..TransportStatus::default()
        };

        let mut input = sources(VoiceMode::Realtime, &speech, &turn);
        input.transport = Some(&status);
        let state = CombinedVoiceState::merge(&input);
        assert_eq!(state.mode, VoiceMode::Realtime);
        assert_eq!(state.listening_source, VoiceMode::Basic);
        assert!(state.is_listening);
        assert_eq!(
            state.error.as_deref(),
            Some(VoiceErrorKind::NetworkFailure.user_message())
        );

        status.state = ConnectionState::Connected;
        status.is_connected = true;
        status.last_error = None;
        let mut input = sources(VoiceMode::Realtime, &speech, &turn);
        input.transport = Some(&status);
        let state = CombinedVoiceState::merge(&input);
        assert_eq!(state.listening_source, VoiceMode::Realtime);
        assert!(!state.is_listening);
    }

    #[test]
    fn turn_transcript_preferred_over_interim() {
        let speech = SpeechState {
            interim_transcript: "show my".into(),
            ..SpeechState::default()
        };
        let mut turn = TurnState::default();

        let state = CombinedVoiceState::merge(&sources(VoiceMode::Basic, &speech, &turn));
        assert_eq!(state.current_transcript, "show my");

        turn.transcript = "show my budget".into();
        let state = CombinedVoiceState::merge(&sources(VoiceMode::Basic, &speech, &turn));
        assert_eq!(state.current_transcript, "show my budget");
    }
}
