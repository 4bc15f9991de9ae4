//! Error types for the Cadence voice engine

use std::fmt;

use thiserror::Error;

/// Result type alias for voice engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing classification of voice failures
///
/// Every error surfaced to the UI collapses into one of these kinds, each
/// with exactly one human-readable message. Raw platform or protocol codes
/// never reach the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceErrorKind {
    /// Microphone access was refused
    PermissionDenied,
    /// No usable audio device
    DeviceUnavailable,
    /// Recognition ended without hearing speech
    NoSpeechDetected,
    /// Network request or socket failed
    NetworkFailure,
    /// Remote service rejected the request or is down
    ServiceUnavailable,
    /// Audio payload could not be decoded
    DecodeFailure,
    /// Server sent a malformed or unknown message
    ProtocolError,
    /// Anything else
    Unknown,
}

impl VoiceErrorKind {
    /// The message shown to the user for this kind of failure
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Microphone access was denied. Allow microphone access in your system settings and try again."
            }
            Self::DeviceUnavailable => {
                "No microphone was found. Check that an input device is connected."
            }
            Self::NoSpeechDetected => "I didn't hear anything. Please try speaking again.",
            Self::NetworkFailure => {
                "The voice service could not be reached. Check your connection."
            }
            Self::ServiceUnavailable => "The voice service is unavailable right now.",
            Self::DecodeFailure => "The audio response could not be decoded.",
            Self::ProtocolError => "The voice server sent an unexpected response.",
            Self::Unknown => "Something went wrong with voice interaction.",
        }
    }

    /// Stable lowercase identifier, used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::DeviceUnavailable => "device-unavailable",
            Self::NoSpeechDetected => "no-speech-detected",
            Self::NetworkFailure => "network-failure",
            Self::ServiceUnavailable => "service-unavailable",
            Self::DecodeFailure => "decode-failure",
            Self::ProtocolError => "protocol-error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VoiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the voice engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Classified voice failure
    #[error("{0}: {1}")]
    Voice(VoiceErrorKind, String),

    /// Audio device or processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Invalid voice activity detection settings
    #[error("vad error: {0}")]
    Vad(String),

    /// Realtime transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed server message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Speech recognition or synthesis error
    #[error("speech error: {0}")]
    Speech(String),

    /// Assistant backend error
    #[error("assistant error: {0}")]
    Assistant(String),

    /// Summarizer error
    #[error("summarizer error: {0}")]
    Summarizer(String),

    /// Request was cancelled before it completed
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Shorthand for a classified voice error
    pub fn voice(kind: VoiceErrorKind, detail: impl Into<String>) -> Self {
        Self::Voice(kind, detail.into())
    }

    /// Classify this error into the user-facing taxonomy
    #[must_use]
    pub fn kind(&self) -> VoiceErrorKind {
        match self {
            Self::Voice(kind, _) => *kind,
            Self::Audio(_) => VoiceErrorKind::DeviceUnavailable,
            Self::Protocol(_) | Self::Serialization(_) => VoiceErrorKind::ProtocolError,
            Self::Transport(_) | Self::WebSocket(_) | Self::Io(_) => VoiceErrorKind::NetworkFailure,
            Self::Http(e) => {
                if e.is_decode() {
                    VoiceErrorKind::DecodeFailure
                } else if e.status().is_some() {
                    VoiceErrorKind::ServiceUnavailable
                } else {
                    VoiceErrorKind::NetworkFailure
                }
            }
            Self::Tts(_) | Self::Assistant(_) | Self::Summarizer(_) => {
                VoiceErrorKind::ServiceUnavailable
            }
            Self::Config(_) | Self::Vad(_) | Self::Speech(_) | Self::Cancelled | Self::Toml(_) => {
                VoiceErrorKind::Unknown
            }
        }
    }

    /// Human-readable message for the UI
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    /// Whether this error is a cancellation rather than a failure
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
