//! Realtime voice transport
//!
//! A persistent WebSocket to the voice server carrying JSON control
//! messages and binary audio frames, with heartbeat latency measurement
//! and bounded exponential-backoff reconnection.
//!
//! ```text
//! disconnected --connect()--> connecting --open--> connected
//!      ^                           ^                   |
//!      |                           |  backoff (budget) | close
//!      +---------------------------+-------------------+
//! ```

mod backoff;
mod client;
mod heartbeat;
mod protocol;
mod quality;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use backoff::ReconnectPolicy;
pub use client::RealtimeClient;
pub use heartbeat::Heartbeat;
pub use protocol::{
    ClientMessage, ConfigData, PacketMetadata, ServerMessage, VoicePacket, decode_pcm,
    decode_server_text, encode_pcm,
};
pub use quality::{ConnectionQuality, QualityMetrics};

use crate::error::VoiceErrorKind;

/// Realtime transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Voice server WebSocket URL
    pub url: String,
    /// Interval between heartbeat pings
    pub heartbeat_interval_ms: u64,
    /// Automatic reconnects allowed after an unclean close
    pub reconnect_attempts: u32,
    /// Base reconnect delay, doubled per attempt
    pub reconnect_delay_ms: u64,
    /// Frames per transmitted packet
    pub audio_buffer_size: u32,
    /// Ask the server to compress audio responses
    pub compression_enabled: bool,
    /// Transmission capture rate in Hz
    pub sample_rate: u32,
    /// Transmission capture channels
    pub channel_count: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/voice".to_string(),
            heartbeat_interval_ms: 5000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            audio_buffer_size: 4096,
            compression_enabled: false,
            sample_rate: crate::audio::SAMPLE_RATE,
            channel_count: 1,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Error,
}

/// Published transport status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_transmitting: bool,
    /// Latency of the most recent matched pong
    pub latency: Option<Duration>,
    pub quality: ConnectionQuality,
    pub metrics: QualityMetrics,
    pub last_error: Option<String>,
    /// Reconnect attempts made since the last successful open
    pub reconnect_attempt: u32,
    /// A reconnect is scheduled after an unclean close
    pub reconnect_pending: bool,
    #[serde(skip)]
    pub(crate) transmission_requested: bool,
}

impl TransportStatus {
    /// Move to a new connection state, deriving the connected and transmitting flags
    pub(crate) fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        if state != ConnectionState::Disconnected {
            self.reconnect_pending = false;
        }
        self.is_connected = state == ConnectionState::Connected;
        self.is_transmitting = self.is_connected && self.transmission_requested;
    }

    pub(crate) fn request_transmission(&mut self, on: bool) {
        self.transmission_requested = on;
        self.transition(self.state);
    }

    pub(crate) fn record_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
        self.metrics.record_latency(latency);
        self.quality = ConnectionQuality::grade(latency, self.metrics.loss_rate());
    }
}

/// Inbound events from the voice server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Server-side transcription of transmitted audio
    Transcription(String),
    /// Audio to play, from `audio_response` or a raw binary frame
    Audio(Vec<u8>),
    /// Server reported an error or sent something unparseable
    ServerError {
        kind: VoiceErrorKind,
        message: String,
    },
}
