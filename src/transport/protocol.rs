//! Realtime socket wire format
//!
//! Client to server:
//! - `{"type":"config","data":{"audioBufferSize":4096,"compressionEnabled":false}}`
//! - `{"type":"ping","id":"…","timestamp":1700000000000}`
//! - `{"type":"audio_packet","id":"…","timestamp":…,"metadata":{…}}` then one binary frame
//!
//! Server to client: `pong`, `audio_response`, `transcription`, `error`,
//! or a raw binary audio frame.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Control message sent to the voice server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Config {
        data: ConfigData,
    },
    Ping {
        id: String,
        timestamp: i64,
    },
    AudioPacket {
        id: String,
        timestamp: i64,
        metadata: PacketMetadata,
    },
}

/// Session parameters announced on open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    pub audio_buffer_size: u32,
    pub compression_enabled: bool,
}

/// Describes the binary frame that follows an `audio_packet` message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketMetadata {
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration in seconds
    pub duration: f64,
}

/// Message received from the voice server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong { id: String },
    AudioResponse { data: Vec<u8> },
    Transcription { data: String },
    Error { message: String },
}

const KNOWN_TYPES: [&str; 4] = ["pong", "audio_response", "transcription", "error"];

/// Decode a text frame, rejecting malformed JSON and unknown types
///
/// # Errors
///
/// Returns `Error::Protocol` for anything that is not a known server message
pub fn decode_server_text(text: &str) -> Result<ServerMessage> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("invalid json: {e}")))?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Protocol("message has no type".to_string()))?;

    if !KNOWN_TYPES.contains(&kind) {
        return Err(Error::Protocol(format!("unknown message type: {kind}")));
    }

    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|e| Error::Protocol(format!("malformed {kind}: {e}")))
}

/// One captured frame ready for transmission
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePacket {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Little-endian f32 PCM
    pub audio_data: Vec<u8>,
    pub metadata: PacketMetadata,
}

impl VoicePacket {
    /// Package interleaved samples as a packet
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[f32], sample_rate: u32, channels: u16) -> Self {
        let frames = samples.len() / usize::from(channels.max(1));
        let duration = frames as f64 / f64::from(sample_rate.max(1));

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            audio_data: encode_pcm(samples),
            metadata: PacketMetadata {
                sample_rate,
                channels,
                duration,
            },
        }
    }

    /// The control message announcing this packet
    #[must_use]
    pub fn header(&self) -> ClientMessage {
        ClientMessage::AudioPacket {
            id: self.id.clone(),
            timestamp: self.timestamp,
            metadata: self.metadata,
        }
    }
}

/// Encode samples as little-endian f32 bytes
#[must_use]
pub fn encode_pcm(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes
///
/// # Errors
///
/// Returns `DecodeFailure` if the length is not a whole number of samples
pub fn decode_pcm(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 4 != 0 {
        return Err(Error::voice(
            crate::error::VoiceErrorKind::DecodeFailure,
            format!("{} bytes is not whole f32 samples", data.len()),
        ));
    }
    Ok(data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
