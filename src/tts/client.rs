//! Remote speech synthesis

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::TtsSettings;
use crate::error::VoiceErrorKind;
use crate::{Error, Result};

/// Audio returned by a synthesis request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    /// MIME type reported by the service, e.g. `audio/mpeg`
    pub audio_type: String,
    pub characters_used: u64,
}

/// Turns text into audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with the given voice settings
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable` for rejected or malformed responses,
    /// `DecodeFailure` when the audio payload cannot be decoded, or an HTTP
    /// error when the request never completed
    async fn synthesize(&self, text: &str, settings: &TtsSettings) -> Result<SynthesizedAudio>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_preset: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettingsBody,
    stream: bool,
}

#[derive(Serialize)]
struct VoiceSettingsBody {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    success: bool,
    audio_base64: Option<String>,
    audio_type: Option<String>,
    #[serde(default)]
    characters_used: u64,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Synthesizer backed by the voice service's HTTP endpoint
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpSynthesizer {
    /// Create a synthesizer posting to `url`
    ///
    /// `timeout` bounds the whole request; `None` leaves it to the transport.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(
        url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| Error::Config(format!("invalid TTS url {url}: {e}")))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, settings: &TtsSettings) -> Result<SynthesizedAudio> {
        let request = SynthesisRequest {
            text,
            voice_preset: &settings.voice_preset,
            model_id: &settings.model_id,
            voice_settings: VoiceSettingsBody {
                stability: settings.voice_params.stability,
                similarity_boost: settings.voice_params.similarity_boost,
                style: settings.voice_params.style,
                use_speaker_boost: settings.voice_params.speaker_boost,
            },
            stream: false,
        };

        tracing::debug!(
            chars = text.chars().count(),
            voice = %settings.voice_preset,
            "requesting synthesis"
        );

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "synthesis request failed");
            e
        })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            tracing::error!(status = %status, message = %message, "synthesis rejected");
            return Err(Error::voice(
                VoiceErrorKind::ServiceUnavailable,
                format!("synthesis failed with {status}: {message}"),
            ));
        }

        parse_response(&body)
    }
}

/// Decode a successful synthesis response body
fn parse_response(body: &str) -> Result<SynthesizedAudio> {
    let response: SynthesisResponse = serde_json::from_str(body).map_err(|e| {
        Error::voice(
            VoiceErrorKind::ServiceUnavailable,
            format!("malformed synthesis response: {e}"),
        )
    })?;

    let encoded = match (response.success, response.audio_base64) {
        (true, Some(encoded)) => encoded,
        (_, _) => {
            let message = response
                .error
                .unwrap_or_else(|| "response carried no audio".to_string());
            return Err(Error::voice(VoiceErrorKind::ServiceUnavailable, message));
        }
    };

    let audio = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::voice(VoiceErrorKind::DecodeFailure, format!("invalid base64: {e}")))?;

    if audio.is_empty() {
        return Err(Error::voice(VoiceErrorKind::DecodeFailure, "empty audio payload"));
    }

    Ok(SynthesizedAudio {
        audio,
        audio_type: response
            .audio_type
            .unwrap_or_else(|| "audio/mpeg".to_string()),
        characters_used: response.characters_used,
    })
}
