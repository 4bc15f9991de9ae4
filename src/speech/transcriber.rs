//! Speech-to-text over HTTP

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::VoiceErrorKind;
use crate::{Error, Result};

/// Turns a recorded utterance into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service rejects it
    async fn transcribe(&self, wav: Vec<u8>, language: &str) -> Result<String>;
}

/// Response from a Whisper-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcriber for Whisper-compatible `audio/transcriptions` endpoints
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl WhisperTranscriber {
    /// Create a transcriber posting multipart uploads to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn new(
        url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| Error::Config(format!("invalid STT url {url}: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: Vec<u8>, language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Speech(e.to_string()))?;

        // Whisper wants ISO-639-1, so "en-US" becomes "en"
        let language = language.split(['-', '_']).next().unwrap_or(language);

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language.to_string());

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::voice(
                VoiceErrorKind::ServiceUnavailable,
                format!("transcription API error {status}: {body}"),
            ));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
