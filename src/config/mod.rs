//! Layered configuration: environment over `voice.toml` over defaults

mod file;

use std::time::Duration;

use secrecy::SecretString;

pub use file::{
    ConfigFile, config_file_path, load_config_file, load_config_file_from, parse_config_file,
};

use crate::audio::PipelineConfig;
use crate::session::SessionSettings;
use crate::speech::{RecognitionSettings, SynthesisSettings};
use crate::transport::TransportConfig;
use crate::tts::TtsSettings;
use crate::vad::VadSettings;
use crate::{Error, Result};

const DEFAULT_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEFAULT_STT_MODEL: &str = "whisper-1";
const DEFAULT_ASSISTANT_URL: &str = "http://localhost:3000/api/assistant/chat";

/// Effective voice engine configuration
#[derive(Debug)]
pub struct Config {
    pub session: SessionSettings,
    pub audio: PipelineConfig,
    pub vad: VadSettings,
    pub transport: TransportConfig,
    pub tts: TtsConfig,
    pub speech: SpeechConfig,
    pub assistant: AssistantConfig,
}

/// Remote TTS configuration
#[derive(Debug, Default)]
pub struct TtsConfig {
    pub settings: TtsSettings,
    /// Synthesis endpoint; `None` speaks replies with local synthesis only
    pub url: Option<String>,
    pub api_key: Option<SecretString>,
    /// Unset means no timeout beyond the HTTP client's own
    pub request_timeout_ms: Option<u64>,
}

impl TtsConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Recognition, local synthesis and transcription configuration
#[derive(Debug)]
pub struct SpeechConfig {
    pub recognition: RecognitionSettings,
    pub synthesis: SynthesisSettings,
    pub stt_url: String,
    pub stt_model: String,
    pub stt_api_key: Option<SecretString>,
}

/// Assistant backend endpoints
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub url: String,
    /// Summarization endpoint; `None` truncates long replies locally
    pub summarize_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            audio: PipelineConfig::default(),
            vad: VadSettings::default(),
            transport: TransportConfig::default(),
            tts: TtsConfig::default(),
            speech: SpeechConfig {
                recognition: RecognitionSettings::default(),
                synthesis: SynthesisSettings::default(),
                stt_url: DEFAULT_STT_URL.to_string(),
                stt_model: DEFAULT_STT_MODEL.to_string(),
                stt_api_key: None,
            },
            assistant: AssistantConfig {
                url: DEFAULT_ASSISTANT_URL.to_string(),
                summarize_url: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or the VAD settings are invalid
    pub fn load() -> Result<Self> {
        Self::resolve(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge `file` with values from `env`; env wins
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or the VAD settings are invalid
    pub fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_flag = |key: &str| env(key).and_then(|v| parse_flag(key, &v));

        let mut session = file.session;
        if let Some(v) = env_flag("CADENCE_REALTIME") {
            session.realtime_mode = v;
        }
        if let Some(v) = env_flag("CADENCE_ADVANCED") {
            session.advanced_processing = v;
        }
        if let Some(v) = env_flag("CADENCE_VOICE_OUTPUT") {
            session.voice_output = v;
        }

        let mut transport = file.transport;
        if let Some(url) = env("CADENCE_REALTIME_URL") {
            transport.url = url;
        }
        validate_url(&transport.url, &["ws", "wss"], "realtime")?;

        let mut tts_settings = file.tts.settings;
        if let Some(voice) = env("CADENCE_TTS_VOICE") {
            tts_settings.voice_preset = voice;
        }
        if let Some(model) = env("CADENCE_TTS_MODEL") {
            tts_settings.model_id = model;
        }
        tts_settings.volume = tts_settings.volume.clamp(0.0, 1.0);

        let tts = TtsConfig {
            settings: tts_settings,
            url: env("CADENCE_TTS_URL").or(file.tts.url),
            api_key: env("CADENCE_TTS_API_KEY")
                .or(file.tts.api_key)
                .map(SecretString::from),
            request_timeout_ms: file.tts.request_timeout_ms,
        };
        if let Some(url) = &tts.url {
            validate_url(url, &["http", "https"], "TTS")?;
        }

        let speech = SpeechConfig {
            recognition: file.speech.recognition,
            synthesis: file.speech.synthesis,
            stt_url: env("CADENCE_STT_URL")
                .or(file.speech.stt_url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string()),
            stt_model: file
                .speech
                .stt_model
                .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
            stt_api_key: env("CADENCE_STT_API_KEY")
                .or(file.speech.stt_api_key)
                .map(SecretString::from),
        };
        validate_url(&speech.stt_url, &["http", "https"], "STT")?;

        let assistant = AssistantConfig {
            url: env("CADENCE_ASSISTANT_URL")
                .or(file.assistant.url)
                .unwrap_or_else(|| DEFAULT_ASSISTANT_URL.to_string()),
            summarize_url: env("CADENCE_SUMMARIZE_URL").or(file.assistant.summarize_url),
        };
        validate_url(&assistant.url, &["http", "https"], "assistant")?;
        if let Some(url) = &assistant.summarize_url {
            validate_url(url, &["http", "https"], "summarize")?;
        }

        file.vad.validate()?;

        Ok(Self {
            session,
            audio: file.audio,
            vad: file.vad,
            transport,
            tts,
            speech,
            assistant,
        })
    }
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(key, value = other, "ignoring unrecognized boolean");
            None
        }
    }
}

fn validate_url(raw: &str, schemes: &[&str], what: &str) -> Result<()> {
    let url = url::Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid {what} url {raw}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::Config(format!(
            "{what} url {raw} must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(())
}
