//! TOML configuration file loading
//!
//! Supports `~/.config/cadence/voice.toml` as a persistent config source.
//! Every table is optional and missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::audio::PipelineConfig;
use crate::session::SessionSettings;
use crate::speech::{RecognitionSettings, SynthesisSettings};
use crate::transport::TransportConfig;
use crate::tts::TtsSettings;
use crate::vad::VadSettings;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub session: SessionSettings,
    pub audio: PipelineConfig,
    pub vad: VadSettings,
    pub transport: TransportConfig,
    pub tts: TtsFileConfig,
    pub speech: SpeechFileConfig,
    pub assistant: AssistantFileConfig,
}

/// Remote TTS configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TtsFileConfig {
    #[serde(flatten)]
    pub settings: TtsSettings,
    /// Synthesis endpoint; unset disables remote TTS
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

/// Recognition, local synthesis and transcription configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SpeechFileConfig {
    pub recognition: RecognitionSettings,
    pub synthesis: SynthesisSettings,
    pub stt_url: Option<String>,
    pub stt_model: Option<String>,
    pub stt_api_key: Option<String>,
}

/// Assistant backend endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssistantFileConfig {
    pub url: Option<String>,
    pub summarize_url: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, defaulting when absent or unreadable
pub fn load_config_file_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => parse_config_file(&content, path),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Parse config file contents, falling back to defaults on error
pub fn parse_config_file(content: &str, path: &Path) -> ConfigFile {
    match toml::from_str(content) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/cadence/voice.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("cadence").join("voice.toml"))
}
