//! Listening backend selection

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use super::{AdvancedStatus, SessionSettings};
use crate::audio::{AudioPipeline, Microphone, PipelineConfig, PipelineStats, Utterance};
use crate::error::VoiceErrorKind;
use crate::speech::{SpeechBridge, Transcriber};
use crate::transport::{RealtimeClient, TransportConfig};
use crate::vad::VadSettings;
use crate::{Result, lock};

/// Which backend owns listening for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    /// Platform speech recognition through the [`SpeechBridge`]
    Basic,
    /// Local enhancement pipeline with voice activity segmentation
    Advanced,
    /// Audio streamed to the realtime voice server
    Realtime,
}

impl VoiceMode {
    /// Realtime takes precedence over advanced, advanced over basic
    ///
    /// A realtime session whose server cannot be reached listens through
    /// the speech bridge; see [`super::CombinedVoiceState::listening_source`].
    #[must_use]
    pub const fn select(settings: &SessionSettings) -> Self {
        if settings.realtime_mode {
            Self::Realtime
        } else if settings.advanced_processing {
            Self::Advanced
        } else {
            Self::Basic
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Realtime => "realtime",
        }
    }
}

/// Inputs needed to build any of the listening backends
pub struct CaptureSources {
    pub microphone: Arc<dyn Microphone>,
    pub pipeline: PipelineConfig,
    pub vad: VadSettings,
    pub transport: TransportConfig,
    pub transcriber: Arc<dyn Transcriber>,
    /// Language passed to the transcriber in advanced mode
    pub language: String,
}

/// Enhancement pipeline plus the transcriber its utterances go to
pub struct AdvancedCapture {
    pipeline: Mutex<AudioPipeline>,
    utterances: Mutex<Option<mpsc::UnboundedReceiver<Utterance>>>,
    transcriber: Arc<dyn Transcriber>,
    language: String,
}

impl AdvancedCapture {
    #[must_use]
    pub fn new(
        mut pipeline: AudioPipeline,
        transcriber: Arc<dyn Transcriber>,
        language: impl Into<String>,
    ) -> Self {
        let utterances = pipeline.utterances();
        Self {
            pipeline: Mutex::new(pipeline),
            utterances: Mutex::new(Some(utterances)),
            transcriber,
            language: language.into(),
        }
    }

    pub(crate) fn language(&self) -> &str {
        &self.language
    }

    /// Running flag, latest level and last error
    pub fn status(&self) -> AdvancedStatus {
        let pipeline = lock(&self.pipeline);
        let latest = pipeline.latest();
        AdvancedStatus {
            running: pipeline.is_running(),
            level: latest.level,
            voice_detected: latest.voice_detected,
            error: pipeline.last_error(),
        }
    }

    pub(crate) fn take_utterances(&self) -> Option<mpsc::UnboundedReceiver<Utterance>> {
        lock(&self.utterances).take()
    }

    pub(crate) fn transcriber(&self) -> Arc<dyn Transcriber> {
        Arc::clone(&self.transcriber)
    }

    pub fn stats(&self) -> PipelineStats {
        lock(&self.pipeline).stats()
    }
}

/// The single listening source chosen for a session
pub enum VoiceCapture {
    Basic,
    Advanced(AdvancedCapture),
    Realtime(Arc<RealtimeClient>),
}

impl VoiceCapture {
    /// Build the backend the settings select
    ///
    /// Advanced mode always segments with voice activity detection.
    #[must_use]
    pub fn build(settings: &SessionSettings, sources: CaptureSources) -> Self {
        match VoiceMode::select(settings) {
            VoiceMode::Basic => Self::Basic,
            VoiceMode::Advanced => {
                let vad = VadSettings {
                    enabled: true,
                    ..sources.vad
                };
                let pipeline = AudioPipeline::new(sources.microphone, sources.pipeline, vad);
                Self::Advanced(AdvancedCapture::new(
                    pipeline,
                    sources.transcriber,
                    sources.language,
                ))
            }
            VoiceMode::Realtime => Self::Realtime(Arc::new(RealtimeClient::new(
                sources.transport,
                sources.microphone,
            ))),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> VoiceMode {
        match self {
            Self::Basic => VoiceMode::Basic,
            Self::Advanced(_) => VoiceMode::Advanced,
            Self::Realtime(_) => VoiceMode::Realtime,
        }
    }

    /// Acquire the microphone for this backend
    pub(crate) async fn start(&self, speech: &SpeechBridge) -> Result<()> {
        match self {
            Self::Basic => speech.start_listening(),
            Self::Advanced(advanced) => {
                let mut pipeline = lock(&advanced.pipeline);
                if pipeline.is_running() {
                    return Ok(());
                }
                let settings = *pipeline.settings();
                pipeline.start(settings)
            }
            Self::Realtime(client) => match client.start_transmission().await {
                Ok(()) => {
                    if speech.state().is_listening {
                        speech.stop_listening();
                    }
                    Ok(())
                }
                // Server unreachable; platform recognition listens instead
                Err(e) if e.kind() == VoiceErrorKind::NetworkFailure => {
                    tracing::warn!(error = %e, "realtime server unreachable, using speech recognition");
                    speech.start_listening()
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Release the microphone
    pub(crate) fn stop(&self, speech: &SpeechBridge) {
        match self {
            Self::Basic => speech.stop_listening(),
            Self::Advanced(advanced) => lock(&advanced.pipeline).stop(),
            Self::Realtime(client) => {
                client.stop_transmission();
                if speech.state().is_listening {
                    speech.stop_listening();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        let mut settings = SessionSettings::default();
        assert_eq!(VoiceMode::select(&settings), VoiceMode::Basic);

        settings.advanced_processing = true;
        assert_eq!(VoiceMode::select(&settings), VoiceMode::Advanced);

        settings.realtime_mode = true;
        assert_eq!(VoiceMode::select(&settings), VoiceMode::Realtime);
    }
}
