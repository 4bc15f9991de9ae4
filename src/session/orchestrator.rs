//! The voice session: one listening backend, one assistant, one speaker

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::assistant::{Assistant, AssistantReply};
use super::intent::{Navigator, Screen, detect_navigation};
use super::mode::{CaptureSources, VoiceCapture, VoiceMode};
use super::playback::ClipPlayer;
use super::summarizer::{Summarizer, prepare_reply};
use super::{CombinedVoiceState, SessionSettings, StateSources, TurnState};
use crate::audio::{PipelineStats, Utterance, samples_to_wav};
use crate::error::VoiceErrorKind;
use crate::speech::SpeechBridge;
use crate::transport::TransportEvent;
use crate::tts::{AudioSink, TtsController};
use crate::{Error, Result, lock};

/// Collaborators a session drives
pub struct SessionParts {
    pub speech: SpeechBridge,
    /// Remote TTS; when absent replies are spoken by the speech bridge
    pub tts: Option<TtsController>,
    /// Output for server-pushed audio in realtime mode
    pub sink: Arc<dyn AudioSink>,
    pub assistant: Arc<dyn Assistant>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub navigator: Option<Arc<dyn Navigator>>,
}

/// What one transcript turn produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: AssistantReply,
    /// Text handed to speech output, after sanitizing and summarizing
    pub spoken: Option<String>,
    pub navigated: Option<Screen>,
}

/// Coordinates listening, the assistant and spoken replies
pub struct VoiceSession {
    settings: SessionSettings,
    capture: VoiceCapture,
    speech: SpeechBridge,
    tts: Option<TtsController>,
    player: ClipPlayer,
    assistant: Arc<dyn Assistant>,
    summarizer: Option<Arc<dyn Summarizer>>,
    navigator: Option<Arc<dyn Navigator>>,
    turn: Mutex<TurnState>,
    reply_cancel: Mutex<CancellationToken>,
}

impl VoiceSession {
    /// Create a session; the listening mode is fixed from `settings`
    #[must_use]
    pub fn new(settings: SessionSettings, sources: CaptureSources, parts: SessionParts) -> Self {
        let capture = VoiceCapture::build(&settings, sources);
        Self::with_capture(settings, capture, parts)
    }

    /// Create a session around an already built capture backend
    #[must_use]
    pub fn with_capture(
        settings: SessionSettings,
        capture: VoiceCapture,
        parts: SessionParts,
    ) -> Self {
        tracing::info!(mode = capture.mode().as_str(), "voice session created");
        let player = match &capture {
            VoiceCapture::Realtime(client) => ClipPlayer::new(parts.sink)
                .with_pcm_format(client.config().sample_rate, client.config().channel_count),
            _ => ClipPlayer::new(parts.sink),
        };
        Self {
            settings,
            capture,
            speech: parts.speech,
            tts: parts.tts,
            player,
            assistant: parts.assistant,
            summarizer: parts.summarizer,
            navigator: parts.navigator,
            turn: Mutex::new(TurnState::default()),
            reply_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> VoiceMode {
        self.capture.mode()
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub const fn speech(&self) -> &SpeechBridge {
        &self.speech
    }

    #[must_use]
    pub const fn tts(&self) -> Option<&TtsController> {
        self.tts.as_ref()
    }

    /// Acquire the microphone through the active backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot start; the error is also
    /// reflected in [`Self::state`]
    pub async fn start_listening(&self) -> Result<()> {
        lock(&self.turn).error = None;

        if let Err(e) = self.capture.start(&self.speech).await {
            tracing::warn!(mode = self.mode().as_str(), error = %e, "failed to start listening");
            self.set_error(e.kind());
            return Err(e);
        }

        tracing::info!(mode = self.mode().as_str(), "listening");
        Ok(())
    }

    /// Release the microphone
    pub fn stop_listening(&self) {
        self.capture.stop(&self.speech);
    }

    /// Run one turn: submit the transcript, navigate, then speak the reply
    ///
    /// A newer turn or [`Self::stop_speaking`] discards the pending reply
    /// of this one.
    ///
    /// # Errors
    ///
    /// Returns error if the transcript is empty or the assistant fails
    pub async fn handle_transcript(&self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::voice(
                VoiceErrorKind::NoSpeechDetected,
                "empty transcript",
            ));
        }

        let cancel = self.renew_reply_token();
        {
            let mut turn = lock(&self.turn);
            turn.processing = true;
            turn.transcript = text.to_string();
            turn.error = None;
        }
        tracing::debug!(chars = text.len(), "submitting transcript");

        let reply = match self.assistant.submit(text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "assistant failed");
                let mut turn = lock(&self.turn);
                turn.processing = false;
                turn.error = Some(e.kind());
                return Err(e);
            }
        };

        let navigated = reply.navigate_to.or_else(|| detect_navigation(text));
        if let Some(screen) = navigated
            && let Some(navigator) = &self.navigator
        {
            tracing::info!(screen = %screen, "navigating");
            navigator.navigate(screen);
        }

        let mut spoken = None;
        if self.settings.voice_output {
            match prepare_reply(
                &reply.text,
                &self.settings,
                self.summarizer.as_deref(),
                &cancel,
            )
            .await
            {
                Ok(clean) if clean.is_empty() => {}
                Ok(clean) if !cancel.is_cancelled() => {
                    if let Err(e) = self.speak(&clean).await {
                        tracing::warn!(error = %e, "reply could not be spoken");
                    }
                    spoken = Some(clean);
                }
                Ok(_) => {}
                Err(e) if e.is_cancelled() => tracing::debug!("reply superseded"),
                Err(e) => tracing::warn!(error = %e, "reply preparation failed"),
            }
        }

        lock(&self.turn).processing = false;
        Ok(TurnOutcome {
            reply,
            spoken,
            navigated,
        })
    }

    /// Speak `text` through remote TTS, falling back to local synthesis
    ///
    /// # Errors
    ///
    /// Returns error if neither path can speak
    pub async fn speak(&self, text: &str) -> Result<()> {
        if let Some(tts) = &self.tts {
            match tts.speak(text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "remote speech unavailable, using local synthesis");
                }
            }
        }
        self.speech.speak(text)
    }

    /// Silence every output and drop any reply still being prepared
    pub fn stop_speaking(&self) {
        lock(&self.reply_cancel).cancel();
        if let Some(tts) = &self.tts {
            tts.stop();
        }
        self.speech.stop_speaking();
        self.player.stop_all();
    }

    /// Drive the session until `shutdown` fires
    ///
    /// Finalized transcripts from the active backend are handled one at a
    /// time. In realtime mode server audio is played as it arrives.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut transcripts = self.speech.take_transcripts();
        let mut utterances = match &self.capture {
            VoiceCapture::Advanced(advanced) => advanced.take_utterances(),
            _ => None,
        };
        let mut events = match &self.capture {
            VoiceCapture::Realtime(client) => client.take_events(),
            _ => None,
        };

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(text) = recv(&mut transcripts) => self.on_transcript(&text).await,
                Some(utterance) = recv(&mut utterances) => self.on_utterance(utterance).await,
                Some(event) = recv(&mut events) => self.on_transport_event(event).await,
                else => break,
            }
        }

        tracing::debug!("voice session loop stopped");
    }

    /// Stop everything and close the realtime connection
    pub async fn shutdown(&self) {
        self.stop_listening();
        self.stop_speaking();
        if let VoiceCapture::Realtime(client) = &self.capture {
            client.disconnect().await;
        }
    }

    /// Combined view of every subsystem
    #[must_use]
    pub fn state(&self) -> CombinedVoiceState {
        let speech = self.speech.state();
        let tts = self.tts.as_ref().map(TtsController::state);
        let turn = lock(&self.turn).clone();
        let (advanced, transport) = match &self.capture {
            VoiceCapture::Basic => (None, None),
            VoiceCapture::Advanced(advanced) => (Some(advanced.status()), None),
            VoiceCapture::Realtime(client) => (None, Some(client.status())),
        };

        CombinedVoiceState::merge(&StateSources {
            mode: self.mode(),
            speech: &speech,
            tts: tts.as_ref(),
            advanced: advanced.as_ref(),
            transport: transport.as_ref(),
            turn: &turn,
            server_audio_playing: self.player.is_playing(),
        })
    }

    /// Enhancement pipeline statistics in advanced mode
    #[must_use]
    pub fn audio_stats(&self) -> Option<PipelineStats> {
        match &self.capture {
            VoiceCapture::Advanced(advanced) => Some(advanced.stats()),
            _ => None,
        }
    }

    async fn on_transcript(&self, text: &str) {
        if let Err(e) = self.handle_transcript(text).await {
            tracing::debug!(error = %e, "turn failed");
        }
    }

    async fn on_utterance(&self, utterance: Utterance) {
        let VoiceCapture::Advanced(advanced) = &self.capture else {
            return;
        };
        tracing::debug!(
            duration_ms = u64::try_from(utterance.duration().as_millis()).unwrap_or(u64::MAX),
            "utterance captured"
        );

        let wav = match samples_to_wav(&utterance.samples, utterance.sample_rate, utterance.channels)
        {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                self.set_error(e.kind());
                return;
            }
        };

        match advanced.transcriber().transcribe(wav, advanced.language()).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::debug!("utterance had no words");
            }
            Ok(text) => self.on_transcript(&text).await,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.set_error(e.kind());
            }
        }
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Transcription(text) => self.on_transcript(&text).await,
            TransportEvent::Audio(data) => {
                if !self.settings.voice_output {
                    return;
                }
                let volume = self.tts.as_ref().map_or(1.0, |tts| tts.settings().volume);
                if let Err(e) = self.player.play(data, volume) {
                    tracing::warn!(error = %e, "server audio could not be played");
                }
            }
            TransportEvent::ServerError { kind, message } => {
                tracing::warn!(kind = %kind, detail = %message, "voice server error");
                self.set_error(kind);
            }
        }
    }

    fn renew_reply_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *lock(&self.reply_cancel), token.clone());
        previous.cancel();
        token
    }

    fn set_error(&self, kind: VoiceErrorKind) {
        lock(&self.turn).error = Some(kind);
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop_listening();
        self.stop_speaking();
    }
}

/// Receive from an optional channel; an absent channel never yields
async fn recv<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
