//! Start/stop/speak facade over the speech engines

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, watch};

use super::{
    RecognitionEngine, RecognitionEvent, RecognitionListener, RecognitionSettings,
    RecognitionSettingsUpdate, SynthesisEngine, SynthesisEvent, SynthesisListener,
    SynthesisSettings, SynthesisSettingsUpdate, classify_recognition_error,
};
use crate::audio::PermissionState;
use crate::error::VoiceErrorKind;
use crate::{Result, lock};

/// Published speech state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechState {
    pub is_listening: bool,
    /// Final transcript accumulated during the current listening session
    pub transcript: String,
    /// Latest partial result, cleared when it becomes final
    pub interim_transcript: String,
    pub is_speaking: bool,
    pub is_paused: bool,
    pub error: Option<String>,
    pub error_kind: Option<VoiceErrorKind>,
}

impl SpeechState {
    fn set_error(&mut self, kind: VoiceErrorKind) {
        self.error = Some(kind.user_message().to_string());
        self.error_kind = Some(kind);
    }
}

#[derive(Default)]
struct Generations {
    recognition: u64,
    synthesis: u64,
}

struct Shared {
    state_tx: watch::Sender<SpeechState>,
    generations: Mutex<Generations>,
    transcripts_tx: mpsc::UnboundedSender<String>,
}

impl Shared {
    fn on_recognition(&self, generation: u64, event: RecognitionEvent) {
        if lock(&self.generations).recognition != generation {
            return;
        }

        match event {
            RecognitionEvent::Result {
                transcript,
                is_final: true,
            } => {
                let transcript = transcript.trim().to_string();
                if transcript.is_empty() {
                    return;
                }
                tracing::debug!(transcript = %transcript, "final transcript");
                self.state_tx.send_modify(|s| {
                    if !s.transcript.is_empty() {
                        s.transcript.push(' ');
                    }
                    s.transcript.push_str(&transcript);
                    s.interim_transcript.clear();
                });
                let _ = self.transcripts_tx.send(transcript);
            }
            RecognitionEvent::Result {
                transcript,
                is_final: false,
            } => {
                self.state_tx.send_modify(|s| s.interim_transcript = transcript);
            }
            RecognitionEvent::Error(code) => {
                let kind = classify_recognition_error(&code);
                tracing::warn!(code = %code, kind = %kind, "recognition error");
                self.state_tx.send_modify(|s| {
                    s.is_listening = false;
                    s.interim_transcript.clear();
                    s.set_error(kind);
                });
            }
            RecognitionEvent::End => {
                tracing::debug!("recognition ended");
                self.state_tx.send_modify(|s| {
                    s.is_listening = false;
                    s.interim_transcript.clear();
                });
            }
        }
    }

    fn on_synthesis(&self, generation: u64, event: SynthesisEvent) {
        if lock(&self.generations).synthesis != generation {
            return;
        }

        match event {
            SynthesisEvent::Started => {
                self.state_tx.send_modify(|s| {
                    s.is_speaking = true;
                    s.is_paused = false;
                });
            }
            SynthesisEvent::Ended => {
                self.state_tx.send_modify(|s| {
                    s.is_speaking = false;
                    s.is_paused = false;
                });
            }
            SynthesisEvent::Error(reason) => {
                tracing::warn!(reason = %reason, "synthesis error");
                self.state_tx.send_modify(|s| {
                    s.is_speaking = false;
                    s.is_paused = false;
                    s.set_error(VoiceErrorKind::ServiceUnavailable);
                });
            }
        }
    }
}

/// Uniform contract over platform recognition and synthesis
pub struct SpeechBridge {
    recognizer: Arc<dyn RecognitionEngine>,
    synthesizer: Arc<dyn SynthesisEngine>,
    recognition: Mutex<RecognitionSettings>,
    synthesis: Mutex<SynthesisSettings>,
    shared: Arc<Shared>,
    transcripts_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl SpeechBridge {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn RecognitionEngine>,
        synthesizer: Arc<dyn SynthesisEngine>,
        recognition: RecognitionSettings,
        synthesis: SynthesisSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SpeechState::default());
        let (transcripts_tx, transcripts_rx) = mpsc::unbounded_channel();

        Self {
            recognizer,
            synthesizer,
            recognition: Mutex::new(recognition),
            synthesis: Mutex::new(synthesis),
            shared: Arc::new(Shared {
                state_tx,
                generations: Mutex::new(Generations::default()),
                transcripts_tx,
            }),
            transcripts_rx: Mutex::new(Some(transcripts_rx)),
        }
    }

    /// Begin recognition; already listening is a no-op
    ///
    /// # Errors
    ///
    /// Returns the classified failure if the engine cannot start; the
    /// bridge returns to idle with the error published
    pub fn start_listening(&self) -> Result<()> {
        if self.state().is_listening {
            tracing::debug!("already listening");
            return Ok(());
        }

        let generation = {
            let mut generations = lock(&self.shared.generations);
            generations.recognition += 1;
            generations.recognition
        };

        self.shared.state_tx.send_modify(|s| {
            s.is_listening = true;
            s.transcript.clear();
            s.interim_transcript.clear();
            s.error = None;
            s.error_kind = None;
        });

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let listener: RecognitionListener = Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_recognition(generation, event);
            }
        });

        let settings = lock(&self.recognition).clone();
        if let Err(e) = self.recognizer.start(&settings, listener) {
            let kind = e.kind();
            tracing::warn!(error = %e, kind = %kind, "recognition failed to start");
            self.shared.state_tx.send_modify(|s| {
                s.is_listening = false;
                s.set_error(kind);
            });
            return Err(e);
        }

        tracing::info!(language = %settings.language, "listening");
        Ok(())
    }

    /// Stop recognition
    pub fn stop_listening(&self) {
        lock(&self.shared.generations).recognition += 1;
        self.recognizer.stop();
        self.shared.state_tx.send_if_modified(|s| {
            let was = s.is_listening;
            s.is_listening = false;
            s.interim_transcript.clear();
            was
        });
    }

    /// Speak `text`, cancelling any utterance in progress
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start speaking
    pub fn speak(&self, text: &str) -> Result<()> {
        self.stop_speaking();

        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let generation = {
            let mut generations = lock(&self.shared.generations);
            generations.synthesis += 1;
            generations.synthesis
        };

        let weak = Arc::downgrade(&self.shared);
        let listener: SynthesisListener = Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_synthesis(generation, event);
            }
        });

        let settings = lock(&self.synthesis).clone();
        self.synthesizer.speak(text, &settings, listener).map_err(|e| {
            let kind = synthesis_error_kind(&e);
            tracing::warn!(error = %e, kind = %kind, "local synthesis failed to start");
            self.shared.state_tx.send_modify(|s| s.set_error(kind));
            e
        })
    }

    /// Cancel the current utterance
    pub fn stop_speaking(&self) {
        lock(&self.shared.generations).synthesis += 1;
        self.synthesizer.cancel();
        self.shared.state_tx.send_if_modified(|s| {
            let was = s.is_speaking || s.is_paused;
            s.is_speaking = false;
            s.is_paused = false;
            was
        });
    }

    /// Pause speaking; no-op unless speaking
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot pause
    pub fn pause_speaking(&self) -> Result<()> {
        let state = self.state();
        if !state.is_speaking || state.is_paused {
            return Ok(());
        }
        self.synthesizer.pause()?;
        self.shared.state_tx.send_modify(|s| s.is_paused = true);
        Ok(())
    }

    /// Resume speaking; no-op unless paused
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot resume
    pub fn resume_speaking(&self) -> Result<()> {
        if !self.state().is_paused {
            return Ok(());
        }
        self.synthesizer.resume()?;
        self.shared.state_tx.send_modify(|s| s.is_paused = false);
        Ok(())
    }

    pub fn update_recognition_settings(&self, update: RecognitionSettingsUpdate) {
        lock(&self.recognition).apply(update);
    }

    pub fn update_synthesis_settings(&self, update: SynthesisSettingsUpdate) {
        lock(&self.synthesis).apply(update);
    }

    /// Whether microphone access is already granted; never prompts
    #[must_use]
    pub fn check_microphone_permission(&self) -> bool {
        self.recognizer.permission_state() == PermissionState::Granted
    }

    /// Forget the accumulated transcript
    pub fn clear_transcript(&self) {
        self.shared.state_tx.send_modify(|s| {
            s.transcript.clear();
            s.interim_transcript.clear();
        });
    }

    #[must_use]
    pub fn state(&self) -> SpeechState {
        self.shared.state_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SpeechState> {
        self.shared.state_tx.subscribe()
    }

    /// Take the stream of final transcripts; only the first caller gets it
    pub fn take_transcripts(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        lock(&self.transcripts_rx).take()
    }
}

impl Drop for SpeechBridge {
    fn drop(&mut self) {
        self.recognizer.stop();
        self.synthesizer.cancel();
    }
}

/// Local engines never touch the network, so spawn and engine faults read
/// as an unavailable voice
fn synthesis_error_kind(e: &crate::Error) -> VoiceErrorKind {
    match e.kind() {
        VoiceErrorKind::NetworkFailure | VoiceErrorKind::Unknown => {
            VoiceErrorKind::ServiceUnavailable
        }
        kind => kind,
    }
}
