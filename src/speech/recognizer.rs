//! Recognition from the local microphone
//!
//! Captures through an [`AudioPipeline`], lets voice activity delimit
//! utterances and sends each one to a [`Transcriber`].

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::transcriber::Transcriber;
use super::{
    RecognitionEngine, RecognitionEvent, RecognitionListener, RecognitionSettings,
    recognition_error_code,
};
use crate::audio::{AudioPipeline, Microphone, PermissionState, PipelineConfig, Utterance, samples_to_wav};
use crate::vad::VadSettings;
use crate::{Error, Result, lock};

type SharedPipeline = Arc<Mutex<Option<AudioPipeline>>>;

struct Session {
    pipeline: SharedPipeline,
    shutdown: CancellationToken,
}

/// Recognition engine built from a microphone, voice activity detection
/// and a remote transcriber
pub struct TranscribingRecognizer {
    microphone: Arc<dyn Microphone>,
    transcriber: Arc<dyn Transcriber>,
    config: PipelineConfig,
    vad: VadSettings,
    session: Mutex<Option<Session>>,
}

impl TranscribingRecognizer {
    #[must_use]
    pub fn new(
        microphone: Arc<dyn Microphone>,
        transcriber: Arc<dyn Transcriber>,
        config: PipelineConfig,
        vad: VadSettings,
    ) -> Self {
        Self {
            microphone,
            transcriber,
            config,
            // Utterance boundaries need the debounced detector
            vad: VadSettings {
                enabled: true,
                ..vad
            },
            session: Mutex::new(None),
        }
    }
}

impl RecognitionEngine for TranscribingRecognizer {
    fn start(&self, settings: &RecognitionSettings, listener: RecognitionListener) -> Result<()> {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Speech("recognition requires a tokio runtime".to_string()))?;

        let mut pipeline = AudioPipeline::new(Arc::clone(&self.microphone), self.config, self.vad);
        let utterances = pipeline.utterances();
        pipeline.start(self.config.settings)?;

        let pipeline: SharedPipeline = Arc::new(Mutex::new(Some(pipeline)));
        let shutdown = CancellationToken::new();

        runtime.spawn(recognize(
            utterances,
            Arc::clone(&self.transcriber),
            settings.clone(),
            listener,
            Arc::clone(&pipeline),
            shutdown.clone(),
        ));

        *lock(&self.session) = Some(Session { pipeline, shutdown });
        Ok(())
    }

    fn stop(&self) {
        let Some(session) = lock(&self.session).take() else {
            return;
        };
        session.shutdown.cancel();
        release(&session.pipeline);
    }

    fn permission_state(&self) -> PermissionState {
        self.microphone.permission_state()
    }
}

impl Drop for TranscribingRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn release(pipeline: &SharedPipeline) {
    if let Some(mut pipeline) = lock(pipeline).take() {
        pipeline.stop();
    }
}

async fn recognize(
    mut utterances: mpsc::UnboundedReceiver<Utterance>,
    transcriber: Arc<dyn Transcriber>,
    settings: RecognitionSettings,
    listener: RecognitionListener,
    pipeline: SharedPipeline,
    shutdown: CancellationToken,
) {
    loop {
        let utterance = tokio::select! {
            () = shutdown.cancelled() => break,
            next = utterances.recv() => match next {
                Some(u) => u,
                None => break,
            },
        };

        tracing::debug!(
            duration_ms = u64::try_from(utterance.duration().as_millis()).unwrap_or(u64::MAX),
            "utterance captured"
        );

        let wav = match samples_to_wav(&utterance.samples, utterance.sample_rate, utterance.channels) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                continue;
            }
        };

        let result = tokio::select! {
            () = shutdown.cancelled() => break,
            result = transcriber.transcribe(wav, &settings.language) => result,
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                listener(RecognitionEvent::Result {
                    transcript: text,
                    is_final: true,
                });
                if !settings.continuous {
                    break;
                }
            }
            Ok(_) => {
                if !settings.continuous {
                    listener(RecognitionEvent::Error("no-speech".to_string()));
                    release(&pipeline);
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                listener(RecognitionEvent::Error(
                    recognition_error_code(e.kind()).to_string(),
                ));
                release(&pipeline);
                return;
            }
        }
    }

    release(&pipeline);
    listener(RecognitionEvent::End);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::audio::{FrameSink, MicrophoneRequest, MicrophoneStream};
    use crate::error::VoiceErrorKind;

    struct HeldStream;

    impl MicrophoneStream for HeldStream {
        fn close(self: Box<Self>) {}
    }

    #[derive(Default)]
    struct CapturingMic {
        sink: Mutex<Option<FrameSink>>,
    }

    impl Microphone for CapturingMic {
        fn open(&self, _: &MicrophoneRequest, sink: FrameSink) -> Result<Box<dyn MicrophoneStream>> {
            *lock(&self.sink) = Some(sink);
            Ok(Box::new(HeldStream))
        }

        fn permission_state(&self) -> PermissionState {
            PermissionState::Granted
        }
    }

    struct DeniedMic;

    impl Microphone for DeniedMic {
        fn open(&self, _: &MicrophoneRequest, _: FrameSink) -> Result<Box<dyn MicrophoneStream>> {
            Err(Error::voice(VoiceErrorKind::PermissionDenied, "denied"))
        }

        fn permission_state(&self) -> PermissionState {
            PermissionState::Denied
        }
    }

    struct FixedTranscriber(&'static str);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _: Vec<u8>, _: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn start_without_microphone_fails() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = runtime.enter();

        let recognizer = TranscribingRecognizer::new(
            Arc::new(DeniedMic),
            Arc::new(FixedTranscriber("x")),
            PipelineConfig::default(),
            VadSettings::default(),
        );
        let err = recognizer
            .start(&RecognitionSettings::default(), Arc::new(|_| {}))
            .unwrap_err();
        assert_eq!(err.kind(), VoiceErrorKind::PermissionDenied);
        assert_eq!(recognizer.permission_state(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn speech_then_silence_yields_final_transcript() {
        let mic = Arc::new(CapturingMic::default());
        let recognizer = TranscribingRecognizer::new(
            Arc::clone(&mic) as Arc<dyn Microphone>,
            Arc::new(FixedTranscriber("hello there")),
            PipelineConfig::default(),
            VadSettings {
                min_speech_duration_ms: 0,
                max_silence_duration_ms: 0,
                ..VadSettings::default()
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: RecognitionListener = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        recognizer
            .start(
                &RecognitionSettings {
                    interim_results: false,
                    ..RecognitionSettings::default()
                },
                listener,
            )
            .unwrap();

        let sink = lock(&mic.sink).clone().unwrap();
        let loud: Vec<f32> = (0..1600).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let quiet = vec![0.0f32; 1600];
        for _ in 0..6 {
            sink(crate::audio::AudioFrame {
                samples: &loud,
                sample_rate: 16000,
                channels: 1,
            });
        }
        for _ in 0..3 {
            sink(crate::audio::AudioFrame {
                samples: &quiet,
                sample_rate: 16000,
                channels: 1,
            });
        }

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            RecognitionEvent::Result {
                transcript: "hello there".into(),
                is_final: true
            }
        );
        let end = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, RecognitionEvent::End);
    }
}
