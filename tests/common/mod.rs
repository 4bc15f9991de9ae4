//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, speaker, speech engines and the
//! assistant backends so no test touches hardware or the network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cadence_voice::audio::{
    AudioFrame, FrameSink, Microphone, MicrophoneRequest, MicrophoneStream, PermissionState,
};
use cadence_voice::error::VoiceErrorKind;
use cadence_voice::session::{Assistant, AssistantReply, Navigator, Screen, Summarizer, SummaryStyle};
use cadence_voice::speech::{
    RecognitionEngine, RecognitionEvent, RecognitionListener, RecognitionSettings,
    SynthesisEngine, SynthesisEvent, SynthesisListener, SynthesisSettings, Transcriber,
};
use cadence_voice::tts::{
    AudioClip, AudioSink, ClipId, PlaybackEvent, PlaybackHandle, PlaybackListener,
    SynthesizedAudio, Synthesizer, TtsSettings,
};
use cadence_voice::{Error, Result};

/// Sine wave at `amplitude`, `frames` samples long at 16kHz
#[must_use]
pub fn tone(frames: usize, amplitude: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / 16_000.0;
            amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect()
}

// Microphone

/// Microphone whose frames are pushed by the test
#[derive(Default)]
pub struct FakeMicrophone {
    sink: Arc<Mutex<Option<FrameSink>>>,
    opened: AtomicUsize,
    denied: bool,
}

impl FakeMicrophone {
    #[must_use]
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    /// Deliver one buffer to whoever holds the microphone
    pub fn push(&self, samples: &[f32]) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(AudioFrame {
                samples,
                sample_rate: 16_000,
                channels: 1,
            });
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl MicrophoneStream for FakeStream {
    fn close(self: Box<Self>) {}
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.sink.lock().unwrap().take();
    }
}

impl Microphone for FakeMicrophone {
    fn open(
        &self,
        _request: &MicrophoneRequest,
        sink: FrameSink,
    ) -> Result<Box<dyn MicrophoneStream>> {
        if self.denied {
            return Err(Error::voice(
                VoiceErrorKind::PermissionDenied,
                "denied by test",
            ));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(Box::new(FakeStream {
            sink: Arc::clone(&self.sink),
        }))
    }

    fn permission_state(&self) -> PermissionState {
        if self.denied {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        }
    }
}

// Speaker

/// Records every call made on one loaded clip
pub struct FakeHandle {
    pub id: ClipId,
    pub mime: String,
    listener: PlaybackListener,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Emit a playback event as the output engine would
    pub fn emit(&self, event: PlaybackEvent) {
        (self.listener)(event);
    }
}

impl PlaybackHandle for FakeHandle {
    fn play(&self) {
        self.calls.lock().unwrap().push("play");
        (self.listener)(PlaybackEvent::Playing);
    }

    fn pause(&self) {
        self.calls.lock().unwrap().push("pause");
        (self.listener)(PlaybackEvent::Paused);
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push("stop");
    }

    fn set_volume(&self, _volume: f32) {
        self.calls.lock().unwrap().push("volume");
    }
}

/// Sink that signals `Ready` on load and counts releases
#[derive(Default)]
pub struct FakeSink {
    handles: Mutex<Vec<Arc<FakeHandle>>>,
    released: Mutex<Vec<ClipId>>,
    reject: bool,
}

impl FakeSink {
    /// A sink that fails every load with a decode error
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.handles.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Arc<FakeHandle>> {
        self.handles.lock().unwrap().last().cloned()
    }

    pub fn released(&self) -> Vec<ClipId> {
        self.released.lock().unwrap().clone()
    }
}

impl AudioSink for FakeSink {
    fn load(
        &self,
        clip: AudioClip,
        _volume: f32,
        listener: PlaybackListener,
    ) -> Result<Arc<dyn PlaybackHandle>> {
        if self.reject {
            return Err(Error::voice(VoiceErrorKind::DecodeFailure, "rejected by test"));
        }

        let handle = Arc::new(FakeHandle {
            id: clip.id,
            mime: clip.mime,
            listener: Arc::clone(&listener),
            calls: Mutex::new(Vec::new()),
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        listener(PlaybackEvent::Ready);
        Ok(handle)
    }

    fn release(&self, clip: ClipId) {
        self.released.lock().unwrap().push(clip);
    }
}

// Remote synthesis

/// Synthesizer returning fixed audio after an optional delay
pub struct FakeSynthesizer {
    delay: Duration,
    failure: Option<VoiceErrorKind>,
    requests: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn failing(kind: VoiceErrorKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _settings: &TtsSettings) -> Result<SynthesizedAudio> {
        self.requests.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(kind) = self.failure {
            return Err(Error::voice(kind, "failed by test"));
        }
        Ok(SynthesizedAudio {
            audio: vec![0xFF, 0xFB, 0x90, 0x00],
            audio_type: "audio/mpeg".to_string(),
            characters_used: text.chars().count() as u64,
        })
    }
}

// Platform speech

/// Recognition engine whose results are emitted by the test
#[derive(Default)]
pub struct FakeRecognizer {
    listener: Mutex<Option<RecognitionListener>>,
    starts: AtomicUsize,
    failure: Option<VoiceErrorKind>,
}

impl FakeRecognizer {
    /// A recognizer that fails to start with `kind`
    #[must_use]
    pub fn failing(kind: VoiceErrorKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Report a final result to the current listener
    pub fn hear(&self, transcript: &str) {
        self.emit(RecognitionEvent::Result {
            transcript: transcript.to_string(),
            is_final: true,
        });
    }

    pub fn emit(&self, event: RecognitionEvent) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }
}

impl RecognitionEngine for FakeRecognizer {
    fn start(&self, _settings: &RecognitionSettings, listener: RecognitionListener) -> Result<()> {
        if let Some(kind) = self.failure {
            return Err(Error::voice(kind, "failed by test"));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    fn stop(&self) {
        self.emit(RecognitionEvent::End);
    }

    fn permission_state(&self) -> PermissionState {
        if self.failure == Some(VoiceErrorKind::PermissionDenied) {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        }
    }
}

/// Local synthesis engine that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynth {
    spoken: Mutex<Vec<String>>,
}

impl RecordingSynth {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SynthesisEngine for RecordingSynth {
    fn speak(&self, text: &str, _settings: &SynthesisSettings, listener: SynthesisListener) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        listener(SynthesisEvent::Started);
        Ok(())
    }

    fn cancel(&self) {}

    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }
}

/// Transcriber that always hears the same words
pub struct FixedTranscriber(pub String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _wav: Vec<u8>, _language: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

// Assistant backends

/// Assistant answering every message with the same reply
pub struct FakeAssistant {
    reply: Option<AssistantReply>,
    received: Mutex<Vec<String>>,
}

impl FakeAssistant {
    #[must_use]
    pub fn replying(reply: AssistantReply) -> Self {
        Self {
            reply: Some(reply),
            received: Mutex::new(Vec::new()),
        }
    }

    /// An assistant whose backend is down
    #[must_use]
    pub fn down() -> Self {
        Self {
            reply: None,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assistant for FakeAssistant {
    async fn submit(&self, text: &str) -> Result<AssistantReply> {
        self.received.lock().unwrap().push(text.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::Assistant("assistant returned 503 Service Unavailable".into()))
    }
}

/// Summarizer with a fixed answer, optionally slow or failing
pub struct FakeSummarizer {
    summary: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeSummarizer {
    #[must_use]
    pub fn answering(summary: &str) -> Self {
        Self {
            summary: Some(summary.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn down() -> Self {
        Self {
            summary: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn slow(summary: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::answering(summary)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, _text: &str, _max_words: usize, _style: SummaryStyle) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.summary
            .clone()
            .ok_or_else(|| Error::Summarizer("summarizer returned 500".into()))
    }
}

/// Navigator remembering every screen it was sent to
#[derive(Default)]
pub struct RecordingNavigator {
    screens: Mutex<Vec<Screen>>,
}

impl RecordingNavigator {
    pub fn screens(&self) -> Vec<Screen> {
        self.screens.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, screen: Screen) {
        self.screens.lock().unwrap().push(screen);
    }
}
