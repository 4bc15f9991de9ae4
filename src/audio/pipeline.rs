//! Audio enhancement pipeline

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use super::graph::{GraphParams, ProcessingGraph};
use super::microphone::{AudioFrame, FrameSink, Microphone, MicrophoneRequest, MicrophoneStream};
use super::segmenter::{Utterance, UtteranceSegmenter};
use super::{AudioLevelFrame, AudioProcessingSettings, AudioSettingsUpdate};
use crate::error::VoiceErrorKind;
use crate::vad::{VadSettings, VoiceActivityDetector, rms_to_level};
use crate::{Result, lock};

/// Audio kept ahead of each detected utterance
const PRE_ROLL: Duration = Duration::from_millis(500);

/// Utterances shorter than this are not transcribed
const MIN_UTTERANCE: Duration = Duration::from_millis(300);

/// Pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(flatten)]
    pub settings: AudioProcessingSettings,
    #[serde(flatten)]
    pub graph: GraphParams,
    /// Preferred frames per processing callback
    pub buffer_size: u32,
    /// Longest utterance collected before it is cut and emitted
    pub max_utterance_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            settings: AudioProcessingSettings::default(),
            graph: GraphParams::default(),
            buffer_size: 4096,
            max_utterance_ms: 30_000,
        }
    }
}

/// Snapshot of pipeline activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub frames_processed: u64,
    pub speech_frames: u64,
    pub current_level: f32,
    pub peak_level: f32,
    pub average_level: f32,
    pub settings: AudioProcessingSettings,
    pub uptime: Option<Duration>,
}

/// Per-frame processing shared with the capture callback
pub struct FrameProcessor {
    graph: ProcessingGraph,
    vad: VoiceActivityDetector,
    segmenter: Option<UtteranceSegmenter>,
    frames: u64,
    speech_frames: u64,
    level_sum: f64,
    peak_level: f32,
    level_tx: watch::Sender<AudioLevelFrame>,
    utterance_tx: Option<mpsc::UnboundedSender<Utterance>>,
}

impl FrameProcessor {
    /// Run one captured buffer through the graph and detector
    pub fn process(&mut self, samples: &[f32], now: Instant) -> AudioLevelFrame {
        let (processed, rms) = self.graph.process(samples);
        let voice_detected = self.vad.process(rms, now);
        let level = rms_to_level(rms);

        if let Some(segmenter) = self.segmenter.as_mut() {
            if let Some(utterance) = segmenter.push(processed, voice_detected) {
                if let Some(tx) = &self.utterance_tx {
                    let _ = tx.send(utterance);
                }
            }
        }

        self.frames += 1;
        if voice_detected {
            self.speech_frames += 1;
        }
        self.level_sum += f64::from(level);
        self.peak_level = self.peak_level.max(level);

        let frame = AudioLevelFrame {
            level,
            voice_detected,
            emitted_at: now,
        };
        tracing::trace!(level, voice_detected, "audio frame");
        self.level_tx.send_replace(frame);
        frame
    }

    fn reset(&mut self) {
        self.vad.reset();
        if let Some(segmenter) = self.segmenter.as_mut() {
            segmenter.reset();
        }
        self.frames = 0;
        self.speech_frames = 0;
        self.level_sum = 0.0;
        self.peak_level = 0.0;
        self.level_tx.send_replace(AudioLevelFrame::silent());
    }
}

/// Captures the microphone and publishes level and voice activity
pub struct AudioPipeline {
    microphone: Arc<dyn Microphone>,
    config: PipelineConfig,
    processor: Arc<Mutex<FrameProcessor>>,
    level_rx: watch::Receiver<AudioLevelFrame>,
    stream: Option<Box<dyn MicrophoneStream>>,
    started_at: Option<Instant>,
    last_error: Option<VoiceErrorKind>,
}

impl AudioPipeline {
    /// Create a stopped pipeline
    #[must_use]
    pub fn new(microphone: Arc<dyn Microphone>, config: PipelineConfig, vad: VadSettings) -> Self {
        let (level_tx, level_rx) = watch::channel(AudioLevelFrame::silent());
        let processor = FrameProcessor {
            graph: ProcessingGraph::new(config.settings, config.graph),
            vad: VoiceActivityDetector::new(vad),
            segmenter: None,
            frames: 0,
            speech_frames: 0,
            level_sum: 0.0,
            peak_level: 0.0,
            level_tx,
            utterance_tx: None,
        };

        Self {
            microphone,
            config,
            processor: Arc::new(Mutex::new(processor)),
            level_rx,
            stream: None,
            started_at: None,
            last_error: None,
        }
    }

    /// Emit complete utterances on the returned channel while running
    pub fn utterances(&mut self) -> mpsc::UnboundedReceiver<Utterance> {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = self.config;
        let mut processor = lock(&self.processor);
        processor.utterance_tx = Some(tx);
        processor.segmenter = Some(new_segmenter(&config));
        rx
    }

    /// Acquire the microphone and start processing
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `DeviceUnavailable` if the microphone
    /// cannot be opened; the pipeline stays stopped
    pub fn start(&mut self, settings: AudioProcessingSettings) -> Result<()> {
        if self.stream.is_some() {
            self.stop();
        }

        self.config.settings = settings;
        {
            let mut processor = lock(&self.processor);
            processor.graph = ProcessingGraph::new(settings, self.config.graph);
            if processor.segmenter.is_some() {
                processor.segmenter = Some(new_segmenter(&self.config));
            }
            processor.reset();
        }

        let request = MicrophoneRequest {
            sample_rate: settings.sample_rate,
            channel_count: settings.channel_count,
            echo_cancellation: settings.echo_cancellation,
            buffer_size: self.config.buffer_size,
        };

        let processor = Arc::clone(&self.processor);
        let sink: FrameSink = Arc::new(move |frame: AudioFrame<'_>| {
            lock(&processor).process(frame.samples, Instant::now());
        });

        match self.microphone.open(&request, sink) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.started_at = Some(Instant::now());
                self.last_error = None;
                tracing::info!(
                    sample_rate = settings.sample_rate,
                    channels = settings.channel_count,
                    noise_reduction = settings.noise_reduction,
                    auto_gain = settings.auto_gain_control,
                    "audio pipeline started"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "audio pipeline failed to start");
                self.last_error = Some(e.kind());
                Err(e)
            }
        }
    }

    /// Release the microphone and reset detection state
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
            self.started_at = None;
            lock(&self.processor).reset();
            tracing::info!("audio pipeline stopped");
        }
    }

    /// Apply a partial settings update
    ///
    /// Filter and gain changes take effect live. A sample rate or channel
    /// change restarts capture when running.
    ///
    /// # Errors
    ///
    /// Returns error if a required restart fails
    pub fn apply_settings(&mut self, update: &AudioSettingsUpdate) -> Result<()> {
        let mut settings = self.config.settings;
        let format_changed = settings.apply(update);

        if format_changed && self.is_running() {
            tracing::debug!("capture format changed, restarting pipeline");
            return self.start(settings);
        }

        self.config.settings = settings;
        lock(&self.processor)
            .graph
            .configure(settings, self.config.graph);
        Ok(())
    }

    /// Change gain or filter cutoff live
    pub fn set_graph_params(&mut self, params: GraphParams) {
        self.config.graph = params;
        lock(&self.processor)
            .graph
            .configure(self.config.settings, params);
    }

    /// Replace voice activity settings
    pub fn set_vad_settings(&self, settings: VadSettings) {
        lock(&self.processor).vad.set_settings(settings);
    }

    /// Receiver for the latest level frame
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AudioLevelFrame> {
        self.level_rx.clone()
    }

    /// Most recent level frame
    #[must_use]
    pub fn latest(&self) -> AudioLevelFrame {
        *self.level_rx.borrow()
    }

    /// Whether the microphone is held
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Kind of the last start failure, cleared on successful start
    #[must_use]
    pub const fn last_error(&self) -> Option<VoiceErrorKind> {
        self.last_error
    }

    /// Active settings
    #[must_use]
    pub const fn settings(&self) -> &AudioProcessingSettings {
        &self.config.settings
    }

    /// Activity statistics
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let processor = lock(&self.processor);
        let latest = *self.level_rx.borrow();

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let average_level = if processor.frames == 0 {
            0.0
        } else {
            (processor.level_sum / processor.frames as f64) as f32
        };

        PipelineStats {
            running: self.is_running(),
            frames_processed: processor.frames,
            speech_frames: processor.speech_frames,
            current_level: latest.level,
            peak_level: processor.peak_level,
            average_level,
            settings: self.config.settings,
            uptime: self.started_at.map(|t| t.elapsed()),
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn new_segmenter(config: &PipelineConfig) -> UtteranceSegmenter {
    UtteranceSegmenter::new(
        config.settings.sample_rate,
        config.settings.channel_count,
        PRE_ROLL,
        MIN_UTTERANCE,
    )
    .with_max_utterance(Duration::from_millis(config.max_utterance_ms))
}
