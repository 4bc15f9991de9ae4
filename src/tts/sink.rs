//! Audio output for synthesized clips

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::StreamingResampler;
use crate::error::VoiceErrorKind;
use crate::{Error, Result, lock};

/// Identifies one loaded clip until it is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(pub u64);

impl std::fmt::Display for ClipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

/// Encoded audio ready to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub id: ClipId,
    pub data: Vec<u8>,
    pub mime: String,
}

/// Lifecycle notifications from a playback handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Decoded and ready to play
    Ready,
    Playing,
    Paused,
    /// Reached the end of the clip
    Ended,
    /// The output engine failed
    Failed(String),
}

/// Callback receiving playback events
pub type PlaybackListener = Arc<dyn Fn(PlaybackEvent) + Send + Sync>;

/// Controls playback of one loaded clip
pub trait PlaybackHandle: Send + Sync {
    fn play(&self);
    fn pause(&self);
    /// Halt playback and rewind
    fn stop(&self);
    fn set_volume(&self, volume: f32);
}

/// Loads clips for playback and owns their decoded buffers
pub trait AudioSink: Send + Sync {
    /// Decode `clip` and prepare it for playback
    ///
    /// The listener receives [`PlaybackEvent::Ready`] once playback can begin.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailure` if the audio cannot be decoded
    fn load(
        &self,
        clip: AudioClip,
        volume: f32,
        listener: PlaybackListener,
    ) -> Result<Arc<dyn PlaybackHandle>>;

    /// Free the resources held for a clip
    fn release(&self, clip: ClipId);
}

/// Mono PCM decoded from a clip
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode WAV or MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns `DecodeFailure` for empty, truncated or unsupported audio
pub fn decode_clip(data: &[u8], mime: &str) -> Result<DecodedAudio> {
    let decoded = if data.starts_with(b"RIFF") || mime.contains("wav") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }?;

    if decoded.samples.is_empty() {
        return Err(Error::voice(VoiceErrorKind::DecodeFailure, "clip has no samples"));
    }
    Ok(decoded)
}

fn decode_failure(e: impl std::fmt::Display) -> Error {
    Error::voice(VoiceErrorKind::DecodeFailure, e.to_string())
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(data)).map_err(decode_failure)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_failure)?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(decode_failure)?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(decode_failure(format!("mp3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(decode_failure("no mp3 frames found"));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Play,
    Pause,
    Stop,
    Volume(f32),
}

/// Speaker output through the default cpal device
///
/// Each loaded clip plays on its own output thread, since cpal streams
/// cannot move between threads.
#[derive(Default)]
pub struct CpalSink {
    clips: Mutex<HashMap<ClipId, Arc<[f32]>>>,
}

impl CpalSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for CpalSink {
    fn load(
        &self,
        clip: AudioClip,
        volume: f32,
        listener: PlaybackListener,
    ) -> Result<Arc<dyn PlaybackHandle>> {
        let decoded = decode_clip(&clip.data, &clip.mime)?;
        let clip_rate = decoded.sample_rate;
        let samples: Arc<[f32]> = decoded.samples.into();
        lock(&self.clips).insert(clip.id, Arc::clone(&samples));

        let (command_tx, command_rx) = std_mpsc::channel();
        let id = clip.id;

        std::thread::Builder::new()
            .name("cadence-playback".to_string())
            .spawn(move || run_output(id, &samples, clip_rate, volume, &command_rx, &listener))?;

        tracing::debug!(clip = %id, sample_rate = clip_rate, "clip loaded");
        Ok(Arc::new(CpalHandle { command_tx }))
    }

    fn release(&self, clip: ClipId) {
        if lock(&self.clips).remove(&clip).is_some() {
            tracing::debug!(clip = %clip, "clip released");
        } else {
            tracing::warn!(clip = %clip, "release of unknown clip");
        }
    }
}

struct CpalHandle {
    command_tx: std_mpsc::Sender<Command>,
}

impl PlaybackHandle for CpalHandle {
    fn play(&self) {
        let _ = self.command_tx.send(Command::Play);
    }

    fn pause(&self) {
        let _ = self.command_tx.send(Command::Pause);
    }

    fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop);
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.command_tx.send(Command::Volume(volume));
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Stop);
    }
}

struct OutputState {
    samples: Vec<f32>,
    position: AtomicUsize,
    volume: AtomicU32,
    finished: AtomicBool,
}

/// Body of the output thread: owns the cpal stream until the clip ends or stops
fn run_output(
    id: ClipId,
    samples: &[f32],
    clip_rate: u32,
    volume: f32,
    commands: &std_mpsc::Receiver<Command>,
    listener: &PlaybackListener,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        listener(PlaybackEvent::Failed("no output device available".to_string()));
        return;
    };

    let config = match device.default_output_config() {
        Ok(c) => c.config(),
        Err(e) => {
            listener(PlaybackEvent::Failed(e.to_string()));
            return;
        }
    };

    let samples = if config.sample_rate.0 == clip_rate {
        samples.to_vec()
    } else {
        match resample_clip(samples, clip_rate, config.sample_rate.0) {
            Ok(s) => s,
            Err(e) => {
                listener(PlaybackEvent::Failed(e.to_string()));
                return;
            }
        }
    };

    let state = Arc::new(OutputState {
        samples,
        position: AtomicUsize::new(0),
        volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
        finished: AtomicBool::new(false),
    });

    let channels = usize::from(config.channels.max(1));
    let callback_state = Arc::clone(&state);
    let error_listener = Arc::clone(listener);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let gain = f32::from_bits(callback_state.volume.load(Ordering::Relaxed));
            for frame in data.chunks_mut(channels) {
                let pos = callback_state.position.load(Ordering::Relaxed);
                let sample = if let Some(s) = callback_state.samples.get(pos) {
                    callback_state.position.store(pos + 1, Ordering::Relaxed);
                    *s * gain
                } else {
                    callback_state.finished.store(true, Ordering::Relaxed);
                    0.0
                };
                frame.fill(sample);
            }
        },
        move |err| {
            tracing::error!(error = %err, "audio playback error");
            error_listener(PlaybackEvent::Failed(err.to_string()));
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            listener(PlaybackEvent::Failed(e.to_string()));
            return;
        }
    };
    // Streams may start running on creation; hold until asked to play
    let _ = stream.pause();
    listener(PlaybackEvent::Ready);

    let mut playing = false;
    loop {
        match commands.recv_timeout(Duration::from_millis(25)) {
            Ok(Command::Play) => match stream.play() {
                Ok(()) => {
                    playing = true;
                    listener(PlaybackEvent::Playing);
                }
                Err(e) => {
                    listener(PlaybackEvent::Failed(e.to_string()));
                    break;
                }
            },
            Ok(Command::Pause) => {
                if playing {
                    let _ = stream.pause();
                    playing = false;
                    listener(PlaybackEvent::Paused);
                }
            }
            Ok(Command::Stop) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = stream.pause();
                state.position.store(0, Ordering::Relaxed);
                break;
            }
            Ok(Command::Volume(v)) => {
                state.volume.store(v.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if state.finished.load(Ordering::Relaxed) {
                    listener(PlaybackEvent::Ended);
                    break;
                }
            }
        }
    }

    drop(stream);
    tracing::debug!(clip = %id, "output stream closed");
}

fn resample_clip(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    let mut resampler = StreamingResampler::new(from, to, 1)?;
    let mut out = Vec::with_capacity(samples.len());
    resampler.push(samples, &mut out);
    // Flush the final partial chunk
    resampler.push(&[0.0; 2048], &mut out);
    Ok(out)
}
