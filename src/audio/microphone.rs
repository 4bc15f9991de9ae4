//! Microphone access

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::resample::StreamingResampler;
use crate::error::VoiceErrorKind;
use crate::{Error, Result};

/// One buffer of interleaved samples delivered by a microphone
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub samples: &'a [f32],
    pub sample_rate: u32,
    pub channels: u16,
}

/// Callback invoked for every captured buffer
pub type FrameSink = Arc<dyn Fn(AudioFrame<'_>) + Send + Sync>;

/// Capture constraints for a microphone stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicrophoneRequest {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    /// Preferred frames per callback
    pub buffer_size: u32,
}

/// Permission state reported without prompting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// No input device to ask about
    Unavailable,
}

/// An open microphone stream; dropping it releases the device
pub trait MicrophoneStream: Send {
    /// Release the device now
    fn close(self: Box<Self>);
}

/// Source of microphone streams
pub trait Microphone: Send + Sync {
    /// Open the microphone and start delivering frames to `sink`
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `DeviceUnavailable` when capture cannot start
    fn open(&self, request: &MicrophoneRequest, sink: FrameSink)
    -> Result<Box<dyn MicrophoneStream>>;

    /// Query permission without requesting access
    fn permission_state(&self) -> PermissionState;
}

/// Microphone backed by the default cpal input device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(
        &self,
        request: &MicrophoneRequest,
        sink: FrameSink,
    ) -> Result<Box<dyn MicrophoneStream>> {
        let request = *request;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        // cpal streams aren't Send, so the stream lives on its own thread
        let thread = std::thread::Builder::new()
            .name("cadence-mic".to_string())
            .spawn(move || match build_input_stream(&request, sink) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("microphone released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Audio("microphone thread exited".to_string()))
            }
        }
    }

    fn permission_state(&self) -> PermissionState {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            return PermissionState::Unavailable;
        };

        match device.supported_input_configs() {
            Ok(_) => PermissionState::Granted,
            Err(e) => {
                if classify_device_error(&e.to_string()) == VoiceErrorKind::PermissionDenied {
                    PermissionState::Denied
                } else {
                    PermissionState::Unavailable
                }
            }
        }
    }
}

struct CpalStream {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn release(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl MicrophoneStream for CpalStream {
    fn close(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn build_input_stream(request: &MicrophoneRequest, sink: FrameSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| {
        Error::voice(
            VoiceErrorKind::DeviceUnavailable,
            "no input device available",
        )
    })?;

    let rate = SampleRate(request.sample_rate);
    let supported = device
        .supported_input_configs()
        .map_err(|e| device_error(&e.to_string()))?
        .find(|c| {
            c.channels() == request.channel_count
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        });

    // Fall back to the device default and convert in the callback
    let config: StreamConfig = match supported {
        Some(c) => {
            let buffer_size = match c.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max }
                    if (*min..=*max).contains(&request.buffer_size) =>
                {
                    cpal::BufferSize::Fixed(request.buffer_size)
                }
                _ => cpal::BufferSize::Default,
            };
            let mut config = c.with_sample_rate(rate).config();
            config.buffer_size = buffer_size;
            config
        }
        None => device
            .default_input_config()
            .map_err(|e| device_error(&e.to_string()))?
            .config(),
    };

    if request.echo_cancellation {
        tracing::debug!("echo cancellation is left to the platform input chain");
    }

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        device_rate = config.sample_rate.0,
        device_channels = config.channels,
        sample_rate = request.sample_rate,
        channels = request.channel_count,
        "microphone opened"
    );

    let mut converter = FrameConverter::new(&config, request)?;
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let (sample_rate, channels) = (converter.out_rate, converter.out_channels);
                let samples = converter.convert(data);
                if !samples.is_empty() {
                    sink(AudioFrame {
                        samples,
                        sample_rate,
                        channels,
                    });
                }
            },
            |err| {
                tracing::error!(error = %err, "microphone stream error");
            },
            None,
        )
        .map_err(|e| device_error(&e.to_string()))?;

    stream.play().map_err(|e| device_error(&e.to_string()))?;
    Ok(stream)
}

/// Converts device frames to the requested channel count and sample rate
struct FrameConverter {
    in_channels: u16,
    out_channels: u16,
    out_rate: u32,
    resampler: Option<StreamingResampler>,
    remixed: Vec<f32>,
    output: Vec<f32>,
}

impl FrameConverter {
    fn new(config: &StreamConfig, request: &MicrophoneRequest) -> Result<Self> {
        let resampler = if config.sample_rate.0 == request.sample_rate {
            None
        } else {
            Some(StreamingResampler::new(
                config.sample_rate.0,
                request.sample_rate,
                request.channel_count,
            )?)
        };

        Ok(Self {
            in_channels: config.channels,
            out_channels: request.channel_count,
            out_rate: request.sample_rate,
            resampler,
            remixed: Vec::new(),
            output: Vec::new(),
        })
    }

    fn convert(&mut self, data: &[f32]) -> &[f32] {
        remix_channels(data, self.in_channels, self.out_channels, &mut self.remixed);

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.output.clear();
                resampler.push(&self.remixed, &mut self.output);
                &self.output
            }
            None => &self.remixed,
        }
    }
}

/// Remix interleaved audio between channel counts
pub(crate) fn remix_channels(input: &[f32], from: u16, to: u16, out: &mut Vec<f32>) {
    out.clear();
    if from == to || from == 0 || to == 0 {
        out.extend_from_slice(input);
        return;
    }

    let from = usize::from(from);
    let to = usize::from(to);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / from as f32;

    for frame in input.chunks(from) {
        let mono: f32 = frame.iter().sum::<f32>() * scale;
        out.extend(std::iter::repeat_n(mono, to));
    }
}

fn device_error(message: &str) -> Error {
    Error::voice(classify_device_error(message), message.to_string())
}

/// Map a backend error message onto the capture taxonomy
pub(crate) fn classify_device_error(message: &str) -> VoiceErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed")
    {
        VoiceErrorKind::PermissionDenied
    } else {
        VoiceErrorKind::DeviceUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_downmix_averages() {
        let mut out = Vec::new();
        remix_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1, &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn mono_upmix_duplicates() {
        let mut out = Vec::new();
        remix_channels(&[0.5, -0.5], 1, 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn device_errors_are_classified() {
        assert_eq!(
            classify_device_error("Permission denied by user"),
            VoiceErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_device_error("The requested device is no longer available"),
            VoiceErrorKind::DeviceUnavailable
        );
    }
}
