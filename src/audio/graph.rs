//! Audio processing graph: gain -> high-pass -> level analysis

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use super::AudioProcessingSettings;
use crate::vad::calculate_rms;

/// Target RMS for automatic gain control
const AGC_TARGET_RMS: f32 = 0.1;

/// Below this RMS the input is treated as noise floor and gain is held
const AGC_NOISE_FLOOR: f32 = 0.001;

/// Fraction of the gain error corrected per buffer
const AGC_SMOOTHING: f32 = 0.1;

const AGC_MIN_GAIN: f32 = 0.5;
const AGC_MAX_GAIN: f32 = 8.0;

/// Tunable parameters of the processing graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphParams {
    /// Fixed input gain when automatic gain control is off
    pub gain: f32,
    /// High-pass cutoff frequency in Hz
    pub high_pass_hz: f32,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            high_pass_hz: 100.0,
        }
    }
}

/// First-order high-pass filter, one state per channel
#[derive(Debug, Clone)]
struct HighPassFilter {
    alpha: f32,
    prev_input: Vec<f32>,
    prev_output: Vec<f32>,
}

impl HighPassFilter {
    #[allow(clippy::cast_precision_loss)]
    fn new(cutoff_hz: f32, sample_rate: u32, channels: u16) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz.max(1.0));
        let dt = 1.0 / sample_rate.max(1) as f32;
        let channels = usize::from(channels.max(1));

        Self {
            alpha: rc / (rc + dt),
            prev_input: vec![0.0; channels],
            prev_output: vec![0.0; channels],
        }
    }

    fn process(&mut self, buffer: &mut [f32]) {
        let channels = self.prev_input.len();

        for (i, sample) in buffer.iter_mut().enumerate() {
            let ch = i % channels;
            let x = *sample;
            let y = self.alpha * (self.prev_output[ch] + x - self.prev_input[ch]);
            self.prev_input[ch] = x;
            self.prev_output[ch] = y;
            *sample = y;
        }
    }
}

/// Processes captured buffers in place and measures their level
#[derive(Debug, Clone)]
pub struct ProcessingGraph {
    params: GraphParams,
    settings: AudioProcessingSettings,
    agc_gain: f32,
    high_pass: HighPassFilter,
    scratch: Vec<f32>,
}

impl ProcessingGraph {
    /// Build a graph for the given capture settings
    #[must_use]
    pub fn new(settings: AudioProcessingSettings, params: GraphParams) -> Self {
        Self {
            params,
            settings,
            agc_gain: 1.0,
            high_pass: HighPassFilter::new(
                params.high_pass_hz,
                settings.sample_rate,
                settings.channel_count,
            ),
            scratch: Vec::new(),
        }
    }

    /// Adjust gain and filtering without rebuilding capture
    pub fn configure(&mut self, settings: AudioProcessingSettings, params: GraphParams) {
        let rebuild_filter = (params.high_pass_hz - self.params.high_pass_hz).abs() > f32::EPSILON
            || settings.sample_rate != self.settings.sample_rate
            || settings.channel_count != self.settings.channel_count;

        if rebuild_filter {
            self.high_pass = HighPassFilter::new(
                params.high_pass_hz,
                settings.sample_rate,
                settings.channel_count,
            );
        }
        if !settings.auto_gain_control {
            self.agc_gain = 1.0;
        }

        self.settings = settings;
        self.params = params;
    }

    /// Run one buffer through the graph, returning the processed samples and their RMS
    pub fn process(&mut self, input: &[f32]) -> (&[f32], f32) {
        self.scratch.clear();
        self.scratch.extend_from_slice(input);

        let gain = if self.settings.auto_gain_control {
            self.update_agc(calculate_rms(input))
        } else {
            self.params.gain
        };

        for sample in &mut self.scratch {
            *sample *= gain;
        }

        if self.settings.noise_reduction {
            self.high_pass.process(&mut self.scratch);
        }

        for sample in &mut self.scratch {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let rms = calculate_rms(&self.scratch);
        (&self.scratch, rms)
    }

    /// Current effective gain
    #[must_use]
    pub const fn current_gain(&self) -> f32 {
        if self.settings.auto_gain_control {
            self.agc_gain
        } else {
            self.params.gain
        }
    }

    fn update_agc(&mut self, input_rms: f32) -> f32 {
        if input_rms > AGC_NOISE_FLOOR {
            let desired = (AGC_TARGET_RMS / input_rms).clamp(AGC_MIN_GAIN, AGC_MAX_GAIN);
            self.agc_gain += (desired - self.agc_gain) * AGC_SMOOTHING;
        }
        self.agc_gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(noise_reduction: bool) -> AudioProcessingSettings {
        AudioProcessingSettings {
            noise_reduction,
            auto_gain_control: false,
            ..AudioProcessingSettings::default()
        }
    }

    #[test]
    fn high_pass_removes_dc_offset() {
        let mut graph = ProcessingGraph::new(manual(true), GraphParams::default());
        let dc = vec![0.5f32; 1600];

        let mut last_rms = 1.0;
        for _ in 0..10 {
            let (_, rms) = graph.process(&dc);
            last_rms = rms;
        }
        assert!(last_rms < 0.01, "dc should decay, got {last_rms}");
    }

    #[test]
    fn fixed_gain_scales_level() {
        let params = GraphParams {
            gain: 2.0,
            ..GraphParams::default()
        };
        let mut graph = ProcessingGraph::new(manual(false), params);

        let (out, rms) = graph.process(&[0.1; 100]);
        assert!((out[0] - 0.2).abs() < 1e-6);
        assert!((rms - 0.2).abs() < 1e-4);
    }

    #[test]
    fn output_is_clamped() {
        let params = GraphParams {
            gain: 10.0,
            ..GraphParams::default()
        };
        let mut graph = ProcessingGraph::new(manual(false), params);
        let (out, _) = graph.process(&[0.5; 8]);
        assert!(out.iter().all(|s| *s <= 1.0));
    }

    #[test]
    fn agc_raises_quiet_input() {
        let settings = AudioProcessingSettings {
            noise_reduction: false,
            ..AudioProcessingSettings::default()
        };
        let mut graph = ProcessingGraph::new(settings, GraphParams::default());

        for _ in 0..50 {
            graph.process(&[0.02; 320]);
        }
        assert!(graph.current_gain() > 2.0);
    }

    #[test]
    fn configure_switches_off_agc() {
        let mut graph =
            ProcessingGraph::new(AudioProcessingSettings::default(), GraphParams::default());
        for _ in 0..20 {
            graph.process(&[0.02; 320]);
        }

        graph.configure(manual(true), GraphParams::default());
        assert!((graph.current_gain() - 1.0).abs() < f32::EPSILON);
    }
}
