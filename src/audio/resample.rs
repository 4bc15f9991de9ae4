//! Streaming sample-rate conversion for capture callbacks

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Frames fed to the resampler per chunk
const CHUNK_SIZE: usize = 1024;

/// Converts interleaved audio between sample rates as it arrives
///
/// Input is buffered until a full chunk is available, so output lags input
/// by at most one chunk.
pub struct StreamingResampler {
    resampler: FftFixedIn<f32>,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamingResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the rates are not supported
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self> {
        let channels = usize::from(channels.max(1));
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            2,
            channels,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        tracing::debug!(from_rate, to_rate, channels, "resampler created");

        Ok(Self {
            resampler,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    /// Push interleaved input and append any completed interleaved output to `out`
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.pending[ch].push(*sample);
            }
        }

        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|buf| buf.drain(..needed).collect())
                .collect();

            match self.resampler.process(&chunk, None) {
                Ok(result) => {
                    let frames = result.first().map_or(0, Vec::len);
                    for i in 0..frames {
                        for channel in &result {
                            out.push(channel[i]);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resample failed, dropping chunk");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsamples_by_ratio() {
        let mut resampler = StreamingResampler::new(48000, 16000, 1).unwrap();
        let mut out = Vec::new();

        resampler.push(&vec![0.1; 48000], &mut out);

        // One chunk may still be buffered
        assert!(out.len() > 15000 && out.len() <= 16000, "got {}", out.len());
    }

    #[test]
    fn buffers_partial_chunks() {
        let mut resampler = StreamingResampler::new(44100, 16000, 1).unwrap();
        let mut out = Vec::new();

        resampler.push(&[0.0; 100], &mut out);
        assert!(out.is_empty());
    }
}
