//! Playback of audio pushed by the realtime server
//!
//! Clips play one after another in arrival order. Frames that are neither
//! WAV nor MP3 are taken as raw PCM in the transport's packet format.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::audio::samples_to_wav;
use crate::transport::decode_pcm;
use crate::tts::{AudioClip, AudioSink, ClipId, PlaybackEvent, PlaybackHandle, PlaybackListener};
use crate::{Result, lock};

/// Server clips use ids from the top half so they never meet TTS clip ids
const CLIP_ID_BASE: u64 = 1 << 63;

/// Container detected from the first bytes of a server frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipFormat {
    Wav,
    Mp3,
    /// Little-endian f32 samples
    Pcm,
}

impl ClipFormat {
    #[must_use]
    pub fn sniff(data: &[u8]) -> Self {
        match data {
            [b'R', b'I', b'F', b'F', ..] => Self::Wav,
            [b'I', b'D', b'3', ..] => Self::Mp3,
            [0xFF, second, ..] if second & 0xE0 == 0xE0 => Self::Mp3,
            _ => Self::Pcm,
        }
    }
}

#[derive(Default)]
struct Queue {
    /// Clip currently handed to the speaker
    playing: Option<ClipId>,
    /// Loaded clips in arrival order; the handle is `None` until `load` returns
    clips: VecDeque<(ClipId, Option<Arc<dyn PlaybackHandle>>)>,
}

impl Queue {
    /// Next handle to start, if the speaker is free and the head is loaded
    fn advance(&mut self) -> Option<Arc<dyn PlaybackHandle>> {
        if self.playing.is_some() {
            return None;
        }
        let (id, handle) = self.clips.front()?;
        let handle = handle.clone()?;
        self.playing = Some(*id);
        Some(handle)
    }

    fn remove(&mut self, id: ClipId) -> bool {
        let Some(index) = self.clips.iter().position(|(clip, _)| *clip == id) else {
            return false;
        };
        self.clips.remove(index);
        if self.playing == Some(id) {
            self.playing = None;
        }
        true
    }
}

/// Plays server audio through the shared sink, releasing each clip when it ends
pub struct ClipPlayer {
    sink: Arc<dyn AudioSink>,
    queue: Arc<Mutex<Queue>>,
    next: AtomicU64,
    pcm_rate: u32,
    pcm_channels: u16,
}

impl ClipPlayer {
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            queue: Arc::new(Mutex::new(Queue::default())),
            next: AtomicU64::new(0),
            pcm_rate: crate::audio::SAMPLE_RATE,
            pcm_channels: 1,
        }
    }

    /// Rate and channels assumed for raw PCM frames
    #[must_use]
    pub const fn with_pcm_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.pcm_rate = sample_rate;
        self.pcm_channels = channels;
        self
    }

    /// Decode `data` and queue it behind any clip still playing
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailure` if the audio cannot be decoded
    pub fn play(&self, data: Vec<u8>, volume: f32) -> Result<ClipId> {
        let (data, mime) = match ClipFormat::sniff(&data) {
            ClipFormat::Wav => (data, "audio/wav"),
            ClipFormat::Mp3 => (data, "audio/mpeg"),
            ClipFormat::Pcm => {
                let samples = decode_pcm(&data)?;
                let wav = samples_to_wav(&samples, self.pcm_rate, self.pcm_channels)?;
                (wav, "audio/wav")
            }
        };

        let id = ClipId(CLIP_ID_BASE | self.next.fetch_add(1, Ordering::Relaxed));
        lock(&self.queue).clips.push_back((id, None));

        let queue: Weak<Mutex<Queue>> = Arc::downgrade(&self.queue);
        let sink = Arc::clone(&self.sink);
        let listener: PlaybackListener = Arc::new(move |event| {
            if !matches!(event, PlaybackEvent::Ended | PlaybackEvent::Failed(_)) {
                return;
            }
            let Some(queue) = queue.upgrade() else {
                return;
            };
            let (removed, next) = {
                let mut queue = lock(&queue);
                let removed = queue.remove(id);
                (removed, queue.advance())
            };
            if removed {
                if let PlaybackEvent::Failed(reason) = &event {
                    tracing::warn!(clip = %id, reason = %reason, "server audio failed");
                }
                sink.release(id);
            }
            if let Some(next) = next {
                next.play();
            }
        });

        let clip = AudioClip {
            id,
            data,
            mime: mime.to_string(),
        };

        let handle = match self.sink.load(clip, volume, listener) {
            Ok(handle) => handle,
            Err(e) => {
                let (removed, next) = {
                    let mut queue = lock(&self.queue);
                    (queue.remove(id), queue.advance())
                };
                if removed {
                    self.sink.release(id);
                }
                if let Some(next) = next {
                    next.play();
                }
                return Err(e);
            }
        };

        let (loaded, next) = {
            let mut queue = lock(&self.queue);
            let loaded = match queue.clips.iter_mut().find(|(clip, _)| *clip == id) {
                Some(slot) => {
                    slot.1 = Some(Arc::clone(&handle));
                    true
                }
                None => false,
            };
            (loaded, queue.advance())
        };

        if !loaded {
            // Stopped while loading; release already happened
            handle.stop();
            return Ok(id);
        }
        if let Some(next) = next {
            next.play();
            tracing::debug!(clip = %id, mime, "playing server audio");
        } else {
            tracing::debug!(clip = %id, mime, "server audio queued");
        }
        Ok(id)
    }

    /// Whether any server clip is playing or queued
    #[must_use]
    pub fn is_playing(&self) -> bool {
        !lock(&self.queue).clips.is_empty()
    }

    /// Clips waiting behind the one playing
    #[must_use]
    pub fn queued(&self) -> usize {
        let queue = lock(&self.queue);
        queue.clips.len() - usize::from(queue.playing.is_some())
    }

    /// Stop and release every clip
    pub fn stop_all(&self) {
        let drained: Vec<_> = {
            let mut queue = lock(&self.queue);
            queue.playing = None;
            queue.clips.drain(..).collect()
        };
        for (id, handle) in drained {
            if let Some(handle) = handle {
                handle.stop();
            }
            self.sink.release(id);
        }
    }
}

impl Drop for ClipPlayer {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::encode_pcm;
    use crate::tts::decode_clip;

    #[test]
    fn sniffs_containers() {
        assert_eq!(ClipFormat::sniff(b"RIFF\0\0\0\0WAVE"), ClipFormat::Wav);
        assert_eq!(ClipFormat::sniff(b"ID3\x04"), ClipFormat::Mp3);
        assert_eq!(ClipFormat::sniff(&[0xFF, 0xFB, 0x90, 0x00]), ClipFormat::Mp3);
        assert_eq!(ClipFormat::sniff(&encode_pcm(&[0.1, 0.2])), ClipFormat::Pcm);
        assert_eq!(ClipFormat::sniff(&[]), ClipFormat::Pcm);
    }

    #[test]
    fn raw_pcm_becomes_playable_wav() {
        let samples = vec![0.25_f32; 1600];
        let wav = samples_to_wav(&decode_pcm(&encode_pcm(&samples)).unwrap(), 16_000, 1).unwrap();
        let decoded = decode_clip(&wav, "audio/wav").unwrap();
        assert_eq!(decoded.samples.len(), 1600);
        assert_eq!(decoded.sample_rate, 16_000);
    }
}
