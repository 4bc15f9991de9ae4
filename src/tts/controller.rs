//! Single-utterance playback controller

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::client::Synthesizer;
use super::sink::{AudioClip, AudioSink, ClipId, PlaybackEvent, PlaybackHandle, PlaybackListener};
use super::{TtsSettings, TtsSettingsUpdate};
use crate::error::VoiceErrorKind;
use crate::{Result, lock};

/// Published playback state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TtsState {
    pub is_loading: bool,
    pub is_playing: bool,
    pub is_paused: bool,
    /// User-facing message for the last failure
    pub error: Option<String>,
    pub error_kind: Option<VoiceErrorKind>,
    /// Characters billed across all utterances
    pub characters_used: u64,
}

impl TtsState {
    const fn clear_playback(&mut self) {
        self.is_loading = false;
        self.is_playing = false;
        self.is_paused = false;
    }

    fn fail(&mut self, kind: VoiceErrorKind) {
        self.clear_playback();
        self.error = Some(kind.user_message().to_string());
        self.error_kind = Some(kind);
    }
}

#[derive(Default)]
struct Active {
    /// Bumped on every speak and stop; events from older generations are stale
    generation: u64,
    cancel: Option<CancellationToken>,
    handle: Option<Arc<dyn PlaybackHandle>>,
    clip: Option<ClipId>,
    ready: bool,
    next_clip: u64,
}

struct Shared {
    sink: Arc<dyn AudioSink>,
    settings: Mutex<TtsSettings>,
    active: Mutex<Active>,
    state_tx: watch::Sender<TtsState>,
}

impl Shared {
    fn on_event(&self, generation: u64, event: PlaybackEvent) {
        let mut active = lock(&self.active);
        if active.generation != generation {
            tracing::trace!(generation, ?event, "ignoring stale playback event");
            return;
        }

        match event {
            PlaybackEvent::Ready => {
                active.ready = true;
                let handle = active.handle.clone();
                drop(active);
                self.state_tx.send_modify(|s| s.is_loading = false);

                let auto_play = lock(&self.settings).auto_play;
                if auto_play && let Some(handle) = handle {
                    handle.play();
                }
            }
            PlaybackEvent::Playing => {
                drop(active);
                self.state_tx.send_modify(|s| {
                    s.is_loading = false;
                    s.is_playing = true;
                    s.is_paused = false;
                });
            }
            PlaybackEvent::Paused => {
                drop(active);
                self.state_tx.send_modify(|s| {
                    s.is_playing = false;
                    s.is_paused = true;
                });
            }
            PlaybackEvent::Ended => {
                let clip = finish(&mut active);
                drop(active);
                self.release(clip);
                self.state_tx.send_modify(TtsState::clear_playback);
                tracing::debug!("utterance finished");
            }
            PlaybackEvent::Failed(reason) => {
                let clip = finish(&mut active);
                drop(active);
                self.release(clip);
                tracing::warn!(reason = %reason, "playback failed");
                self.state_tx
                    .send_modify(|s| s.fail(VoiceErrorKind::DecodeFailure));
            }
        }
    }

    fn release(&self, clip: Option<ClipId>) {
        if let Some(clip) = clip {
            self.sink.release(clip);
        }
    }
}

/// Detach the current utterance so nothing else can release it
fn finish(active: &mut Active) -> Option<ClipId> {
    active.generation += 1;
    active.cancel = None;
    active.handle = None;
    active.ready = false;
    active.clip.take()
}

/// Speaks one utterance at a time through a synthesizer and an audio sink
///
/// Starting a new utterance stops the previous one first. Every clip that
/// reaches the sink is released exactly once, whether it ends, fails or is
/// stopped.
pub struct TtsController {
    synthesizer: Arc<dyn Synthesizer>,
    shared: Arc<Shared>,
}

impl TtsController {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        settings: TtsSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(TtsState::default());
        Self {
            synthesizer,
            shared: Arc::new(Shared {
                sink,
                settings: Mutex::new(settings),
                active: Mutex::new(Active::default()),
                state_tx,
            }),
        }
    }

    /// Synthesize and play `text`, replacing any current utterance
    ///
    /// Resolves once the clip is loaded (and playing, with auto-play). A call
    /// superseded by `stop` or another `speak` resolves `Ok` and its response
    /// is discarded.
    ///
    /// # Errors
    ///
    /// Returns the synthesis or decode failure; the same failure is
    /// reflected in [`TtsState::error`]
    pub async fn speak(&self, text: &str) -> Result<()> {
        self.stop();

        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let generation = {
            let mut active = lock(&self.shared.active);
            active.generation += 1;
            active.cancel = Some(token.clone());
            active.generation
        };
        let settings = self.settings();

        self.shared.state_tx.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
            s.error_kind = None;
        });

        let result = tokio::select! {
            () = token.cancelled() => {
                tracing::debug!(generation, "synthesis cancelled");
                return Ok(());
            }
            result = self.synthesizer.synthesize(text, &settings) => result,
        };

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                {
                    let mut active = lock(&self.shared.active);
                    if active.generation != generation {
                        return Ok(());
                    }
                    active.cancel = None;
                }
                tracing::warn!(error = %e, "synthesis failed");
                self.shared.state_tx.send_modify(|s| s.fail(e.kind()));
                return Err(e);
            }
        };

        let clip_id = {
            let mut active = lock(&self.shared.active);
            if active.generation != generation {
                tracing::debug!(generation, "discarding superseded synthesis");
                return Ok(());
            }
            active.next_clip += 1;
            let id = ClipId(active.next_clip);
            active.clip = Some(id);
            id
        };

        self.shared
            .state_tx
            .send_modify(|s| s.characters_used += audio.characters_used);

        let clip = AudioClip {
            id: clip_id,
            data: audio.audio,
            mime: audio.audio_type,
        };

        let weak = Arc::downgrade(&self.shared);
        let listener: PlaybackListener = Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_event(generation, event);
            }
        });

        let handle = match self.shared.sink.load(clip, settings.volume, listener) {
            Ok(handle) => handle,
            Err(e) => {
                let clip = {
                    let mut active = lock(&self.shared.active);
                    if active.generation == generation {
                        finish(&mut active)
                    } else {
                        None
                    }
                };
                self.shared.release(clip);
                tracing::warn!(error = %e, "clip could not be loaded");
                self.shared.state_tx.send_modify(|s| s.fail(e.kind()));
                return Err(e);
            }
        };

        let play_now = {
            let mut active = lock(&self.shared.active);
            if active.generation != generation {
                // Stopped, ended or failed while loading; release already happened
                drop(active);
                handle.stop();
                return Ok(());
            }
            active.cancel = None;
            active.handle = Some(Arc::clone(&handle));
            active.ready && settings.auto_play
        };

        if play_now {
            handle.play();
        }

        tracing::info!(clip = %clip_id, chars = text.chars().count(), "utterance loaded");
        Ok(())
    }

    /// Abort any request in flight, halt playback and release the clip
    ///
    /// Safe to call repeatedly; the clip is released at most once.
    pub fn stop(&self) {
        let (cancel, handle, clip) = {
            let mut active = lock(&self.shared.active);
            let cancel = active.cancel.take();
            let handle = active.handle.take();
            (cancel, handle, finish(&mut active))
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            handle.stop();
        }
        if clip.is_some() {
            tracing::debug!("utterance stopped");
        }
        self.shared.release(clip);

        self.shared.state_tx.send_if_modified(|s| {
            let busy = s.is_loading || s.is_playing || s.is_paused;
            s.clear_playback();
            busy
        });
    }

    /// Start a loaded clip that is not playing yet
    ///
    /// Needed when auto-play is off. A paused clip resumes; no-op while
    /// loading, playing or idle.
    pub fn play(&self) {
        let handle = {
            let active = lock(&self.shared.active);
            if !active.ready {
                return;
            }
            active.handle.clone()
        };
        if self.state().is_playing {
            return;
        }
        if let Some(handle) = handle {
            handle.play();
        }
    }

    /// Pause the current utterance; no-op unless playing
    pub fn pause(&self) {
        if !self.state().is_playing {
            return;
        }
        if let Some(handle) = self.current_handle() {
            handle.pause();
        }
    }

    /// Resume a paused utterance; no-op unless paused
    pub fn resume(&self) {
        if !self.state().is_paused {
            return;
        }
        if let Some(handle) = self.current_handle() {
            handle.play();
        }
    }

    /// Merge a partial settings update, applying volume to the live clip
    pub fn update_settings(&self, update: TtsSettingsUpdate) {
        let volume_changed = update.volume.is_some();
        let volume = {
            let mut settings = lock(&self.shared.settings);
            settings.apply(update);
            settings.volume
        };

        if volume_changed && let Some(handle) = self.current_handle() {
            handle.set_volume(volume);
        }
    }

    #[must_use]
    pub fn settings(&self) -> TtsSettings {
        lock(&self.shared.settings).clone()
    }

    #[must_use]
    pub fn state(&self) -> TtsState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver notified on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TtsState> {
        self.shared.state_tx.subscribe()
    }

    fn current_handle(&self) -> Option<Arc<dyn PlaybackHandle>> {
        lock(&self.shared.active).handle.clone()
    }
}

impl Drop for TtsController {
    fn drop(&mut self) {
        self.stop();
    }
}
