//! Cadence Voice - realtime voice interaction engine
//!
//! This library provides the voice layer of the Cadence finance assistant:
//! - Microphone capture with a small enhancement graph and level metering
//! - Voice activity detection and utterance segmentation
//! - A realtime WebSocket transport to the voice server
//! - Remote text-to-speech with single-utterance playback
//! - Platform speech recognition and synthesis behind one bridge
//! - A session orchestrator that ties them to the assistant
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  VoiceSession                        │
//! │   mode select  │  assistant  │  reply prep  │  nav   │
//! └───────┬──────────────┬───────────────┬──────────────┘
//!         │              │               │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌──────▼─────────────┐
//! │ SpeechBridge │ │ AudioPipe- │ │ RealtimeClient     │
//! │ (basic)      │ │ line + VAD │ │ (WebSocket)        │
//! └──────────────┘ └────────────┘ └────────────────────┘
//!         │                               │
//! ┌───────▼───────────────────────────────▼────────────┐
//! │        TtsController  /  AudioSink (speaker)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod speech;
pub mod transport;
pub mod tts;
pub mod vad;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::Config;
pub use error::{Error, Result, VoiceErrorKind};
pub use session::{CombinedVoiceState, SessionSettings, VoiceMode, VoiceSession};

/// Lock a mutex, recovering the guard if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
