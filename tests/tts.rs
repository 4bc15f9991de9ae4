//! TTS playback controller integration tests
//!
//! Drives the controller with an in-memory synthesizer and speaker.

use std::sync::Arc;
use std::time::Duration;

use cadence_voice::audio::samples_to_wav;
use cadence_voice::error::VoiceErrorKind;
use cadence_voice::tts::{
    AudioSink, PlaybackEvent, Synthesizer, TtsController, TtsSettings, TtsSettingsUpdate,
    decode_clip,
};

mod common;

use common::{FakeSink, FakeSynthesizer, tone};

fn controller(
    synth: FakeSynthesizer,
    sink: &Arc<FakeSink>,
) -> (TtsController, Arc<FakeSynthesizer>) {
    let synth = Arc::new(synth);
    let controller = TtsController::new(
        Arc::clone(&synth) as Arc<dyn Synthesizer>,
        Arc::clone(sink) as Arc<dyn AudioSink>,
        TtsSettings::default(),
    );
    (controller, synth)
}

#[tokio::test]
async fn test_auto_play_lifecycle() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    tts.speak("Your balance is four hundred dollars.").await.unwrap();

    let state = tts.state();
    assert!(!state.is_loading);
    assert!(state.is_playing);
    assert_eq!(state.characters_used, 37);

    let handle = sink.last().unwrap();
    assert_eq!(handle.calls(), vec!["play"]);
    assert!(sink.released().is_empty());

    handle.emit(PlaybackEvent::Ended);

    let state = tts.state();
    assert!(!state.is_playing);
    assert!(state.error.is_none());
    assert_eq!(sink.released(), vec![handle.id]);
}

#[tokio::test]
async fn test_speak_twice_keeps_one_utterance() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    tts.speak("first").await.unwrap();
    tts.speak("second").await.unwrap();

    let handles = sink.handles();
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].calls(), vec!["play", "stop"]);
    assert_eq!(sink.released(), vec![handles[0].id]);

    // A late event from the first clip must not disturb the second
    handles[0].emit(PlaybackEvent::Ended);
    assert!(tts.state().is_playing);
    assert_eq!(sink.released().len(), 1);

    handles[1].emit(PlaybackEvent::Ended);
    assert_eq!(sink.released(), vec![handles[0].id, handles[1].id]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_speak_supersedes_pending_request() {
    let sink = Arc::new(FakeSink::default());
    let (tts, synth) = controller(FakeSynthesizer::slow(Duration::from_millis(200)), &sink);

    let (first, second) = tokio::join!(tts.speak("first"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tts.speak("second").await
    });

    first.unwrap();
    second.unwrap();
    assert_eq!(synth.requests(), vec!["first", "second"]);

    // Only the surviving request reaches the speaker
    let handles = sink.handles();
    assert_eq!(handles.len(), 1);
    assert!(sink.released().is_empty());
    assert!(tts.state().is_playing);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    tts.stop();
    tts.speak("hello").await.unwrap();
    tts.stop();
    tts.stop();

    assert_eq!(sink.released().len(), 1);
    assert!(!tts.state().is_playing);

    // An Ended arriving after stop is stale
    sink.last().unwrap().emit(PlaybackEvent::Ended);
    assert_eq!(sink.released().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_request_discards_response() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::slow(Duration::from_millis(200)), &sink);

    let (result, ()) = tokio::join!(tts.speak("hello"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tts.stop();
    });

    result.unwrap();
    assert!(sink.handles().is_empty());
    assert!(!tts.state().is_loading);
}

#[tokio::test]
async fn test_pause_and_resume_only_when_valid() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    tts.resume();
    tts.speak("hello").await.unwrap();
    let handle = sink.last().unwrap();

    tts.resume();
    assert_eq!(handle.calls(), vec!["play"]);

    tts.pause();
    assert!(tts.state().is_paused);
    tts.pause();

    tts.resume();
    assert!(tts.state().is_playing);
    assert_eq!(handle.calls(), vec!["play", "pause", "play"]);
}

#[tokio::test]
async fn test_play_starts_clip_without_auto_play() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);
    tts.update_settings(TtsSettingsUpdate {
        auto_play: Some(false),
        ..TtsSettingsUpdate::default()
    });

    tts.play();
    tts.speak("hello").await.unwrap();
    let handle = sink.last().unwrap();
    assert!(handle.calls().is_empty());
    assert!(!tts.state().is_playing);

    tts.play();
    assert_eq!(handle.calls(), vec!["play"]);
    assert!(tts.state().is_playing);

    // Already playing
    tts.play();
    assert_eq!(handle.calls(), vec!["play"]);

    handle.emit(PlaybackEvent::Ended);
    tts.play();
    assert_eq!(handle.calls(), vec!["play"]);
    assert_eq!(sink.released(), vec![handle.id]);
}

#[tokio::test]
async fn test_volume_update_reaches_live_clip() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    tts.speak("hello").await.unwrap();
    tts.update_settings(TtsSettingsUpdate {
        volume: Some(0.4),
        ..TtsSettingsUpdate::default()
    });

    assert!((tts.settings().volume - 0.4).abs() < f32::EPSILON);
    assert!(sink.last().unwrap().calls().contains(&"volume"));
}

#[tokio::test]
async fn test_synthesis_failure_leaves_no_clip() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::failing(VoiceErrorKind::NetworkFailure), &sink);

    let err = tts.speak("hello").await.unwrap_err();
    assert_eq!(err.kind(), VoiceErrorKind::NetworkFailure);

    let state = tts.state();
    assert_eq!(state.error_kind, Some(VoiceErrorKind::NetworkFailure));
    assert!(!state.is_loading);
    assert!(sink.handles().is_empty());
    assert!(sink.released().is_empty());
}

#[tokio::test]
async fn test_decode_failure_is_distinct_and_released() {
    let sink = Arc::new(FakeSink::rejecting());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    let err = tts.speak("hello").await.unwrap_err();
    assert_eq!(err.kind(), VoiceErrorKind::DecodeFailure);
    assert_eq!(tts.state().error_kind, Some(VoiceErrorKind::DecodeFailure));
    assert_eq!(sink.released().len(), 1);
}

#[tokio::test]
async fn test_playback_failure_releases_clip() {
    let sink = Arc::new(FakeSink::default());
    let (tts, _) = controller(FakeSynthesizer::new(), &sink);

    tts.speak("hello").await.unwrap();
    let handle = sink.last().unwrap();
    handle.emit(PlaybackEvent::Failed("unsupported format".into()));

    let state = tts.state();
    assert!(!state.is_playing);
    assert_eq!(state.error_kind, Some(VoiceErrorKind::DecodeFailure));
    assert_eq!(sink.released(), vec![handle.id]);

    tts.stop();
    assert_eq!(sink.released().len(), 1);
}

#[test]
fn test_one_second_wav_decodes() {
    let wav = samples_to_wav(&tone(16_000, 0.5), 16_000, 1).unwrap();
    let decoded = decode_clip(&wav, "audio/wav").unwrap();

    assert_eq!(decoded.sample_rate, 16_000);
    assert_eq!(decoded.samples.len(), 16_000);
}

#[test]
fn test_garbage_audio_is_decode_failure() {
    let err = decode_clip(&[1, 2, 3, 4, 5], "audio/mpeg").unwrap_err();
    assert_eq!(err.kind(), VoiceErrorKind::DecodeFailure);
}
