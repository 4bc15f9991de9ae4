use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cadence_voice::audio::{AudioPipeline, CpalMicrophone, Microphone};
use cadence_voice::config::config_file_path;
use cadence_voice::session::{
    Assistant, CaptureSources, HttpAssistant, HttpSummarizer, Navigator, Screen, SessionParts,
    Summarizer,
};
use cadence_voice::speech::{
    CommandSynthesizer, SpeechBridge, SynthesisEngine, TranscribingRecognizer, Transcriber,
    UnavailableSynthesizer, WhisperTranscriber,
};
use cadence_voice::transport::RealtimeClient;
use cadence_voice::tts::{AudioSink, CpalSink, HttpSynthesizer, TtsController};
use cadence_voice::{Config, VoiceSession};

/// Cadence - voice interaction for the Cadence finance assistant
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a voice session in the configured mode (default)
    Run,
    /// Submit a typed transcript and speak the reply
    Ask {
        /// What to ask the assistant
        text: String,
    },
    /// Show the microphone level and voice activity
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak text through the remote TTS service
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the Cadence voice.")]
        text: String,
    },
    /// Connect to the realtime voice server and report link quality
    TestRealtime {
        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence_voice=info",
        1 => "info,cadence_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_session(config).await,
        Command::Ask { text } => ask(config, &text).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestTts { text } => test_tts(config, &text).await,
        Command::TestRealtime { duration } => test_realtime(config, duration).await,
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

/// Prints navigation requests; the CLI has no screens of its own
struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, screen: Screen) {
        println!("-> {screen}");
    }
}

fn build_session(mut config: Config) -> anyhow::Result<VoiceSession> {
    let microphone: Arc<dyn Microphone> = Arc::new(CpalMicrophone::new());
    let sink: Arc<dyn AudioSink> = Arc::new(CpalSink::new());

    let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(
        config.speech.stt_url.clone(),
        config.speech.stt_api_key.take(),
        config.speech.stt_model.clone(),
    )?);

    let synthesizer: Arc<dyn SynthesisEngine> = match CommandSynthesizer::detect() {
        Ok(synth) => Arc::new(synth),
        Err(e) => {
            tracing::warn!(error = %e, "local speech synthesis disabled");
            Arc::new(UnavailableSynthesizer)
        }
    };

    // The CLI session keeps listening across turns
    config.speech.recognition.continuous = true;
    let recognizer = Arc::new(TranscribingRecognizer::new(
        Arc::clone(&microphone),
        Arc::clone(&transcriber),
        config.audio,
        config.vad,
    ));
    let speech = SpeechBridge::new(
        recognizer,
        synthesizer,
        config.speech.recognition.clone(),
        config.speech.synthesis.clone(),
    );

    let tts = match &config.tts.url {
        Some(url) => {
            let synth = HttpSynthesizer::new(
                url.clone(),
                config.tts.api_key.take(),
                config.tts.request_timeout(),
            )?;
            Some(TtsController::new(
                Arc::new(synth),
                Arc::clone(&sink),
                config.tts.settings.clone(),
            ))
        }
        None => None,
    };

    let assistant: Arc<dyn Assistant> = Arc::new(HttpAssistant::new(config.assistant.url.clone())?);
    let summarizer = match &config.assistant.summarize_url {
        Some(url) => Some(Arc::new(HttpSummarizer::new(url.clone())?) as Arc<dyn Summarizer>),
        None => None,
    };

    let sources = CaptureSources {
        microphone,
        pipeline: config.audio,
        vad: config.vad,
        transport: config.transport.clone(),
        transcriber,
        language: config.speech.recognition.language.clone(),
    };
    let parts = SessionParts {
        speech,
        tts,
        sink,
        assistant,
        summarizer,
        navigator: Some(Arc::new(PrintNavigator)),
    };

    Ok(VoiceSession::new(config.session, sources, parts))
}

async fn run_session(config: Config) -> anyhow::Result<()> {
    let session = Arc::new(build_session(config)?);
    let shutdown = CancellationToken::new();

    let driver = tokio::spawn(Arc::clone(&session).run(shutdown.clone()));
    session.start_listening().await?;
    tracing::info!(mode = session.mode().as_str(), "cadence voice ready - start speaking");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last = session.state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let state = session.state();
                if state != last {
                    if let Some(error) = &state.error {
                        println!("! {error}");
                    }
                    tracing::debug!(?state, "voice state");
                    last = state;
                }
            }
        }
    }

    tracing::info!("shutting down");
    shutdown.cancel();
    session.shutdown().await;
    let _ = driver.await;
    Ok(())
}

async fn ask(config: Config, text: &str) -> anyhow::Result<()> {
    let session = build_session(config)?;
    let outcome = session.handle_transcript(text).await?;

    println!("{}", outcome.reply.text);
    if let Some(spoken) = &outcome.spoken
        && spoken != &outcome.reply.text
    {
        tracing::debug!(spoken = %spoken, "spoken form");
    }

    if outcome.spoken.is_some() {
        wait_until_quiet(&session).await;
    }
    Ok(())
}

/// Wait for playback to start, then for it to finish
async fn wait_until_quiet(session: &VoiceSession) {
    let poll = Duration::from_millis(100);

    let start_deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !session.state().is_speaking {
        if tokio::time::Instant::now() >= start_deadline {
            return;
        }
        tokio::time::sleep(poll).await;
    }

    let end_deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    while session.state().is_speaking && tokio::time::Instant::now() < end_deadline {
        tokio::time::sleep(poll).await;
    }
}

async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut pipeline = AudioPipeline::new(Arc::new(CpalMicrophone::new()), config.audio, config.vad);
    pipeline.start(config.audio.settings)?;

    let ticks = duration * 4;
    for i in 0..ticks {
        tokio::time::sleep(Duration::from_millis(250)).await;

        let frame = pipeline.latest();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (frame.level / 2.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        #[allow(clippy::cast_precision_loss)]
        let seconds = (i + 1) as f32 / 4.0;
        println!(
            "[{seconds:5.2}s] level: {:5.1} | voice: {} | [{meter}]",
            frame.level,
            if frame.voice_detected { "yes" } else { "no " },
        );
    }

    let stats = pipeline.stats();
    pipeline.stop();

    println!("\n---");
    println!(
        "frames: {} | speech frames: {} | peak level: {:.1} | average level: {:.1}",
        stats.frames_processed, stats.speech_frames, stats.peak_level, stats.average_level
    );
    println!("If the meter moved, your mic is working!");
    Ok(())
}

async fn test_tts(config: Config, text: &str) -> anyhow::Result<()> {
    let timeout = config.tts.request_timeout();
    let Some(url) = config.tts.url else {
        anyhow::bail!("no TTS url configured (set CADENCE_TTS_URL)");
    };
    println!("Testing TTS with text: \"{text}\"\n");

    let synth = HttpSynthesizer::new(url, config.tts.api_key, timeout)?;
    let controller = TtsController::new(
        Arc::new(synth),
        Arc::new(CpalSink::new()),
        config.tts.settings,
    );
    let mut state_rx = controller.subscribe();

    println!("Synthesizing speech...");
    controller.speak(text).await?;

    // Playing starts asynchronously once the output stream is up
    let started = tokio::time::timeout(
        Duration::from_secs(5),
        state_rx.wait_for(|s| s.is_playing || s.error.is_some()),
    )
    .await
    .is_ok();
    if started {
        state_rx
            .wait_for(|s| !s.is_loading && !s.is_playing && !s.is_paused)
            .await?;
    }

    let state = controller.state();
    if let Some(error) = state.error {
        anyhow::bail!("playback failed: {error}");
    }
    println!("Done ({} characters used)", state.characters_used);
    Ok(())
}

async fn test_realtime(config: Config, duration: u64) -> anyhow::Result<()> {
    println!("Connecting to {}...", config.transport.url);

    let client = RealtimeClient::new(config.transport, Arc::new(CpalMicrophone::new()));
    client.connect().await?;
    println!("Connected. Measuring for {duration} seconds...\n");

    for _ in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = client.status();
        let latency = status
            .latency
            .map_or_else(|| "-".to_string(), |l| format!("{}ms", l.as_millis()));
        println!(
            "state: {:?} | latency: {latency} | quality: {} | lost: {}/{}",
            status.state,
            status.quality.as_str(),
            status.metrics.packets_lost,
            status.metrics.total_packets,
        );
    }

    client.disconnect().await;
    Ok(())
}

fn print_config(config: &Config) {
    match config_file_path() {
        Some(path) if path.exists() => println!("# config file: {}", path.display()),
        Some(path) => println!("# config file: {} (not found)", path.display()),
        None => println!("# config file: unavailable"),
    }
    println!("{config:#?}");
}
