//! Local synthesis through the system speech command

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{SynthesisEngine, SynthesisEvent, SynthesisListener, SynthesisSettings};
use crate::{Error, Result, lock};

/// Words per minute at rate 1.0
const BASE_WPM: f32 = 175.0;

/// Which speech command was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// macOS `say`
    Say,
    /// `espeak-ng` or `espeak`
    Espeak,
}

/// Job-control signal for a speaking process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Stop,
    Cont,
}

impl Signal {
    const fn flag(self) -> &'static str {
        match self {
            Self::Stop => "-STOP",
            Self::Cont => "-CONT",
        }
    }
}

struct Utterance {
    cancel: CancellationToken,
    /// Signals for the task that owns the child
    control: mpsc::UnboundedSender<Signal>,
}

/// Speaks with `say`, `espeak-ng` or `espeak`, whichever is installed
pub struct CommandSynthesizer {
    program: PathBuf,
    flavor: Flavor,
    current: Mutex<Option<Utterance>>,
}

impl CommandSynthesizer {
    /// Locate a speech command on `PATH`
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable` if no speech command is installed
    pub fn detect() -> Result<Self> {
        let candidates = [
            ("say", Flavor::Say),
            ("espeak-ng", Flavor::Espeak),
            ("espeak", Flavor::Espeak),
        ];

        for (name, flavor) in candidates {
            if let Ok(program) = which::which(name) {
                tracing::debug!(program = %program.display(), "speech command found");
                return Ok(Self {
                    program,
                    flavor,
                    current: Mutex::new(None),
                });
            }
        }

        Err(Error::voice(
            crate::error::VoiceErrorKind::ServiceUnavailable,
            "no speech command found (install espeak-ng)",
        ))
    }

    fn args(&self, text: &str, settings: &SynthesisSettings) -> Vec<String> {
        command_args(self.flavor, text, settings)
    }

    /// Hand `signal` to the task owning the speaking process
    fn signal(&self, signal: Signal) -> Result<()> {
        if !cfg!(unix) {
            return Err(Error::Speech(
                "pausing speech is not supported on this platform".to_string(),
            ));
        }
        let current = lock(&self.current);
        let utterance = current
            .as_ref()
            .ok_or_else(|| Error::Speech("nothing is being spoken".to_string()))?;
        utterance
            .control
            .send(signal)
            .map_err(|_| Error::Speech("speech already finished".to_string()))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn command_args(flavor: Flavor, text: &str, settings: &SynthesisSettings) -> Vec<String> {
    let wpm = (BASE_WPM * settings.rate).round().max(1.0) as u32;
    let mut args = Vec::new();

    match flavor {
        Flavor::Say => {
            args.extend(["-r".to_string(), wpm.to_string()]);
            if let Some(voice) = &settings.voice {
                args.extend(["-v".to_string(), voice.clone()]);
            }
        }
        Flavor::Espeak => {
            // espeak pitch is 0-99 with 50 as default, amplitude 0-200 with 100
            let pitch = (settings.pitch * 50.0).round().clamp(0.0, 99.0) as u32;
            let amplitude = (settings.volume * 100.0).round().clamp(0.0, 200.0) as u32;
            args.extend([
                "-s".to_string(),
                wpm.to_string(),
                "-p".to_string(),
                pitch.to_string(),
                "-a".to_string(),
                amplitude.to_string(),
            ]);
            if let Some(voice) = &settings.voice {
                args.extend(["-v".to_string(), voice.clone()]);
            }
        }
    }

    args.push("--".to_string());
    args.push(text.to_string());
    args
}

/// Own the speaking process until it exits or is cancelled
async fn drive(
    mut child: Child,
    cancel: CancellationToken,
    mut control: mpsc::UnboundedReceiver<Signal>,
    listener: SynthesisListener,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return;
            }
            Some(signal) = control.recv() => {
                if let Err(e) = signal_child(&child, signal).await {
                    tracing::warn!(error = %e, ?signal, "could not signal speech command");
                }
            }
            status = child.wait() => {
                control.close();
                match status {
                    Ok(status) if status.success() => listener(SynthesisEvent::Ended),
                    Ok(status) => listener(SynthesisEvent::Error(format!("speech command exited with {status}"))),
                    Err(e) => listener(SynthesisEvent::Error(e.to_string())),
                }
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn signal_child(child: &Child, signal: Signal) -> Result<()> {
    // None once the child is reaped, so the pid cannot belong to another process
    let Some(pid) = child.id() else {
        return Ok(());
    };

    let status = tokio::process::Command::new("kill")
        .arg(signal.flag())
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Speech(format!("kill {} {pid} failed", signal.flag())))
    }
}

#[cfg(not(unix))]
async fn signal_child(_child: &Child, _signal: Signal) -> Result<()> {
    Err(Error::Speech(
        "pausing speech is not supported on this platform".to_string(),
    ))
}

impl SynthesisEngine for CommandSynthesizer {
    fn speak(
        &self,
        text: &str,
        settings: &SynthesisSettings,
        listener: SynthesisListener,
    ) -> Result<()> {
        self.cancel();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Speech("synthesis requires a tokio runtime".to_string()))?;

        let mut child = {
            let _guard = runtime.enter();
            tokio::process::Command::new(&self.program)
                .args(self.args(text, settings))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()?
        };

        let cancel = CancellationToken::new();
        let (control, control_rx) = mpsc::unbounded_channel();
        *lock(&self.current) = Some(Utterance {
            cancel: cancel.clone(),
            control,
        });

        listener(SynthesisEvent::Started);
        tracing::debug!(chars = text.chars().count(), "speaking locally");

        runtime.spawn(drive(child, cancel, control_rx, listener));
        Ok(())
    }

    fn cancel(&self) {
        if let Some(utterance) = lock(&self.current).take() {
            utterance.cancel.cancel();
        }
    }

    fn pause(&self) -> Result<()> {
        self.signal(Signal::Stop)
    }

    fn resume(&self) -> Result<()> {
        self.signal(Signal::Cont)
    }
}

impl Drop for CommandSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Stand-in when no speech command is installed; every request fails
pub struct UnavailableSynthesizer;

impl SynthesisEngine for UnavailableSynthesizer {
    fn speak(&self, _: &str, _: &SynthesisSettings, _: SynthesisListener) -> Result<()> {
        Err(unavailable())
    }

    fn cancel(&self) {}

    fn pause(&self) -> Result<()> {
        Err(unavailable())
    }

    fn resume(&self) -> Result<()> {
        Err(unavailable())
    }
}

fn unavailable() -> Error {
    Error::voice(
        crate::error::VoiceErrorKind::ServiceUnavailable,
        "local speech synthesis is not available",
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn espeak_args_scale_settings() {
        let settings = SynthesisSettings {
            rate: 2.0,
            pitch: 1.0,
            volume: 0.5,
            voice: Some("en-us".into()),
        };
        let args = command_args(Flavor::Espeak, "hello", &settings);

        assert_eq!(
            args,
            ["-s", "350", "-p", "50", "-a", "50", "-v", "en-us", "--", "hello"]
        );
    }

    #[test]
    fn say_args_use_words_per_minute() {
        let args = command_args(Flavor::Say, "hi", &SynthesisSettings::default());
        assert_eq!(args, ["-r", "175", "--", "hi"]);
    }

    #[cfg(unix)]
    fn synthesizer(program: &str) -> CommandSynthesizer {
        CommandSynthesizer {
            program: which::which(program).unwrap(),
            flavor: Flavor::Say,
            current: Mutex::new(None),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pause_after_exit_is_refused() {
        let synth = synthesizer("true");
        let (tx, mut events) = mpsc::unbounded_channel();
        let listener: SynthesisListener = Arc::new(move |event| {
            let _ = tx.send(event);
        });

        synth.speak("hi", &SynthesisSettings::default(), listener).unwrap();
        assert!(matches!(events.recv().await, Some(SynthesisEvent::Started)));
        assert!(matches!(events.recv().await, Some(SynthesisEvent::Ended)));

        // The child is reaped; its pid must not be signalled
        assert!(synth.pause().is_err());

        synth.cancel();
        assert!(synth.resume().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signals_go_to_the_live_child() {
        let child = tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let (control, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (tx, mut events) = mpsc::unbounded_channel();
        let listener: SynthesisListener = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let task = tokio::spawn(drive(child, cancel.clone(), control_rx, listener));

        control.send(Signal::Stop).unwrap();
        control.send(Signal::Cont).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        // Cancelled speech reports nothing
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn text_cannot_become_a_flag() {
        let args = command_args(Flavor::Espeak, "-v evil", &SynthesisSettings::default());
        assert_eq!(args.last().map(String::as_str), Some("-v evil"));
        assert_eq!(args[args.len() - 2], "--");
    }
}
