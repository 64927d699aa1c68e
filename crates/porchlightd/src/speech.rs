use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("empty speech command")]
    EmptyCommand,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Output channel for greetings.
pub trait Speaker: Send + Sync {
    fn speak(&self, text: &str, volume: f32) -> Result<(), SpeechError>;
}

/// Runs an external text-to-speech program with the text as its last
/// argument. The volume is exported as `PORCHLIGHT_GREETING_VOLUME`.
///
/// The program runs in the background; a tokio task waits on it so every
/// child is reaped. Must be called from within a tokio runtime.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    /// Split `command` on whitespace into program and leading arguments.
    pub fn parse(command: &str) -> Result<Self, SpeechError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(SpeechError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str, volume: f32) -> Result<(), SpeechError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .env("PORCHLIGHT_GREETING_VOLUME", format!("{:.2}", volume.clamp(0.0, 1.0)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(program = %program, %status, "speech command exited with failure"),
                Err(err) => tracing::warn!(program = %program, error = %err, "failed to wait on speech command"),
            }
        });
        Ok(())
    }
}

/// Fallback when no speech command is configured: greetings go to the log.
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn speak(&self, text: &str, volume: f32) -> Result<(), SpeechError> {
        tracing::info!(text, volume, "greeting (no speech command configured)");
        Ok(())
    }
}
