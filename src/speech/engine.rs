//! Text-to-speech engines

use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Blocking text-to-speech capability
pub trait SpeechEngine: Send {
    /// Engine identifier
    fn name(&self) -> &'static str;

    /// Render one utterance, returning once it has finished
    fn speak(&mut self, text: &str) -> Result<()>;
}

/// Speaks through an external TTS program (`espeak`, `say`, `spd-say`, ...)
/// that takes the utterance as its final argument
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl SpeechEngine for CommandSpeech {
    fn name(&self) -> &'static str {
        "command"
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        // Line breaks read as sentence pauses
        let utterance = text.replace('\n', ". ");
        debug!("Running {} for {} chars", self.program, utterance.len());

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&utterance)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("Failed to run speech command '{}'", self.program))?;

        if !status.success() {
            anyhow::bail!("Speech command '{}' exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Writes utterances to the log instead of an audio device
#[derive(Debug, Clone, Default)]
pub struct LogSpeech;

impl SpeechEngine for LogSpeech {
    fn name(&self) -> &'static str {
        "log"
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        info!("Announcement: {}", text.replace('\n', " | "));
        Ok(())
    }
}
