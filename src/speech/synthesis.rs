//! Text-to-speech through the Piper command-line engine
//!
//! Piper reads text on stdin and writes a WAV file. The exit status is not
//! trusted; a synthesis succeeded if the output file exists afterwards.

use crate::{Result, VoiceError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Executable name looked up on `PATH`
#[cfg(windows)]
pub const PIPER_EXECUTABLE: &str = "piper.exe";
#[cfg(not(windows))]
pub const PIPER_EXECUTABLE: &str = "piper";

/// Text used to warm the engine up
const WARMUP_TEXT: &str = ".";

/// One synthesis job
#[derive(Clone, Debug)]
pub struct SynthesisRequest<'a> {
    /// Cleaned text to speak
    pub text: &'a str,

    /// Length scale (1.0 = normal, <1.0 = faster, >1.0 = slower)
    pub length_scale: f32,

    /// Voice model file
    pub model_path: &'a Path,

    /// Speaker index for multi-speaker models
    pub speaker_id: u32,

    /// Where the WAV file should be written
    pub output_path: &'a Path,
}

/// Anything that can turn text into a WAV file
pub trait Synthesizer: Send + Sync {
    /// Write speech for `request.text` to `request.output_path`
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<()>;

    /// Prime the engine so the first real utterance is not delayed
    fn warmup(&self, model_path: &Path, scratch_path: &Path) -> Result<()> {
        let request = SynthesisRequest {
            text: WARMUP_TEXT,
            length_scale: 1.0,
            model_path,
            speaker_id: 0,
            output_path: scratch_path,
        };
        self.synthesize(&request)
    }
}

/// Piper invoked as a subprocess per utterance
#[derive(Clone, Debug)]
pub struct PiperSynthesizer {
    executable: PathBuf,
}

impl PiperSynthesizer {
    /// Use a specific Piper executable
    pub fn new(executable: impl Into<PathBuf>) -> Result<Self> {
        let executable = executable.into();
        if !executable.is_file() {
            return Err(VoiceError::EngineNotFound(format!(
                "{} does not exist",
                executable.display()
            )));
        }

        info!("Using Piper at {}", executable.display());
        Ok(Self { executable })
    }

    /// Find Piper from an explicit path, or on `PATH`
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) if path.is_file() => Self::new(path),
            Some(path) => {
                // A bare command name is resolved through PATH
                if path.components().count() == 1 {
                    if let Ok(found) = which::which(path) {
                        return Self::new(found);
                    }
                }
                Err(VoiceError::EngineNotFound(format!(
                    "{} not found",
                    path.display()
                )))
            }
            None => {
                let found = which::which(PIPER_EXECUTABLE).map_err(|e| {
                    VoiceError::EngineNotFound(format!("{} not on PATH: {}", PIPER_EXECUTABLE, e))
                })?;
                Self::new(found)
            }
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, request: &SynthesisRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--model")
            .arg(request.model_path)
            .arg("--output_file")
            .arg(request.output_path)
            .arg("--length_scale")
            .arg(format!("{:.4}", request.length_scale));

        if request.speaker_id > 0 {
            cmd.arg("--speaker").arg(request.speaker_id.to_string());
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd
    }
}

impl Synthesizer for PiperSynthesizer {
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<()> {
        // A file left in a reused slot must not be mistaken for fresh output
        remove_stale(request.output_path);

        let started = Instant::now();
        let mut child = self.command(request).spawn().map_err(|e| {
            VoiceError::SynthesisError(format!(
                "Failed to spawn {}: {}",
                self.executable.display(),
                e
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.text.as_bytes()) {
                warn!("Failed to write text to Piper: {}", e);
            }
            // Dropping stdin closes it so Piper starts synthesizing
        }

        let output = child
            .wait_with_output()
            .map_err(|e| VoiceError::SynthesisError(format!("Piper did not finish: {}", e)))?;

        if request.output_path.exists() {
            if !output.status.success() {
                debug!(
                    "Piper exited with {} but produced {}",
                    output.status,
                    request.output_path.display()
                );
            }
            debug!(
                "Synthesized {} in {}ms",
                request.output_path.display(),
                started.elapsed().as_millis()
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(VoiceError::SynthesisError(format!(
            "Piper exited with {} and wrote no audio: {}",
            output.status,
            last_line(&stderr)
        )))
    }
}

pub(crate) fn remove_stale(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            debug!("Could not remove stale {}: {}", path.display(), e);
        }
    }
}

pub(crate) fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
}
