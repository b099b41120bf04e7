//! Optional RVC voice conversion
//!
//! Conversion re-timbres a synthesized file into a character's voice. It is
//! slow on CPU (several seconds per sentence) and any failure falls back to the
//! unconverted audio.

use crate::integration::ConverterConfig;
use crate::speech::synthesis::{last_line, remove_stale};
use crate::{Result, VoiceError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

/// Suffix appended to the stem of converted files
pub const CONVERTED_SUFFIX: &str = "_rvc";

/// One conversion job
#[derive(Clone, Debug)]
pub struct ConversionJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub model_path: &'a Path,
    pub index_path: Option<&'a Path>,
    /// Semitones to shift the pitch by
    pub pitch_shift: i32,
}

/// Anything that can convert a WAV file to another voice
pub trait VoiceConverter: Send + Sync {
    /// Write the converted audio to `job.output`
    fn convert(&self, job: &ConversionJob<'_>) -> Result<()>;
}

/// Path of the converted artifact for a raw slot file
///
/// `cache/sentence_3.wav` becomes `cache/sentence_3_rvc.wav`.
pub fn converted_path(raw: &Path) -> PathBuf {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = raw
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wav".to_string());

    raw.with_file_name(format!("{}{}.{}", stem, CONVERTED_SUFFIX, extension))
}

/// rvc-python command-line interface run as a subprocess
#[derive(Clone, Debug)]
pub struct RvcConverter {
    program: PathBuf,
    base_args: Vec<String>,
    device: String,
    f0_method: String,
    version: String,
}

impl RvcConverter {
    /// Build a converter if its program can be found
    pub fn from_config(config: &ConverterConfig) -> Result<Self> {
        let program = which::which(&config.program).map_err(|e| {
            VoiceError::ConversionError(format!(
                "Conversion engine '{}' not available: {}",
                config.program, e
            ))
        })?;

        info!(
            "Voice conversion enabled via {} ({} / {} on {})",
            program.display(),
            config.f0_method,
            config.version,
            config.device
        );

        Ok(Self {
            program,
            base_args: config.args.clone(),
            device: config.device.clone(),
            f0_method: config.f0_method.clone(),
            version: config.version.clone(),
        })
    }

    fn command(&self, job: &ConversionJob<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("-i")
            .arg(job.input)
            .arg("-o")
            .arg(job.output)
            .arg("-mp")
            .arg(job.model_path);

        if let Some(index) = job.index_path {
            cmd.arg("-ip").arg(index);
        }

        cmd.arg("-pi")
            .arg(job.pitch_shift.to_string())
            .arg("-me")
            .arg(&self.f0_method)
            .arg("-v")
            .arg(&self.version)
            .arg("-de")
            .arg(&self.device)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd
    }
}

impl VoiceConverter for RvcConverter {
    fn convert(&self, job: &ConversionJob<'_>) -> Result<()> {
        if !job.model_path.exists() {
            return Err(VoiceError::ConversionError(format!(
                "RVC model missing at {}",
                job.model_path.display()
            )));
        }

        remove_stale(job.output);

        let started = Instant::now();
        let output = self.command(job).output().map_err(|e| {
            VoiceError::ConversionError(format!(
                "Failed to run {}: {}",
                self.program.display(),
                e
            ))
        })?;

        if job.output.exists() {
            debug!(
                "Converted {} in {}ms",
                job.output.display(),
                started.elapsed().as_millis()
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(VoiceError::ConversionError(format!(
            "RVC exited with {} and wrote no audio: {}",
            output.status,
            last_line(&stderr)
        )))
    }
}
