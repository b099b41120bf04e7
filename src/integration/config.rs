//! Configuration for the voice pipeline
//!
//! Can be built in code with the builder methods or loaded from a TOML file.
//! Every field has a default, so a config file only lists what it changes.

use crate::audio::cache::DEFAULT_CACHE_SLOTS;
use crate::audio::playback::DEFAULT_TICK_HZ;
use crate::profiles::store::DEFAULT_CHARACTER;
use crate::{Result, VoiceError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to run the RVC command-line tool
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConverterConfig {
    /// Program to run, resolved through PATH
    pub program: String,

    /// Arguments placed before the per-job flags
    pub args: Vec<String>,

    /// Inference device, e.g. `cpu:0` or `cuda:0`
    pub device: String,

    /// Pitch extraction method
    pub f0_method: String,

    /// RVC model version
    pub version: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["-m".into(), "rvc_python".into(), "cli".into()],
            device: "cpu:0".to_string(),
            f0_method: "rmvpe".to_string(),
            version: "v2".to_string(),
        }
    }
}

/// Configuration for the complete pipeline
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Piper executable; looked up on PATH when unset
    pub piper_path: Option<PathBuf>,

    /// Directory holding Piper `.onnx` voices
    pub models_dir: PathBuf,

    /// Directory holding RVC `.pth` / `.index` files
    pub conversion_models_dir: PathBuf,

    /// Optional TOML character database replacing the built-in one
    pub characters_file: Option<PathBuf>,

    /// Directory for rotating audio files
    pub cache_dir: PathBuf,

    /// Number of rotating cache slots
    pub cache_slots: usize,

    /// Playback progress ticks per second
    pub tick_rate_hz: u32,

    /// Silence between consecutive utterances
    pub pause_ms: u64,

    /// Character active at startup
    pub default_character: String,

    /// Synthesize a throwaway sentence when the worker starts
    pub warmup: bool,

    /// Voice conversion engine; conversion is disabled when unset
    pub converter: Option<ConverterConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|dir| dir.join("marie-voice"))
            .unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = dirs::cache_dir()
            .map(|dir| dir.join("marie-voice"))
            .unwrap_or_else(|| PathBuf::from("cache"));

        Self {
            piper_path: None,
            models_dir: data_dir.join("piper"),
            conversion_models_dir: data_dir.join("rvc_models"),
            characters_file: None,
            cache_dir,
            cache_slots: DEFAULT_CACHE_SLOTS,
            tick_rate_hz: DEFAULT_TICK_HZ,
            pause_ms: 50,
            default_character: DEFAULT_CHARACTER.to_string(),
            warmup: true,
            converter: None,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            VoiceError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| VoiceError::ConfigError(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the Piper executable
    pub fn with_piper(mut self, path: impl Into<PathBuf>) -> Self {
        self.piper_path = Some(path.into());
        self
    }

    /// Set the Piper models directory
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the startup character
    pub fn with_character(mut self, id: impl Into<String>) -> Self {
        self.default_character = id.into();
        self
    }

    /// Enable voice conversion
    pub fn with_converter(mut self, converter: ConverterConfig) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Skip the startup warm-up synthesis
    pub fn without_warmup(mut self) -> Self {
        self.warmup = false;
        self
    }

    /// Interval between playback ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_slots == 0 {
            return Err(VoiceError::ConfigError(
                "cache_slots must be at least 1".into(),
            ));
        }
        if self.tick_rate_hz == 0 {
            return Err(VoiceError::ConfigError(
                "tick_rate_hz must be at least 1".into(),
            ));
        }
        if self.default_character.trim().is_empty() {
            return Err(VoiceError::ConfigError(
                "default_character must not be empty".into(),
            ));
        }
        Ok(())
    }
}
