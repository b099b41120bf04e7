//! Character database lookup
//!
//! The pipeline only reads from the store. Unknown characters resolve to the
//! default entry so `set_voice` never fails.

use super::{ConversionSettings, VoiceProfile};
use crate::{Result, VoiceError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Character used when a lookup misses
pub const DEFAULT_CHARACTER: &str = "tachyon";

/// Conversion settings with model files resolved to paths
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConversion {
    pub model_path: PathBuf,
    pub index_path: Option<PathBuf>,
    pub pitch_shift: i32,
}

/// A profile ready for synthesis
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedVoice {
    /// Character id the profile was found under
    pub id: String,

    pub profile: VoiceProfile,

    /// Absolute path of the Piper model
    pub model_path: PathBuf,

    /// Present only when the profile has conversion enabled
    pub conversion: Option<ResolvedConversion>,
}

impl ResolvedVoice {
    pub fn display_name(&self) -> &str {
        &self.profile.display_name
    }
}

/// Source of voice profiles
pub trait ProfileStore: Send + Sync {
    /// Resolve a character, falling back to the default entry for unknown ids
    fn get_character(&self, id: &str) -> ResolvedVoice;

    /// Id of the fallback character
    fn default_character(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct DatabaseFile {
    #[serde(default)]
    default_character: Option<String>,
    characters: HashMap<String, VoiceProfile>,
}

/// In-memory character table with model directories
#[derive(Clone, Debug)]
pub struct CharacterDatabase {
    characters: HashMap<String, VoiceProfile>,
    default_id: String,
    models_dir: PathBuf,
    conversion_dir: PathBuf,
}

impl CharacterDatabase {
    /// Create a database from a set of profiles
    ///
    /// Fails if `default_id` is not among the profiles.
    pub fn new(
        characters: HashMap<String, VoiceProfile>,
        default_id: impl Into<String>,
        models_dir: impl Into<PathBuf>,
        conversion_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let characters: HashMap<String, VoiceProfile> = characters
            .into_iter()
            .map(|(id, mut profile)| {
                // Tags are matched lowercased; tables from files may not be
                profile.emotions = profile
                    .emotions
                    .into_iter()
                    .map(|(tag, modifier)| (tag.to_lowercase(), modifier))
                    .collect();
                (id.to_lowercase(), profile)
            })
            .collect();
        let default_id = default_id.into().to_lowercase();

        if !characters.contains_key(&default_id) {
            return Err(VoiceError::ProfileError(format!(
                "Default character '{}' is not defined",
                default_id
            )));
        }

        Ok(Self {
            characters,
            default_id,
            models_dir: models_dir.into(),
            conversion_dir: conversion_dir.into(),
        })
    }

    /// The three characters shipped with the companion
    pub fn builtin(models_dir: impl Into<PathBuf>, conversion_dir: impl Into<PathBuf>) -> Self {
        let characters = builtin_characters();
        Self {
            characters,
            default_id: DEFAULT_CHARACTER.to_string(),
            models_dir: models_dir.into(),
            conversion_dir: conversion_dir.into(),
        }
    }

    /// Parse a database from TOML text
    pub fn from_toml_str(
        content: &str,
        models_dir: impl Into<PathBuf>,
        conversion_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let file: DatabaseFile = toml::from_str(content)
            .map_err(|e| VoiceError::ProfileError(format!("Invalid character database: {}", e)))?;

        let default_id = file
            .default_character
            .unwrap_or_else(|| DEFAULT_CHARACTER.to_string());

        Self::new(file.characters, default_id, models_dir, conversion_dir)
    }

    /// Load a database from a TOML file
    pub fn load<P: AsRef<Path>>(
        path: P,
        models_dir: impl Into<PathBuf>,
        conversion_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            VoiceError::IOError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let database = Self::from_toml_str(&content, models_dir, conversion_dir)?;
        info!(
            "Loaded {} characters from {}",
            database.characters.len(),
            path.display()
        );
        Ok(database)
    }

    /// Character ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.characters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.characters.contains_key(&id.to_lowercase())
    }

    fn resolve(&self, id: &str, profile: &VoiceProfile) -> ResolvedVoice {
        let model_path = self.models_dir.join(&profile.model_reference);
        if !model_path.exists() {
            warn!(
                "Model for '{}' missing at {}; download {} into {}",
                id,
                model_path.display(),
                profile.model_reference,
                self.models_dir.display()
            );
        }

        let conversion = profile
            .conversion
            .as_ref()
            .filter(|c| c.enabled)
            .map(|c| ResolvedConversion {
                model_path: self.conversion_dir.join(&c.model_reference),
                index_path: c
                    .index_reference
                    .as_ref()
                    .filter(|index| !index.is_empty())
                    .map(|index| self.conversion_dir.join(index)),
                pitch_shift: c.pitch_shift,
            });

        ResolvedVoice {
            id: id.to_string(),
            profile: profile.clone(),
            model_path,
            conversion,
        }
    }
}

impl ProfileStore for CharacterDatabase {
    fn get_character(&self, id: &str) -> ResolvedVoice {
        let requested = id.trim().to_lowercase();

        let (id, profile) = match self.characters.get(&requested) {
            Some(profile) => (requested, profile),
            None => {
                warn!(
                    "Character '{}' not found, defaulting to '{}'",
                    requested, self.default_id
                );
                // `new` guarantees the default exists
                let profile = &self.characters[&self.default_id];
                (self.default_id.clone(), profile)
            }
        };

        self.resolve(&id, profile)
    }

    fn default_character(&self) -> &str {
        &self.default_id
    }
}

fn builtin_characters() -> HashMap<String, VoiceProfile> {
    let tachyon = VoiceProfile::new("Agnes Tachyon", "en_GB-jenny_dioco-medium.onnx")
        .with_conversion(ConversionSettings {
            enabled: false,
            model_reference: "Tachyon.pth".into(),
            index_reference: Some("Tachyon.index".into()),
            pitch_shift: 0,
        })
        .with_emotion("default", 0.95, 0)
        .with_emotion("friendly", 1.00, 1)
        .with_emotion("curious", 1.00, 2)
        .with_emotion("concerned", 0.90, -1)
        .with_emotion("explaining", 0.95, 0)
        .with_emotion("manic", 1.15, 4)
        .with_emotion("eureka", 1.10, 3)
        .with_emotion("panic", 1.15, 2)
        .with_emotion("excited", 1.05, 1)
        .with_emotion("happy", 1.00, 1)
        .with_emotion("laugh", 1.05, 2)
        .with_emotion("surprised", 1.10, 3)
        .with_emotion("lazy", 0.80, -3)
        .with_emotion("tired", 0.75, -2)
        .with_emotion("bored", 0.80, -2)
        .with_emotion("sigh", 0.70, -4)
        .with_emotion("whisper", 0.85, -1)
        .with_emotion("smug", 0.90, 0)
        .with_emotion("mocking", 0.95, 1)
        .with_emotion("serious", 0.85, -1)
        .with_emotion("cold", 0.90, -1)
        .with_emotion("sarcastic", 0.85, -2)
        .with_emotion("flustered", 1.05, 2);

    let jalter = VoiceProfile::new("Jeanne Alter", "en_US-libritts-high.onnx")
        .with_speaker(19)
        .with_conversion(ConversionSettings {
            enabled: false,
            model_reference: "jalter.pth".into(),
            index_reference: Some("jalter.index".into()),
            pitch_shift: -2,
        })
        .with_emotion("default", 0.90, -2)
        .with_emotion("friendly", 0.95, -1)
        .with_emotion("curious", 0.95, -1)
        .with_emotion("bored", 0.80, -2)
        .with_emotion("smug", 0.85, -1)
        .with_emotion("angry", 1.00, -1)
        .with_emotion("rage", 1.10, 1)
        .with_emotion("command", 0.85, -4)
        .with_emotion("disgust", 0.75, -3)
        .with_emotion("annoyed", 0.90, -2)
        .with_emotion("tsundere", 1.05, 3)
        .with_emotion("flustered", 1.00, 1)
        .with_emotion("shy", 0.95, 0)
        .with_emotion("sad", 0.75, -1)
        .with_emotion("gentle", 0.90, -1)
        .with_emotion("surprised", 1.05, 1);

    let miku = VoiceProfile::new("Hatsune Miku", "en_US-lessac-medium.onnx")
        .with_conversion(ConversionSettings {
            enabled: false,
            model_reference: "miku.pth".into(),
            index_reference: Some("miku.index".into()),
            pitch_shift: 4,
        })
        .with_emotion("default", 1.00, 4)
        .with_emotion("friendly", 1.05, 5)
        .with_emotion("curious", 1.05, 5)
        .with_emotion("happy", 1.05, 5)
        .with_emotion("excited", 1.10, 6)
        .with_emotion("sing", 0.95, 4)
        .with_emotion("shout", 1.15, 5)
        .with_emotion("cheer", 1.10, 6)
        .with_emotion("cute", 1.05, 6)
        .with_emotion("system", 0.90, 2)
        .with_emotion("robot", 0.85, 0)
        .with_emotion("confused", 0.90, 3)
        .with_emotion("sad", 0.80, 2)
        .with_emotion("scared", 1.10, 5)
        .with_emotion("gentle", 0.90, 3);

    HashMap::from([
        ("tachyon".to_string(), tachyon),
        ("jalter".to_string(), jalter),
        ("miku".to_string(), miku),
    ])
}
