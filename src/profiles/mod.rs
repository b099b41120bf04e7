//! Voice profiles and the character database
//!
//! A profile bundles the Piper model, speaker, optional RVC settings and the
//! emotion table used to pick prosody for tagged text.

pub mod store;

pub use store::{CharacterDatabase, ProfileStore, ResolvedConversion, ResolvedVoice};

use serde::Deserialize;
use std::collections::HashMap;

/// Key of the emotion entry used when no tag matches
pub const DEFAULT_EMOTION: &str = "default";

/// Speed and pitch modifier selected by an emotion tag
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct EmotionModifier {
    /// Speech rate multiplier (1.0 = normal)
    #[serde(default = "default_speed")]
    pub speed: f32,

    /// Semitone shift applied by voice conversion
    #[serde(default)]
    pub pitch_shift: i32,
}

fn default_speed() -> f32 {
    1.0
}

impl Default for EmotionModifier {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch_shift: 0,
        }
    }
}

impl EmotionModifier {
    pub fn new(speed: f32, pitch_shift: i32) -> Self {
        Self { speed, pitch_shift }
    }
}

/// RVC settings declared by a profile
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ConversionSettings {
    /// Whether conversion should run for this voice
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// RVC model file name, relative to the conversion models directory
    pub model_reference: String,

    /// Optional feature index file name
    #[serde(default)]
    pub index_reference: Option<String>,

    /// Base pitch shift in semitones
    #[serde(default)]
    pub pitch_shift: i32,
}

fn default_enabled() -> bool {
    true
}

/// Named voice configuration for one character
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VoiceProfile {
    /// Name shown to the user
    pub display_name: String,

    /// Piper model file name, relative to the models directory
    pub model_reference: String,

    /// Speaker index for multi-speaker models
    #[serde(default)]
    pub speaker_id: u32,

    /// Optional voice conversion stage
    #[serde(default)]
    pub conversion: Option<ConversionSettings>,

    /// Emotion tag to modifier table
    #[serde(default)]
    pub emotions: HashMap<String, EmotionModifier>,
}

impl VoiceProfile {
    pub fn new(display_name: impl Into<String>, model_reference: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            model_reference: model_reference.into(),
            speaker_id: 0,
            conversion: None,
            emotions: HashMap::new(),
        }
    }

    /// Set the speaker ID for multi-speaker models
    pub fn with_speaker(mut self, speaker_id: u32) -> Self {
        self.speaker_id = speaker_id;
        self
    }

    /// Add an emotion entry
    pub fn with_emotion(mut self, tag: impl Into<String>, speed: f32, pitch_shift: i32) -> Self {
        self.emotions
            .insert(tag.into().to_lowercase(), EmotionModifier::new(speed, pitch_shift));
        self
    }

    /// Attach voice conversion settings
    pub fn with_conversion(mut self, conversion: ConversionSettings) -> Self {
        self.conversion = Some(conversion);
        self
    }

    /// Look up an emotion by tag (case-insensitive)
    pub fn emotion(&self, tag: &str) -> Option<EmotionModifier> {
        self.emotions.get(&tag.to_lowercase()).copied()
    }

    /// The `default` entry, or neutral prosody when the table has none
    pub fn default_emotion(&self) -> EmotionModifier {
        self.emotion(DEFAULT_EMOTION).unwrap_or_default()
    }

    /// Whether this profile asks for voice conversion
    pub fn wants_conversion(&self) -> bool {
        self.conversion.as_ref().map(|c| c.enabled).unwrap_or(false)
    }
}
