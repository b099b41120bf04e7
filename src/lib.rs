pub mod audio;
pub mod integration;
pub mod profiles;
pub mod speech;
pub mod utils;

pub use integration::{ConverterConfig, PipelineConfig};
pub use profiles::{CharacterDatabase, ProfileStore, ResolvedVoice, VoiceProfile};
pub use speech::{PipelineEvent, Utterance, VoicePipeline, VoicePipelineBuilder};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VoiceError {
    #[error("Synthesis engine not found: {0}")]
    EngineNotFound(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Voice conversion error: {0}")]
    ConversionError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Profile error: {0}")]
    ProfileError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for VoiceError {
    fn from(e: std::io::Error) -> Self {
        VoiceError::IOError(e.to_string())
    }
}

impl VoiceError {
    /// Check if this error only affects a single utterance
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The pipeline cannot be built without a synthesis engine
            VoiceError::EngineNotFound(_) => false,
            // Per-utterance failures; the worker moves on to the next item
            VoiceError::SynthesisError(_) => true,
            VoiceError::ConversionError(_) => true,
            VoiceError::PlaybackError(_) => true,
            VoiceError::AudioDeviceError(_) => false,
            VoiceError::IOError(_) => false,
            VoiceError::ConfigError(_) => false,
            VoiceError::ProfileError(_) => true,
            VoiceError::ChannelError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::EngineNotFound(_) => {
                "Speech engine not found. Please install Piper and check the path.".to_string()
            }
            VoiceError::SynthesisError(_) => {
                "Speech synthesis failed. The sentence was skipped.".to_string()
            }
            VoiceError::ConversionError(_) => {
                "Voice conversion failed. Using the unconverted voice.".to_string()
            }
            VoiceError::PlaybackError(_) => {
                "Audio playback failed. The sentence was skipped.".to_string()
            }
            VoiceError::AudioDeviceError(_) => {
                "Audio device error. Please check your speakers.".to_string()
            }
            VoiceError::IOError(_) => "File system error occurred.".to_string(),
            VoiceError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            VoiceError::ProfileError(_) => {
                "Voice profile error. Falling back to the default voice.".to_string()
            }
            VoiceError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
