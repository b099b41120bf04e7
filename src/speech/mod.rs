//! Speech generation
//!
//! This module provides:
//! - Emotion tag extraction and prosody
//! - Text-to-speech through Piper
//! - Optional RVC voice conversion
//! - The queued pipeline that plays one utterance at a time

pub mod cancel;
pub mod conversion;
pub mod emotion;
pub mod pipeline;
pub mod synthesis;
pub(crate) mod worker;

// Re-export commonly used types
pub use cancel::StopSignal;
pub use conversion::{ConversionJob, RvcConverter, VoiceConverter};
pub use emotion::{extract_emotion, length_scale_for, Prosody};
pub use pipeline::{PipelineEvent, Utterance, VoicePipeline, VoicePipelineBuilder};
pub use synthesis::{PiperSynthesizer, SynthesisRequest, Synthesizer};
