//! Configuration layer that wires the pipeline to its external engines

pub mod config;

pub use config::{ConverterConfig, PipelineConfig};
