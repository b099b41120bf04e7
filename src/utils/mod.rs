pub mod channels;
pub mod perf;

pub use channels::PipelineChannels;
pub use perf::{PipelineStats, TimingTracker};
