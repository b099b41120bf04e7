pub mod cache;
pub mod playback;
pub mod wav;

pub use cache::{AudioCache, CacheSlot, DEFAULT_CACHE_SLOTS};
#[cfg(feature = "audio-io")]
pub use playback::RodioSink;
pub use playback::{
    default_sink_factory, AudioSink, MouthEnvelope, PlaybackController, PlaybackOutcome,
    ProgressCallback, SinkFactory,
};
pub use wav::{load_clip, write_wav, AudioClip};
