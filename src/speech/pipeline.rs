//! Public handle of the voice pipeline
//!
//! Any thread may call `enqueue`, `stop`, `set_voice` and `is_speaking`.
//! Only the worker thread touches the audio output and the cache directory.

use crate::audio::cache::{AudioCache, DEFAULT_CACHE_SLOTS};
use crate::audio::playback::{default_sink_factory, ProgressCallback, SinkFactory, DEFAULT_TICK_HZ};
use crate::integration::PipelineConfig;
use crate::profiles::{CharacterDatabase, ProfileStore, ResolvedVoice};
use crate::speech::cancel::StopSignal;
use crate::speech::conversion::{RvcConverter, VoiceConverter};
use crate::speech::synthesis::{PiperSynthesizer, Synthesizer};
use crate::speech::worker::Worker;
use crate::utils::channels::{PipelineChannels, EVENT_BUFFER};
use crate::utils::PipelineStats;
use crate::{Result, VoiceError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One piece of text waiting to be spoken
pub struct Utterance {
    pub id: Uuid,

    /// Raw text, possibly with an emotion tag
    pub text: String,

    /// Receives mouth openness on every playback tick
    pub on_progress: Option<ProgressCallback>,

    /// Cancellation epoch at enqueue time
    pub(crate) ticket: u64,
}

impl fmt::Debug for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Utterance")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("on_progress", &self.on_progress.is_some())
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Event emitted by the worker
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// Audio for an utterance started playing
    Started {
        id: Uuid,
        /// Display name of the voice used
        voice: String,
        /// Text as spoken, tags removed
        text: String,
    },

    /// Playback ran to the end
    Finished { id: Uuid },

    /// The utterance was dropped without playing
    Skipped { id: Uuid, reason: String },

    /// `stop()` discarded the utterance
    Cancelled { id: Uuid },

    /// The worker has exited
    Shutdown,
}

/// Handle to a running voice pipeline
pub struct VoicePipeline {
    utterance_tx: Sender<Utterance>,
    /// Used by `stop()` to drain pending work
    utterance_rx: Receiver<Utterance>,
    shutdown_tx: Option<Sender<()>>,
    event_tx: Sender<PipelineEvent>,
    event_rx: Receiver<PipelineEvent>,
    store: Arc<dyn ProfileStore>,
    voice: Arc<RwLock<Arc<ResolvedVoice>>>,
    running: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    signal: Arc<StopSignal>,
    stats: Arc<Mutex<PipelineStats>>,
    worker: Option<JoinHandle<()>>,
}

impl VoicePipeline {
    /// Build a pipeline around Piper, the character database and the
    /// default audio output
    ///
    /// Fails if Piper cannot be found or the cache directory cannot be
    /// created.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing voice pipeline");

        let synthesizer = PiperSynthesizer::locate(config.piper_path.as_deref())?;

        let store = match &config.characters_file {
            Some(path) => CharacterDatabase::load(
                path,
                &config.models_dir,
                &config.conversion_models_dir,
            )?,
            None => CharacterDatabase::builtin(&config.models_dir, &config.conversion_models_dir),
        };

        let mut builder = Self::builder(&config.cache_dir)
            .cache_slots(config.cache_slots)
            .synthesizer(Arc::new(synthesizer))
            .profile_store(Arc::new(store))
            .tick_interval(config.tick_interval())
            .pause(config.pause())
            .warmup(config.warmup);

        if let Some(converter_config) = &config.converter {
            match RvcConverter::from_config(converter_config) {
                Ok(converter) => builder = builder.converter(Arc::new(converter)),
                Err(e) => warn!("Voice conversion disabled: {}", e),
            }
        }

        builder.build(&config.default_character)
    }

    /// Start building a pipeline with injected components
    pub fn builder(cache_dir: impl Into<PathBuf>) -> VoicePipelineBuilder {
        VoicePipelineBuilder::new(cache_dir)
    }

    /// Queue text for speech without blocking
    ///
    /// Blank text is ignored. Returns the id of the queued utterance.
    pub fn enqueue(
        &self,
        text: impl Into<String>,
        on_progress: Option<ProgressCallback>,
    ) -> Option<Uuid> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        if !self.is_running() {
            warn!("Voice worker is not running, dropping utterance");
            return None;
        }

        let utterance = Utterance {
            id: Uuid::new_v4(),
            text,
            on_progress,
            ticket: self.signal.ticket(),
        };
        let id = utterance.id;

        // The handle keeps a receiver alive, so this cannot disconnect
        self.utterance_tx.send(utterance).ok()?;
        debug!("Queued utterance {}", id);
        Some(id)
    }

    /// Queue text without a progress callback
    pub fn speak(&self, text: impl Into<String>) -> Option<Uuid> {
        self.enqueue(text, None)
    }

    /// Drop all pending utterances and interrupt the current one
    ///
    /// A synthesis subprocess already running is left to finish; its output
    /// is discarded instead of played.
    pub fn stop(&self) {
        self.signal.cancel_all();

        let mut dropped: u64 = 0;
        for utterance in self.utterance_rx.try_iter() {
            let _ = self
                .event_tx
                .try_send(PipelineEvent::Cancelled { id: utterance.id });
            dropped += 1;
        }
        self.stats.lock().cancelled += dropped;

        info!("Speech stopped ({} pending utterances dropped)", dropped);
    }

    /// Switch the active character
    ///
    /// Unknown ids fall back to the default character. The utterance
    /// currently being processed keeps its voice.
    pub fn set_voice(&self, character_id: &str) {
        let resolved = Arc::new(self.store.get_character(character_id));
        info!("Voice set to: {}", resolved.display_name());
        *self.voice.write() = resolved;
    }

    /// The active character
    pub fn current_voice(&self) -> Arc<ResolvedVoice> {
        Arc::clone(&self.voice.read())
    }

    /// Whether audio is playing right now
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Whether the worker is alive and accepting utterances
    ///
    /// False after shutdown and after the worker thread has died.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self
                .worker
                .as_ref()
                .map(|worker| !worker.is_finished())
                .unwrap_or(false)
    }

    /// Number of utterances waiting to be processed
    pub fn pending(&self) -> usize {
        self.utterance_rx.len()
    }

    /// Receiver for worker events
    pub fn event_receiver(&self) -> Receiver<PipelineEvent> {
        self.event_rx.clone()
    }

    /// Snapshot of stage timings and counters
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Queued utterances are abandoned. A running subprocess is not killed,
    /// so this can wait for it to finish.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Voice worker panicked");
            }
        }
    }

    fn signal_shutdown(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Shutting down voice pipeline");
        }
        self.shutdown_tx.take();
        self.signal.wake();
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        // The worker is detached rather than joined
        self.signal_shutdown();
    }
}

/// Builder for a pipeline with custom engines, store or output
pub struct VoicePipelineBuilder {
    cache_dir: PathBuf,
    cache_slots: usize,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    converter: Option<Arc<dyn VoiceConverter>>,
    store: Option<Arc<dyn ProfileStore>>,
    sink_factory: Option<SinkFactory>,
    tick: Duration,
    pause: Duration,
    warmup: bool,
    event_buffer: usize,
}

impl VoicePipelineBuilder {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            cache_slots: DEFAULT_CACHE_SLOTS,
            synthesizer: None,
            converter: None,
            store: None,
            sink_factory: None,
            tick: Duration::from_secs_f64(1.0 / DEFAULT_TICK_HZ as f64),
            pause: Duration::from_millis(50),
            warmup: false,
            event_buffer: EVENT_BUFFER,
        }
    }

    /// Number of rotating cache files
    pub fn cache_slots(mut self, slots: usize) -> Self {
        self.cache_slots = slots;
        self
    }

    /// Speech synthesis engine (required)
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Voice conversion engine
    pub fn converter(mut self, converter: Arc<dyn VoiceConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Character database; the built-in one is used when unset
    pub fn profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// How to open the audio output on the worker thread
    pub fn sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = Some(factory);
        self
    }

    /// Playback progress ticks per second
    pub fn tick_rate(mut self, hz: u32) -> Self {
        self.tick = Duration::from_secs_f64(1.0 / hz.max(1) as f64);
        self
    }

    pub fn tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Silence between consecutive utterances
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Synthesize a throwaway sentence when the worker starts
    pub fn warmup(mut self, warmup: bool) -> Self {
        self.warmup = warmup;
        self
    }

    /// Capacity of the event channel
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Create the cache, resolve the starting voice and spawn the worker
    pub fn build(self, default_character: &str) -> Result<VoicePipeline> {
        let synthesizer = self
            .synthesizer
            .ok_or_else(|| VoiceError::ConfigError("A synthesizer is required".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| {
                Arc::new(CharacterDatabase::builtin("piper", "rvc_models")) as Arc<dyn ProfileStore>
            });
        let sink_factory = self.sink_factory.unwrap_or_else(default_sink_factory);

        let cache = AudioCache::new(&self.cache_dir, self.cache_slots)?;

        let initial = Arc::new(store.get_character(default_character));
        info!("Voice set to: {}", initial.display_name());

        let channels = PipelineChannels::new(self.event_buffer);
        let voice = Arc::new(RwLock::new(initial));
        let running = Arc::new(AtomicBool::new(true));
        let speaking = Arc::new(AtomicBool::new(false));
        let signal = Arc::new(StopSignal::new());
        let stats = Arc::new(Mutex::new(PipelineStats::default()));

        let worker = Worker {
            utterance_rx: channels.utterance_rx.clone(),
            shutdown_rx: channels.shutdown_rx.clone(),
            event_tx: channels.event_tx.clone(),
            synthesizer,
            converter: self.converter,
            cache,
            voice: Arc::clone(&voice),
            running: Arc::clone(&running),
            speaking: Arc::clone(&speaking),
            signal: Arc::clone(&signal),
            stats: Arc::clone(&stats),
            sink_factory: Some(sink_factory),
            tick: self.tick,
            pause: self.pause,
            warmup: self.warmup,
        };

        let handle = thread::Builder::new()
            .name("voice-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| VoiceError::IOError(format!("Failed to spawn voice worker: {}", e)))?;

        info!("Voice pipeline ready");

        Ok(VoicePipeline {
            utterance_tx: channels.utterance_tx,
            utterance_rx: channels.utterance_rx,
            shutdown_tx: Some(channels.shutdown_tx),
            event_tx: channels.event_tx,
            event_rx: channels.event_rx,
            store,
            voice,
            running,
            speaking,
            signal,
            stats,
            worker: Some(handle),
        })
    }
}
