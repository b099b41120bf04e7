//! The single background thread that turns utterances into sound
//!
//! Each utterance runs through extraction, synthesis, optional conversion and
//! playback before the next one is dequeued. That serialization is what
//! guarantees ordering, non-overlap and safe cache-slot reuse.

use crate::audio::cache::AudioCache;
use crate::audio::playback::{PlaybackController, PlaybackOutcome, SinkFactory};
use crate::audio::wav::load_clip;
use crate::profiles::ResolvedVoice;
use crate::speech::cancel::StopSignal;
use crate::speech::conversion::{converted_path, ConversionJob, VoiceConverter};
use crate::speech::emotion::{extract_emotion, Prosody};
use crate::speech::pipeline::{PipelineEvent, Utterance};
use crate::speech::synthesis::{remove_stale, SynthesisRequest, Synthesizer};
use crate::utils::PipelineStats;
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(crate) struct Worker {
    pub utterance_rx: Receiver<Utterance>,
    pub shutdown_rx: Receiver<()>,
    pub event_tx: Sender<PipelineEvent>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub converter: Option<Arc<dyn VoiceConverter>>,
    pub cache: AudioCache,
    pub voice: Arc<RwLock<Arc<ResolvedVoice>>>,
    pub running: Arc<AtomicBool>,
    pub speaking: Arc<AtomicBool>,
    pub signal: Arc<StopSignal>,
    pub stats: Arc<Mutex<PipelineStats>>,
    pub sink_factory: Option<SinkFactory>,
    pub tick: Duration,
    pub pause: Duration,
    pub warmup: bool,
}

impl Worker {
    pub fn run(mut self) {
        info!("Voice worker starting");

        let sink = match self.sink_factory.take().map(|factory| factory()) {
            Some(Ok(sink)) => Some(sink),
            Some(Err(e)) => {
                error!("Audio output unavailable, speech will be skipped: {}", e);
                None
            }
            None => None,
        };
        let mut playback = PlaybackController::new(
            sink,
            self.tick,
            Arc::clone(&self.running),
            Arc::clone(&self.speaking),
            Arc::clone(&self.signal),
        );

        if self.warmup {
            self.warm_up();
        }

        info!("Voice worker ready");

        let utterances = self.utterance_rx.clone();
        let shutdown = self.shutdown_rx.clone();

        while self.running.load(Ordering::SeqCst) {
            let keep_going = select! {
                recv(utterances) -> msg => match msg {
                    Ok(utterance) => {
                        self.process(utterance, &mut playback);
                        true
                    }
                    Err(_) => {
                        debug!("Utterance channel closed");
                        false
                    }
                },
                // Nothing is ever sent here; the sender is dropped on shutdown
                recv(shutdown) -> _ => false,
            };
            if !keep_going {
                break;
            }
        }

        self.speaking.store(false, Ordering::SeqCst);
        let abandoned = self.utterance_rx.len();
        if abandoned > 0 {
            info!("Abandoning {} queued utterances", abandoned);
        }
        self.emit(PipelineEvent::Shutdown);
        info!("Voice worker stopped ({})", self.stats.lock().summary());
    }

    fn warm_up(&self) {
        let voice = Arc::clone(&self.voice.read());
        let scratch = self.cache.scratch_path("warmup");

        let started = Instant::now();
        match self.synthesizer.warmup(&voice.model_path, &scratch) {
            Ok(()) => debug!("Engine warmed up in {}ms", started.elapsed().as_millis()),
            Err(e) => warn!("Warm-up skipped: {}", e),
        }

        if scratch.exists() {
            let _ = fs::remove_file(&scratch);
        }
    }

    fn process(&mut self, utterance: Utterance, playback: &mut PlaybackController) {
        let Utterance {
            id,
            text,
            on_progress,
            ticket,
        } = utterance;

        if self.signal.is_cancelled(ticket) {
            self.cancelled(id, "stopped before synthesis");
            return;
        }

        // Snapshot so a concurrent set_voice only affects later utterances
        let voice = Arc::clone(&self.voice.read());
        let prosody = extract_emotion(&text, &voice.profile);
        if prosody.text.is_empty() {
            self.skipped(id, "nothing left to speak after removing tags".to_string(), false);
            return;
        }

        info!("[{}]: {}", voice.display_name().to_uppercase(), prosody.text);
        if let Some(tag) = prosody.tag.as_deref().filter(|_| !prosody.recognized) {
            debug!("Unrecognized emotion tag '{}', using default prosody", tag);
        }

        let slot = self.cache.next_slot();
        let request = SynthesisRequest {
            text: &prosody.text,
            length_scale: prosody.length_scale(),
            model_path: &voice.model_path,
            speaker_id: voice.profile.speaker_id,
            output_path: &slot.path,
        };

        let started = Instant::now();
        let synthesized = self
            .synthesizer
            .synthesize(&request)
            .and_then(|()| {
                if slot.path.exists() {
                    Ok(())
                } else {
                    Err(crate::VoiceError::SynthesisError(format!(
                        "no audio written to {}",
                        slot.path.display()
                    )))
                }
            });
        if let Err(e) = synthesized {
            error!("Dropping utterance {}: {}", id, e);
            self.skipped(id, e.to_string(), true);
            return;
        }
        self.stats.lock().synthesis.record(started.elapsed());

        // The subprocess was allowed to finish; its output is simply discarded
        if self.signal.is_cancelled(ticket) {
            self.cancelled(id, "stopped during synthesis");
            return;
        }

        let audio_path = self.convert_if_enabled(&voice, &prosody, &slot.path);
        if self.signal.is_cancelled(ticket) {
            self.cancelled(id, "stopped during conversion");
            return;
        }

        let clip = match load_clip(&audio_path) {
            Ok(clip) => clip,
            Err(e) => {
                warn!("Cannot load synthesized audio for {}: {}", id, e);
                self.skipped(id, e.to_string(), true);
                return;
            }
        };

        let played = playback.play(&clip, ticket, on_progress.as_ref(), || {
            self.emit(PipelineEvent::Started {
                id,
                voice: voice.display_name().to_string(),
                text: prosody.text.clone(),
            })
        });

        match played {
            Ok(PlaybackOutcome::Completed) => {
                self.stats.lock().completed += 1;
                self.emit(PipelineEvent::Finished { id });
            }
            Ok(PlaybackOutcome::Cancelled) => {
                self.cancelled(id, "stopped during playback");
                return;
            }
            Ok(PlaybackOutcome::Shutdown) => return,
            Err(e) => {
                warn!("Playback failed for {}: {}", id, e);
                self.skipped(id, e.to_string(), true);
                return;
            }
        }

        // Short gap between sentences
        self.signal.wait(ticket, self.pause);
    }

    /// Run voice conversion, falling back to the raw file on any failure
    fn convert_if_enabled(&self, voice: &ResolvedVoice, prosody: &Prosody, raw: &Path) -> PathBuf {
        let (Some(converter), Some(settings)) = (self.converter.as_ref(), voice.conversion.as_ref())
        else {
            return raw.to_path_buf();
        };

        let output = converted_path(raw);
        let job = ConversionJob {
            input: raw,
            output: &output,
            model_path: &settings.model_path,
            index_path: settings.index_path.as_deref(),
            pitch_shift: settings.pitch_shift + prosody.pitch_shift,
        };

        debug!(
            "Converting {} with {} (pitch {:+})",
            raw.display(),
            settings.model_path.display(),
            job.pitch_shift
        );

        let started = Instant::now();
        let result = converter.convert(&job).and_then(|()| {
            if output.exists() {
                Ok(())
            } else {
                Err(crate::VoiceError::ConversionError(format!(
                    "no audio written to {}",
                    output.display()
                )))
            }
        });

        match result {
            Ok(()) => {
                self.stats.lock().conversion.record(started.elapsed());
                // Keep the converted audio in the slot so the file count stays bounded
                match fs::rename(&output, raw) {
                    Ok(()) => raw.to_path_buf(),
                    Err(e) => {
                        debug!("Could not move {} into its slot: {}", output.display(), e);
                        output
                    }
                }
            }
            Err(e) => {
                warn!("Voice conversion failed, using unconverted audio: {}", e);
                // A partial artifact would sit outside the slot ring
                remove_stale(&output);
                self.stats.lock().conversion_fallbacks += 1;
                raw.to_path_buf()
            }
        }
    }

    fn cancelled(&self, id: Uuid, stage: &str) {
        debug!("Utterance {} cancelled: {}", id, stage);
        self.stats.lock().cancelled += 1;
        self.emit(PipelineEvent::Cancelled { id });
    }

    fn skipped(&self, id: Uuid, reason: String, failed: bool) {
        if failed {
            self.stats.lock().failed += 1;
        }
        self.emit(PipelineEvent::Skipped { id, reason });
    }

    fn emit(&self, event: PipelineEvent) {
        // Nobody is required to listen; never block the worker on events
        let _ = self.event_tx.try_send(event);
    }
}
