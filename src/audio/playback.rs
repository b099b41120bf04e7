//! Speech playback on a dedicated output
//!
//! The controller is owned by the worker thread. It blocks while a clip
//! plays, ticking at a fixed rate to report mouth movement and to notice
//! `stop()` or shutdown.

use crate::audio::wav::AudioClip;
use crate::speech::cancel::StopSignal;
use crate::{Result, VoiceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[cfg(feature = "audio-io")]
use rodio::{buffer::SamplesBuffer, OutputStream, OutputStreamHandle, Sink};

/// Default progress tick rate
pub const DEFAULT_TICK_HZ: u32 = 30;

/// Lowest mouth openness reported while audio is playing
pub const MIN_OPENNESS: f32 = 0.3;

/// Called on every tick with a mouth openness in `MIN_OPENNESS..=1.0`
pub type ProgressCallback = Box<dyn Fn(f32) + Send + 'static>;

/// Builds the sink on the worker thread; output streams are often not `Send`
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSink>> + Send + 'static>;

/// A playback channel reserved for speech
pub trait AudioSink {
    /// Begin playing a clip, replacing anything still playing
    fn start(&mut self, clip: &AudioClip) -> Result<()>;

    /// Whether the last clip is still playing
    fn is_busy(&self) -> bool;

    /// Stop playback immediately
    fn halt(&mut self);
}

/// rodio output with one sink per clip
#[cfg(feature = "audio-io")]
pub struct RodioSink {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
}

#[cfg(feature = "audio-io")]
impl RodioSink {
    /// Open the default output device
    pub fn new() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default().map_err(|e| {
            VoiceError::AudioDeviceError(format!("Failed to open output stream: {}", e))
        })?;

        info!("Opened default audio output for speech");

        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
        })
    }
}

#[cfg(feature = "audio-io")]
impl AudioSink for RodioSink {
    fn start(&mut self, clip: &AudioClip) -> Result<()> {
        self.halt();

        let sink = Sink::try_new(&self.handle)
            .map_err(|e| VoiceError::PlaybackError(format!("Failed to create sink: {}", e)))?;
        sink.append(SamplesBuffer::new(
            clip.channels,
            clip.sample_rate,
            clip.samples.clone(),
        ));
        self.sink = Some(sink);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.sink.as_ref().map(|sink| !sink.empty()).unwrap_or(false)
    }

    fn halt(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

/// Sink factory for the default output device
pub fn default_sink_factory() -> SinkFactory {
    #[cfg(feature = "audio-io")]
    {
        Box::new(|| RodioSink::new().map(|sink| Box::new(sink) as Box<dyn AudioSink>))
    }

    #[cfg(not(feature = "audio-io"))]
    {
        Box::new(|| {
            Err(VoiceError::AudioDeviceError(
                "built without the audio-io feature".into(),
            ))
        })
    }
}

/// Per-window loudness used to animate the mouth
#[derive(Clone, Debug)]
pub struct MouthEnvelope {
    levels: Vec<f32>,
    window: Duration,
}

impl MouthEnvelope {
    /// Compute RMS levels over windows of `window` length
    pub fn from_clip(clip: &AudioClip, window: Duration) -> Self {
        let channels = clip.channels.max(1) as usize;
        let frames_per_window =
            ((clip.sample_rate as f64 * window.as_secs_f64()).round() as usize).max(1);
        let chunk = frames_per_window * channels;

        let rms: Vec<f32> = clip
            .samples
            .chunks(chunk)
            .map(|samples| {
                let energy: f32 = samples.iter().map(|s| s * s).sum();
                (energy / samples.len() as f32).sqrt()
            })
            .collect();

        let peak = rms.iter().copied().fold(0.0f32, f32::max);
        let levels = rms
            .into_iter()
            .map(|level| {
                if peak > 0.0 {
                    MIN_OPENNESS + (1.0 - MIN_OPENNESS) * (level / peak)
                } else {
                    MIN_OPENNESS
                }
            })
            .collect();

        Self { levels, window }
    }

    /// Openness at a playback position
    pub fn openness_at(&self, elapsed: Duration) -> f32 {
        if self.levels.is_empty() || self.window.is_zero() {
            return MIN_OPENNESS;
        }
        let index = (elapsed.as_secs_f64() / self.window.as_secs_f64()) as usize;
        self.levels[index.min(self.levels.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// How a playback ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The clip played to the end
    Completed,
    /// `stop()` interrupted the clip
    Cancelled,
    /// The pipeline is shutting down
    Shutdown,
}

/// Drives one clip at a time to completion
pub struct PlaybackController {
    sink: Option<Box<dyn AudioSink>>,
    tick: Duration,
    running: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    signal: Arc<StopSignal>,
}

impl PlaybackController {
    pub fn new(
        sink: Option<Box<dyn AudioSink>>,
        tick: Duration,
        running: Arc<AtomicBool>,
        speaking: Arc<AtomicBool>,
        signal: Arc<StopSignal>,
    ) -> Self {
        Self {
            sink,
            tick,
            running,
            speaking,
            signal,
        }
    }

    pub fn has_output(&self) -> bool {
        self.sink.is_some()
    }

    /// Play a clip and block until it finishes or is interrupted
    ///
    /// `on_started` runs once the output has accepted the clip, and never if
    /// playback fails or is cancelled before that.
    pub fn play(
        &mut self,
        clip: &AudioClip,
        ticket: u64,
        on_progress: Option<&ProgressCallback>,
        on_started: impl FnOnce(),
    ) -> Result<PlaybackOutcome> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| VoiceError::PlaybackError("No audio output available".into()))?;

        if self.signal.is_cancelled(ticket) {
            return Ok(PlaybackOutcome::Cancelled);
        }

        let envelope = MouthEnvelope::from_clip(clip, self.tick);
        sink.start(clip)?;
        self.speaking.store(true, Ordering::SeqCst);
        on_started();
        let started = Instant::now();

        let outcome = loop {
            if !self.running.load(Ordering::SeqCst) {
                sink.halt();
                break PlaybackOutcome::Shutdown;
            }
            if self.signal.is_cancelled(ticket) {
                sink.halt();
                break PlaybackOutcome::Cancelled;
            }
            if !sink.is_busy() {
                break PlaybackOutcome::Completed;
            }

            if let Some(callback) = on_progress {
                callback(envelope.openness_at(started.elapsed()));
            }

            self.signal.wait(ticket, self.tick);
        };

        self.speaking.store(false, Ordering::SeqCst);
        debug!(
            "Playback of {} ended after {:.2}s: {:?}",
            clip.source.display(),
            started.elapsed().as_secs_f32(),
            outcome
        );

        Ok(outcome)
    }
}
