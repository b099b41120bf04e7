//! Fake engines and output shared by the integration tests

#![allow(dead_code)]

use marie_voice::audio::{write_wav, AudioClip, AudioSink, SinkFactory};
use marie_voice::speech::{ConversionJob, SynthesisRequest, Synthesizer, VoiceConverter};
use marie_voice::{PipelineEvent, Result, VoiceError};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SAMPLE_RATE: u32 = 16_000;

/// One call made to the fake synthesizer
#[derive(Clone, Debug)]
pub struct SynthesisCall {
    pub text: String,
    pub length_scale: f32,
    pub speaker_id: u32,
    pub output: PathBuf,
}

/// Writes a short tone instead of running Piper
///
/// Remembers which text went into which file so the sink can report what
/// it played.
#[derive(Clone)]
pub struct FakeSynthesizer {
    pub calls: Arc<Mutex<Vec<SynthesisCall>>>,
    pub written: Arc<Mutex<HashMap<PathBuf, String>>>,
    pub clip_length: Duration,
    pub delay: Duration,
    /// Texts containing this marker fail to synthesize
    pub fail_marker: Option<String>,
}

impl FakeSynthesizer {
    pub fn new(clip_length: Duration) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            written: Arc::new(Mutex::new(HashMap::new())),
            clip_length,
            delay: Duration::ZERO,
            fail_marker: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> Vec<SynthesisCall> {
        self.calls.lock().clone()
    }
}

impl Synthesizer for FakeSynthesizer {
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        self.calls.lock().push(SynthesisCall {
            text: request.text.to_string(),
            length_scale: request.length_scale,
            speaker_id: request.speaker_id,
            output: request.output_path.to_path_buf(),
        });

        if let Some(marker) = &self.fail_marker {
            if request.text.contains(marker.as_str()) {
                return Err(VoiceError::SynthesisError("engine crashed".into()));
            }
        }

        let frames = (SAMPLE_RATE as f64 * self.clip_length.as_secs_f64()) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / SAMPLE_RATE as f32).sin() * 0.5)
            .collect();
        write_wav(request.output_path, &samples, SAMPLE_RATE, 1)?;

        self.written
            .lock()
            .insert(request.output_path.to_path_buf(), request.text.to_string());
        Ok(())
    }
}

/// Copies the input file, or fails on demand
#[derive(Clone, Default)]
pub struct FakeConverter {
    pub pitches: Arc<Mutex<Vec<i32>>>,
    pub fail: bool,
    /// Leave a truncated output file behind when failing
    pub partial_output: bool,
}

impl FakeConverter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn failing_midway() -> Self {
        Self {
            fail: true,
            partial_output: true,
            ..Self::default()
        }
    }
}

impl VoiceConverter for FakeConverter {
    fn convert(&self, job: &ConversionJob<'_>) -> Result<()> {
        self.pitches.lock().push(job.pitch_shift);
        if self.partial_output {
            fs::write(job.output, b"RIFF")?;
        }
        if self.fail {
            return Err(VoiceError::ConversionError("model failed to load".into()));
        }
        fs::copy(job.input, job.output)?;
        Ok(())
    }
}

/// What the fake output observed
#[derive(Default)]
pub struct SinkLog {
    /// Texts in the order playback started
    pub played: Vec<String>,
    /// Times a clip started while another was still audible
    pub overlaps: u32,
    pub halts: u32,
}

/// Plays for the clip's duration without touching a device
pub struct FakeSink {
    until: Option<Instant>,
    log: Arc<Mutex<SinkLog>>,
    written: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl AudioSink for FakeSink {
    fn start(&mut self, clip: &AudioClip) -> Result<()> {
        if self.is_busy() {
            self.log.lock().overlaps += 1;
        }
        let text = self
            .written
            .lock()
            .get(&clip.source)
            .cloned()
            .unwrap_or_else(|| clip.source.display().to_string());
        self.log.lock().played.push(text);
        self.until = Some(Instant::now() + clip.duration());
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.until.map(|t| Instant::now() < t).unwrap_or(false)
    }

    fn halt(&mut self) {
        self.until = None;
        self.log.lock().halts += 1;
    }
}

/// Factory for a fake sink that resolves clip paths through `synth`
pub fn fake_output(synth: &FakeSynthesizer) -> (SinkFactory, Arc<Mutex<SinkLog>>) {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let sink = FakeSink {
        until: None,
        log: Arc::clone(&log),
        written: Arc::clone(&synth.written),
    };
    let factory: SinkFactory = Box::new(move || Ok(Box::new(sink) as Box<dyn AudioSink>));
    (factory, log)
}

/// Wait for the next event
pub fn next_event(events: &Receiver<PipelineEvent>) -> PipelineEvent {
    events
        .recv_timeout(Duration::from_secs(10))
        .expect("timed out waiting for a pipeline event")
}

/// Collect events until `count` utterances have settled
///
/// Finished, Skipped and Cancelled each settle one utterance.
pub fn wait_settled(events: &Receiver<PipelineEvent>, count: usize) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    let mut settled = 0;
    while settled < count {
        let event = next_event(events);
        if matches!(
            event,
            PipelineEvent::Finished { .. }
                | PipelineEvent::Skipped { .. }
                | PipelineEvent::Cancelled { .. }
        ) {
            settled += 1;
        }
        seen.push(event);
    }
    seen
}

pub fn wav_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map(|x| x == "wav").unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}
