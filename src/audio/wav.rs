use crate::{Result, VoiceError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A decoded audio file held fully in memory
#[derive(Clone, Debug)]
pub struct AudioClip {
    /// Interleaved samples in -1.0..=1.0
    pub samples: Vec<f32>,

    pub sample_rate: u32,

    pub channels: u16,

    /// File the clip was read from
    pub source: PathBuf,
}

impl AudioClip {
    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback duration
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Write mono or interleaved samples as a 16-bit WAV file
///
/// # Arguments
/// * `path` - Path to the output WAV file
/// * `samples` - Audio samples (f32, range -1.0 to 1.0)
/// * `sample_rate` - Sample rate in Hz
/// * `channels` - Number of channels
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)
        .map_err(|e| VoiceError::IOError(format!("Failed to create WAV writer: {}", e)))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| VoiceError::IOError(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| VoiceError::IOError(format!("Failed to finalize WAV file: {}", e)))?;

    debug!("Wrote {} samples to {:?}", samples.len(), path.as_ref());
    Ok(())
}

/// Read a WAV file fully into memory
///
/// The file handle is closed before this returns, so the slot can be
/// overwritten later without contending with playback.
pub fn load_clip<P: AsRef<Path>>(path: P) -> Result<AudioClip> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path).map_err(|e| {
        VoiceError::PlaybackError(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let spec = reader.spec();
    let read_err =
        |e: hound::Error| VoiceError::PlaybackError(format!("Failed to read sample: {}", e));

    let samples: Result<Vec<f32>> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(read_err))
            .collect(),
        SampleFormat::Int => match spec.bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / i8::MAX as f32).map_err(read_err))
                .collect(),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / i16::MAX as f32).map_err(read_err))
                .collect(),
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8_388_608.0).map_err(read_err)) // 2^23
                .collect(),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / i32::MAX as f32).map_err(read_err))
                .collect(),
            bits => {
                return Err(VoiceError::PlaybackError(format!(
                    "Unsupported bit depth: {}",
                    bits
                )));
            }
        },
    };

    let clip = AudioClip {
        samples: samples?,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        source: path.to_path_buf(),
    };

    debug!(
        "Loaded {} ({} Hz, {} ch, {:.2}s)",
        path.display(),
        clip.sample_rate,
        clip.channels,
        clip.duration().as_secs_f32()
    );

    Ok(clip)
}
