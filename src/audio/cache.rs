//! Rotating on-disk cache for synthesized sentences
//!
//! Filenames cycle through a fixed set of slots, so the number of files stays
//! bounded no matter how much is spoken. Reusing a slot is only safe because a
//! single worker finishes playing a slot before it allocates the next one.

use crate::{Result, VoiceError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default number of rotating slots
pub const DEFAULT_CACHE_SLOTS: usize = 20;

const SLOT_PREFIX: &str = "sentence_";

/// A slot handed out for one utterance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSlot {
    pub index: usize,
    pub path: PathBuf,
}

/// Fixed-size ring of audio file paths
#[derive(Debug)]
pub struct AudioCache {
    dir: PathBuf,
    slots: usize,
    next: usize,
}

impl AudioCache {
    /// Create the cache directory and remove any leftover audio
    pub fn new(dir: impl Into<PathBuf>, slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(VoiceError::ConfigError(
                "Cache needs at least one slot".into(),
            ));
        }

        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            VoiceError::IOError(format!(
                "Failed to create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let cache = Self {
            dir,
            slots,
            next: 0,
        };
        let removed = cache.purge();
        info!(
            "Audio cache at {} ({} slots, purged {} files)",
            cache.dir.display(),
            slots,
            removed
        );

        Ok(cache)
    }

    /// Allocate the next slot in the ring
    pub fn next_slot(&mut self) -> CacheSlot {
        let index = self.next;
        self.next = (self.next + 1) % self.slots;
        CacheSlot {
            index,
            path: self.slot_path(index),
        }
    }

    /// Path for a given slot index
    pub fn slot_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}{}.wav", SLOT_PREFIX, index % self.slots))
    }

    /// Scratch path outside the slot ring
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.wav", name))
    }

    /// Remove every WAV file in the cache directory
    ///
    /// Returns the number of files removed. Failures are logged and skipped.
    pub fn purge(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list cache directory {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_wav(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => debug!("Could not remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Number of WAV files currently in the directory
    pub fn file_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|entry| is_wav(&entry.path()))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slots(&self) -> usize {
        self.slots
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}
