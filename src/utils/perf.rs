//! Stage latency tracking
//!
//! Synthesis and conversion dominate the time between `enqueue` and audible
//! speech; these windows make that visible.

use std::collections::VecDeque;
use std::time::Duration;

/// Tracks timing metrics over a sliding window
#[derive(Clone, Debug)]
pub struct TimingTracker {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl TimingTracker {
    /// Create a new timing tracker with the specified window size
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a new timing sample
    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// Get the average duration
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().max().copied().unwrap_or(Duration::ZERO)
    }

    /// Get the 95th percentile duration
    pub fn percentile_95(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.samples.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Per-stage counters kept by the worker
#[derive(Clone, Debug)]
pub struct PipelineStats {
    pub synthesis: TimingTracker,
    pub conversion: TimingTracker,
    /// Utterances played to the end
    pub completed: u64,
    /// Utterances dropped because a stage failed
    pub failed: u64,
    /// Utterances discarded by `stop()`
    pub cancelled: u64,
    /// Conversions that fell back to the raw audio
    pub conversion_fallbacks: u64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            synthesis: TimingTracker::new(50),
            conversion: TimingTracker::new(50),
            completed: 0,
            failed: 0,
            cancelled: 0,
            conversion_fallbacks: 0,
        }
    }
}

impl PipelineStats {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "TTS: {}ms avg / {}ms p95",
            self.synthesis.average().as_millis(),
            self.synthesis.percentile_95().as_millis()
        )];

        if self.conversion.count() > 0 {
            parts.push(format!(
                "RVC: {}ms avg / {}ms max",
                self.conversion.average().as_millis(),
                self.conversion.max().as_millis()
            ));
        }

        parts.push(format!(
            "played {}, failed {}, cancelled {}",
            self.completed, self.failed, self.cancelled
        ));

        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_tracker() {
        let mut tracker = TimingTracker::new(10);

        for i in 1..=5 {
            tracker.record(Duration::from_millis(i * 10));
        }

        assert_eq!(tracker.count(), 5);
        assert_eq!(tracker.max(), Duration::from_millis(50));
        assert_eq!(tracker.average(), Duration::from_millis(30));
        assert_eq!(tracker.percentile_95(), Duration::from_millis(50));
    }

    #[test]
    fn test_timing_tracker_window() {
        let mut tracker = TimingTracker::new(3);

        for i in 1..=5 {
            tracker.record(Duration::from_millis(i * 10));
        }

        // Should only have last 3 samples
        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.average(), Duration::from_millis(40));
    }

    #[test]
    fn test_summary_mentions_conversion_only_when_used() {
        let mut stats = PipelineStats::default();
        stats.synthesis.record(Duration::from_millis(120));
        stats.completed = 1;
        assert!(!stats.summary().contains("RVC"));

        stats.conversion.record(Duration::from_millis(900));
        assert!(stats.summary().contains("RVC: 900ms"));
        assert!(stats.summary().contains("played 1"));
    }
}
