//! Pipeline counters and frame rate

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Shortest window a frame rate is measured over
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Frames per second over windows of at least one second
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    window_start: Instant,
    frames: u32,
    rate: f64,
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRateCounter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            rate: 0.0,
        }
    }

    /// Count one frame; returns the new rate when a window closed
    pub fn frame(&mut self) -> Option<f64> {
        self.frame_at(Instant::now())
    }

    pub fn frame_at(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < RATE_WINDOW {
            return None;
        }
        self.rate = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(self.rate)
    }

    /// Rate measured over the last closed window
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Running counters of one pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames_rendered: u64,
    pub scanlines_received: u64,
    pub requests_issued: u64,
    pub bytes_received: u64,
    pub dropped_frames: u64,
    pub duplicate_lines: u64,
    pub faults: u64,
    pub activations: u64,
    pub frame_rate: FrameRateCounter,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_rendered: self.frames_rendered,
            scanlines_received: self.scanlines_received,
            requests_issued: self.requests_issued,
            bytes_received: self.bytes_received,
            dropped_frames: self.dropped_frames,
            duplicate_lines: self.duplicate_lines,
            faults: self.faults,
            activations: self.activations,
            frames_per_second: self.frame_rate.rate(),
        }
    }
}

/// Serialisable copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_rendered: u64,
    pub scanlines_received: u64,
    pub requests_issued: u64,
    pub bytes_received: u64,
    pub dropped_frames: u64,
    pub duplicate_lines: u64,
    pub faults: u64,
    pub activations: u64,
    pub frames_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_reported_after_window() {
        let start = Instant::now();
        let mut counter = FrameRateCounter {
            window_start: start,
            frames: 0,
            rate: 0.0,
        };
        for i in 1..10 {
            assert_eq!(counter.frame_at(start + Duration::from_millis(i * 100)), None);
        }
        let rate = counter.frame_at(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 5.0).abs() < 1e-9);
        assert_eq!(counter.rate(), rate);
        assert_eq!(counter.frames, 0);
    }

    #[test]
    fn test_snapshot_copies_counters() {
        let mut stats = PipelineStats::default();
        stats.frames_rendered = 3;
        stats.dropped_frames = 1;
        let snap = stats.snapshot();
        assert_eq!(snap.frames_rendered, 3);
        assert_eq!(snap.dropped_frames, 1);
        assert_eq!(snap.frames_per_second, 0.0);
    }
}
