//! Capture statistics
//!
//! Provides:
//! - Outcome counters for capture calls (frames, cursor updates, timeouts,
//!   reinit signals, errors, spurious wakes)
//! - Bytes delivered through `get_frame`
//! - Rolling average of `get_frame` latency

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::CaptureStatus;

/// Maximum number of samples to keep for rolling averages
const MAX_SAMPLES: usize = 120;

/// Rolling average calculator for timing data
#[derive(Debug)]
struct RollingAverage {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl RollingAverage {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn add(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        (total / self.samples.len() as u32).as_secs_f64() * 1000.0
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Thread-safe capture counters, shared through an `Arc`
#[derive(Debug)]
pub struct CaptureStats {
    frames: AtomicU64,
    cursor_updates: AtomicU64,
    timeouts: AtomicU64,
    reinit_signals: AtomicU64,
    errors: AtomicU64,
    spurious_wakes: AtomicU64,
    bytes_delivered: AtomicU64,
    get_frame_latency: RwLock<RollingAverage>,
    start_time: RwLock<Instant>,
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            cursor_updates: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            reinit_signals: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            spurious_wakes: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            get_frame_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            start_time: RwLock::new(Instant::now()),
        }
    }

    /// Count the flags of a `capture()` result
    pub fn record_capture(&self, status: CaptureStatus) {
        if status.contains(CaptureStatus::FRAME_READY) {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
        if status.contains(CaptureStatus::CURSOR_UPDATED) {
            self.cursor_updates.fetch_add(1, Ordering::Relaxed);
        }
        if status.contains(CaptureStatus::TIMEOUT) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        if status.contains(CaptureStatus::NEEDS_REINIT) {
            self.reinit_signals.fetch_add(1, Ordering::Relaxed);
        }
        if status.contains(CaptureStatus::ERROR) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count an acquire that carried neither pixels nor cursor changes
    pub fn record_spurious_wake(&self) {
        self.spurious_wakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed `get_frame`
    pub fn record_get_frame(&self, status: CaptureStatus, bytes: usize, elapsed: Duration) {
        if status.contains(CaptureStatus::OK) {
            self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
            self.get_frame_latency.write().add(elapsed);
        } else if status.contains(CaptureStatus::ERROR) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Relaxed);
        self.cursor_updates.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.reinit_signals.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.spurious_wakes.store(0, Ordering::Relaxed);
        self.bytes_delivered.store(0, Ordering::Relaxed);
        self.get_frame_latency.write().clear();
        *self.start_time.write() = Instant::now();
    }

    /// Take a consistent-enough copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start_time.read().elapsed();
        let frames = self.frames.load(Ordering::Relaxed);
        let fps = if elapsed.as_secs_f64() > 0.0 {
            frames as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        StatsSnapshot {
            frames,
            cursor_updates: self.cursor_updates.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            reinit_signals: self.reinit_signals.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            spurious_wakes: self.spurious_wakes.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            get_frame_latency_ms: self.get_frame_latency.read().average_ms(),
            fps,
            elapsed,
        }
    }
}

/// Point-in-time copy of the capture counters
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub cursor_updates: u64,
    pub timeouts: u64,
    pub reinit_signals: u64,
    pub errors: u64,
    pub spurious_wakes: u64,
    pub bytes_delivered: u64,
    /// Average `get_frame` latency in milliseconds
    pub get_frame_latency_ms: f64,
    /// Frames per second since the last reset
    pub fps: f64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Format as a single line
    pub fn format_line(&self) -> String {
        format!(
            "{} frames | {:.1}fps | {} cursor | {} timeouts | {} errors",
            self.frames, self.fps, self.cursor_updates, self.timeouts, self.errors
        )
    }

    /// Format as multi-line string for logging
    pub fn format_detailed(&self) -> String {
        format!(
            "Frames: {} ({:.1}fps over {:.1}s), {:.1} MiB delivered, get_frame avg {:.2}ms\n\
             Cursor updates: {} | Timeouts: {} | Spurious wakes: {} | Reinit: {} | Errors: {}",
            self.frames,
            self.fps,
            self.elapsed.as_secs_f64(),
            self.bytes_delivered as f64 / (1024.0 * 1024.0),
            self.get_frame_latency_ms,
            self.cursor_updates,
            self.timeouts,
            self.spurious_wakes,
            self.reinit_signals,
            self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average() {
        let mut avg = RollingAverage::new(3);
        avg.add(Duration::from_millis(10));
        avg.add(Duration::from_millis(20));
        avg.add(Duration::from_millis(30));
        assert!((avg.average_ms() - 20.0).abs() < 0.1);

        avg.add(Duration::from_millis(40));
        assert!((avg.average_ms() - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_record_capture_counts_each_flag() {
        let stats = CaptureStats::new();
        stats.record_capture(
            CaptureStatus::OK | CaptureStatus::FRAME_READY | CaptureStatus::CURSOR_UPDATED,
        );
        stats.record_capture(CaptureStatus::TIMEOUT);
        stats.record_capture(CaptureStatus::NEEDS_REINIT);
        stats.record_spurious_wake();

        let snap = stats.snapshot();
        assert_eq!(snap.frames, 1);
        assert_eq!(snap.cursor_updates, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.reinit_signals, 1);
        assert_eq!(snap.spurious_wakes, 1);
        assert_eq!(snap.errors, 0);

        stats.reset();
        assert_eq!(stats.snapshot().frames, 0);
    }

    #[test]
    fn test_get_frame_bytes() {
        let stats = CaptureStats::new();
        stats.record_get_frame(CaptureStatus::OK, 1024, Duration::from_millis(2));
        stats.record_get_frame(CaptureStatus::ERROR, 0, Duration::ZERO);
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_delivered, 1024);
        assert_eq!(snap.errors, 1);
        assert!(snap.format_detailed().contains("Errors: 1"));
    }
}
