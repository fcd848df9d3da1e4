//! Wall-clock timing: a stopwatch and end-of-run frame statistics.

use std::time::{Duration, Instant};

/// Stopwatch pinned to its creation instant.
///
/// The app times engine startup with it; anything needing per-frame
/// deltas should track its own instants instead.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts timing now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the timer was created, in seconds.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates frame counts over the engine's lifetime.
///
/// Fed once per presented frame; the engine logs the aggregate numbers
/// (total frames, mean frame time, mean FPS) at shutdown.
#[derive(Debug)]
pub struct FrameStats {
    started: Instant,
    frames: u64,
}

impl FrameStats {
    /// Start counting from now with zero frames recorded.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            frames: 0,
        }
    }

    /// Record one completed frame.
    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    /// Total frames recorded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Wall time since counting started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Mean time per frame, or zero if no frame was recorded.
    pub fn average_frame_time(&self) -> Duration {
        mean_frame_time(self.elapsed(), self.frames)
    }

    /// Mean frames per second, or zero if nothing elapsed yet.
    pub fn average_fps(&self) -> f64 {
        mean_fps(self.elapsed(), self.frames)
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_frame_time(elapsed: Duration, frames: u64) -> Duration {
    if frames == 0 {
        return Duration::ZERO;
    }
    elapsed / frames.min(u32::MAX as u64) as u32
}

fn mean_fps(elapsed: Duration, frames: u64) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    frames as f64 / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_stats_counts_frames() {
        let mut stats = FrameStats::new();
        assert_eq!(stats.frames(), 0);
        for _ in 0..10 {
            stats.record_frame();
        }
        assert_eq!(stats.frames(), 10);
    }

    #[test]
    fn test_mean_frame_time_zero_frames() {
        assert_eq!(mean_frame_time(Duration::from_secs(5), 0), Duration::ZERO);
    }

    #[test]
    fn test_mean_frame_time() {
        let mean = mean_frame_time(Duration::from_secs(1), 60);
        assert_eq!(mean, Duration::from_secs(1) / 60);
    }

    #[test]
    fn test_mean_fps() {
        let fps = mean_fps(Duration::from_secs(2), 120);
        assert!((fps - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_fps_zero_elapsed() {
        assert_eq!(mean_fps(Duration::ZERO, 100), 0.0);
    }

    #[test]
    fn test_timer_reports_elapsed_time() {
        let timer = Timer::new();
        assert!(timer.elapsed_secs() >= 0.0);
        assert!(timer.elapsed() < Duration::from_secs(60));
    }
}
