use std::time::{Duration, Instant};

use crate::pipeline::FrameOutcome;

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Time elapsed since the previous frame, in seconds.
    pub dt: f32,

    /// Monotonic timestamp taken when the frame began.
    pub now: Instant,

    /// Monotonic frame counter.
    pub frame_index: u64,
}

/// Frame clock plus outcome counters.
///
/// Delta time is clamped to avoid pathological values when the host stalls
/// (loading screens, debugger breaks).
///
/// Transient failures are tracked as streaks so the pipeline can log the first
/// failure of a streak and a summary when it ends instead of one line per frame.
#[derive(Debug, Clone)]
pub struct FrameStats {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,

    presented: u64,
    skipped: u64,
    passthrough: u64,
    streak: u32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            frame_index: 0,
            dt_min,
            dt_max,
            presented: 0,
            skipped: 0,
            passthrough: 0,
            streak: 0,
        }
    }

    /// Resets the timing baseline, e.g. after a backend restart.
    pub fn reset_clock(&mut self) {
        self.last = Instant::now();
    }

    /// Advances the clock and returns a new `FrameTime`.
    pub fn begin_frame(&mut self) -> FrameTime {
        let now = Instant::now();
        let dt = now.saturating_duration_since(self.last).clamp(self.dt_min, self.dt_max);
        self.last = now;

        let ft = FrameTime {
            dt: dt.as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }

    /// Records a frame's outcome.
    ///
    /// Returns the length of a skip streak that just ended (a presented frame
    /// after one or more skipped ones), so the caller can log a summary.
    pub fn record(&mut self, outcome: FrameOutcome) -> Option<u32> {
        match outcome {
            FrameOutcome::Presented => {
                self.presented += 1;
                let ended = self.streak;
                self.streak = 0;
                (ended > 0).then_some(ended)
            }
            FrameOutcome::Skipped => {
                self.skipped += 1;
                self.streak += 1;
                None
            }
            FrameOutcome::Passthrough => {
                self.passthrough += 1;
                None
            }
        }
    }

    /// `true` for the first skipped frame of a streak.
    #[inline]
    pub fn is_streak_start(&self) -> bool {
        self.streak == 1
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn passthrough(&self) -> u64 {
        self.passthrough
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_is_clamped() {
        let mut stats = FrameStats::with_clamps(Duration::from_millis(5), Duration::from_millis(20));
        let ft = stats.begin_frame();
        assert!(ft.dt >= 0.005 && ft.dt <= 0.020);
        assert_eq!(ft.frame_index, 0);
        assert_eq!(stats.begin_frame().frame_index, 1);
    }

    #[test]
    fn streak_summary_on_recovery() {
        let mut stats = FrameStats::new();
        assert_eq!(stats.record(FrameOutcome::Presented), None);
        assert_eq!(stats.record(FrameOutcome::Skipped), None);
        assert!(stats.is_streak_start());
        assert_eq!(stats.record(FrameOutcome::Skipped), None);
        assert!(!stats.is_streak_start());
        assert_eq!(stats.record(FrameOutcome::Presented), Some(2));
        assert_eq!((stats.presented(), stats.skipped()), (2, 2));
    }
}
