//! The master playback clock.
//!
//! Audio is the temporal master: the audio callback stamps the clock with
//! the timestamp of the samples it just delivered, and the video pacer reads
//! the clock to decide when a frame is due. The clock is a monotonic time
//! source plus a drift offset, so it keeps advancing smoothly between audio
//! callbacks without a dedicated ticker thread:
//!
//! `now() = monotonic_elapsed + drift`, `set(pts)` assigns
//! `drift = pts - monotonic_elapsed`.
//!
//! If the audio callback stops stamping the clock (audio queue drained), the
//! clock keeps advancing at real-time rate and video converges on wall time.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

struct ClockInner {
    origin: Instant,
    drift: Mutex<f64>,
}

/// Shared audio-mastered clock. Cheap to clone; all clones observe the same
/// time. Single writer (the audio callback), any number of readers.
#[derive(Clone)]
pub struct MasterClock {
    inner: Arc<ClockInner>,
}

impl MasterClock {
    /// Creates a clock reading 0.0 seconds.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                origin: Instant::now(),
                drift: Mutex::new(0.0),
            }),
        }
    }

    fn elapsed(&self) -> f64 {
        self.inner.origin.elapsed().as_secs_f64()
    }

    /// Stamps the clock so that `now()` reads `pts` seconds.
    pub fn set(&self, pts: f64) {
        let mut drift = self.inner.drift.lock();
        *drift = pts - self.elapsed();
    }

    /// Rebases the clock to `pts`; behaviourally identical to [`set`].
    ///
    /// [`set`]: MasterClock::set
    pub fn reset(&self, pts: f64) {
        self.set(pts);
    }

    /// Current clock value in seconds.
    pub fn now(&self) -> f64 {
        *self.inner.drift.lock() + self.elapsed()
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    // Generous bound for scheduler jitter on loaded CI machines.
    const JITTER: f64 = 0.05;

    #[test]
    fn reads_back_what_was_set() {
        let clock = MasterClock::new();
        clock.set(42.5);
        let now = clock.now();
        assert!((now - 42.5).abs() < JITTER, "clock read {now}");
    }

    #[test]
    fn advances_at_wall_rate_between_stamps() {
        let clock = MasterClock::new();
        clock.set(1.0);
        let before = clock.now();
        thread::sleep(Duration::from_millis(80));
        let advanced = clock.now() - before;
        // The sleep may overshoot on a loaded machine but never undershoots.
        assert!(
            (0.07..0.5).contains(&advanced),
            "advanced {advanced}s over an 80ms sleep"
        );
    }

    #[test]
    fn reset_rebases_like_set() {
        let clock = MasterClock::new();
        clock.set(30.0);
        clock.reset(5.0);
        let now = clock.now();
        assert!((now - 5.0).abs() < JITTER, "clock read {now}");
    }

    #[test]
    fn clones_share_one_clock() {
        let clock = MasterClock::new();
        let reader = clock.clone();
        clock.set(12.0);
        assert!((reader.now() - 12.0).abs() < JITTER);
    }

    #[test]
    fn starts_at_zero() {
        let clock = MasterClock::new();
        assert!(clock.now().abs() < JITTER);
    }
}
