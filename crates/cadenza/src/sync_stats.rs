//! Presentation-drift bookkeeping for the video surface.
//!
//! Each presented frame records how far its timestamp sat from the master
//! clock at the moment it was drawn (negative = the frame was past due).
//! The surface logs the summary when the window closes; there is no runtime
//! policy attached to these numbers.

/// Milliseconds of lateness above which a frame counts as visibly late.
pub const LATE_FRAME_THRESHOLD_MS: f64 = 40.0;

#[derive(Debug, Default)]
pub struct SyncStats {
    frames: u64,
    late_frames: u64,
    max_lateness_ms: f64,
    total_lateness_ms: f64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one presented frame. `drift_secs` is `frame_pts - clock` at
    /// presentation time; zero or below means the frame was due.
    pub fn record(&mut self, drift_secs: f64) {
        let lateness_ms = (-drift_secs).max(0.0) * 1000.0;
        self.frames += 1;
        self.total_lateness_ms += lateness_ms;
        if lateness_ms > self.max_lateness_ms {
            self.max_lateness_ms = lateness_ms;
        }
        if lateness_ms > LATE_FRAME_THRESHOLD_MS {
            self.late_frames += 1;
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    pub fn max_lateness_ms(&self) -> f64 {
        self.max_lateness_ms
    }

    pub fn mean_lateness_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.total_lateness_ms / self.frames as f64
        }
    }

    /// Emits the session summary; called once when the surface closes.
    pub fn log_summary(&self) {
        if self.frames == 0 {
            return;
        }
        tracing::debug!(
            "presented {} frames, {} late (max {:.1} ms, mean {:.1} ms behind clock)",
            self.frames,
            self.late_frames,
            self.max_lateness_ms,
            self.mean_lateness_ms(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_time_frames_are_not_late() {
        let mut stats = SyncStats::new();
        stats.record(0.0);
        stats.record(0.005); // 5ms early at presentation
        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.late_frames(), 0);
        assert_eq!(stats.max_lateness_ms(), 0.0);
    }

    #[test]
    fn late_frames_are_counted_and_tracked() {
        let mut stats = SyncStats::new();
        stats.record(-0.010); // 10ms late, under threshold
        stats.record(-0.120); // 120ms late
        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.late_frames(), 1);
        assert!((stats.max_lateness_ms() - 120.0).abs() < 1e-9);
        assert!((stats.mean_lateness_ms() - 65.0).abs() < 1e-9);
    }

    #[test]
    fn empty_stats_have_zero_mean() {
        let stats = SyncStats::new();
        assert_eq!(stats.mean_lateness_ms(), 0.0);
    }
}
