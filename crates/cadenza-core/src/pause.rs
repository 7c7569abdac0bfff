//! Pause barrier shared by the pipeline workers.
//!
//! Every worker gets a clone of the barrier and parks on it at the top of
//! its loop while playback is paused. The controller owns the other side:
//! `pause`/`resume` during playback, `release` during teardown. Release is
//! terminal — it unparks every worker and the barrier never blocks again,
//! which bounds cancellation latency for threads that were parked when stop
//! was requested.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct BarrierState {
    paused: bool,
    released: bool,
}

#[derive(Clone)]
pub struct PauseBarrier {
    inner: Arc<(Mutex<BarrierState>, Condvar)>,
}

impl PauseBarrier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(BarrierState {
                    paused: false,
                    released: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Parks workers at their next check; already-running iterations finish.
    pub fn pause(&self) {
        let (state, _) = &*self.inner;
        state.lock().paused = true;
    }

    /// Unparks all workers.
    pub fn resume(&self) {
        let (state, condvar) = &*self.inner;
        state.lock().paused = false;
        condvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        let (state, _) = &*self.inner;
        let state = state.lock();
        state.paused && !state.released
    }

    /// Permanently opens the barrier. Used on stop so no worker stays parked
    /// during teardown; a released barrier cannot pause again.
    pub fn release(&self) {
        let (state, condvar) = &*self.inner;
        {
            let mut state = state.lock();
            state.paused = false;
            state.released = true;
        }
        condvar.notify_all();
    }

    /// Blocks the calling worker while playback is paused.
    pub fn wait_while_paused(&self) {
        let (state, condvar) = &*self.inner;
        let mut state = state.lock();
        while state.paused && !state.released {
            condvar.wait(&mut state);
        }
    }
}

impl Default for PauseBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn passes_through_when_not_paused() {
        let barrier = PauseBarrier::new();
        let start = Instant::now();
        barrier.wait_while_paused();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn resume_unparks_waiting_worker() {
        let barrier = PauseBarrier::new();
        barrier.pause();
        assert!(barrier.is_paused());

        let worker = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait_while_paused();
            })
        };

        thread::sleep(Duration::from_millis(30));
        barrier.resume();
        worker.join().unwrap();
        assert!(!barrier.is_paused());
    }

    #[test]
    fn release_unparks_and_stays_open() {
        let barrier = PauseBarrier::new();
        barrier.pause();

        let worker = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(30));
        barrier.release();
        worker.join().unwrap();

        // Pausing a released barrier no longer blocks anyone.
        barrier.pause();
        assert!(!barrier.is_paused());
        let start = Instant::now();
        barrier.wait_while_paused();
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
