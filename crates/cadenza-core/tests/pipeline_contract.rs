//! Pipeline Contract Integration Tests
//!
//! These tests exercise the cross-thread contracts the pipeline stages rely
//! on: queue FIFO ordering and ownership transfer under real contention,
//! bounded cancellation latency after abort, pause-barrier round trips and
//! the audio-mastered clock arithmetic.
//!
//! Full playback runs need a media file and audio/video devices and are
//! exercised through the demo binary instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cadenza_core::{BoundedQueue, MasterClock, PauseBarrier, PopResult};

/// Everything a producer pushes arrives at the consumer exactly once, in
/// insertion order, across real threads.
#[test]
fn queue_preserves_order_across_threads() {
    const COUNT: u64 = 10_000;
    let queue: Arc<BoundedQueue<u64>> = Arc::new(BoundedQueue::new());

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..COUNT {
                queue.push(i);
            }
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut received = Vec::with_capacity(COUNT as usize);
            while received.len() < COUNT as usize {
                match queue.pop(Duration::from_millis(100)) {
                    PopResult::Item(i) => received.push(i),
                    PopResult::TimedOut => {}
                    PopResult::Aborted => break,
                }
            }
            received
        })
    };

    producer.join().unwrap();
    let received = consumer.join().unwrap();
    assert_eq!(received.len(), COUNT as usize);
    assert!(received.windows(2).all(|w| w[1] == w[0] + 1));
}

/// A consumer parked on an empty queue unblocks promptly once another
/// thread aborts it, well inside its nominal timeout.
#[test]
fn abort_cancels_blocked_consumers_quickly() {
    let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new());

    let mut consumers = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        consumers.push(thread::spawn(move || {
            let start = Instant::now();
            let result = queue.pop(Duration::from_secs(30));
            (result, start.elapsed())
        }));
    }

    thread::sleep(Duration::from_millis(50));
    queue.abort();

    for consumer in consumers {
        let (result, waited) = consumer.join().unwrap();
        assert_eq!(result, PopResult::Aborted);
        assert!(
            waited < Duration::from_millis(500),
            "consumer took {waited:?} to observe abort"
        );
    }
}

/// Items popped before an abort are owned by their taker; the abort only
/// releases what the queue still holds.
#[test]
fn abort_releases_only_queue_owned_items() {
    struct Counted(Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let queue = BoundedQueue::new();
    for _ in 0..5 {
        queue.push(Counted(Arc::clone(&drops)));
    }

    let taken: Vec<_> = (0..2)
        .map(|_| queue.pop(Duration::ZERO).into_item().unwrap())
        .collect();
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    queue.abort();
    assert_eq!(drops.load(Ordering::SeqCst), 3);

    drop(taken);
    assert_eq!(drops.load(Ordering::SeqCst), 5);
}

/// Workers parked on the pause barrier resume exactly when asked and make
/// no progress while paused.
#[test]
fn pause_barrier_round_trip() {
    let barrier = PauseBarrier::new();
    let progress = Arc::new(AtomicUsize::new(0));

    barrier.pause();
    let worker = {
        let barrier = barrier.clone();
        let progress = Arc::clone(&progress);
        thread::spawn(move || {
            for _ in 0..3 {
                barrier.wait_while_paused();
                progress.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(progress.load(Ordering::SeqCst), 0);

    barrier.resume();
    worker.join().unwrap();
    assert_eq!(progress.load(Ordering::SeqCst), 3);
}

/// Stop must never leave workers parked: releasing the barrier unblocks a
/// paused worker even though nobody called resume.
#[test]
fn release_unparks_paused_workers_for_teardown() {
    let barrier = PauseBarrier::new();
    barrier.pause();

    let worker = {
        let barrier = barrier.clone();
        thread::spawn(move || {
            let start = Instant::now();
            barrier.wait_while_paused();
            start.elapsed()
        })
    };

    thread::sleep(Duration::from_millis(30));
    barrier.release();
    let waited = worker.join().unwrap();
    assert!(waited < Duration::from_millis(500));
}

/// The clock advances at wall rate between stamps and jumps exactly to the
/// stamped timestamp, regardless of which thread stamps it.
#[test]
fn clock_is_stamped_from_another_thread() {
    let clock = MasterClock::new();

    let stamper = {
        let clock = clock.clone();
        thread::spawn(move || {
            // Plays the audio callback's role.
            clock.set(7.0);
        })
    };
    stamper.join().unwrap();

    let first = clock.now();
    assert!((first - 7.0).abs() < 0.05, "clock read {first}");

    thread::sleep(Duration::from_millis(60));
    let second = clock.now();
    let advanced = second - first;
    assert!(
        (0.05..0.5).contains(&advanced),
        "advanced {advanced}s over a 60ms sleep"
    );
}
