//! Container demultiplexing.
//!
//! One thread reads framed packets from the container and routes each to the
//! audio or video packet queue. Backpressure is a soft watermark: when either
//! downstream queue is deep the reader sleeps briefly instead of growing the
//! queues without bound while a decoder stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ffmpeg_next as ffmpeg;

use crate::media::{Packet, PlayerError, StreamDescriptor};
use crate::pause::PauseBarrier;
use crate::queue::BoundedQueue;

/// Packet-queue depth above which the reader backs off.
pub const PACKET_HIGH_WATERMARK: usize = 100;

/// Back-off interval while a downstream queue is above its watermark.
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(10);

struct InputContext(ffmpeg::format::context::Input);

// SAFETY: the input context is owned by the demuxer until `start` moves it
// into the reader thread, which is its sole user from then on. It is never
// accessed concurrently.
unsafe impl Send for InputContext {}

/// Owns the opened container and the reader thread.
///
/// `open` must succeed before `start`; `stop` signals the thread, joins it
/// and is idempotent.
pub struct Demuxer {
    input: Option<InputContext>,
    audio: StreamDescriptor,
    video: StreamDescriptor,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Demuxer {
    /// Opens `path` and probes it for one decodable audio stream and one
    /// decodable video stream. Both are required.
    pub fn open(path: &str) -> Result<Self, PlayerError> {
        let input = ffmpeg::format::input(&path)
            .map_err(|e| PlayerError::Open(format!("{path}: {e}")))?;

        let audio = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .map(|s| describe(&s))
            .ok_or_else(|| {
                PlayerError::MissingStream(format!("{path} has no decodable audio stream"))
            })?;
        let video = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .map(|s| describe(&s))
            .ok_or_else(|| {
                PlayerError::MissingStream(format!("{path} has no decodable video stream"))
            })?;

        tracing::info!(
            "opened {path}: audio stream {} (tb {}), video stream {} (tb {})",
            audio.index,
            audio.time_base,
            video.index,
            video.time_base,
        );

        Ok(Self {
            input: Some(InputContext(input)),
            audio,
            video,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    pub fn audio_stream(&self) -> &StreamDescriptor {
        &self.audio
    }

    pub fn video_stream(&self) -> &StreamDescriptor {
        &self.video
    }

    /// Launches the reader thread. No-op when already running or when the
    /// input has already been consumed by a previous start.
    pub fn start(
        &mut self,
        audio_queue: Arc<BoundedQueue<Packet>>,
        video_queue: Arc<BoundedQueue<Packet>>,
        barrier: PauseBarrier,
    ) {
        let Some(input) = self.input.take() else {
            return;
        };
        self.stop_flag.store(false, Ordering::Release);

        let stop_flag = Arc::clone(&self.stop_flag);
        let audio_index = self.audio.index;
        let video_index = self.video.index;
        self.handle = Some(thread::spawn(move || {
            demux_loop(
                input,
                audio_queue,
                video_queue,
                audio_index,
                video_index,
                barrier,
                stop_flag,
            );
        }));
    }

    /// Signals the reader thread and joins it. After this returns no further
    /// pushes will occur.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn describe(stream: &ffmpeg::Stream<'_>) -> StreamDescriptor {
    StreamDescriptor {
        index: stream.index(),
        time_base: stream.time_base(),
        // Deep copy: the descriptor must outlive the format context, which
        // moves into the reader thread.
        parameters: stream.parameters().clone(),
    }
}

fn demux_loop(
    mut input: InputContext,
    audio_queue: Arc<BoundedQueue<Packet>>,
    video_queue: Arc<BoundedQueue<Packet>>,
    audio_index: usize,
    video_index: usize,
    barrier: PauseBarrier,
    stop_flag: Arc<AtomicBool>,
) {
    tracing::debug!("demuxer running");

    while !stop_flag.load(Ordering::Acquire) {
        barrier.wait_while_paused();
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        if audio_queue.len() > PACKET_HIGH_WATERMARK || video_queue.len() > PACKET_HIGH_WATERMARK {
            thread::sleep(BACKPRESSURE_SLEEP);
            continue;
        }

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut input.0) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                tracing::debug!("end of stream, demuxer exiting");
                break;
            }
            Err(e) => {
                // Read errors end the session; downstream stages drain
                // whatever is already queued.
                tracing::error!("packet read failed: {e}");
                break;
            }
        }

        let index = packet.stream();
        if index == audio_index {
            audio_queue.push(Packet::new(packet));
        } else if index == video_index {
            video_queue.push(Packet::new(packet));
        }
        // Packets of any other stream (subtitles, data) are dropped here.
    }

    tracing::debug!("demuxer exited");
}
