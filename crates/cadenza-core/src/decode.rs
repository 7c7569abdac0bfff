//! Per-stream decode workers.
//!
//! One worker thread per elementary stream pops packets, feeds the codec and
//! pushes decoded frames in display order onto the stream's frame queue. The
//! audio and video workers share one loop; the codec specifics live behind
//! [`StreamCodec`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ffmpeg_next as ffmpeg;

use crate::media::{AudioFrame, AudioParams, Packet, PlayerError, StreamDescriptor, VideoFrame};
use crate::pause::PauseBarrier;
use crate::queue::{BoundedQueue, PopResult};

/// Frame-queue depth above which a decoder backs off. Decoded frames are
/// large, so this sits far below the packet watermark.
pub const FRAME_HIGH_WATERMARK: usize = 10;

const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(10);
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// How long a worker blocks on its packet queue per iteration; keeps
/// pause and stop responsive when no packets arrive.
const PACKET_POP_TIMEOUT: Duration = Duration::from_millis(10);

/// The codec side of a decode worker.
///
/// One packet submitted may yield zero, one or several frames (reordering,
/// codec delay); `receive_frame` is drained until the codec asks for more
/// input.
pub trait StreamCodec: Send {
    type Output: Send + 'static;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), ffmpeg::Error>;
    fn receive_frame(&mut self) -> Result<Self::Output, ffmpeg::Error>;

    /// Resets codec state and discards frames still buffered inside the
    /// codec (not those already pushed downstream).
    fn flush(&mut self);
}

/// Audio decoder constructed from the stream's codec parameters.
pub struct AudioCodec {
    decoder: ffmpeg::decoder::Audio,
}

impl AudioCodec {
    pub fn new(descriptor: &StreamDescriptor) -> Result<Self, PlayerError> {
        let context = ffmpeg::codec::context::Context::from_parameters(
            descriptor.parameters.clone(),
        )
        .map_err(|e| PlayerError::DecoderInit(format!("audio codec context: {e}")))?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| PlayerError::DecoderInit(format!("audio decoder: {e}")))?;
        Ok(Self { decoder })
    }

    /// Source format the audio output must accept.
    pub fn params(&self) -> AudioParams {
        let layout = if self.decoder.channel_layout().is_empty() {
            ffmpeg::ChannelLayout::default(i32::from(self.decoder.channels()))
        } else {
            self.decoder.channel_layout()
        };
        AudioParams {
            rate: self.decoder.rate(),
            channel_layout: layout,
            format: self.decoder.format(),
        }
    }
}

impl StreamCodec for AudioCodec {
    type Output = AudioFrame;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), ffmpeg::Error> {
        self.decoder.send_packet(packet.inner())
    }

    fn receive_frame(&mut self) -> Result<AudioFrame, ffmpeg::Error> {
        let mut frame = ffmpeg::frame::Audio::empty();
        self.decoder.receive_frame(&mut frame)?;
        Ok(AudioFrame::new(frame))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

// SAFETY: the codec context is moved into the worker thread at spawn and is
// only ever touched from that thread (same argument the wrapped FFmpeg
// decoder contexts rely on everywhere in this crate).
unsafe impl Send for AudioCodec {}

/// Video decoder constructed from the stream's codec parameters.
pub struct VideoCodec {
    decoder: ffmpeg::decoder::Video,
}

impl VideoCodec {
    pub fn new(descriptor: &StreamDescriptor) -> Result<Self, PlayerError> {
        let context = ffmpeg::codec::context::Context::from_parameters(
            descriptor.parameters.clone(),
        )
        .map_err(|e| PlayerError::DecoderInit(format!("video codec context: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PlayerError::DecoderInit(format!("video decoder: {e}")))?;
        Ok(Self { decoder })
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }
}

impl StreamCodec for VideoCodec {
    type Output = VideoFrame;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), ffmpeg::Error> {
        self.decoder.send_packet(packet.inner())
    }

    fn receive_frame(&mut self) -> Result<VideoFrame, ffmpeg::Error> {
        let mut frame = ffmpeg::frame::Video::empty();
        self.decoder.receive_frame(&mut frame)?;
        Ok(VideoFrame::new(frame))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

// SAFETY: see AudioCodec.
unsafe impl Send for VideoCodec {}

/// Handle to a running decode thread.
pub struct DecodeWorker {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Moves `codec` onto a new thread and starts decoding.
    pub fn spawn<C>(
        kind: &'static str,
        codec: C,
        packets: Arc<BoundedQueue<Packet>>,
        frames: Arc<BoundedQueue<C::Output>>,
        barrier: PauseBarrier,
    ) -> Self
    where
        C: StreamCodec + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_flag);
        let handle = thread::spawn(move || {
            decode_loop(kind, codec, packets, frames, barrier, stop);
        });
        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the worker and joins it; idempotent.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop<C: StreamCodec>(
    kind: &'static str,
    mut codec: C,
    packets: Arc<BoundedQueue<Packet>>,
    frames: Arc<BoundedQueue<C::Output>>,
    barrier: PauseBarrier,
    stop_flag: Arc<AtomicBool>,
) {
    tracing::debug!("{kind} decoder running");

    while !stop_flag.load(Ordering::Acquire) {
        barrier.wait_while_paused();
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        if frames.len() > FRAME_HIGH_WATERMARK {
            thread::sleep(BACKPRESSURE_SLEEP);
            continue;
        }

        let packet = match packets.pop(PACKET_POP_TIMEOUT) {
            PopResult::Item(packet) => packet,
            PopResult::TimedOut => {
                thread::sleep(IDLE_SLEEP);
                continue;
            }
            PopResult::Aborted => break,
        };

        // The codec copies what it needs out of the packet on submit; the
        // packet is released right after.
        if let Err(e) = codec.send_packet(&packet) {
            tracing::error!("{kind} decoder rejected packet: {e}");
            break;
        }
        drop(packet);

        loop {
            match codec.receive_frame() {
                Ok(frame) => frames.push(frame),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    break;
                }
                Err(e) => {
                    // Fatal to this worker only; the other stages keep
                    // running and the controller tears down via stop.
                    tracing::error!("{kind} decoder failed: {e}");
                    return;
                }
            }
        }
    }

    tracing::debug!("{kind} decoder exited");
}
