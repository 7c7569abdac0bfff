//! Playback session controller.
//!
//! Owns the whole graph — four queues, master clock, pause barrier, demuxer,
//! both decode workers and the audio output — and exposes the command
//! surface: `start`, `pause`, `resume`, `set_speed`, `stop`. The video
//! surface runs on the caller's foreground thread (window systems want main-
//! thread affinity); it reads the video frame queue, the clock and the
//! paused flag through the accessors below.

use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rational;

use crate::audio_output::{clamp_speed, AudioOutput};
use crate::clock::MasterClock;
use crate::decode::{AudioCodec, DecodeWorker, VideoCodec};
use crate::demux::Demuxer;
use crate::media::{AudioFrame, Packet, PlayerError, VideoFrame};
use crate::pause::PauseBarrier;
use crate::queue::BoundedQueue;

/// Video stream facts the surface needs to open its window.
#[derive(Debug, Clone, Copy)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
}

/// One playback session over one container file.
///
/// `started` moves `false → true → false` exactly once; a stopped player
/// refuses to restart — construct a new one per file.
pub struct Player {
    path: String,

    clock: MasterClock,
    barrier: PauseBarrier,

    audio_packets: Arc<BoundedQueue<Packet>>,
    video_packets: Arc<BoundedQueue<Packet>>,
    audio_frames: Arc<BoundedQueue<AudioFrame>>,
    video_frames: Arc<BoundedQueue<VideoFrame>>,

    demuxer: Option<Demuxer>,
    audio_decoder: Option<DecodeWorker>,
    video_decoder: Option<DecodeWorker>,
    audio_output: Option<AudioOutput>,
    video_info: Option<VideoInfo>,

    started: bool,
    stopped: bool,
    paused: bool,
    speed: f32,
}

impl Player {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            clock: MasterClock::new(),
            barrier: PauseBarrier::new(),
            audio_packets: Arc::new(BoundedQueue::new()),
            video_packets: Arc::new(BoundedQueue::new()),
            audio_frames: Arc::new(BoundedQueue::new()),
            video_frames: Arc::new(BoundedQueue::new()),
            demuxer: None,
            audio_decoder: None,
            video_decoder: None,
            audio_output: None,
            video_info: None,
            started: false,
            stopped: false,
            paused: false,
            speed: 1.0,
        }
    }

    /// Brings the pipeline up and launches the worker threads.
    ///
    /// Order: open the container, construct both decoders, rebase the clock,
    /// open the audio sink, capture the video surface parameters, then start
    /// the demux thread followed by the two decode threads. The first
    /// failure aborts and leaves the session un-started with no thread
    /// launched.
    pub fn start(&mut self) -> Result<(), PlayerError> {
        if self.started {
            return Ok(());
        }
        if self.stopped {
            return Err(PlayerError::Stopped);
        }

        // Process-wide codec/format registration; idempotent.
        ffmpeg::init().map_err(|e| PlayerError::Open(format!("ffmpeg init: {e}")))?;

        let mut demuxer = Demuxer::open(&self.path)?;
        let audio_desc = demuxer.audio_stream().clone();
        let video_desc = demuxer.video_stream().clone();

        let audio_codec = AudioCodec::new(&audio_desc)?;
        let video_codec = VideoCodec::new(&video_desc)?;

        self.clock.reset(0.0);

        let audio_output = AudioOutput::new(
            self.clock.clone(),
            audio_codec.params(),
            Arc::clone(&self.audio_frames),
            audio_desc.time_base,
        )?;

        self.video_info = Some(VideoInfo {
            width: video_codec.width(),
            height: video_codec.height(),
            time_base: video_desc.time_base,
        });

        demuxer.start(
            Arc::clone(&self.audio_packets),
            Arc::clone(&self.video_packets),
            self.barrier.clone(),
        );
        self.audio_decoder = Some(DecodeWorker::spawn(
            "audio",
            audio_codec,
            Arc::clone(&self.audio_packets),
            Arc::clone(&self.audio_frames),
            self.barrier.clone(),
        ));
        self.video_decoder = Some(DecodeWorker::spawn(
            "video",
            video_codec,
            Arc::clone(&self.video_packets),
            Arc::clone(&self.video_frames),
            self.barrier.clone(),
        ));

        self.demuxer = Some(demuxer);
        self.audio_output = Some(audio_output);
        self.started = true;
        tracing::info!("playback started: {}", self.path);
        Ok(())
    }

    /// Tears the session down in reverse dependency order; idempotent.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }

        // Unpark everything first so no worker is left waiting on the
        // barrier while we try to join it.
        self.paused = false;
        self.barrier.release();

        // Consumers before the producer.
        if let Some(mut worker) = self.video_decoder.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.audio_decoder.take() {
            worker.stop();
        }
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.stop();
        }

        // Closing the sink stops the pull callback before its queue dies.
        self.audio_output = None;

        self.audio_frames.abort();
        self.video_frames.abort();
        self.audio_packets.abort();
        self.video_packets.abort();

        self.started = false;
        self.stopped = true;
        tracing::info!("playback stopped");
    }

    /// Parks the workers and silences the sink. The clock stops being
    /// ticked, so video holds as well.
    pub fn pause(&mut self) {
        if !self.started || self.paused {
            return;
        }
        self.paused = true;
        self.barrier.pause();
        if let Some(audio) = &self.audio_output {
            audio.pause();
        }
        tracing::debug!("paused");
    }

    pub fn resume(&mut self) {
        if !self.started || !self.paused {
            return;
        }
        self.paused = false;
        if let Some(audio) = &self.audio_output {
            audio.resume();
        }
        self.barrier.resume();
        tracing::debug!("resumed");
    }

    /// Sets the playback speed, clamped to the supported range, and returns
    /// the effective value. Video follows automatically: its pacing is
    /// driven by the audio-updated master clock.
    pub fn set_speed(&mut self, speed: f32) -> f32 {
        self.speed = match self.audio_output.as_mut() {
            Some(audio) => audio.set_speed(speed),
            None => clamp_speed(speed),
        };
        self.speed
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.started && self.paused
    }

    /// Clock handle for the video pacer.
    pub fn clock(&self) -> MasterClock {
        self.clock.clone()
    }

    /// Frame queue the video surface consumes from.
    pub fn video_frames(&self) -> Arc<BoundedQueue<VideoFrame>> {
        Arc::clone(&self.video_frames)
    }

    /// Available once `start` has succeeded.
    pub fn video_info(&self) -> Option<VideoInfo> {
        self.video_info
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_is_clamped_before_start() {
        let mut player = Player::new("nonexistent.mkv");
        assert_eq!(player.set_speed(0.1), 0.5);
        assert_eq!(player.speed(), 0.5);
        assert_eq!(player.set_speed(2.0), 1.0);
        assert_eq!(player.speed(), 1.0);
        assert_eq!(player.set_speed(0.75), 0.75);
    }

    #[test]
    fn set_speed_is_idempotent() {
        let mut player = Player::new("nonexistent.mkv");
        let first = player.set_speed(0.5);
        let second = player.set_speed(0.5);
        assert_eq!(first, second);
        assert_eq!(player.speed(), 0.5);
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut player = Player::new("nonexistent.mkv");
        player.stop();
        player.stop();
        assert!(!player.is_started());
    }

    #[test]
    fn pause_requires_a_running_session() {
        let mut player = Player::new("nonexistent.mkv");
        player.pause();
        assert!(!player.is_paused());
        player.resume();
        assert!(!player.is_paused());
    }

    #[test]
    fn start_fails_cleanly_on_missing_file() {
        let mut player = Player::new("definitely/not/a/real/path.mp4");
        let err = player.start().unwrap_err();
        assert!(matches!(
            err,
            PlayerError::Open(_) | PlayerError::MissingStream(_)
        ));
        assert!(!player.is_started());
    }
}
