//! Shared media types flowing between the pipeline stages.
//!
//! Packets and frames wrap FFmpeg's reference-counted buffers. Each wrapped
//! value has exactly one owner at any time — the demuxer, a queue, a decoder
//! or an output — and moves between them, so the underlying buffers are
//! never touched from two threads at once.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rational;

/// A compressed unit read from the container, routed to one decoder.
pub struct Packet(ffmpeg::Packet);

impl Packet {
    pub fn new(inner: ffmpeg::Packet) -> Self {
        Self(inner)
    }

    /// Index of the stream this packet belongs to.
    pub fn stream(&self) -> usize {
        self.0.stream()
    }

    pub fn pts(&self) -> Option<i64> {
        self.0.pts()
    }

    pub fn inner(&self) -> &ffmpeg::Packet {
        &self.0
    }
}

// SAFETY: a Packet has a single owner throughout its life (demuxer → packet
// queue → decoder) and is never aliased across threads; the refcounted
// AVBuffer inside is only dropped by that single owner.
unsafe impl Send for Packet {}

/// A decoded audio frame in the decoder's native sample format.
pub struct AudioFrame(ffmpeg::frame::Audio);

impl AudioFrame {
    pub fn new(inner: ffmpeg::frame::Audio) -> Self {
        Self(inner)
    }

    pub fn pts(&self) -> Option<i64> {
        self.0.pts()
    }

    pub fn samples(&self) -> usize {
        self.0.samples()
    }

    pub fn inner(&self) -> &ffmpeg::frame::Audio {
        &self.0
    }
}

// SAFETY: same single-owner argument as Packet; frames move decoder → frame
// queue → output and are never shared.
unsafe impl Send for AudioFrame {}

/// A decoded video frame, planar YUV in the decoder's native pixel format.
pub struct VideoFrame(ffmpeg::frame::Video);

impl VideoFrame {
    pub fn new(inner: ffmpeg::frame::Video) -> Self {
        Self(inner)
    }

    pub fn pts(&self) -> Option<i64> {
        self.0.pts()
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn inner(&self) -> &ffmpeg::frame::Video {
        &self.0
    }
}

// SAFETY: same single-owner argument as Packet.
unsafe impl Send for VideoFrame {}

/// Static per-stream parameters captured once when the container is opened.
#[derive(Clone)]
pub struct StreamDescriptor {
    /// Stream index inside the container; packets are routed by it.
    pub index: usize,
    /// Unit converting this stream's timestamps to seconds.
    pub time_base: Rational,
    /// Codec id and codec-specific extradata for decoder construction.
    pub parameters: ffmpeg::codec::Parameters,
}

/// Source audio format handed from the audio decoder to the audio output.
#[derive(Clone, Copy)]
pub struct AudioParams {
    pub rate: u32,
    pub channel_layout: ffmpeg::ChannelLayout,
    pub format: ffmpeg::format::Sample,
}

/// Converts a stream timestamp to seconds using the stream time base.
pub fn pts_to_secs(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * f64::from(time_base)
}

/// Errors that can occur while bringing the pipeline up.
///
/// Runtime stage failures are not surfaced through this type: a worker that
/// hits a fatal codec or read error terminates itself, the rest of the graph
/// drains, and the controller observes it through the stop path.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// Failed to open or probe the container
    Open(String),
    /// The container is missing a decodable audio or video stream
    MissingStream(String),
    /// Decoder construction failed
    DecoderInit(String),
    /// The audio device could not be opened or configured
    AudioSink(String),
    /// The playback window could not be created
    Surface(String),
    /// The session was already stopped; a stopped player cannot restart
    Stopped,
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::Open(msg) => write!(f, "failed to open input: {msg}"),
            PlayerError::MissingStream(msg) => write!(f, "missing stream: {msg}"),
            PlayerError::DecoderInit(msg) => write!(f, "decoder initialisation failed: {msg}"),
            PlayerError::AudioSink(msg) => write!(f, "audio sink failed: {msg}"),
            PlayerError::Surface(msg) => write!(f, "video surface failed: {msg}"),
            PlayerError::Stopped => write!(f, "player session already stopped"),
        }
    }
}

impl std::error::Error for PlayerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_conversion_uses_time_base() {
        // 90 kHz time base, typical for video streams.
        let tb = Rational::new(1, 90_000);
        assert!((pts_to_secs(90_000, tb) - 1.0).abs() < 1e-9);
        assert!((pts_to_secs(45_000, tb) - 0.5).abs() < 1e-9);
        assert_eq!(pts_to_secs(0, tb), 0.0);
    }

    #[test]
    fn errors_render_their_context() {
        let err = PlayerError::Open("no such file".into());
        assert_eq!(err.to_string(), "failed to open input: no such file");
        assert_eq!(
            PlayerError::Stopped.to_string(),
            "player session already stopped"
        );
    }
}
