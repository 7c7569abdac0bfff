//! cadenza-core: the playback pipeline runtime.
//!
//! A four-stage producer/consumer graph with two parallel tails:
//!
//! ```text
//! demux ─► packet queue ─► audio decode ─► frame queue ─► audio output ──► master clock
//!    └────► packet queue ─► video decode ─► frame queue ─► video surface ◄─ reads clock
//! ```
//!
//! One OS thread per stage: the demuxer, one decoder per stream, the audio
//! device's own callback thread, and the caller's foreground thread driving
//! the video surface. Stages are connected by [`queue::BoundedQueue`]s that
//! items move through by ownership; producers back off on soft watermarks
//! instead of blocking. Audio masters the [`clock::MasterClock`] and video
//! paces itself against it.
//!
//! This crate has zero GUI dependency. The window lives in the `cadenza`
//! crate; a binary lives in `cadenza-demo`.

pub mod audio_output;
pub mod clock;
pub mod decode;
pub mod demux;
pub mod media;
pub mod pause;
pub mod player;
pub mod queue;

pub use clock::MasterClock;
pub use media::{
    pts_to_secs, AudioFrame, AudioParams, Packet, PlayerError, StreamDescriptor, VideoFrame,
};
pub use pause::PauseBarrier;
pub use player::{Player, VideoInfo};
pub use queue::{BoundedQueue, PeekResult, PopResult};
