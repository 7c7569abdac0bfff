//! cadenza: the playback window over `cadenza-core`.
//!
//! The core crate runs the pipeline (demux → decode → audio output) and
//! masters the clock from the audio callback; this crate paces video frames
//! against that clock on the foreground thread and handles the keyboard:
//! Space pauses and resumes, S toggles 0.5×/1.0× speed, E and Esc exit.

pub mod surface;
pub mod sync_stats;

pub use surface::{letterbox_rect, run, WINDOW_HEIGHT, WINDOW_WIDTH};
pub use sync_stats::SyncStats;
