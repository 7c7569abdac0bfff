//! The playback window.
//!
//! Runs on the caller's foreground thread (window systems want main-thread
//! affinity) and drives presentation: peek the head of the video frame
//! queue, compare its timestamp against the master clock, and either
//! schedule a repaint for when the frame comes due or draw it now. Frames
//! past their deadline are still shown once — the audio clock advancing in
//! real time re-aligns subsequent frames, and a brief catch-up burst beats
//! dropped pictures.
//!
//! The window is fixed at 1280×720 and non-resizable; video is drawn into a
//! centred letterbox rectangle over a black clear.

use std::sync::Arc;
use std::time::Duration;

use eframe::egui;
use ffmpeg_next as ffmpeg;

use cadenza_core::{
    pts_to_secs, BoundedQueue, MasterClock, PeekResult, Player, PlayerError, PopResult, VideoFrame,
};

use crate::sync_stats::SyncStats;

pub const WINDOW_WIDTH: f32 = 1280.0;
pub const WINDOW_HEIGHT: f32 = 720.0;

/// Idle refresh interval: pause polling, empty-queue polling and the cap on
/// how long the surface sleeps while a frame is pending.
const REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Opens the playback window and blocks until it closes.
///
/// The player should already be started; the window consumes it and stops
/// the session on exit.
pub fn run(player: Player) -> Result<(), PlayerError> {
    let viewport = egui::ViewportBuilder::default()
        .with_title("cadenza")
        .with_inner_size([WINDOW_WIDTH, WINDOW_HEIGHT])
        .with_resizable(false);
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "cadenza",
        options,
        Box::new(move |_cc| Ok(Box::new(PlayerApp::new(player)))),
    )
    .map_err(|e| PlayerError::Surface(e.to_string()))
}

/// Computes the centred letterbox rectangle for a video inside a window,
/// preserving aspect ratio: `scale = min(win_w / vid_w, win_h / vid_h)`.
pub fn letterbox_rect(window: egui::Rect, video_width: u32, video_height: u32) -> egui::Rect {
    let scale = (window.width() / video_width as f32).min(window.height() / video_height as f32);
    let draw_w = video_width as f32 * scale;
    let draw_h = video_height as f32 * scale;
    let x = window.min.x + (window.width() - draw_w) / 2.0;
    let y = window.min.y + (window.height() - draw_h) / 2.0;
    egui::Rect::from_min_size(egui::pos2(x, y), egui::vec2(draw_w, draw_h))
}

struct PlayerApp {
    player: Player,
    frames: Arc<BoundedQueue<VideoFrame>>,
    clock: MasterClock,
    scaler: Option<ffmpeg::software::scaling::Context>,
    texture: Option<egui::TextureHandle>,
    stats: SyncStats,
}

impl PlayerApp {
    fn new(player: Player) -> Self {
        let frames = player.video_frames();
        let clock = player.clock();
        Self {
            player,
            frames,
            clock,
            scaler: None,
            texture: None,
            stats: SyncStats::new(),
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        let (exit, toggle_pause, toggle_speed) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Escape) || i.key_pressed(egui::Key::E),
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::S),
            )
        });

        if exit {
            self.player.stop();
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }
        if toggle_pause {
            if self.player.is_paused() {
                self.player.resume();
            } else {
                self.player.pause();
            }
        }
        if toggle_speed {
            let target = if self.player.speed() < 1.0 { 1.0 } else { 0.5 };
            let effective = self.player.set_speed(target);
            tracing::info!("playback speed {effective}x");
        }
    }

    /// One pacing step. Returns how long the surface may sleep before the
    /// next step; zero requests an immediate attempt at the next frame.
    fn refresh(&mut self, ctx: &egui::Context) -> Duration {
        if !self.player.is_started() || self.player.is_paused() {
            return REFRESH_INTERVAL;
        }
        let Some(info) = self.player.video_info() else {
            return REFRESH_INTERVAL;
        };

        let head_pts = match self.frames.peek(|frame| frame.pts().unwrap_or(0)) {
            PeekResult::Value(pts) => pts,
            PeekResult::Empty | PeekResult::Aborted => return REFRESH_INTERVAL,
        };

        let frame_secs = pts_to_secs(head_pts, info.time_base);
        let diff = frame_secs - self.clock.now();
        if diff > 0.0 {
            // Not due yet; sleep until it is, capped so input stays live.
            return Duration::from_secs_f64(diff.min(REFRESH_INTERVAL.as_secs_f64()));
        }

        if let PopResult::Item(frame) = self.frames.pop(Duration::from_millis(1)) {
            match self.upload(ctx, &frame) {
                Ok(()) => self.stats.record(diff),
                Err(e) => tracing::warn!("frame upload failed: {e}"),
            }
        }
        Duration::ZERO
    }

    /// Converts the frame to RGBA and uploads it as the current texture.
    fn upload(&mut self, ctx: &egui::Context, frame: &VideoFrame) -> Result<(), ffmpeg::Error> {
        let inner = frame.inner();
        self.ensure_scaler(inner.format(), inner.width(), inner.height())?;
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(ffmpeg::Error::Bug);
        };

        let mut rgba = ffmpeg::frame::Video::empty();
        scaler.run(inner, &mut rgba)?;

        let width = rgba.width() as usize;
        let height = rgba.height() as usize;
        let stride = rgba.stride(0);
        let data = rgba.data(0);

        // Drop the stride padding; egui expects tightly packed rows.
        let mut pixels = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            let row = y * stride;
            pixels.extend_from_slice(&data[row..row + width * 4]);
        }

        let image = egui::ColorImage::from_rgba_unmultiplied([width, height], &pixels);
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.texture =
                    Some(ctx.load_texture("video", image, egui::TextureOptions::LINEAR));
            }
        }
        Ok(())
    }

    fn ensure_scaler(
        &mut self,
        format: ffmpeg::format::Pixel,
        width: u32,
        height: u32,
    ) -> Result<(), ffmpeg::Error> {
        let needs_recreate = self.scaler.as_ref().is_none_or(|s| {
            let input = s.input();
            input.format != format || input.width != width || input.height != height
        });
        if needs_recreate {
            self.scaler = Some(ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGBA,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?);
        }
        Ok(())
    }
}

impl eframe::App for PlayerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_keys(ctx);
        let remain = self.refresh(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE.fill(egui::Color32::BLACK))
            .show(ctx, |ui| {
                let window = ui.max_rect();
                if let (Some(texture), Some(info)) = (&self.texture, self.player.video_info()) {
                    let rect = letterbox_rect(window, info.width, info.height);
                    let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
                    ui.painter().image(texture.id(), rect, uv, egui::Color32::WHITE);
                }
            });

        if remain.is_zero() {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(remain);
        }
    }
}

impl Drop for PlayerApp {
    fn drop(&mut self) {
        self.stats.log_summary();
        self.player.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::{pos2, Rect};

    fn window() -> Rect {
        Rect::from_min_size(pos2(0.0, 0.0), egui::vec2(WINDOW_WIDTH, WINDOW_HEIGHT))
    }

    #[test]
    fn matching_aspect_fills_the_window() {
        let rect = letterbox_rect(window(), 1920, 1080);
        assert_eq!(rect.min, pos2(0.0, 0.0));
        assert_eq!(rect.width(), WINDOW_WIDTH);
        assert_eq!(rect.height(), WINDOW_HEIGHT);
    }

    #[test]
    fn narrow_video_is_pillarboxed_and_centred() {
        // 4:3 content in a 16:9 window: full height, centred horizontally.
        let rect = letterbox_rect(window(), 640, 480);
        assert_eq!(rect.height(), WINDOW_HEIGHT);
        assert_eq!(rect.width(), 960.0);
        assert_eq!(rect.min.x, 160.0);
        assert_eq!(rect.min.y, 0.0);
    }

    #[test]
    fn wide_video_is_letterboxed_and_centred() {
        // 2.35:1 content: full width, black bars above and below.
        let rect = letterbox_rect(window(), 2350, 1000);
        assert_eq!(rect.width(), WINDOW_WIDTH);
        let expected_h = 1000.0 * (WINDOW_WIDTH / 2350.0);
        assert!((rect.height() - expected_h).abs() < 0.5);
        assert!((rect.min.y - (WINDOW_HEIGHT - rect.height()) / 2.0).abs() < 0.5);
        assert_eq!(rect.min.x, 0.0);
    }

    #[test]
    fn offset_window_origin_is_respected() {
        let window = Rect::from_min_size(pos2(100.0, 50.0), egui::vec2(200.0, 200.0));
        let rect = letterbox_rect(window, 100, 100);
        assert_eq!(rect.min, pos2(100.0, 50.0));
        assert_eq!(rect.width(), 200.0);
    }
}
