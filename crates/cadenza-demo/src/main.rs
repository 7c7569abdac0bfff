//! Minimal playback demo: `cadenza-demo <media-file>`.
//!
//! Plays the file in a fixed 1280×720 window. Space pauses/resumes, S
//! toggles 0.5×/1.0× speed, E or Esc exits.

use cadenza_core::Player;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadenza=info,cadenza_core=info")),
        )
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: cadenza-demo <media-file>");
        std::process::exit(2);
    };

    let mut player = Player::new(path);
    if let Err(e) = player.start() {
        tracing::error!("failed to start playback: {e}");
        std::process::exit(1);
    }

    if let Err(e) = cadenza::run(player) {
        tracing::error!("playback window failed: {e}");
        std::process::exit(1);
    }
}
