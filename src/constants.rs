//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!`, so there is no runtime file I/O.
//! Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // yt-dlp
  pub search_max_results: usize,
  pub stream_format: String,

  // Playlist import
  pub import_track_limit: usize,
  pub http_timeout_secs: u64,
  pub user_agent: String,

  // Playback
  pub default_volume: u8,
  pub volume_step: u8,
  pub ready_poll_ms: u64,
  pub ready_timeout_ms: u64,
  pub ipc_timeout_ms: u64,
  /// mpv idle this long after a load means the stream was rejected.
  pub open_timeout_ms: u64,

  // Auto-advance monitor
  pub monitor_poll_ms: u64,
  pub advance_cooldown_ms: u64,

  // Status line
  pub error_display_secs: u64,
}

impl Constants {
  pub fn monitor_poll(&self) -> Duration {
    Duration::from_millis(self.monitor_poll_ms)
  }

  pub fn advance_cooldown(&self) -> Duration {
    Duration::from_millis(self.advance_cooldown_ms)
  }

  pub fn ready_poll(&self) -> Duration {
    Duration::from_millis(self.ready_poll_ms)
  }

  pub fn ready_timeout(&self) -> Duration {
    Duration::from_millis(self.ready_timeout_ms)
  }

  pub fn ipc_timeout(&self) -> Duration {
    Duration::from_millis(self.ipc_timeout_ms)
  }

  pub fn open_timeout(&self) -> Duration {
    Duration::from_millis(self.open_timeout_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
