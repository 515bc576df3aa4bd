use std::path::PathBuf;
use thiserror::Error;

/// Input rejected at the point of entry. Never changes state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("Enter a name.")]
  EmptyName,
  #[error("Folder '{0}' already exists.")]
  DuplicateFolder(String),
  #[error("Folder '{0}' does not exist.")]
  UnknownFolder(String),
  #[error("A playlist named '{0}' already exists in this folder.")]
  DuplicatePlaylist(String),
  #[error("Create a folder first.")]
  NoFolder,
  #[error("Select a playlist first.")]
  NoPlaylist,
  #[error("Select a track first.")]
  NoTrack,
  #[error("Select a search result first.")]
  NoResult,
  #[error("The playlist is empty.")]
  EmptyPlaylist,
  #[error("Enter a search term.")]
  EmptyQuery,
  #[error("Enter a URL.")]
  EmptyUrl,
  #[error("URL must be a YouTube link.")]
  NotVideoUrl,
  #[error("URL must be a Spotify playlist (https://open.spotify.com/playlist/...).")]
  NotPlaylistUrl,
  #[error("Start time must be a whole number of seconds (0 or more).")]
  InvalidStartTime,
  #[error("Playlist '{0}' no longer exists.")]
  PlaylistGone(String),
}

/// Failure reading or writing the library document.
#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("Failed to read {}: {source}", path.display())]
  Read { path: PathBuf, source: std::io::Error },
  #[error("Failed to parse {}: {source}", path.display())]
  Parse { path: PathBuf, source: serde_json::Error },
  #[error("Failed to write {}: {source}", path.display())]
  Write { path: PathBuf, source: std::io::Error },
  #[error("Failed to serialize library: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Failure talking to the media backend.
#[derive(Debug, Error)]
pub enum PlayerError {
  #[error("Player unavailable")]
  Unavailable,
  #[error("mpv not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")]
  NotInstalled,
  #[error("Failed to start mpv: {0}")]
  Spawn(std::io::Error),
  #[error("mpv IPC error: {0}")]
  Ipc(#[from] std::io::Error),
  #[error("mpv did not answer within {0:?}")]
  Timeout(std::time::Duration),
  #[error("mpv rejected '{command}': {reason}")]
  Rejected { command: String, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
  /// A required external tool is missing; the feature is disabled but the app keeps running.
  #[error("{0}")]
  Configuration(String),
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("{0:#}")]
  Backend(#[from] anyhow::Error),
  #[error(transparent)]
  Persistence(#[from] PersistenceError),
  #[error(transparent)]
  Player(#[from] PlayerError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_errors_render_user_facing_text() {
    assert_eq!(ValidationError::DuplicateFolder("Combat".into()).to_string(), "Folder 'Combat' already exists.");
    assert_eq!(ValidationError::EmptyName.to_string(), "Enter a name.");
  }

  #[test]
  fn backend_error_keeps_context_chain() {
    let err: Error = anyhow::anyhow!("connection reset").context("yt-dlp search failed").into();
    assert_eq!(err.to_string(), "yt-dlp search failed: connection reset");
  }

  #[test]
  fn persistence_error_names_the_file() {
    let err = PersistenceError::Write {
      path: PathBuf::from("/tmp/library.json"),
      source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    };
    assert_eq!(err.to_string(), "Failed to write /tmp/library.json: denied");
  }
}
