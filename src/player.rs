use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PlayerError;

/// Coarse state reported by the media backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
  /// Nothing loaded.
  Stopped,
  /// Media requested, not yet decodable.
  Opening,
  Playing,
  Paused,
  /// The loaded media played to its end.
  Ended,
  /// The backend cannot be reached.
  Error,
}

/// The external media engine. Every call is a short request/response; implementations
/// are shared between the controller and the auto-advance monitor.
pub trait MediaBackend: Send + Sync {
  fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), PlayerError>>;
  fn set_paused(&self, paused: bool) -> BoxFuture<'_, Result<(), PlayerError>>;
  fn stop(&self) -> BoxFuture<'_, Result<(), PlayerError>>;
  fn seek(&self, position: Duration) -> BoxFuture<'_, Result<(), PlayerError>>;
  fn set_volume(&self, volume: u8) -> BoxFuture<'_, Result<(), PlayerError>>;
  fn state(&self) -> BoxFuture<'_, MediaState>;
  /// Release the engine on exit.
  fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// Wraps the media backend and tracks what the controller last asked it to do.
pub struct PlaybackEngine {
  backend: Option<Arc<dyn MediaBackend>>,
  current_url: Option<String>,
  is_playing: bool,
  volume: u8,
  ready_poll: Duration,
  ready_timeout: Duration,
  /// Start-offset seek waiting for the current load; belongs to that load only.
  pending_seek: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
  /// `backend` is `None` when no media engine could be started; every play then fails
  /// with [`PlayerError::Unavailable`].
  pub fn new(backend: Option<Arc<dyn MediaBackend>>, volume: u8, ready_poll: Duration, ready_timeout: Duration) -> Self {
    Self {
      backend,
      current_url: None,
      is_playing: false,
      volume: volume.min(100),
      ready_poll,
      ready_timeout,
      pending_seek: None,
    }
  }

  pub fn is_available(&self) -> bool {
    self.backend.is_some()
  }

  /// Handle for background observers (the auto-advance monitor).
  pub fn backend(&self) -> Option<Arc<dyn MediaBackend>> {
    self.backend.clone()
  }

  pub fn current_url(&self) -> Option<&str> {
    self.current_url.as_deref()
  }

  pub fn is_playing(&self) -> bool {
    self.is_playing
  }

  pub fn volume(&self) -> u8 {
    self.volume
  }

  /// Load `url` and start playing. The start offset is applied once the backend reports
  /// the media as ready, from a background task, so this returns as soon as the load is accepted.
  pub async fn play(&mut self, url: &str, start_offset_secs: u32) -> Result<(), PlayerError> {
    let Some(backend) = self.backend.clone() else {
      return Err(PlayerError::Unavailable);
    };

    self.cancel_pending_seek().await;
    backend.load(url).await?;
    if let Err(e) = backend.set_volume(self.volume).await {
      warn!(err = %e, "player: failed to apply volume after load");
    }
    self.current_url = Some(url.to_string());
    self.is_playing = true;
    info!(start_offset_secs, "player: media loaded");

    if start_offset_secs > 0 {
      let (poll, timeout) = (self.ready_poll, self.ready_timeout);
      self.pending_seek = Some(tokio::spawn(async move {
        seek_when_ready(backend.as_ref(), Duration::from_secs(start_offset_secs.into()), poll, timeout).await;
      }));
    }
    Ok(())
  }

  /// Abort the previous load's seek and wait until it can no longer reach the backend.
  async fn cancel_pending_seek(&mut self) {
    if let Some(handle) = self.pending_seek.take() {
      handle.abort();
      let _ = handle.await;
    }
  }

  /// Toggle between paused and playing. Calling it twice resumes.
  pub async fn pause(&mut self) -> Result<(), PlayerError> {
    let Some(backend) = self.backend.as_ref() else {
      return Err(PlayerError::Unavailable);
    };
    if self.current_url.is_none() {
      return Ok(());
    }
    backend.set_paused(self.is_playing).await?;
    self.is_playing = !self.is_playing;
    Ok(())
  }

  pub async fn stop(&mut self) -> Result<(), PlayerError> {
    self.cancel_pending_seek().await;
    self.is_playing = false;
    self.current_url = None;
    match self.backend.as_ref() {
      Some(backend) => backend.stop().await,
      None => Ok(()),
    }
  }

  /// Clamp to 0..=100 and forward. The value is kept even if the backend is down.
  pub async fn set_volume(&mut self, volume: i32) -> Result<u8, PlayerError> {
    self.volume = volume.clamp(0, 100) as u8;
    if let Some(backend) = self.backend.as_ref() {
      backend.set_volume(self.volume).await?;
    }
    Ok(self.volume)
  }

  pub async fn is_finished(&self) -> bool {
    match self.backend.as_ref() {
      Some(backend) => backend.state().await == MediaState::Ended,
      None => false,
    }
  }

  pub async fn shutdown(&mut self) {
    self.cancel_pending_seek().await;
    if let Some(backend) = self.backend.take() {
      backend.shutdown().await;
    }
    self.is_playing = false;
    self.current_url = None;
  }
}

/// Poll until the backend can take a seek, then seek. Gives up after `timeout`.
pub async fn seek_when_ready(backend: &dyn MediaBackend, position: Duration, poll: Duration, timeout: Duration) -> bool {
  let started = Instant::now();
  loop {
    match backend.state().await {
      MediaState::Playing | MediaState::Paused => break,
      MediaState::Error | MediaState::Stopped => {
        warn!("player: media went away before the start offset could be applied");
        return false;
      }
      MediaState::Opening | MediaState::Ended => {}
    }
    if started.elapsed() >= timeout {
      warn!(?timeout, "player: media not ready in time, skipping start offset");
      return false;
    }
    tokio::time::sleep(poll).await;
  }

  match backend.seek(position).await {
    Ok(()) => {
      debug!(?position, "player: applied start offset");
      true
    }
    Err(e) => {
      warn!(err = %e, "player: seek to start offset failed");
      false
    }
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use super::*;
  use futures::FutureExt;
  use std::sync::Mutex as StdMutex;

  /// Records every command; state is scripted by the test.
  #[derive(Default)]
  pub struct FakeBackend {
    pub calls: StdMutex<Vec<String>>,
    pub state: StdMutex<Option<MediaState>>,
    /// Reported as `Opening` for this many `state()` calls after a load.
    pub opening_polls: StdMutex<usize>,
    pub fail_load: StdMutex<bool>,
  }

  impl FakeBackend {
    pub fn set_state(&self, state: MediaState) {
      *self.state.lock().unwrap() = Some(state);
    }

    pub fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
      self.calls.lock().unwrap().push(call);
    }
  }

  impl MediaBackend for FakeBackend {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), PlayerError>> {
      async move {
        self.record(format!("load {url}"));
        if *self.fail_load.lock().unwrap() {
          return Err(PlayerError::Rejected { command: "loadfile".into(), reason: "unsupported".into() });
        }
        self.set_state(MediaState::Playing);
        Ok(())
      }
      .boxed()
    }

    fn set_paused(&self, paused: bool) -> BoxFuture<'_, Result<(), PlayerError>> {
      async move {
        self.record(format!("pause {paused}"));
        self.set_state(if paused { MediaState::Paused } else { MediaState::Playing });
        Ok(())
      }
      .boxed()
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), PlayerError>> {
      async move {
        self.record("stop".to_string());
        self.set_state(MediaState::Stopped);
        Ok(())
      }
      .boxed()
    }

    fn seek(&self, position: Duration) -> BoxFuture<'_, Result<(), PlayerError>> {
      async move {
        self.record(format!("seek {}", position.as_millis()));
        Ok(())
      }
      .boxed()
    }

    fn set_volume(&self, volume: u8) -> BoxFuture<'_, Result<(), PlayerError>> {
      async move {
        self.record(format!("volume {volume}"));
        Ok(())
      }
      .boxed()
    }

    fn state(&self) -> BoxFuture<'_, MediaState> {
      async move {
        let mut opening = self.opening_polls.lock().unwrap();
        if *opening > 0 {
          *opening -= 1;
          return MediaState::Opening;
        }
        self.state.lock().unwrap().unwrap_or(MediaState::Stopped)
      }
      .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
      async move { self.record("shutdown".to_string()) }.boxed()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::fake::FakeBackend;
  use super::*;

  fn engine(backend: &Arc<FakeBackend>) -> PlaybackEngine {
    PlaybackEngine::new(Some(backend.clone()), 70, Duration::from_millis(10), Duration::from_secs(1))
  }

  #[tokio::test]
  async fn play_without_backend_is_unavailable() {
    let mut engine = PlaybackEngine::new(None, 70, Duration::from_millis(10), Duration::from_secs(1));
    assert!(matches!(engine.play("http://x", 0).await, Err(PlayerError::Unavailable)));
    assert!(!engine.is_playing());
    assert!(!engine.is_finished().await);
  }

  #[tokio::test]
  async fn play_loads_and_applies_volume() {
    let backend = Arc::new(FakeBackend::default());
    let mut engine = engine(&backend);
    engine.play("http://stream", 0).await.unwrap();
    assert_eq!(engine.current_url(), Some("http://stream"));
    assert!(engine.is_playing());
    assert_eq!(backend.calls(), ["load http://stream", "volume 70"]);
  }

  #[tokio::test]
  async fn failed_load_keeps_previous_state() {
    let backend = Arc::new(FakeBackend::default());
    *backend.fail_load.lock().unwrap() = true;
    let mut engine = engine(&backend);
    assert!(engine.play("http://stream", 0).await.is_err());
    assert_eq!(engine.current_url(), None);
    assert!(!engine.is_playing());
  }

  #[tokio::test]
  async fn pause_is_a_toggle() {
    let backend = Arc::new(FakeBackend::default());
    let mut engine = engine(&backend);
    engine.play("http://stream", 0).await.unwrap();
    engine.pause().await.unwrap();
    assert!(!engine.is_playing());
    engine.pause().await.unwrap();
    assert!(engine.is_playing());
    assert!(backend.calls().ends_with(&["pause true".to_string(), "pause false".to_string()]));
  }

  #[tokio::test]
  async fn stop_clears_current_url() {
    let backend = Arc::new(FakeBackend::default());
    let mut engine = engine(&backend);
    engine.play("http://stream", 0).await.unwrap();
    engine.stop().await.unwrap();
    assert_eq!(engine.current_url(), None);
    assert!(!engine.is_playing());
  }

  #[tokio::test]
  async fn volume_is_clamped() {
    let backend = Arc::new(FakeBackend::default());
    let mut engine = engine(&backend);
    assert_eq!(engine.set_volume(150).await.unwrap(), 100);
    assert_eq!(engine.set_volume(-4).await.unwrap(), 0);
    assert_eq!(backend.calls(), ["volume 100", "volume 0"]);
  }

  #[tokio::test]
  async fn finished_reflects_ended_state() {
    let backend = Arc::new(FakeBackend::default());
    let engine = engine(&backend);
    backend.set_state(MediaState::Playing);
    assert!(!engine.is_finished().await);
    backend.set_state(MediaState::Ended);
    assert!(engine.is_finished().await);
  }

  #[tokio::test]
  async fn new_load_drops_previous_start_offset() {
    let backend = Arc::new(FakeBackend::default());
    *backend.opening_polls.lock().unwrap() = usize::MAX;
    let mut engine = engine(&backend);
    engine.play("http://a", 60).await.unwrap();
    engine.play("http://b", 0).await.unwrap();

    // b becomes ready; a's offset must not land on it.
    *backend.opening_polls.lock().unwrap() = 0;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.calls(), ["load http://a", "volume 70", "load http://b", "volume 70"]);

    engine.play("http://c", 30).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.calls().last().map(String::as_str), Some("seek 30000"));
  }

  #[tokio::test]
  async fn stop_cancels_pending_start_offset() {
    let backend = Arc::new(FakeBackend::default());
    *backend.opening_polls.lock().unwrap() = usize::MAX;
    let mut engine = engine(&backend);
    engine.play("http://a", 60).await.unwrap();
    engine.stop().await.unwrap();
    *backend.opening_polls.lock().unwrap() = 0;
    backend.set_state(MediaState::Playing);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!backend.calls().iter().any(|c| c.starts_with("seek")));
  }

  #[tokio::test]
  async fn seek_waits_until_ready() {
    let backend = FakeBackend::default();
    backend.set_state(MediaState::Playing);
    *backend.opening_polls.lock().unwrap() = 3;
    let ok = seek_when_ready(&backend, Duration::from_secs(30), Duration::from_millis(1), Duration::from_secs(1)).await;
    assert!(ok);
    assert_eq!(backend.calls(), ["seek 30000"]);
  }

  #[tokio::test]
  async fn seek_gives_up_after_timeout() {
    let backend = FakeBackend::default();
    *backend.opening_polls.lock().unwrap() = usize::MAX;
    let ok = seek_when_ready(&backend, Duration::from_secs(5), Duration::from_millis(1), Duration::from_millis(20)).await;
    assert!(!ok);
    assert!(backend.calls().is_empty());
  }
}
