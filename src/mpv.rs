use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
use tokio::net::UnixStream;
use tokio::process::{Child as TokioChild, Command};
use tracing::{debug, info, warn};

use crate::error::PlayerError;
use crate::player::{MediaBackend, MediaState};

// Load phases: nothing requested, loadfile sent but mpv still idle, mpv has left idle.
const PHASE_NONE: u8 = 0;
const PHASE_REQUESTED: u8 = 1;
const PHASE_ACTIVE: u8 = 2;

/// A long-lived `mpv --idle` process driven over its JSON IPC socket.
pub struct MpvBackend {
  socket_path: PathBuf,
  child: StdMutex<Option<TokioChild>>,
  phase: AtomicU8,
  next_request_id: AtomicU64,
  timeout: Duration,
  /// How long mpv may stay idle after a `loadfile` before the stream counts as rejected.
  open_timeout: Duration,
  requested_at: StdMutex<Option<Instant>>,
}

impl MpvBackend {
  /// Start mpv in idle mode and wait for its IPC socket to come up.
  pub async fn spawn(timeout: Duration, open_timeout: Duration) -> Result<Self, PlayerError> {
    let socket_path = std::env::temp_dir().join(format!("bellumboard-mpv-{}.sock", std::process::id()));
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&socket_path);

    let mut cmd = Command::new("mpv");
    cmd.args(["--idle=yes", "--no-video", "--no-terminal", "--keep-open=no"]);
    cmd.arg(format!("--input-ipc-server={}", socket_path.display()));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    // stderr must not be piped: nobody drains it and mpv would block on a full pipe.
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound { PlayerError::NotInstalled } else { PlayerError::Spawn(e) }
    })?;

    let backend = Self {
      socket_path,
      child: StdMutex::new(Some(child)),
      phase: AtomicU8::new(PHASE_NONE),
      next_request_id: AtomicU64::new(1),
      timeout,
      open_timeout,
      requested_at: StdMutex::new(None),
    };

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      match UnixStream::connect(&backend.socket_path).await {
        Ok(_) => break,
        Err(e) if tokio::time::Instant::now() >= deadline => return Err(PlayerError::Ipc(e)),
        Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
      }
    }
    info!(socket = %backend.socket_path.display(), "player: mpv ready");
    Ok(backend)
  }

  /// Send one command and wait for the reply carrying our request id.
  async fn request(&self, command: Value) -> Result<Value, PlayerError> {
    let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
    let payload = json!({ "command": command, "request_id": request_id });
    let mut line = serde_json::to_vec(&payload).map_err(|e| PlayerError::Ipc(e.into()))?;
    line.push(b'\n');

    let mut stream = UnixStream::connect(&self.socket_path).await?;
    stream.write_all(&line).await?;

    let mut lines = TokioBufReader::new(stream).lines();
    // mpv may emit event lines before our response.
    loop {
      let next = tokio::time::timeout(self.timeout, lines.next_line()).await.map_err(|_| PlayerError::Timeout(self.timeout))??;
      let Some(text) = next else {
        return Err(PlayerError::Ipc(std::io::ErrorKind::UnexpectedEof.into()));
      };
      let Ok(reply) = serde_json::from_str::<Value>(&text) else { continue };
      if reply.get("request_id").and_then(Value::as_u64) != Some(request_id) {
        continue;
      }
      return match reply.get("error").and_then(Value::as_str) {
        Some("success") => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
        other => Err(PlayerError::Rejected {
          command: command_name(&command),
          reason: other.unwrap_or("no error field").to_string(),
        }),
      };
    }
  }

  async fn get_bool(&self, property: &str) -> Result<bool, PlayerError> {
    let value = self.request(json!(["get_property", property])).await?;
    Ok(value.as_bool().unwrap_or(false))
  }

  async fn query_state(&self) -> Result<MediaState, PlayerError> {
    if self.get_bool("idle-active").await? {
      return Ok(match self.phase.load(Ordering::Acquire) {
        PHASE_ACTIVE => MediaState::Ended,
        PHASE_REQUESTED if self.open_expired() => {
          // mpv drops a stream it cannot open and goes back to idle without a reply.
          warn!(after = ?self.open_timeout, "player: stream never started, treating as ended");
          self.phase.store(PHASE_ACTIVE, Ordering::Release);
          MediaState::Ended
        }
        PHASE_REQUESTED => MediaState::Opening,
        _ => MediaState::Stopped,
      });
    }
    self.phase.store(PHASE_ACTIVE, Ordering::Release);

    // `duration` stays unavailable until the demuxer has opened the stream.
    if self.request(json!(["get_property", "duration"])).await.is_err() {
      return Ok(MediaState::Opening);
    }
    Ok(if self.get_bool("pause").await? { MediaState::Paused } else { MediaState::Playing })
  }

  fn open_expired(&self) -> bool {
    let requested_at = self.requested_at.lock().ok().and_then(|guard| *guard);
    requested_at.is_some_and(|at| at.elapsed() >= self.open_timeout)
  }
}

fn command_name(command: &Value) -> String {
  command.get(0).and_then(Value::as_str).unwrap_or("?").to_string()
}

impl MediaBackend for MpvBackend {
  fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), PlayerError>> {
    async move {
      self.phase.store(PHASE_REQUESTED, Ordering::Release);
      if let Ok(mut at) = self.requested_at.lock() {
        *at = Some(Instant::now());
      }
      if let Err(e) = self.request(json!(["loadfile", url, "replace"])).await {
        self.phase.store(PHASE_NONE, Ordering::Release);
        return Err(e);
      }
      self.request(json!(["set_property", "pause", false])).await?;
      Ok(())
    }
    .boxed()
  }

  fn set_paused(&self, paused: bool) -> BoxFuture<'_, Result<(), PlayerError>> {
    async move { self.request(json!(["set_property", "pause", paused])).await.map(|_| ()) }.boxed()
  }

  fn stop(&self) -> BoxFuture<'_, Result<(), PlayerError>> {
    async move {
      self.phase.store(PHASE_NONE, Ordering::Release);
      self.request(json!(["stop"])).await.map(|_| ())
    }
    .boxed()
  }

  fn seek(&self, position: Duration) -> BoxFuture<'_, Result<(), PlayerError>> {
    async move {
      let seconds = position.as_millis() as f64 / 1000.0;
      debug!(seconds, "player: seek");
      self.request(json!(["seek", seconds, "absolute"])).await.map(|_| ())
    }
    .boxed()
  }

  fn set_volume(&self, volume: u8) -> BoxFuture<'_, Result<(), PlayerError>> {
    async move { self.request(json!(["set_property", "volume", volume])).await.map(|_| ()) }.boxed()
  }

  fn state(&self) -> BoxFuture<'_, MediaState> {
    async move {
      match self.query_state().await {
        Ok(state) => state,
        Err(e) => {
          debug!(err = %e, "player: state query failed");
          MediaState::Error
        }
      }
    }
    .boxed()
  }

  fn shutdown(&self) -> BoxFuture<'_, ()> {
    async move {
      if let Err(e) = self.request(json!(["quit"])).await {
        debug!(err = %e, "player: quit request failed, killing mpv");
      }
      let child = self.child.lock().ok().and_then(|mut guard| guard.take());
      if let Some(mut child) = child {
        if let Err(e) = child.kill().await {
          warn!(err = %e, "player: failed to kill mpv");
        }
        let _ = child.wait().await;
      }
      let _ = std::fs::remove_file(&self.socket_path);
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_name_is_first_element() {
    assert_eq!(command_name(&json!(["loadfile", "x", "replace"])), "loadfile");
    assert_eq!(command_name(&json!([])), "?");
  }

  /// Minimal stand-in for mpv's IPC server: answers every request with `data`.
  async fn serve_once(listener: tokio::net::UnixListener, data: Value, error: &'static str) -> Value {
    let (stream, _) = listener.accept().await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = TokioBufReader::new(read).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let request: Value = serde_json::from_str(&line).unwrap();
    let id = request["request_id"].clone();
    // An unrelated event first, as mpv does.
    write.write_all(b"{\"event\":\"playback-restart\"}\n").await.unwrap();
    let reply = json!({ "data": data, "request_id": id, "error": error });
    write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
    request
  }

  fn backend_at(socket_path: PathBuf) -> MpvBackend {
    MpvBackend {
      socket_path,
      child: StdMutex::new(None),
      phase: AtomicU8::new(PHASE_NONE),
      next_request_id: AtomicU64::new(1),
      timeout: Duration::from_secs(2),
      open_timeout: Duration::from_secs(60),
      requested_at: StdMutex::new(None),
    }
  }

  /// A backend that sent `loadfile` at some point and still sees mpv idle.
  fn requested_backend(path: PathBuf, open_timeout: Duration) -> MpvBackend {
    let backend = MpvBackend { open_timeout, ..backend_at(path) };
    backend.phase.store(PHASE_REQUESTED, Ordering::Release);
    *backend.requested_at.lock().unwrap() = Some(Instant::now());
    backend
  }

  #[tokio::test]
  async fn idle_after_load_is_opening_until_the_open_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(serve_once(listener, json!(true), "success"));

    let backend = requested_backend(path, Duration::from_secs(60));
    assert_eq!(backend.query_state().await.unwrap(), MediaState::Opening);
  }

  #[tokio::test]
  async fn stream_that_never_starts_counts_as_ended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(serve_once(listener, json!(true), "success"));

    let backend = requested_backend(path, Duration::ZERO);
    assert_eq!(backend.query_state().await.unwrap(), MediaState::Ended);
    assert_eq!(backend.phase.load(Ordering::Acquire), PHASE_ACTIVE);
  }

  #[tokio::test]
  async fn request_matches_reply_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_once(listener, json!(42.5), "success"));

    let backend = backend_at(path);
    let data = backend.request(json!(["get_property", "duration"])).await.unwrap();
    assert_eq!(data, json!(42.5));
    let sent = server.await.unwrap();
    assert_eq!(sent["command"], json!(["get_property", "duration"]));
  }

  #[tokio::test]
  async fn rejected_command_surfaces_reason() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(serve_once(listener, Value::Null, "property unavailable"));

    let backend = backend_at(path);
    let err = backend.request(json!(["get_property", "duration"])).await.unwrap_err();
    assert!(matches!(err, PlayerError::Rejected { ref reason, .. } if reason == "property unavailable"));
  }

  #[tokio::test]
  async fn unreachable_socket_reports_error_state() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend_at(dir.path().join("missing.sock"));
    assert_eq!(backend.state().await, MediaState::Error);
  }
}
