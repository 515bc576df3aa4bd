//! Background auto-advance: watches the media backend for the end of a track and tells the
//! controller to move on. The monitor never touches playlists itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::AppEvent;
use crate::player::{MediaBackend, MediaState};

/// Poll `backend` every `poll`. When auto-play is on and the track has ended, send one
/// [`AppEvent::PlaybackFinished`] and sleep `cooldown` before polling again.
///
/// A completion is reported once: the monitor re-arms only after it has seen the backend in
/// some state other than `Ended`, or when the controller sets `rearm` because the track it
/// advanced to could not be played.
pub fn spawn_monitor(
  backend: Arc<dyn MediaBackend>,
  auto_play: Arc<AtomicBool>,
  rearm: Arc<AtomicBool>,
  tx: UnboundedSender<AppEvent>,
  poll: Duration,
  cooldown: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut armed = true;
    loop {
      tokio::time::sleep(poll).await;
      if tx.is_closed() {
        debug!("monitor: controller gone, stopping");
        break;
      }

      if backend.state().await != MediaState::Ended {
        armed = true;
        rearm.store(false, Ordering::Relaxed);
        continue;
      }
      if !armed && rearm.swap(false, Ordering::Relaxed) {
        armed = true;
      }
      if !armed || !auto_play.load(Ordering::Relaxed) {
        continue;
      }

      info!("monitor: track finished, advancing");
      armed = false;
      if tx.send(AppEvent::PlaybackFinished).is_err() {
        break;
      }
      tokio::time::sleep(cooldown).await;
    }
  })
}
