mod app;
mod config;
mod constants;
mod error;
mod gateway;
mod input;
mod library;
mod monitor;
mod mpv;
mod playback;
mod player;
mod spotify;
mod ui;
mod youtube;

use anyhow::{Context, Result};
use clap::Parser;
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;
use constants::constants;
use input::handle_key_event;
use library::Library;
use mpv::MpvBackend;
use player::{MediaBackend, PlaybackEngine};
use spotify::SpotifyScraper;
use youtube::YtDlp;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Library file to use instead of the one in the data directory
  #[arg(short = 'f', long)]
  data_file: Option<PathBuf>,
}

// --- Logging ---

/// Log to `<log_dir>/bellumboard.log`; the terminal belongs to the UI. Keep the guard alive.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir).with_context(|| format!("Failed to create {}", log_dir.display()))?;
  let file_appender = tracing_appender::rolling::never(log_dir, "bellumboard.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let subscriber =
    tracing_subscriber::fmt().with_writer(file_writer).with_ansi(false).with_target(false).with_env_filter(filter).finish();
  tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")?;
  Ok(guard)
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let _guard = init_logging(&config::data_dir().join("logs"))?;
  info!(version = env!("CARGO_PKG_VERSION"), "starting");

  let default_hook = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    ratatui::restore();
    default_hook(info);
  }));

  let mut app = build_app(args).await;
  let mut terminal = ratatui::init();
  let result = run(&mut terminal, &mut app).await;
  app.shutdown().await;
  ratatui::restore();

  let prefs = Config { volume: Some(app.engine.volume()), auto_play: Some(app.playback.auto_play), ..Config::load() };
  prefs.save();
  result
}

/// Probe the external tools, load the library and wire the controller together.
/// Missing tools disable their features; the app still starts.
async fn build_app(args: Args) -> App {
  let c = constants();
  let prefs = Config::load();
  let data_path = prefs.library_path(args.data_file);

  let spawned = MpvBackend::spawn(c.ipc_timeout(), c.open_timeout()).await;
  let backend: Option<Arc<dyn MediaBackend>> = match spawned {
    Ok(mpv) => Some(Arc::new(mpv)),
    Err(e) => {
      warn!(err = %e, "player: mpv unavailable, playback disabled");
      None
    }
  };
  let mpv_error = backend.is_none().then(|| "mpv not found: playback disabled".to_string());
  let yt_dlp_ok = YtDlp::is_available().await;
  if !yt_dlp_ok {
    warn!("search: yt-dlp not found, search disabled");
  }

  let engine = PlaybackEngine::new(backend, prefs.volume.unwrap_or(c.default_volume), c.ready_poll(), c.ready_timeout());
  let scraper = SpotifyScraper::new(&c.user_agent, Duration::from_secs(c.http_timeout_secs), c.import_track_limit);
  let library = Library::load(&data_path);

  let mut app = App::new(
    library,
    data_path,
    engine,
    Arc::new(YtDlp::new(c.stream_format.clone())),
    Arc::new(scraper),
    prefs.auto_play.unwrap_or(false),
  );
  if !yt_dlp_ok {
    app.set_search_unavailable("yt-dlp not found: search disabled");
  }
  match (mpv_error, yt_dlp_ok) {
    (Some(msg), _) => app.set_error(msg),
    (None, false) => app.set_error("yt-dlp not found: search disabled".to_string()),
    (None, true) => {}
  }
  app.start_monitor();
  app
}

async fn run(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
  loop {
    app.check_pending().await;

    terminal.draw(|frame| ui::ui(frame, app))?;

    if event::poll(Duration::from_millis(100))? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
          handle_key_event(app, key).await;
        }
        _ => {}
      }
    }

    if app.should_quit {
      break;
    }
  }
  Ok(())
}
