use rand::SeedableRng;
use rand::rngs::StdRng;
use ratatui::widgets::ListState;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::constants;
use crate::error::{Error, PlayerError, ValidationError};
use crate::gateway::{ImportReport, PlaylistSource, SearchGateway, StatusFn, VideoSearch};
use crate::library::{Library, Playlist, PlaylistRef, Track};
use crate::monitor::spawn_monitor;
use crate::playback::{PlaybackPhase, PlaybackState};
use crate::player::PlaybackEngine;
use crate::spotify::extract_playlist_id;
use crate::youtube::{SearchEntry, is_video_url};

// --- Types ---

/// Everything a worker task or the monitor can hand back to the controller.
/// Only the controller mutates the library and the playback state.
#[derive(Debug)]
pub enum AppEvent {
  Status(String),
  SearchCompleted { generation: u64, query: String, results: Vec<SearchEntry> },
  /// `source` is the track source that was resolved, to detect edits made meanwhile.
  StreamResolved { generation: u64, index: usize, source: String, stream_url: Option<String> },
  TrackResolved { generation: u64, target: AddTarget, result: Result<Track, Error> },
  ImportFinished { target: AddTarget, result: Result<ImportReport, Error> },
  PlaybackFinished,
}

/// Playlist a background add lands in, held by name: the library may be reshaped
/// while the worker runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTarget {
  pub folder: String,
  pub playlist: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
  Library,
  Results,
  Tracks,
}

impl Pane {
  pub fn next(self) -> Self {
    match self {
      Pane::Library => Pane::Results,
      Pane::Results => Pane::Tracks,
      Pane::Tracks => Pane::Library,
    }
  }

  pub fn prev(self) -> Self {
    match self {
      Pane::Library => Pane::Tracks,
      Pane::Results => Pane::Library,
      Pane::Tracks => Pane::Results,
    }
  }
}

/// One row of the library tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeRow {
  Folder(String),
  Playlist(PlaylistRef),
}

/// Single-line text prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
  Search,
  Url,
  Import,
  NewFolder,
  NewPlaylist(String),
  StartTime(usize),
}

impl Prompt {
  pub fn title(&self) -> String {
    match self {
      Prompt::Search => " Search YouTube ".to_string(),
      Prompt::Url => " Add YouTube URL ".to_string(),
      Prompt::Import => " Import Spotify playlist ".to_string(),
      Prompt::NewFolder => " New folder ".to_string(),
      Prompt::NewPlaylist(folder) => format!(" New playlist in '{}' ", folder),
      Prompt::StartTime(_) => " Start time (seconds) ".to_string(),
    }
  }
}

/// Destructive actions waiting for a y/n answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirm {
  DeleteFolder(String),
  RemoveTrack { index: usize, title: String },
}

impl Confirm {
  pub fn question(&self) -> String {
    match self {
      Confirm::DeleteFolder(name) => format!("Delete folder '{}' and all its playlists?", name),
      Confirm::RemoveTrack { title, .. } => format!("Remove '{}'?", title),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
  Normal,
  Prompt(Prompt),
  Confirm(Confirm),
}

// --- App State ---

pub struct App {
  pub library: Library,
  data_path: PathBuf,
  pub engine: PlaybackEngine,
  gateway: Arc<SearchGateway>,
  pub playback: PlaybackState,
  /// Mirror of `playback.auto_play` for the monitor task.
  auto_play: Arc<AtomicBool>,
  /// Tells the monitor to report the same completion again.
  rearm: Arc<AtomicBool>,
  /// The pending load was started by auto-advance.
  auto_advanced: bool,
  pub current: Option<PlaylistRef>,
  pub search_results: Vec<SearchEntry>,
  rng: StdRng,
  tx: mpsc::UnboundedSender<AppEvent>,
  rx: mpsc::UnboundedReceiver<AppEvent>,
  search_generation: u64,
  play_generation: u64,
  lookup_generation: u64,
  /// Status text shown while the latest search runs.
  search_status: Option<String>,
  /// Set when yt-dlp is missing; every search-backed action reports it.
  search_unavailable: Option<String>,
  monitor: Option<JoinHandle<()>>,

  pub focus: Pane,
  pub mode: InputMode,
  pub input: String,
  pub cursor_position: usize,
  pub input_scroll: usize,
  pub library_state: ListState,
  pub results_state: ListState,
  pub tracks_state: ListState,
  pub status_message: Option<String>,
  pub last_error: Option<String>,
  error_time: Option<Instant>,
  pub should_quit: bool,
}

impl App {
  pub fn new(
    library: Library,
    data_path: PathBuf,
    engine: PlaybackEngine,
    videos: Arc<dyn VideoSearch>,
    playlists: Arc<dyn PlaylistSource>,
    auto_play: bool,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let status_tx = tx.clone();
    let status: StatusFn = Arc::new(move |msg| {
      let _ = status_tx.send(AppEvent::Status(msg));
    });
    let gateway = Arc::new(SearchGateway::new(videos, playlists, status, constants().search_max_results));

    let mut playback = PlaybackState::default();
    playback.auto_play = auto_play;
    let mut library_state = ListState::default();
    if !library.folders().is_empty() {
      library_state.select(Some(0));
    }

    Self {
      library,
      data_path,
      engine,
      gateway,
      playback,
      auto_play: Arc::new(AtomicBool::new(auto_play)),
      rearm: Arc::new(AtomicBool::new(false)),
      auto_advanced: false,
      current: None,
      search_results: Vec::new(),
      rng: StdRng::from_os_rng(),
      tx,
      rx,
      search_generation: 0,
      play_generation: 0,
      lookup_generation: 0,
      search_status: None,
      search_unavailable: None,
      monitor: None,
      focus: Pane::Library,
      mode: InputMode::Normal,
      input: String::new(),
      cursor_position: 0,
      input_scroll: 0,
      library_state,
      results_state: ListState::default(),
      tracks_state: ListState::default(),
      status_message: None,
      last_error: None,
      error_time: None,
      should_quit: false,
    }
  }

  /// Start the auto-advance monitor. Does nothing without a media backend.
  pub fn start_monitor(&mut self) {
    let Some(backend) = self.engine.backend() else { return };
    let c = constants();
    self.monitor = Some(spawn_monitor(
      backend,
      Arc::clone(&self.auto_play),
      Arc::clone(&self.rearm),
      self.tx.clone(),
      c.monitor_poll(),
      c.advance_cooldown(),
    ));
  }

  pub fn set_search_unavailable(&mut self, reason: impl Into<String>) {
    self.search_unavailable = Some(reason.into());
  }

  fn ensure_search(&self) -> Result<(), Error> {
    match &self.search_unavailable {
      Some(reason) => Err(Error::Configuration(reason.clone())),
      None => Ok(()),
    }
  }

  // --- Status line ---

  pub fn set_status(&mut self, msg: impl Into<String>) {
    self.status_message = Some(msg.into());
  }

  /// Set an error message with auto-dismiss tracking.
  pub fn set_error(&mut self, msg: String) {
    self.last_error = Some(msg);
    self.error_time = Some(Instant::now());
  }

  pub fn clear_error(&mut self) {
    self.last_error = None;
    self.error_time = None;
  }

  pub fn expire_error(&mut self) {
    if let Some(t) = self.error_time
      && t.elapsed() >= Duration::from_secs(constants().error_display_secs)
    {
      self.clear_error();
    }
  }

  /// Show a failed operation on the status line.
  pub fn report(&mut self, err: Error) {
    match err {
      Error::Validation(ref e) => debug!(err = %e, "input rejected"),
      ref e => warn!(err = %e, "operation failed"),
    }
    self.set_error(err.to_string());
  }

  fn persist(&mut self) {
    if let Err(e) = self.library.save(&self.data_path) {
      error!(err = %e, "library: save failed");
      self.set_error(e.to_string());
    }
  }

  /// Explicit save from the menu.
  pub fn save(&mut self) {
    self.persist();
    if self.last_error.is_none() {
      info!(path = %self.data_path.display(), "library: saved");
      self.set_status("Library saved");
    }
  }

  // --- Library view ---

  pub fn tree_rows(&self) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    for folder in self.library.folders() {
      rows.push(TreeRow::Folder(folder.name.clone()));
      rows.extend(
        (0..folder.playlists.len()).map(|index| TreeRow::Playlist(PlaylistRef { folder: folder.name.clone(), index })),
      );
    }
    rows
  }

  pub fn selected_row(&self) -> Option<TreeRow> {
    self.library_state.selected().and_then(|i| self.tree_rows().into_iter().nth(i))
  }

  fn selected_folder(&self) -> Option<String> {
    match self.selected_row()? {
      TreeRow::Folder(name) => Some(name),
      TreeRow::Playlist(at) => Some(at.folder),
    }
  }

  fn select_row(&mut self, row: &TreeRow) {
    if let Some(i) = self.tree_rows().iter().position(|r| r == row) {
      self.library_state.select(Some(i));
    }
  }

  pub fn current_playlist(&self) -> Option<&Playlist> {
    self.current.as_ref().and_then(|at| self.library.playlist(at))
  }

  /// Length of the current playlist; fails when there is none or it is empty.
  fn current_len(&self) -> Result<usize, Error> {
    let playlist = self.current_playlist().ok_or(ValidationError::NoPlaylist)?;
    if playlist.is_empty() {
      return Err(ValidationError::EmptyPlaylist.into());
    }
    Ok(playlist.len())
  }

  /// Move the highlight in the focused pane, wrapping at both ends.
  pub fn move_selection(&mut self, down: bool) {
    let (state, len) = match self.focus {
      Pane::Library => {
        let len = self.tree_rows().len();
        (&mut self.library_state, len)
      }
      Pane::Results => (&mut self.results_state, self.search_results.len()),
      Pane::Tracks => {
        let len = self.current.as_ref().and_then(|at| self.library.playlist(at)).map_or(0, Playlist::len);
        (&mut self.tracks_state, len)
      }
    };
    step_selection(state, len, down);
  }

  // --- Folders and playlists ---

  pub fn create_folder(&mut self, name: &str) -> Result<(), Error> {
    self.library.create_folder(name)?;
    let name = name.trim().to_string();
    info!(folder = %name, "library: folder created");
    self.persist();
    self.select_row(&TreeRow::Folder(name.clone()));
    self.set_status(format!("Folder created: {}", name));
    Ok(())
  }

  /// The folder a new playlist goes into: the highlighted one, or the first.
  pub fn request_new_playlist(&mut self) -> Result<(), Error> {
    let folder = self
      .selected_folder()
      .or_else(|| self.library.folders().first().map(|f| f.name.clone()))
      .ok_or(ValidationError::NoFolder)?;
    self.open_prompt(Prompt::NewPlaylist(folder));
    Ok(())
  }

  pub fn create_playlist(&mut self, folder: &str, name: &str) -> Result<(), Error> {
    let at = self.library.create_playlist(folder, name)?;
    info!(folder, playlist = %name.trim(), "library: playlist created");
    self.persist();
    self.select_row(&TreeRow::Playlist(at));
    self.set_status(format!("Playlist created: {}", name.trim()));
    Ok(())
  }

  pub fn request_delete_folder(&mut self) -> Result<(), Error> {
    let folder = self.selected_folder().ok_or(ValidationError::NoFolder)?;
    self.mode = InputMode::Confirm(Confirm::DeleteFolder(folder));
    Ok(())
  }

  /// Remove a folder and its playlists. Stops playback if the current playlist was inside.
  pub async fn delete_folder(&mut self, name: &str) -> Result<(), Error> {
    let removed = self.library.delete_folder(name)?;
    if self.current.as_ref().is_some_and(|at| at.folder == name) {
      self.stop().await;
      self.current = None;
      self.playback.reset(0, &mut self.rng);
      self.tracks_state.select(None);
    }
    info!(folder = name, playlists = removed.playlists.len(), "library: folder deleted");
    self.persist();
    let rows = self.tree_rows().len();
    clamp_selection(&mut self.library_state, rows);
    self.set_status(format!("Folder deleted: {} ({} playlist(s))", name, removed.playlists.len()));
    Ok(())
  }

  /// Make a playlist current. Play order starts over from its first track.
  pub fn load_playlist(&mut self, at: PlaylistRef) -> Result<(), Error> {
    let playlist = self.library.playlist(&at).ok_or(ValidationError::NoPlaylist)?;
    let (name, len) = (playlist.name.clone(), playlist.len());

    if self.playback.phase == PlaybackPhase::Loading {
      self.play_generation += 1;
      self.settle_phase();
    }
    self.playback.reset(len, &mut self.rng);
    self.current = Some(at);
    self.tracks_state.select((len > 0).then_some(0));
    info!(playlist = %name, tracks = len, "library: playlist loaded");
    self.set_status(format!("Playlist '{}' loaded with {} track(s)", name, len));
    Ok(())
  }

  /// Enter on the library pane.
  pub fn activate_library_row(&mut self) -> Result<(), Error> {
    match self.selected_row() {
      Some(TreeRow::Playlist(at)) => {
        self.load_playlist(at)?;
        self.focus = Pane::Tracks;
        Ok(())
      }
      Some(TreeRow::Folder(_)) => Ok(()),
      None => Err(ValidationError::NoPlaylist.into()),
    }
  }

  // --- Adding tracks ---

  fn add_track_to(&mut self, target: &PlaylistRef, track: Track) -> Result<(), Error> {
    let playlist = self.library.playlist_mut(target).ok_or(ValidationError::NoPlaylist)?;
    playlist.add_track(track);
    let len = playlist.len();
    if self.current.as_ref() == Some(target) {
      self.playback.track_added(len);
      if self.tracks_state.selected().is_none() {
        self.tracks_state.select(Some(0));
      }
    }
    Ok(())
  }

  pub fn add_selected_result(&mut self) -> Result<(), Error> {
    let target = self.current.clone().ok_or(ValidationError::NoPlaylist)?;
    let entry =
      self.results_state.selected().and_then(|i| self.search_results.get(i)).ok_or(ValidationError::NoResult)?;
    let track = Track::new(entry.title.clone(), entry.url.clone(), entry.video_id.clone());
    let title = track.title.clone();
    self.add_track_to(&target, track)?;
    info!(title = %title, "library: track added from search");
    self.persist();
    self.set_status(format!("'{}' added to playlist", title));
    Ok(())
  }

  pub fn trigger_search(&mut self, query: &str) -> Result<(), Error> {
    let query = query.trim().to_string();
    if query.is_empty() {
      return Err(ValidationError::EmptyQuery.into());
    }
    self.ensure_search()?;

    self.search_generation += 1;
    let generation = self.search_generation;
    info!(query = %query, generation, "search triggered");
    self.clear_error();
    let status = format!("Searching '{}'…", query);
    self.search_status = Some(status.clone());
    self.set_status(status);

    let gateway = Arc::clone(&self.gateway);
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let results = gateway.search(&query).await;
      let _ = tx.send(AppEvent::SearchCompleted { generation, query, results });
    });
    Ok(())
  }

  fn add_target(&self) -> Result<AddTarget, Error> {
    let at = self.current.as_ref().ok_or(ValidationError::NoPlaylist)?;
    let playlist = self.library.playlist(at).ok_or(ValidationError::NoPlaylist)?;
    Ok(AddTarget { folder: at.folder.clone(), playlist: playlist.name.clone() })
  }

  fn resolve_target(&self, target: &AddTarget) -> Result<PlaylistRef, Error> {
    self
      .library
      .find_playlist(&target.folder, &target.playlist)
      .ok_or_else(|| ValidationError::PlaylistGone(target.playlist.clone()).into())
  }

  pub fn trigger_add_url(&mut self, url: &str) -> Result<(), Error> {
    let target = self.add_target()?;
    let url = url.trim().to_string();
    if url.is_empty() {
      return Err(ValidationError::EmptyUrl.into());
    }
    if !is_video_url(&url) {
      return Err(ValidationError::NotVideoUrl.into());
    }
    self.ensure_search()?;

    self.lookup_generation += 1;
    let generation = self.lookup_generation;
    self.set_status("Fetching video info…");

    let gateway = Arc::clone(&self.gateway);
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let result = gateway.add_by_url(&url).await;
      let _ = tx.send(AppEvent::TrackResolved { generation, target, result });
    });
    Ok(())
  }

  pub fn trigger_import(&mut self, input: &str) -> Result<(), Error> {
    let target = self.add_target()?;
    let playlist_id = extract_playlist_id(input)?;
    self.ensure_search()?;

    info!(playlist_id = %playlist_id, "import: started");
    self.set_status("Importing Spotify playlist…");

    let gateway = Arc::clone(&self.gateway);
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let result = gateway.import_external_playlist(&playlist_id).await;
      let _ = tx.send(AppEvent::ImportFinished { target, result });
    });
    Ok(())
  }

  // --- Editing the current playlist ---

  fn selected_track(&self) -> Result<(PlaylistRef, usize), Error> {
    let at = self.current.clone().ok_or(ValidationError::NoPlaylist)?;
    let len = self.library.playlist(&at).map_or(0, Playlist::len);
    let index = self.tracks_state.selected().filter(|&i| i < len).ok_or(ValidationError::NoTrack)?;
    Ok((at, index))
  }

  pub fn request_remove_track(&mut self) -> Result<(), Error> {
    let (at, index) = self.selected_track()?;
    let title = self.library.playlist(&at).and_then(|p| p.tracks.get(index)).map(|t| t.title.clone()).unwrap_or_default();
    self.mode = InputMode::Confirm(Confirm::RemoveTrack { index, title });
    Ok(())
  }

  pub fn remove_track(&mut self, index: usize) -> Result<(), Error> {
    let at = self.current.clone().ok_or(ValidationError::NoPlaylist)?;
    let playlist = self.library.playlist_mut(&at).ok_or(ValidationError::NoPlaylist)?;
    let track = playlist.remove_track(index).ok_or(ValidationError::NoTrack)?;
    let len = playlist.len();
    self.playback.track_removed(index, len);
    clamp_selection(&mut self.tracks_state, len);
    info!(title = %track.title, "library: track removed");
    self.persist();
    self.set_status(format!("Track removed: {}", track.title));
    Ok(())
  }

  /// Swap the highlighted track with its neighbour. No-op at the ends.
  pub fn move_selected(&mut self, up: bool) -> Result<(), Error> {
    let (at, index) = self.selected_track()?;
    let playlist = self.library.playlist_mut(&at).ok_or(ValidationError::NoPlaylist)?;
    let moved = if up { playlist.move_up(index) } else { playlist.move_down(index) };
    let Some(new_index) = moved else { return Ok(()) };
    self.playback.tracks_swapped(index, new_index);
    self.tracks_state.select(Some(new_index));
    self.persist();
    Ok(())
  }

  pub fn request_start_time(&mut self) -> Result<(), Error> {
    let (at, index) = self.selected_track()?;
    let seconds = self.library.playlist(&at).and_then(|p| p.tracks.get(index)).map_or(0, |t| t.start_time);
    self.open_prompt(Prompt::StartTime(index));
    self.set_input(seconds.to_string());
    Ok(())
  }

  pub fn set_start_time(&mut self, index: usize, value: &str) -> Result<(), Error> {
    let seconds: u32 = value.trim().parse().map_err(|_| ValidationError::InvalidStartTime)?;
    let at = self.current.clone().ok_or(ValidationError::NoPlaylist)?;
    let playlist = self.library.playlist_mut(&at).ok_or(ValidationError::NoPlaylist)?;
    if !playlist.set_start_time(index, seconds) {
      return Err(ValidationError::NoTrack.into());
    }
    self.persist();
    self.set_status(format!("Start time set: {}s", seconds));
    Ok(())
  }

  // --- Playback ---

  /// Play from the highlighted track of the current playlist.
  pub fn play_selected(&mut self) -> Result<(), Error> {
    let len = self.current_len()?;
    if let Some(index) = self.tracks_state.selected().filter(|&i| i < len) {
      self.playback.select(index);
    }
    self.play_current()
  }

  /// Resolve the stream of the track under the play cursor in the background; playback
  /// starts when [`AppEvent::StreamResolved`] comes back.
  pub fn play_current(&mut self) -> Result<(), Error> {
    let len = self.current_len()?;
    if !self.engine.is_available() {
      return Err(PlayerError::Unavailable.into());
    }
    self.ensure_search()?;
    let index = self.playback.active_index(len).ok_or(ValidationError::NoTrack)?;
    let track = self.current_playlist().and_then(|p| p.tracks.get(index)).cloned().ok_or(ValidationError::NoTrack)?;

    self.play_generation += 1;
    let generation = self.play_generation;
    self.auto_advanced = false;
    self.playback.phase = PlaybackPhase::Loading;
    self.clear_error();
    info!(title = %track.title, index, generation, "player: loading track");
    self.set_status(format!("Loading: {}…", track.title));

    let gateway = Arc::clone(&self.gateway);
    let tx = self.tx.clone();
    let source = track.source().to_string();
    tokio::spawn(async move {
      let stream_url = gateway.resolve_stream_url(&source).await;
      let _ = tx.send(AppEvent::StreamResolved { generation, index, source, stream_url });
    });
    Ok(())
  }

  pub fn next(&mut self) -> Result<(), Error> {
    let len = self.current_len()?;
    let index = self.playback.advance(len).ok_or(ValidationError::NoTrack)?;
    self.tracks_state.select(Some(index));
    self.play_current()
  }

  pub async fn pause(&mut self) -> Result<(), Error> {
    if self.engine.current_url().is_none() {
      return Ok(());
    }
    self.engine.pause().await?;
    let playing = self.engine.is_playing();
    if self.playback.phase != PlaybackPhase::Loading {
      self.playback.phase = if playing { PlaybackPhase::Playing } else { PlaybackPhase::Paused };
    }
    self.set_status(if playing { "Resumed" } else { "Paused" });
    Ok(())
  }

  pub async fn stop(&mut self) {
    self.play_generation += 1;
    if let Err(e) = self.engine.stop().await {
      warn!(err = %e, "player: stop failed");
    }
    self.playback.phase = PlaybackPhase::Idle;
    self.playback.playing_index = None;
    self.set_status("Stopped");
  }

  pub fn toggle_shuffle(&mut self) {
    let on = !self.playback.shuffle_mode();
    let len = self.current_playlist().map_or(0, Playlist::len);
    self.playback.set_shuffle(on, len, &mut self.rng);
    info!(on, "shuffle toggled");
    self.set_status(if on { "Shuffle on" } else { "Sequential order" });
  }

  pub fn toggle_auto_play(&mut self) {
    let on = !self.playback.auto_play;
    self.playback.auto_play = on;
    self.auto_play.store(on, Ordering::Relaxed);
    info!(on, "auto-play toggled");
    self.set_status(if on { "Auto-play on" } else { "Auto-play off" });
  }

  pub async fn change_volume(&mut self, delta: i32) -> Result<(), Error> {
    let target = i32::from(self.engine.volume()) + delta;
    let volume = self.engine.set_volume(target).await?;
    self.set_status(format!("Volume {}%", volume));
    Ok(())
  }

  /// Phase after a pending load was abandoned: whatever the engine is still doing.
  fn settle_phase(&mut self) {
    self.playback.phase = match (self.engine.current_url(), self.engine.is_playing()) {
      (None, _) => PlaybackPhase::Idle,
      (Some(_), true) => PlaybackPhase::Playing,
      (Some(_), false) => PlaybackPhase::Paused,
    };
  }

  // --- Prompts ---

  pub fn open_prompt(&mut self, prompt: Prompt) {
    self.mode = InputMode::Prompt(prompt);
    self.input.clear();
    self.cursor_position = 0;
    self.input_scroll = 0;
    self.clear_error();
  }

  fn set_input(&mut self, text: String) {
    self.cursor_position = text.chars().count();
    self.input = text;
  }

  pub fn cancel_prompt(&mut self) {
    self.mode = InputMode::Normal;
    self.input.clear();
    self.cursor_position = 0;
    self.input_scroll = 0;
  }

  pub fn submit_prompt(&mut self) -> Result<(), Error> {
    let InputMode::Prompt(prompt) = std::mem::replace(&mut self.mode, InputMode::Normal) else {
      return Ok(());
    };
    let text = std::mem::take(&mut self.input);
    self.cursor_position = 0;
    self.input_scroll = 0;
    match prompt {
      Prompt::Search => self.trigger_search(&text),
      Prompt::Url => self.trigger_add_url(&text),
      Prompt::Import => self.trigger_import(&text),
      Prompt::NewFolder => self.create_folder(&text),
      Prompt::NewPlaylist(folder) => self.create_playlist(&folder, &text),
      Prompt::StartTime(index) => self.set_start_time(index, &text),
    }
  }

  pub async fn confirm(&mut self, accepted: bool) -> Result<(), Error> {
    let InputMode::Confirm(kind) = std::mem::replace(&mut self.mode, InputMode::Normal) else {
      return Ok(());
    };
    if !accepted {
      return Ok(());
    }
    match kind {
      Confirm::DeleteFolder(name) => self.delete_folder(&name).await,
      Confirm::RemoveTrack { index, .. } => self.remove_track(index),
    }
  }

  // --- Event loop ---

  /// Apply everything workers and the monitor have sent since the last frame.
  pub async fn check_pending(&mut self) {
    while let Ok(event) = self.rx.try_recv() {
      self.handle_event(event).await;
    }
    self.expire_error();
  }

  async fn handle_event(&mut self, event: AppEvent) {
    match event {
      AppEvent::Status(msg) => self.set_status(msg),
      AppEvent::SearchCompleted { generation, query, results } => {
        if generation != self.search_generation {
          debug!(generation, query = %query, "search: discarding stale results");
          return;
        }
        let count = results.len();
        self.search_results = results;
        self.results_state.select((count > 0).then_some(0));
        if count > 0 {
          self.set_status(format!("{} result(s) found", count));
          self.focus = Pane::Results;
        } else if self.status_message == self.search_status {
          self.set_status("No results found.");
        }
        self.search_status = None;
      }
      AppEvent::StreamResolved { generation, index, source, stream_url } => {
        if generation != self.play_generation {
          debug!(generation, "player: discarding stale stream URL");
          return;
        }
        self.start_resolved(index, &source, stream_url).await;
      }
      AppEvent::TrackResolved { generation, target, result } => {
        if generation != self.lookup_generation {
          debug!(generation, "search: discarding stale URL lookup");
          return;
        }
        let added = result.and_then(|track| {
          let at = self.resolve_target(&target)?;
          let title = track.title.clone();
          self.add_track_to(&at, track).map(|()| title)
        });
        match added {
          Ok(title) => {
            info!(title = %title, "library: track added from URL");
            self.persist();
            self.set_status(format!("Track added: {}", title));
          }
          Err(e) => self.report(e),
        }
      }
      AppEvent::ImportFinished { target, result } => {
        let applied = result.and_then(|report| Ok((self.resolve_target(&target)?, report)));
        let (at, report) = match applied {
          Ok(applied) => applied,
          Err(e) => {
            self.report(e);
            return;
          }
        };
        let mut added = 0;
        let mut failure = None;
        for track in report.tracks {
          match self.add_track_to(&at, track) {
            Ok(()) => added += 1,
            Err(e) => {
              failure = Some(e);
              break;
            }
          }
        }
        if added > 0 {
          self.persist();
        }
        match failure {
          Some(e) => self.report(e),
          None => self.set_status(format!("{}/{} tracks imported", added, report.total)),
        }
      }
      AppEvent::PlaybackFinished => {
        if !self.playback.auto_play || self.playback.phase == PlaybackPhase::Loading {
          return;
        }
        // The user may have started another track since the monitor looked.
        if !self.engine.is_finished().await {
          debug!("monitor: completion no longer current, ignoring");
          return;
        }
        match self.next() {
          Ok(()) => self.auto_advanced = true,
          Err(e) => debug!(err = %e, "monitor: cannot advance"),
        }
      }
    }
  }

  async fn start_resolved(&mut self, index: usize, source: &str, stream_url: Option<String>) {
    let track = self.current_playlist().and_then(|p| p.tracks.get(index)).filter(|t| t.source() == source).cloned();
    let Some(track) = track else {
      debug!(index, "player: track changed while resolving, dropping");
      self.settle_phase();
      return;
    };
    let Some(url) = stream_url else {
      self.settle_phase();
      self.skip_after_failed_advance();
      self.set_error(format!("Failed to load: {}", track.title));
      return;
    };

    match self.engine.play(&url, track.start_time).await {
      Ok(()) => {
        self.auto_advanced = false;
        self.playback.phase = PlaybackPhase::Playing;
        self.playback.playing_index = Some(index);
        self.set_status(format!("Playing: {}", track.title));
      }
      Err(e) => {
        warn!(err = %e, title = %track.title, "player: play failed");
        self.settle_phase();
        self.skip_after_failed_advance();
        self.set_error(format!("Failed to play {}: {}", track.title, e));
      }
    }
  }

  /// An auto-advanced track could not be played. The previous one is still over, so let
  /// the monitor report that completion again after its cooldown and move past this track.
  fn skip_after_failed_advance(&mut self) {
    if std::mem::take(&mut self.auto_advanced) {
      info!("monitor: advanced track unplayable, will skip it");
      self.rearm.store(true, Ordering::Relaxed);
    }
  }

  /// Stop playback, release the media engine and write the library one last time.
  pub async fn shutdown(&mut self) {
    if let Some(handle) = self.monitor.take() {
      handle.abort();
    }
    if let Err(e) = self.engine.stop().await {
      debug!(err = %e, "player: stop on exit failed");
    }
    self.engine.shutdown().await;
    self.persist();
    info!("shutdown complete");
  }
}

// --- Helpers ---

fn step_selection(state: &mut ListState, len: usize, down: bool) {
  if len == 0 {
    state.select(None);
    return;
  }
  let i = match state.selected() {
    None => 0,
    Some(i) if down => (i + 1) % len,
    Some(0) => len - 1,
    Some(i) => (i - 1).min(len - 1),
  };
  state.select(Some(i));
}

fn clamp_selection(state: &mut ListState, len: usize) {
  match state.selected() {
    _ if len == 0 => state.select(None),
    Some(i) if i >= len => state.select(Some(len - 1)),
    None => state.select(Some(0)),
    Some(_) => {}
  }
}
