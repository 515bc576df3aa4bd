//! The one place the controller talks to the outside world for track data.
//!
//! Both backends sit behind traits so the fragile parts (yt-dlp output, playlist page
//! scraping) can be swapped or faked without touching the controller.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, ValidationError};
use crate::library::Track;
use crate::spotify::ExternalTrack;
use crate::youtube::{SearchEntry, VideoInfo, clean_video_url, is_video_url};

/// Video platform: text search, stream resolution, metadata lookup.
pub trait VideoSearch: Send + Sync {
  fn search<'a>(&'a self, query: &'a str, limit: usize) -> BoxFuture<'a, anyhow::Result<Vec<SearchEntry>>>;
  fn stream_url<'a>(&'a self, source: &'a str) -> BoxFuture<'a, anyhow::Result<String>>;
  fn lookup<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<VideoInfo>>;
}

/// External music service: the name/artist list of a playlist.
pub trait PlaylistSource: Send + Sync {
  fn tracks<'a>(&'a self, playlist_id: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<ExternalTrack>>>;
}

/// Status line sink. Called from worker tasks; implementations hand the text to the UI loop.
pub type StatusFn = Arc<dyn Fn(String) + Send + Sync>;

/// Outcome of an external playlist import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
  pub tracks: Vec<Track>,
  /// How many tracks the external playlist listed.
  pub total: usize,
}

pub struct SearchGateway {
  videos: Arc<dyn VideoSearch>,
  playlists: Arc<dyn PlaylistSource>,
  status: StatusFn,
  max_results: usize,
}

impl SearchGateway {
  pub fn new(videos: Arc<dyn VideoSearch>, playlists: Arc<dyn PlaylistSource>, status: StatusFn, max_results: usize) -> Self {
    Self { videos, playlists, status, max_results }
  }

  fn report(&self, msg: String) {
    (self.status)(msg);
  }

  /// Top results for `query`. Backend failures are reported and come back as no results.
  pub async fn search(&self, query: &str) -> Vec<SearchEntry> {
    match self.videos.search(query, self.max_results).await {
      Ok(results) => results,
      Err(e) => {
        warn!(err = %format!("{:#}", e), query, "search: backend failed");
        self.report(format!("Search failed: {:#}", e));
        Vec::new()
      }
    }
  }

  /// Direct playable URL for a track source (id or URL). `None` means it cannot be played.
  pub async fn resolve_stream_url(&self, source: &str) -> Option<String> {
    match self.videos.stream_url(source).await {
      Ok(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
      Ok(_) => {
        warn!(source, "search: empty stream URL");
        None
      }
      Err(e) => {
        warn!(err = %format!("{:#}", e), source, "search: stream resolution failed");
        None
      }
    }
  }

  /// Build a track from a link typed by the user.
  pub async fn add_by_url(&self, url: &str) -> Result<Track, Error> {
    let url = url.trim();
    if url.is_empty() {
      return Err(ValidationError::EmptyUrl.into());
    }
    if !is_video_url(url) {
      return Err(ValidationError::NotVideoUrl.into());
    }
    let cleaned = clean_video_url(url);
    let info = self.videos.lookup(&cleaned).await?;
    info!(url = %cleaned, title = %info.title, "search: resolved URL");
    Ok(Track::new(info.title, cleaned, info.video_id))
  }

  /// Fetch an external playlist and match each entry to its top video result.
  /// Per-track failures are skipped; partial imports succeed.
  pub async fn import_external_playlist(&self, playlist_id: &str) -> Result<ImportReport, Error> {
    self.report("Fetching playlist tracks…".to_string());
    let external = self.playlists.tracks(playlist_id).await?;
    let total = external.len();
    if total == 0 {
      return Err(Error::Backend(anyhow::anyhow!("Could not get the tracks of playlist {}", playlist_id)));
    }
    self.report(format!("Searching {} tracks…", total));

    let mut tracks = Vec::with_capacity(total);
    for (i, entry) in external.iter().enumerate() {
      match self.videos.search(&entry.query(), 1).await {
        Ok(results) => {
          if let Some(top) = results.into_iter().next() {
            tracks.push(Track::new(entry.title(), top.url, top.video_id));
          }
        }
        Err(e) => warn!(err = %format!("{:#}", e), name = %entry.name, "import: search failed, skipping"),
      }
      self.report(format!("Processing {}/{} - {} found", i + 1, total, tracks.len()));
    }

    info!(playlist_id, found = tracks.len(), total, "import: finished");
    Ok(ImportReport { tracks, total })
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use super::*;
  use anyhow::anyhow;
  use futures::FutureExt;
  use std::collections::HashMap;
  use std::sync::Mutex as StdMutex;

  /// Canned video backend. Queries missing from `results` fail.
  #[derive(Default)]
  pub struct FakeVideos {
    pub results: HashMap<String, Vec<SearchEntry>>,
    pub streams: HashMap<String, String>,
    pub info: HashMap<String, VideoInfo>,
    pub queries: StdMutex<Vec<String>>,
  }

  pub fn entry(title: &str, id: &str, duration: u64) -> SearchEntry {
    SearchEntry { title: title.into(), url: crate::youtube::watch_url(id), video_id: id.into(), duration }
  }

  impl VideoSearch for FakeVideos {
    fn search<'a>(&'a self, query: &'a str, limit: usize) -> BoxFuture<'a, anyhow::Result<Vec<SearchEntry>>> {
      async move {
        self.queries.lock().unwrap().push(query.to_string());
        let mut results = self.results.get(query).cloned().ok_or_else(|| anyhow!("no such query: {}", query))?;
        results.truncate(limit);
        Ok(results)
      }
      .boxed()
    }

    fn stream_url<'a>(&'a self, source: &'a str) -> BoxFuture<'a, anyhow::Result<String>> {
      async move { self.streams.get(source).cloned().ok_or_else(|| anyhow!("unavailable")) }.boxed()
    }

    fn lookup<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<VideoInfo>> {
      async move { self.info.get(url).cloned().ok_or_else(|| anyhow!("video unavailable")) }.boxed()
    }
  }

  #[derive(Default)]
  pub struct FakePlaylists {
    pub tracks: Vec<ExternalTrack>,
  }

  impl PlaylistSource for FakePlaylists {
    fn tracks<'a>(&'a self, _playlist_id: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<ExternalTrack>>> {
      async move { Ok(self.tracks.clone()) }.boxed()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::fake::*;
  use super::*;
  use std::sync::Mutex as StdMutex;

  fn gateway(videos: FakeVideos, playlists: FakePlaylists) -> (SearchGateway, Arc<StdMutex<Vec<String>>>) {
    let log = Arc::new(StdMutex::new(Vec::new()));
    let sink = log.clone();
    let status: StatusFn = Arc::new(move |msg| sink.lock().unwrap().push(msg));
    (SearchGateway::new(Arc::new(videos), Arc::new(playlists), status, 15), log)
  }

  #[tokio::test]
  async fn search_maps_results() {
    let mut videos = FakeVideos::default();
    videos.results.insert("tavern".into(), vec![entry("Tavern Music", "t1", 200)]);
    let (gw, _) = gateway(videos, FakePlaylists::default());
    let results = gw.search("tavern").await;
    assert_eq!(results, vec![entry("Tavern Music", "t1", 200)]);
  }

  #[tokio::test]
  async fn search_failure_reports_and_returns_empty() {
    let (gw, log) = gateway(FakeVideos::default(), FakePlaylists::default());
    assert!(gw.search("anything").await.is_empty());
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].starts_with("Search failed"));
  }

  #[tokio::test]
  async fn resolve_failure_is_none() {
    let mut videos = FakeVideos::default();
    videos.streams.insert("ok".into(), "https://cdn/ok".into());
    videos.streams.insert("blank".into(), "  ".into());
    let (gw, _) = gateway(videos, FakePlaylists::default());
    assert_eq!(gw.resolve_stream_url("ok").await.as_deref(), Some("https://cdn/ok"));
    assert_eq!(gw.resolve_stream_url("blank").await, None);
    assert_eq!(gw.resolve_stream_url("missing").await, None);
  }

  #[tokio::test]
  async fn add_by_url_strips_query() {
    let mut videos = FakeVideos::default();
    videos
      .info
      .insert("https://youtube.com/watch?v=abc123".into(), VideoInfo { title: "Boss Theme".into(), video_id: "abc123".into() });
    let (gw, _) = gateway(videos, FakePlaylists::default());

    let track = gw.add_by_url("https://youtube.com/watch?v=abc123?extra=1").await.unwrap();
    assert_eq!(track.url, "https://youtube.com/watch?v=abc123");
    assert_eq!(track.title, "Boss Theme");
    assert_eq!(track.video_id, "abc123");
    assert_eq!(track.start_time, 0);
  }

  #[tokio::test]
  async fn add_by_url_validates_host() {
    let (gw, _) = gateway(FakeVideos::default(), FakePlaylists::default());
    assert!(matches!(gw.add_by_url("https://vimeo.com/1").await, Err(Error::Validation(ValidationError::NotVideoUrl))));
    assert!(matches!(gw.add_by_url("  ").await, Err(Error::Validation(ValidationError::EmptyUrl))));
    assert!(matches!(gw.add_by_url("https://youtu.be/gone").await, Err(Error::Backend(_))));
  }

  #[tokio::test]
  async fn import_matches_top_result_and_skips_failures() {
    let mut videos = FakeVideos::default();
    videos.results.insert("Dragonborn Jeremy Soule".into(), vec![entry("Dragonborn (Official)", "d1", 240), entry("cover", "d2", 0)]);
    videos.results.insert("Silence Nobody".into(), vec![]);
    let playlists = FakePlaylists {
      tracks: vec![
        ExternalTrack { name: "Dragonborn".into(), artist: "Jeremy Soule".into() },
        ExternalTrack { name: "Silence".into(), artist: "Nobody".into() },
        ExternalTrack { name: "Broken".into(), artist: "Backend".into() },
      ],
    };
    let videos = Arc::new(videos);
    let log = Arc::new(StdMutex::new(Vec::new()));
    let sink = log.clone();
    let status: StatusFn = Arc::new(move |msg| sink.lock().unwrap().push(msg));
    let gw = SearchGateway::new(videos.clone(), Arc::new(playlists), status, 15);

    let report = gw.import_external_playlist("p1").await.unwrap();
    assert_eq!(*videos.queries.lock().unwrap(), ["Dragonborn Jeremy Soule", "Silence Nobody", "Broken Backend"]);
    assert_eq!(report.total, 3);
    assert_eq!(report.tracks.len(), 1);
    assert_eq!(report.tracks[0].title, "Dragonborn - Jeremy Soule");
    assert_eq!(report.tracks[0].video_id, "d1");
    assert_eq!(log.lock().unwrap().last().unwrap(), "Processing 3/3 - 1 found");
  }

  #[tokio::test]
  async fn import_of_empty_playlist_fails() {
    let (gw, _) = gateway(FakeVideos::default(), FakePlaylists::default());
    assert!(matches!(gw.import_external_playlist("p1").await, Err(Error::Backend(_))));
  }
}
