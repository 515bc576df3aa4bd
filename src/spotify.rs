//! Spotify playlist import.
//!
//! There is no API key involved: the public playlist page embeds its data as JSON in a
//! `__NEXT_DATA__` script tag. When that is missing the embeddable player page is scraped
//! with a looser pattern instead. Both are at the mercy of Spotify's markup.

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ValidationError;
use crate::gateway::PlaylistSource;

/// A track as listed by the external service, before it is matched to a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTrack {
  pub name: String,
  pub artist: String,
}

impl ExternalTrack {
  /// Free-text query used to find the track on the video platform.
  pub fn query(&self) -> String {
    format!("{} {}", self.name, self.artist)
  }

  /// Title stored on the imported track.
  pub fn title(&self) -> String {
    format!("{} - {}", self.name, self.artist)
  }
}

static NEXT_DATA: LazyLock<Option<Regex>> =
  LazyLock::new(|| Regex::new(r#"(?s)<script id="__NEXT_DATA__" type="application/json">(.+?)</script>"#).ok());

static EMBED_TRACK: LazyLock<Option<Regex>> =
  LazyLock::new(|| Regex::new(r#""name":"([^"]+)".*?"artists":\[.*?"name":"([^"]+)""#).ok());

/// Extract the playlist id from a share URL (`https://open.spotify.com/playlist/<id>?si=..`)
/// or a URI (`spotify:playlist:<id>`).
pub fn extract_playlist_id(input: &str) -> Result<String, ValidationError> {
  let input = input.trim();
  let id = if let Some(rest) = input.strip_prefix("spotify:playlist:") {
    rest
  } else if input.contains("spotify.com/") && input.contains("playlist/") {
    input.split_once("playlist/").map_or("", |(_, rest)| rest)
  } else {
    return Err(ValidationError::NotPlaylistUrl);
  };
  let id = id.split(['?', '/', '#']).next().unwrap_or_default();
  if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
    return Err(ValidationError::NotPlaylistUrl);
  }
  Ok(id.to_string())
}

/// Tracks from the `__NEXT_DATA__` JSON of a playlist page. `None` when the tag is absent
/// or its structure is not the expected one.
pub fn parse_next_data(html: &str) -> Option<Vec<ExternalTrack>> {
  let json = NEXT_DATA.as_ref()?.captures(html)?.get(1)?.as_str();
  let data: Value = match serde_json::from_str(json) {
    Ok(data) => data,
    Err(e) => {
      warn!(err = %e, "import: __NEXT_DATA__ is not valid JSON");
      return None;
    }
  };
  let items = data.pointer("/props/pageProps/state/data/entity/tracks/items")?.as_array()?;

  let tracks = items
    .iter()
    .filter_map(|item| {
      let track = item.get("track")?;
      let name = track.get("name")?.as_str().filter(|n| !n.is_empty())?;
      let artist = track
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| artists.iter().filter_map(|a| a.get("name").and_then(Value::as_str)).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
      Some(ExternalTrack { name: name.to_string(), artist })
    })
    .collect();
  Some(tracks)
}

/// Name/artist pairs pattern-matched out of the embed page, de-duplicated in order of
/// first appearance and capped at `limit`.
pub fn parse_embed(html: &str, limit: usize) -> Vec<ExternalTrack> {
  let Some(pattern) = EMBED_TRACK.as_ref() else { return Vec::new() };
  let mut seen = HashSet::new();
  pattern
    .captures_iter(html)
    .map(|c| ExternalTrack { name: c[1].to_string(), artist: c[2].to_string() })
    .filter(|t| seen.insert((t.name.clone(), t.artist.clone())))
    .take(limit)
    .collect()
}

/// Scrapes open.spotify.com.
pub struct SpotifyScraper {
  base_url: String,
  client: reqwest::Client,
  limit: usize,
}

impl SpotifyScraper {
  pub fn new(user_agent: &str, timeout: Duration, limit: usize) -> Self {
    Self::with_base_url("https://open.spotify.com", user_agent, timeout, limit)
  }

  /// Create a scraper with a custom base URL (for testing)
  pub fn with_base_url(base_url: impl Into<String>, user_agent: &str, timeout: Duration, limit: usize) -> Self {
    Self {
      base_url: base_url.into(),
      client: reqwest::Client::builder().user_agent(user_agent).timeout(timeout).build().unwrap_or_default(),
      limit,
    }
  }

  async fn fetch_page(&self, path: &str) -> Result<Option<String>> {
    let url = format!("{}{}", self.base_url, path);
    let response = self
      .client
      .get(&url)
      .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
      .header("Accept-Language", "en-US,en;q=0.9")
      .send()
      .await
      .with_context(|| format!("Failed to fetch {}", url))?;

    let status = response.status();
    if !status.is_success() {
      warn!(%status, url = %url, "import: page fetch failed");
      return Ok(None);
    }
    let body = response.text().await.context("Failed to read response body")?;
    Ok(Some(body))
  }

  /// Structured extraction first, embed-page scrape when that yields nothing.
  pub async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<ExternalTrack>> {
    if let Some(html) = self.fetch_page(&format!("/playlist/{}", playlist_id)).await? {
      match parse_next_data(&html) {
        Some(tracks) if !tracks.is_empty() => {
          info!(count = tracks.len(), "import: tracks from structured page data");
          return Ok(tracks);
        }
        _ => debug!("import: no structured data, falling back to embed page"),
      }
    }

    let Some(html) = self.fetch_page(&format!("/embed/playlist/{}", playlist_id)).await? else {
      return Ok(Vec::new());
    };
    let tracks = parse_embed(&html, self.limit);
    info!(count = tracks.len(), "import: tracks from embed page");
    Ok(tracks)
  }
}

impl PlaylistSource for SpotifyScraper {
  fn tracks<'a>(&'a self, playlist_id: &'a str) -> BoxFuture<'a, Result<Vec<ExternalTrack>>> {
    self.playlist_tracks(playlist_id).boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NEXT_DATA_PAGE: &str = r#"<html><head></head><body>
<script id="__NEXT_DATA__" type="application/json">{"props":{"pageProps":{"state":{"data":{"entity":{"tracks":{"items":[
  {"track":{"name":"Dragonborn","artists":[{"name":"Jeremy Soule"}]}},
  {"track":{"name":"","artists":[{"name":"Nobody"}]}},
  {"track":{"name":"Duel","artists":[{"name":"A"},{"name":"B"}]}}
]}}}}}}}</script>
</body></html>"#;

  const EMBED_PAGE: &str = r#"<script>{"name":"Tavern","uri":"x","artists":[{"name":"Bard"}]},{"name":"Tavern","artists":[{"name":"Bard"}]},{"name":"Storm","artists":[{"uri":"y","name":"Sea"}]}</script>"#;

  // --- extract_playlist_id ---

  #[test]
  fn playlist_id_from_share_url() {
    assert_eq!(extract_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DX?si=abc").unwrap(), "37i9dQZF1DX");
    assert_eq!(extract_playlist_id("https://open.spotify.com/intl-pt/playlist/abc123/").unwrap(), "abc123");
    assert_eq!(extract_playlist_id("spotify:playlist:abc123").unwrap(), "abc123");
  }

  #[test]
  fn playlist_id_rejects_other_urls() {
    assert_eq!(extract_playlist_id("https://open.spotify.com/album/abc"), Err(ValidationError::NotPlaylistUrl));
    assert_eq!(extract_playlist_id("https://open.spotify.com/playlist/"), Err(ValidationError::NotPlaylistUrl));
    assert_eq!(extract_playlist_id("https://youtube.com/playlist/abc"), Err(ValidationError::NotPlaylistUrl));
  }

  // --- parsing ---

  #[test]
  fn next_data_joins_artists_and_skips_nameless() {
    let tracks = parse_next_data(NEXT_DATA_PAGE).unwrap();
    assert_eq!(
      tracks,
      vec![
        ExternalTrack { name: "Dragonborn".into(), artist: "Jeremy Soule".into() },
        ExternalTrack { name: "Duel".into(), artist: "A, B".into() },
      ]
    );
  }

  #[test]
  fn next_data_absent() {
    assert!(parse_next_data("<html></html>").is_none());
    assert!(parse_next_data(r#"<script id="__NEXT_DATA__" type="application/json">{}</script>"#).is_none());
  }

  #[test]
  fn embed_scrape_dedupes_pairs() {
    let tracks = parse_embed(EMBED_PAGE, 50);
    assert_eq!(
      tracks,
      vec![
        ExternalTrack { name: "Tavern".into(), artist: "Bard".into() },
        ExternalTrack { name: "Storm".into(), artist: "Sea".into() },
      ]
    );
    assert_eq!(parse_embed(EMBED_PAGE, 1).len(), 1);
  }

  #[test]
  fn query_and_title() {
    let t = ExternalTrack { name: "Duel".into(), artist: "A".into() };
    assert_eq!(t.query(), "Duel A");
    assert_eq!(t.title(), "Duel - A");
  }

  // --- HTTP ---

  fn scraper(server: &mockito::Server) -> SpotifyScraper {
    SpotifyScraper::with_base_url(server.url(), "test-agent", Duration::from_secs(5), 50)
  }

  #[tokio::test]
  async fn uses_structured_data_when_present() {
    let mut server = mockito::Server::new_async().await;
    let page = server.mock("GET", "/playlist/p1").with_status(200).with_body(NEXT_DATA_PAGE).create_async().await;
    let embed = server.mock("GET", "/embed/playlist/p1").expect(0).create_async().await;

    let tracks = scraper(&server).playlist_tracks("p1").await.unwrap();
    assert_eq!(tracks.len(), 2);
    page.assert_async().await;
    embed.assert_async().await;
  }

  #[tokio::test]
  async fn falls_back_to_embed_page() {
    let mut server = mockito::Server::new_async().await;
    let _page = server.mock("GET", "/playlist/p2").with_status(200).with_body("<html>no data</html>").create_async().await;
    let _embed = server.mock("GET", "/embed/playlist/p2").with_status(200).with_body(EMBED_PAGE).create_async().await;

    let tracks = scraper(&server).playlist_tracks("p2").await.unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].name, "Tavern");
  }

  #[tokio::test]
  async fn http_errors_yield_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _page = server.mock("GET", "/playlist/p3").with_status(404).create_async().await;
    let _embed = server.mock("GET", "/embed/playlist/p3").with_status(500).create_async().await;

    let tracks = scraper(&server).playlist_tracks("p3").await.unwrap();
    assert!(tracks.is_empty());
  }
}
