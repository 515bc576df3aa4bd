use anyhow::{Context, Result, anyhow};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::gateway::VideoSearch;

/// A single entry from a search listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
  pub title: String,
  pub url: String,
  pub video_id: String,
  /// Seconds; 0 when yt-dlp does not know.
  pub duration: u64,
}

/// Title and id for a single video looked up by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
  pub title: String,
  pub video_id: String,
}

/// Canonical watch URL for a video id.
pub fn watch_url(video_id: &str) -> String {
  format!("https://www.youtube.com/watch?v={}", video_id)
}

/// `m:ss`, or `?` when the duration is unknown.
pub fn format_duration(seconds: u64) -> String {
  if seconds == 0 {
    return "?".to_string();
  }
  format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Host part of an http(s) URL, lowercased, without port.
fn url_host(url: &str) -> Option<String> {
  let rest = url.trim().split_once("://").map_or(url.trim(), |(_, rest)| rest);
  let authority = rest.split(['/', '?', '#']).next()?;
  let host = authority.rsplit('@').next()?.split(':').next()?;
  (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Whether `url` points at the video platform (youtube.com and subdomains, youtu.be).
pub fn is_video_url(url: &str) -> bool {
  match url_host(url) {
    Some(host) => host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com"),
    None => false,
  }
}

/// Drop query parameters that have nothing to do with the video itself (playlist, session,
/// timestamps). A `v=` parameter is the video id on watch pages and is kept.
///
/// `https://youtube.com/watch?v=abc123?extra=1` → `https://youtube.com/watch?v=abc123`
pub fn clean_video_url(url: &str) -> String {
  let url = url.trim();
  let url = url.split_once('#').map_or(url, |(before, _)| before);
  let Some((base, query)) = url.split_once('?') else {
    return url.to_string();
  };
  match query.split(['&', '?']).find(|p| p.len() > 2 && p.starts_with("v=")) {
    Some(video) => format!("{}?{}", base, video),
    None => base.to_string(),
  }
}

/// The yt-dlp print template used for search listings.
const SEARCH_FORMAT: &str = "%(title)s\t%(id)s\t%(duration)s";

/// Parse a single tab-separated yt-dlp output line into a SearchEntry.
/// Expected format: `title\tid[\tduration]`
fn parse_search_line(line: &str) -> Option<SearchEntry> {
  let parts: Vec<&str> = line.split('\t').collect();
  if parts.len() < 2 {
    return None;
  }
  let video_id = parts[1].trim().to_string();
  if video_id.is_empty() || video_id == "NA" {
    return None;
  }
  let title = match parts[0].trim() {
    "" | "NA" => "Untitled".to_string(),
    t => t.to_string(),
  };
  // Duration comes out as "NA", "213" or "213.0".
  let duration = parts.get(2).and_then(|s| s.trim().parse::<f64>().ok()).filter(|d| d.is_finite() && *d > 0.0);
  let duration = duration.map_or(0, |d| d as u64);
  Some(SearchEntry { title, url: watch_url(&video_id), video_id, duration })
}

/// Parse yt-dlp stdout lines into SearchEntry vec.
fn parse_search_output(stdout: &str, limit: usize) -> Vec<SearchEntry> {
  stdout.lines().map(str::trim).filter(|l| !l.is_empty()).filter_map(parse_search_line).take(limit).collect()
}

fn parse_lookup_output(stdout: &str) -> Option<VideoInfo> {
  let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
  let (title, id) = line.rsplit_once('\t')?;
  let id = id.trim();
  if id.is_empty() || id == "NA" {
    return None;
  }
  let title = if title.trim().is_empty() || title.trim() == "NA" { "Untitled" } else { title.trim() };
  Some(VideoInfo { title: title.to_string(), video_id: id.to_string() })
}

fn not_found_or(e: std::io::Error, what: &'static str) -> anyhow::Error {
  if e.kind() == std::io::ErrorKind::NotFound {
    anyhow!("yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp")
  } else {
    anyhow!(e).context(what)
  }
}

async fn run_yt_dlp(args: &[&str], what: &'static str) -> Result<String> {
  let output = Command::new("yt-dlp")
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|e| not_found_or(e, what))?;

  if !output.status.success() {
    return Err(anyhow!("{} failed: {}", what, String::from_utf8_lossy(&output.stderr).trim()));
  }
  String::from_utf8(output.stdout).context("yt-dlp output non-UTF8")
}

/// The yt-dlp command line tool.
#[derive(Debug, Clone)]
pub struct YtDlp {
  stream_format: String,
}

impl YtDlp {
  pub fn new(stream_format: impl Into<String>) -> Self {
    Self { stream_format: stream_format.into() }
  }

  /// Whether `yt-dlp` can be executed at all.
  pub async fn is_available() -> bool {
    Command::new("yt-dlp")
      .arg("--version")
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .await
      .map(|s| s.success())
      .unwrap_or(false)
  }

  pub async fn search_videos(&self, query: &str, limit: usize) -> Result<Vec<SearchEntry>> {
    let target = format!("ytsearch{}:{}", limit, query);
    let stdout = run_yt_dlp(
      &[
        "--flat-playlist",
        "--print",
        SEARCH_FORMAT,
        "--skip-download",
        "--ignore-errors",
        "--no-warnings",
        "--",
        &target,
      ],
      "yt-dlp search",
    )
    .await?;
    let entries = parse_search_output(&stdout, limit);
    debug!(query, count = entries.len(), "youtube: search finished");
    Ok(entries)
  }

  /// Direct, playable media URL for a video id or URL.
  pub async fn resolve_stream(&self, source: &str) -> Result<String> {
    let target = if source.contains("://") { source.to_string() } else { watch_url(source) };
    info!(source = %target, "youtube: resolving stream URL via yt-dlp -g");
    let stdout = run_yt_dlp(
      &["-g", "--format", &self.stream_format, "--no-playlist", "--no-warnings", "--", &target],
      "yt-dlp stream resolution",
    )
    .await?;
    let url = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default().to_string();
    if url.is_empty() {
      return Err(anyhow!("yt-dlp -g returned empty output"));
    }
    Ok(url)
  }

  pub async fn video_info(&self, url: &str) -> Result<VideoInfo> {
    let stdout = run_yt_dlp(
      &["--print", "%(title)s\t%(id)s", "--no-playlist", "--skip-download", "--no-warnings", "--", url],
      "yt-dlp lookup",
    )
    .await?;
    parse_lookup_output(&stdout).ok_or_else(|| anyhow!("yt-dlp returned no video for {}", url))
  }
}

impl VideoSearch for YtDlp {
  fn search<'a>(&'a self, query: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<SearchEntry>>> {
    self.search_videos(query, limit).boxed()
  }

  fn stream_url<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<String>> {
    self.resolve_stream(source).boxed()
  }

  fn lookup<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<VideoInfo>> {
    self.video_info(url).boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- format_duration ---

  #[test]
  fn format_duration_unknown() {
    assert_eq!(format_duration(0), "?");
  }

  #[test]
  fn format_duration_pads_seconds() {
    assert_eq!(format_duration(125), "2:05");
    assert_eq!(format_duration(59), "0:59");
    assert_eq!(format_duration(3600), "60:00");
  }

  // --- clean_video_url ---

  #[test]
  fn clean_url_keeps_video_id_only() {
    assert_eq!(clean_video_url("https://youtube.com/watch?v=abc123?extra=1"), "https://youtube.com/watch?v=abc123");
    assert_eq!(
      clean_video_url("https://www.youtube.com/watch?v=abc123&list=PL1&index=4"),
      "https://www.youtube.com/watch?v=abc123"
    );
    assert_eq!(
      clean_video_url("https://www.youtube.com/watch?list=PL1&v=abc123"),
      "https://www.youtube.com/watch?v=abc123"
    );
  }

  #[test]
  fn clean_url_drops_share_parameters() {
    assert_eq!(clean_video_url("https://youtu.be/abc123?si=xyz"), "https://youtu.be/abc123");
    assert_eq!(clean_video_url("https://youtu.be/abc123#t=30"), "https://youtu.be/abc123");
    assert_eq!(clean_video_url("  https://youtu.be/abc123  "), "https://youtu.be/abc123");
  }

  // --- is_video_url ---

  #[test]
  fn video_hosts_accepted() {
    assert!(is_video_url("https://www.youtube.com/watch?v=x"));
    assert!(is_video_url("https://youtube.com/watch?v=x"));
    assert!(is_video_url("https://music.youtube.com/watch?v=x"));
    assert!(is_video_url("http://youtu.be/x"));
    assert!(is_video_url("youtu.be/x"));
  }

  #[test]
  fn other_hosts_rejected() {
    assert!(!is_video_url("https://vimeo.com/123"));
    assert!(!is_video_url("https://notyoutube.com/watch?v=x"));
    assert!(!is_video_url("https://evil.com/?u=youtube.com"));
    assert!(!is_video_url(""));
  }

  // --- parsing ---

  #[test]
  fn parse_search_line_with_duration() {
    let e = parse_search_line("Epic Battle Music\tabc123\t213.0").unwrap();
    assert_eq!(e.title, "Epic Battle Music");
    assert_eq!(e.video_id, "abc123");
    assert_eq!(e.url, "https://www.youtube.com/watch?v=abc123");
    assert_eq!(e.duration, 213);
  }

  #[test]
  fn parse_search_line_missing_duration() {
    assert_eq!(parse_search_line("Live\tlive1\tNA").unwrap().duration, 0);
    assert_eq!(parse_search_line("Short\tid2").unwrap().duration, 0);
  }

  #[test]
  fn parse_search_line_rejects_missing_id() {
    assert!(parse_search_line("no tabs here").is_none());
    assert!(parse_search_line("Title\t\t10").is_none());
    assert!(parse_search_line("Title\tNA\t10").is_none());
  }

  #[test]
  fn parse_search_output_limits_and_skips_blank() {
    let stdout = "A\ta1\t10\n\nB\tb2\tNA\nbroken\nC\tc3\t30\n";
    let entries = parse_search_output(stdout, 2);
    let ids: Vec<_> = entries.iter().map(|e| e.video_id.as_str()).collect();
    assert_eq!(ids, ["a1", "b2"]);
  }

  #[test]
  fn parse_lookup_title_with_tabs() {
    let info = parse_lookup_output("Tavern\tSongs\tq9\n").unwrap();
    assert_eq!(info.title, "Tavern\tSongs");
    assert_eq!(info.video_id, "q9");
    assert!(parse_lookup_output("").is_none());
  }
}
