//! Folder → playlist → track hierarchy and its JSON document.
//!
//! The document is a single object keyed by folder name:
//! `{ "Combat": [ { "name": "Boss", "tracks": [ { "title", "url", "video_id", "start_time" } ] } ] }`.
//! Folder order is the order of keys in the file, so the map is (de)serialized by hand
//! instead of going through a `HashMap`.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PersistenceError, ValidationError};

/// A single playable entry. Only `start_time` is edited after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
  pub title: String,
  pub url: String,
  #[serde(default)]
  pub video_id: String,
  /// Offset in seconds applied as a seek when the track starts.
  #[serde(default)]
  pub start_time: u32,
}

impl Track {
  pub fn new(title: impl Into<String>, url: impl Into<String>, video_id: impl Into<String>) -> Self {
    Self { title: title.into(), url: url.into(), video_id: video_id.into(), start_time: 0 }
  }

  /// What to hand yt-dlp when resolving a stream: the id when known, the stored URL otherwise.
  pub fn source(&self) -> &str {
    if self.video_id.is_empty() { &self.url } else { &self.video_id }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
  pub name: String,
  #[serde(default)]
  pub tracks: Vec<Track>,
}

impl Playlist {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), tracks: Vec::new() }
  }

  pub fn len(&self) -> usize {
    self.tracks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tracks.is_empty()
  }

  pub fn add_track(&mut self, track: Track) {
    self.tracks.push(track);
  }

  pub fn remove_track(&mut self, index: usize) -> Option<Track> {
    (index < self.tracks.len()).then(|| self.tracks.remove(index))
  }

  /// Swap with the previous track. Returns the track's new index, or `None` at the top.
  pub fn move_up(&mut self, index: usize) -> Option<usize> {
    if index == 0 || index >= self.tracks.len() {
      return None;
    }
    self.tracks.swap(index, index - 1);
    Some(index - 1)
  }

  /// Swap with the next track. Returns the track's new index, or `None` at the bottom.
  pub fn move_down(&mut self, index: usize) -> Option<usize> {
    if index + 1 >= self.tracks.len() {
      return None;
    }
    self.tracks.swap(index, index + 1);
    Some(index + 1)
  }

  pub fn set_start_time(&mut self, index: usize, seconds: u32) -> bool {
    match self.tracks.get_mut(index) {
      Some(track) => {
        track.start_time = seconds;
        true
      }
      None => false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
  pub name: String,
  pub playlists: Vec<Playlist>,
}

/// Address of a playlist inside the library. Playlists are only removed together with
/// their folder, so the index stays valid for as long as the folder exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
  pub folder: String,
  pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Library {
  folders: Vec<Folder>,
}

impl Library {
  /// Read the library, degrading to an empty one on any failure. An unparsable file is
  /// moved aside to `<name>.bak` so the next save cannot destroy it.
  pub fn load(path: &Path) -> Self {
    match Self::try_load(path) {
      Ok(library) => {
        info!(path = %path.display(), folders = library.folders.len(), "library: loaded");
        library
      }
      Err(e @ PersistenceError::Parse { .. }) => {
        let backup = backup_path(path);
        match std::fs::rename(path, &backup) {
          Ok(()) => warn!(err = %e, backup = %backup.display(), "library: unreadable, moved aside, starting empty"),
          Err(rename_err) => warn!(err = %e, rename_err = %rename_err, "library: unreadable and not backed up"),
        }
        Self::default()
      }
      Err(e) => {
        warn!(err = %e, "library: load failed, starting empty");
        Self::default()
      }
    }
  }

  /// Read the library. A missing file is an empty library, not an error.
  pub fn try_load(path: &Path) -> Result<Self, PersistenceError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
      Err(source) => return Err(PersistenceError::Read { path: path.to_path_buf(), source }),
    };
    serde_json::from_str(&content).map_err(|source| PersistenceError::Parse { path: path.to_path_buf(), source })
  }

  /// Write the whole document: serialize to a sibling temp file, then rename over the target.
  pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(self)?;
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Write { path: path.to_path_buf(), source })?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, json).map_err(|source| PersistenceError::Write { path: tmp.clone(), source })?;
    std::fs::rename(&tmp, path).map_err(|source| PersistenceError::Write { path: path.to_path_buf(), source })?;
    Ok(())
  }

  pub fn folders(&self) -> &[Folder] {
    &self.folders
  }

  pub fn folder(&self, name: &str) -> Option<&Folder> {
    self.folders.iter().find(|f| f.name == name)
  }

  fn folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
    self.folders.iter_mut().find(|f| f.name == name)
  }

  pub fn create_folder(&mut self, name: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
      return Err(ValidationError::EmptyName);
    }
    if self.folder(name).is_some() {
      return Err(ValidationError::DuplicateFolder(name.to_string()));
    }
    self.folders.push(Folder { name: name.to_string(), playlists: Vec::new() });
    Ok(())
  }

  /// Remove a folder together with every playlist it holds.
  pub fn delete_folder(&mut self, name: &str) -> Result<Folder, ValidationError> {
    let idx =
      self.folders.iter().position(|f| f.name == name).ok_or_else(|| ValidationError::UnknownFolder(name.to_string()))?;
    Ok(self.folders.remove(idx))
  }

  pub fn create_playlist(&mut self, folder: &str, name: &str) -> Result<PlaylistRef, ValidationError> {
    let name = name.trim();
    let target = self.folder_mut(folder).ok_or_else(|| ValidationError::UnknownFolder(folder.to_string()))?;
    if name.is_empty() {
      return Err(ValidationError::EmptyName);
    }
    if target.playlists.iter().any(|p| p.name == name) {
      return Err(ValidationError::DuplicatePlaylist(name.to_string()));
    }
    target.playlists.push(Playlist::new(name));
    Ok(PlaylistRef { folder: folder.to_string(), index: target.playlists.len() - 1 })
  }

  pub fn playlist(&self, at: &PlaylistRef) -> Option<&Playlist> {
    self.folder(&at.folder).and_then(|f| f.playlists.get(at.index))
  }

  pub fn playlist_mut(&mut self, at: &PlaylistRef) -> Option<&mut Playlist> {
    self.folder_mut(&at.folder).and_then(|f| f.playlists.get_mut(at.index))
  }

  pub fn find_playlist(&self, folder: &str, name: &str) -> Option<PlaylistRef> {
    let f = self.folder(folder)?;
    let index = f.playlists.iter().position(|p| p.name == name)?;
    Some(PlaylistRef { folder: folder.to_string(), index })
  }
}

fn temp_path(path: &Path) -> PathBuf {
  with_suffix(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
  with_suffix(path, ".bak")
}

/// `library.json` -> `library.json<suffix>`, next to the original.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(suffix);
  path.with_file_name(name)
}

impl Serialize for Library {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.folders.len()))?;
    for folder in &self.folders {
      map.serialize_entry(&folder.name, &folder.playlists)?;
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for Library {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct FoldersVisitor;

    impl<'de> Visitor<'de> for FoldersVisitor {
      type Value = Library;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of folder names to playlist lists")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Library, A::Error> {
        let mut folders: Vec<Folder> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, playlists)) = access.next_entry::<String, Vec<Playlist>>()? {
          // Duplicate keys: the later one wins, keeping the first position.
          match folders.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.playlists = playlists,
            None => folders.push(Folder { name, playlists }),
          }
        }
        Ok(Library { folders })
      }
    }

    deserializer.deserialize_map(FoldersVisitor)
  }
}
