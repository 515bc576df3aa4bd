//! Play-order bookkeeping for the current playlist: sequential cursor, shuffle queue, phase.

use rand::Rng;
use rand::seq::SliceRandom;

/// Where the controller is in the play cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
  #[default]
  Idle,
  /// Resolving the stream URL for the active track.
  Loading,
  Playing,
  Paused,
}

impl PlaybackPhase {
  pub fn label(self) -> &'static str {
    match self {
      PlaybackPhase::Idle => "stopped",
      PlaybackPhase::Loading => "loading",
      PlaybackPhase::Playing => "playing",
      PlaybackPhase::Paused => "paused",
    }
  }
}

/// Cursor over the current playlist.
///
/// When shuffling, `cursor` indexes into `shuffle_queue` (a permutation of track indices);
/// otherwise it is the track index itself.
#[derive(Debug, Default)]
pub struct PlaybackState {
  pub phase: PlaybackPhase,
  pub auto_play: bool,
  /// Real index of the track handed to the player last, for highlighting.
  pub playing_index: Option<usize>,
  cursor: usize,
  shuffle_mode: bool,
  shuffle_queue: Vec<usize>,
}

impl PlaybackState {
  pub fn shuffle_mode(&self) -> bool {
    self.shuffle_mode
  }

  pub fn shuffle_queue(&self) -> &[usize] {
    &self.shuffle_queue
  }

  pub fn cursor(&self) -> usize {
    self.cursor
  }

  /// A different playlist became current: start from the top (or a fresh permutation).
  pub fn reset<R: Rng + ?Sized>(&mut self, len: usize, rng: &mut R) {
    self.cursor = 0;
    self.playing_index = None;
    self.shuffle_queue.clear();
    if self.shuffle_mode {
      self.regenerate(len, rng);
    }
  }

  /// Real track index the cursor points at, if the playlist has one there.
  pub fn active_index(&self, len: usize) -> Option<usize> {
    let idx = if self.shuffle_mode { *self.shuffle_queue.get(self.cursor)? } else { self.cursor };
    (idx < len).then_some(idx)
  }

  /// Step to the following track, wrapping at the end. Returns the new real index.
  pub fn advance(&mut self, len: usize) -> Option<usize> {
    if len == 0 {
      return None;
    }
    let span = if self.shuffle_mode { self.shuffle_queue.len() } else { len };
    if span == 0 {
      return None;
    }
    self.cursor = (self.cursor + 1) % span;
    self.active_index(len)
  }

  /// Point the cursor at a specific track (e.g. picked from the list).
  pub fn select(&mut self, index: usize) {
    if self.shuffle_mode {
      if let Some(pos) = self.shuffle_queue.iter().position(|&i| i == index) {
        self.cursor = pos;
      }
    } else {
      self.cursor = index;
    }
  }

  /// Turning shuffle on draws a fresh permutation and starts at its head; turning it off
  /// continues sequentially from the track currently playing.
  pub fn set_shuffle<R: Rng + ?Sized>(&mut self, on: bool, len: usize, rng: &mut R) {
    if on {
      self.shuffle_mode = true;
      self.regenerate(len, rng);
    } else {
      let real = self.playing_index.or_else(|| self.active_index(len)).unwrap_or(0);
      self.shuffle_mode = false;
      self.shuffle_queue.clear();
      self.cursor = if real < len { real } else { 0 };
    }
  }

  /// A track was appended at index `len - 1`.
  pub fn track_added(&mut self, len: usize) {
    if self.shuffle_mode {
      self.shuffle_queue.push(len - 1);
    }
  }

  /// The track at `removed` is gone; `len` is the new playlist length.
  pub fn track_removed(&mut self, removed: usize, len: usize) {
    if self.shuffle_mode {
      if let Some(pos) = self.shuffle_queue.iter().position(|&i| i == removed) {
        self.shuffle_queue.remove(pos);
        if pos < self.cursor {
          self.cursor -= 1;
        }
      }
      for i in &mut self.shuffle_queue {
        if *i > removed {
          *i -= 1;
        }
      }
      if self.cursor >= self.shuffle_queue.len() {
        self.cursor = 0;
      }
    } else {
      if removed < self.cursor {
        self.cursor -= 1;
      }
      if self.cursor >= len {
        self.cursor = 0;
      }
    }

    self.playing_index = match self.playing_index {
      Some(p) if p == removed => None,
      Some(p) if p > removed => Some(p - 1),
      other => other,
    };
  }

  /// Tracks `a` and `b` traded places.
  pub fn tracks_swapped(&mut self, a: usize, b: usize) {
    let swap = |i: usize| {
      if i == a {
        b
      } else if i == b {
        a
      } else {
        i
      }
    };
    if self.shuffle_mode {
      for i in &mut self.shuffle_queue {
        *i = swap(*i);
      }
    } else {
      self.cursor = swap(self.cursor);
    }
    self.playing_index = self.playing_index.map(swap);
  }

  fn regenerate<R: Rng + ?Sized>(&mut self, len: usize, rng: &mut R) {
    self.shuffle_queue = (0..len).collect();
    self.shuffle_queue.shuffle(rng);
    self.cursor = 0;
  }
}
