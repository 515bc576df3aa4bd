use ratatui::{
  Frame,
  layout::{Constraint, Layout, Rect},
  style::{Color, Modifier, Style, Stylize},
  text::{Line, Span},
  widgets::{Block, BorderType, List, ListItem, Padding, Paragraph},
};

use crate::app::{App, InputMode, Pane, TreeRow};
use crate::playback::PlaybackState;
use crate::youtube::format_duration;

// --- Palette ---

const ACCENT: Color = Color::Rgb(214, 160, 84);
const FG: Color = Color::Rgb(220, 214, 200);
const MUTED: Color = Color::Rgb(128, 122, 110);
const BORDER: Color = Color::Rgb(80, 74, 66);
const HIGHLIGHT_FG: Color = Color::Rgb(24, 20, 16);
const HIGHLIGHT_BG: Color = Color::Rgb(214, 160, 84);
const PLAYING: Color = Color::Rgb(134, 184, 112);
const STATUS: Color = Color::Rgb(140, 170, 200);
const ERROR: Color = Color::Rgb(220, 96, 84);
const KEY_FG: Color = Color::Rgb(24, 20, 16);
const KEY_BG: Color = Color::Rgb(150, 140, 124);

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", truncated)
  }
}

/// Title on the left, muted detail flush right.
fn split_line<'a>(title: &str, right: String, width: usize, fg: Color) -> Line<'a> {
  let right_w = right.chars().count();
  let title = truncate_str(title, width.saturating_sub(right_w + 2));
  let gap = width.saturating_sub(title.chars().count() + right_w);
  Line::from(vec![
    Span::styled(title, Style::default().fg(fg)),
    Span::raw(" ".repeat(gap)),
    Span::styled(right, Style::default().fg(MUTED)),
  ])
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
  let border = if focused { ACCENT } else { BORDER };
  Block::bordered()
    .title(title)
    .title_style(Style::default().fg(border).add_modifier(Modifier::BOLD))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(border))
}

fn highlight() -> Style {
  Style::default().fg(HIGHLIGHT_FG).bg(HIGHLIGHT_BG).add_modifier(Modifier::BOLD)
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App) {
  let [header_area, main_area, status_area, input_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(5),
    Constraint::Length(1),
    Constraint::Length(3),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  let [library_area, right_area] =
    Layout::horizontal([Constraint::Percentage(30), Constraint::Percentage(70)]).areas(main_area);
  let [results_area, tracks_area] =
    Layout::vertical([Constraint::Percentage(40), Constraint::Percentage(60)]).areas(right_area);

  render_header(frame, app, header_area);
  render_library(frame, app, library_area);
  render_results(frame, app, results_area);
  render_tracks(frame, app, tracks_area);
  render_status(frame, app, status_area);
  render_input(frame, app, input_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
  let mut spans = vec![Span::styled(" ♜ bellumboard ", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))];
  if let Some(at) = &app.current
    && let Some(playlist) = app.current_playlist()
  {
    spans.push(Span::styled(format!(" {} / {}", at.folder, playlist.name), Style::default().fg(FG)));
  }
  frame.render_widget(Line::from(spans), area);

  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let right = Line::from(Span::styled(&version, Style::default().fg(MUTED)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(version.len() as u16), width: version.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

fn render_library(frame: &mut Frame, app: &mut App, area: Rect) {
  let inner_w = area.width.saturating_sub(4) as usize;
  let items: Vec<ListItem> = app
    .tree_rows()
    .into_iter()
    .map(|row| match row {
      TreeRow::Folder(name) => {
        ListItem::new(Line::from(Span::styled(truncate_str(&format!("▸ {}", name), inner_w), Style::default().fg(ACCENT))))
      }
      TreeRow::Playlist(at) => {
        let Some(playlist) = app.library.playlist(&at) else { return ListItem::new("") };
        let fg = if app.current.as_ref() == Some(&at) { PLAYING } else { FG };
        ListItem::new(split_line(&format!("  {}", playlist.name), format!("{}", playlist.len()), inner_w, fg))
      }
    })
    .collect();

  let list = List::new(items)
    .block(pane_block(" Library ".to_string(), app.focus == Pane::Library))
    .highlight_symbol("▶ ")
    .highlight_style(highlight());
  frame.render_stateful_widget(list, area, &mut app.library_state);
}

fn render_results(frame: &mut Frame, app: &mut App, area: Rect) {
  let inner_w = area.width.saturating_sub(4) as usize;
  let items: Vec<ListItem> = app
    .search_results
    .iter()
    .map(|entry| {
      let right = if entry.duration > 0 { format_duration(entry.duration) } else { String::new() };
      ListItem::new(split_line(&entry.title, right, inner_w, FG))
    })
    .collect();

  let title = if app.search_results.is_empty() {
    " Results ".to_string()
  } else {
    format!(" Results ({}) ", app.search_results.len())
  };
  let list = List::new(items)
    .block(pane_block(title, app.focus == Pane::Results))
    .highlight_symbol("▶ ")
    .highlight_style(highlight());
  frame.render_stateful_widget(list, area, &mut app.results_state);
}

fn render_tracks(frame: &mut Frame, app: &mut App, area: Rect) {
  let inner_w = area.width.saturating_sub(4) as usize;
  let playing = app.playback.playing_index;
  let (title, items): (String, Vec<ListItem>) = match app.current_playlist() {
    Some(playlist) => {
      let items = playlist
        .tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
          let is_playing = playing == Some(i);
          let marker = if is_playing { "♪ " } else { "  " };
          let fg = if is_playing { PLAYING } else { FG };
          let right = if track.start_time > 0 { format!("[⏱{}s]", track.start_time) } else { String::new() };
          ListItem::new(split_line(&format!("{}{}. {}", marker, i + 1, track.title), right, inner_w, fg))
        })
        .collect();
      (format!(" {} ({}) ", playlist.name, playlist.len()), items)
    }
    None => (" Tracks ".to_string(), Vec::new()),
  };

  let block = pane_block(title, app.focus == Pane::Tracks);
  if items.is_empty() {
    let hint = if app.current.is_some() { "Empty playlist. Search with / or add a URL with u." } else { "Load a playlist from the library." };
    let paragraph = Paragraph::new(Span::styled(hint, Style::default().fg(MUTED))).block(block.padding(Padding::horizontal(1)));
    frame.render_widget(paragraph, area);
    return;
  }

  let list = List::new(items).block(block).highlight_symbol("▶ ").highlight_style(highlight());
  frame.render_stateful_widget(list, area, &mut app.tracks_state);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
  let (text, style) = if let Some(err) = &app.last_error {
    (format!(" ⚠  {}", err), Style::default().fg(ERROR))
  } else if let Some(msg) = &app.status_message {
    (format!(" ♪ {}", msg), Style::default().fg(STATUS))
  } else {
    (" Ready".to_string(), Style::default().fg(MUTED))
  };
  frame.render_widget(Paragraph::new(text).style(style), area);
}

fn render_input(frame: &mut Frame, app: &mut App, area: Rect) {
  let (title, active) = match &app.mode {
    InputMode::Prompt(prompt) => (prompt.title(), true),
    InputMode::Confirm(_) => (" Confirm ".to_string(), true),
    InputMode::Normal => (" Input ".to_string(), false),
  };
  let border_color = if active { ACCENT } else { BORDER };
  let input_block = Block::bordered()
    .title(title)
    .title_style(Style::default().fg(border_color))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(border_color))
    .padding(Padding::horizontal(1));

  if let InputMode::Confirm(confirm) = &app.mode {
    let line = Line::from(vec![
      Span::styled(confirm.question(), Style::default().fg(FG)),
      Span::styled("  (y/n)", Style::default().fg(MUTED)),
    ]);
    frame.render_widget(Paragraph::new(line).block(input_block), area);
    return;
  }

  let inner_w = area.width.saturating_sub(4) as usize;
  let cursor_col = display_width(&app.input, app.cursor_position);

  if cursor_col < app.input_scroll {
    app.input_scroll = cursor_col;
  } else if cursor_col >= app.input_scroll + inner_w {
    app.input_scroll = cursor_col.saturating_sub(inner_w) + 1;
  }

  let visible: String = app
    .input
    .chars()
    .scan(0usize, |col, c| {
      let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
      let start = *col;
      *col += w;
      Some((start, *col, c))
    })
    .skip_while(|(_, end, _)| *end <= app.input_scroll)
    .take_while(|(start, _, _)| *start < app.input_scroll + inner_w)
    .map(|(_, _, c)| c)
    .collect();

  let paragraph = Paragraph::new(visible).style(Style::default().fg(FG)).block(input_block);
  frame.render_widget(paragraph, area);

  if active {
    let cursor_x = area.x + 2 + (cursor_col - app.input_scroll) as u16;
    frame.set_cursor_position((cursor_x, area.y + 1));
  }
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
  let keys: Vec<(&str, &str)> = match (&app.mode, app.focus) {
    (InputMode::Prompt(_), _) => vec![("Enter", "OK"), ("Esc", "Cancel")],
    (InputMode::Confirm(_), _) => vec![("y", "Yes"), ("n", "No")],
    (InputMode::Normal, Pane::Library) => {
      vec![("Enter", "Load"), ("f", "Folder"), ("n", "Playlist"), ("D", "Delete"), ("/", "Search"), ("q", "Quit")]
    }
    (InputMode::Normal, Pane::Results) => vec![("Enter", "Add"), ("/", "Search"), ("Tab", "Pane"), ("q", "Quit")],
    (InputMode::Normal, Pane::Tracks) => vec![
      ("Enter", "Play"),
      ("Space", "Pause"),
      (">", "Next"),
      ("z", "Shuffle"),
      ("a", "Auto"),
      ("t", "Start"),
      ("u", "URL"),
      ("i", "Import"),
    ],
  };

  let spans: Vec<Span> = keys
    .iter()
    .enumerate()
    .flat_map(|(i, (key, action))| {
      let mut s = vec![
        Span::styled(format!(" {} ", key), Style::default().fg(KEY_FG).bg(KEY_BG)),
        Span::styled(format!(" {} ", action), Style::default().fg(MUTED)),
      ];
      if i < keys.len() - 1 {
        s.push(Span::raw(" "));
      }
      s
    })
    .collect();
  frame.render_widget(Line::from(spans), area);

  let state = format!(
    "{}  vol {}%  {}  {} ",
    app.playback.phase.label(),
    app.engine.volume(),
    play_order(&app.playback),
    if app.playback.auto_play { "auto" } else { "manual" },
  );
  let right = Line::from(Span::styled(&state, Style::default().fg(MUTED)).bold());
  let width = state.chars().count() as u16;
  let right_area = Rect { x: area.x + area.width.saturating_sub(width), width: width.min(area.width), ..area };
  frame.render_widget(right, right_area);
}

/// "in order", or the position within the shuffled pass.
fn play_order(playback: &PlaybackState) -> String {
  let queue = playback.shuffle_queue();
  match (playback.shuffle_mode(), queue.len()) {
    (false, _) => "in order".to_string(),
    (true, 0) => "shuffle".to_string(),
    (true, len) => format!("shuffle {}/{}", playback.cursor().min(len - 1) + 1, len),
  }
}
