use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};

use crate::app::{App, InputMode, Pane, Prompt};
use crate::constants::constants;
use crate::error::Error;

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

// --- Event Handling ---

/// Dispatch one key press. Failures end up on the status line, never bubble out.
pub async fn handle_key_event(app: &mut App, key: event::KeyEvent) {
  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
    app.should_quit = true;
    return;
  }

  let result = match app.mode {
    InputMode::Normal => handle_normal_key(app, key).await,
    InputMode::Prompt(_) => handle_prompt_key(app, key),
    InputMode::Confirm(_) => handle_confirm_key(app, key).await,
  };
  if let Err(e) = result {
    app.report(e);
  }
}

async fn handle_normal_key(app: &mut App, key: event::KeyEvent) -> Result<(), Error> {
  if key.modifiers.contains(KeyModifiers::CONTROL) {
    if key.code == KeyCode::Char('s') {
      app.save();
    }
    return Ok(());
  }

  let step = i32::from(constants().volume_step);
  match key.code {
    KeyCode::Char('q') => app.should_quit = true,
    KeyCode::Tab => app.focus = app.focus.next(),
    KeyCode::BackTab => app.focus = app.focus.prev(),

    // Track reordering before plain navigation, so Shift+arrows win.
    KeyCode::Char('K') => app.move_selected(true)?,
    KeyCode::Char('J') => app.move_selected(false)?,
    KeyCode::Up if key.modifiers.contains(KeyModifiers::SHIFT) => app.move_selected(true)?,
    KeyCode::Down if key.modifiers.contains(KeyModifiers::SHIFT) => app.move_selected(false)?,
    KeyCode::Down | KeyCode::Char('j') => app.move_selection(true),
    KeyCode::Up | KeyCode::Char('k') => app.move_selection(false),

    KeyCode::Enter => match app.focus {
      Pane::Library => app.activate_library_row()?,
      Pane::Results => app.add_selected_result()?,
      Pane::Tracks => app.play_selected()?,
    },

    KeyCode::Char('/') | KeyCode::Char('s') => app.open_prompt(Prompt::Search),
    KeyCode::Char('u') => app.open_prompt(Prompt::Url),
    KeyCode::Char('i') => app.open_prompt(Prompt::Import),
    KeyCode::Char('f') => app.open_prompt(Prompt::NewFolder),
    KeyCode::Char('n') => app.request_new_playlist()?,
    KeyCode::Char('D') => app.request_delete_folder()?,

    KeyCode::Char(' ') => app.pause().await?,
    KeyCode::Char('x') => app.stop().await,
    KeyCode::Char('>') => app.next()?,
    KeyCode::Char('z') => app.toggle_shuffle(),
    KeyCode::Char('a') => app.toggle_auto_play(),
    KeyCode::Char('+') | KeyCode::Char('=') => app.change_volume(step).await?,
    KeyCode::Char('-') => app.change_volume(-step).await?,

    KeyCode::Char('t') if app.focus == Pane::Tracks => app.request_start_time()?,
    KeyCode::Char('d') | KeyCode::Delete if app.focus == Pane::Tracks => app.request_remove_track()?,
    _ => {}
  }
  Ok(())
}

fn handle_prompt_key(app: &mut App, key: event::KeyEvent) -> Result<(), Error> {
  app.clear_error();
  match key.code {
    KeyCode::Enter => return app.submit_prompt(),
    KeyCode::Esc => app.cancel_prompt(),
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
      app.input.insert(byte_idx, c);
      app.cursor_position += 1;
    }
    KeyCode::Backspace => {
      if app.cursor_position > 0 {
        app.cursor_position -= 1;
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      if app.cursor_position < app.input.chars().count() {
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      app.cursor_position = app.cursor_position.saturating_sub(1);
    }
    KeyCode::Right => {
      if app.cursor_position < app.input.chars().count() {
        app.cursor_position += 1;
      }
    }
    KeyCode::Home => {
      app.cursor_position = 0;
    }
    KeyCode::End => {
      app.cursor_position = app.input.chars().count();
    }
    _ => {}
  }
  Ok(())
}

async fn handle_confirm_key(app: &mut App, key: event::KeyEvent) -> Result<(), Error> {
  match key.code {
    KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => app.confirm(true).await,
    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.confirm(false).await,
    _ => Ok(()),
  }
}
