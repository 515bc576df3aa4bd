use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_NAME: &str = "bellumboard";

/// User preferences persisted between sessions in `prefs.toml`.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
pub struct Config {
  pub volume: Option<u8>,
  pub auto_play: Option<bool>,
  /// Library document location; defaults to `library.json` in the data directory.
  pub data_file: Option<PathBuf>,
}

impl Config {
  pub fn load() -> Self {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
      let config_file = proj_dirs.config_dir().join("prefs.toml");
      if let Ok(content) = std::fs::read_to_string(config_file)
        && let Ok(config) = toml::from_str(&content)
      {
        return config;
      }
    }
    Self::default()
  }

  pub fn save(&self) {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
      let config_dir = proj_dirs.config_dir();
      if std::fs::create_dir_all(config_dir).is_ok() {
        let config_file = config_dir.join("prefs.toml");
        if let Ok(content) = toml::to_string(self) {
          let _ = std::fs::write(config_file, content);
        }
      }
    }
  }

  /// Library path: explicit override, then the configured file, then the default.
  pub fn library_path(&self, cli_override: Option<PathBuf>) -> PathBuf {
    cli_override.or_else(|| self.data_file.clone()).unwrap_or_else(|| data_dir().join("library.json"))
  }
}

/// Per-user data directory (library and logs). Falls back to the working directory.
pub fn data_dir() -> PathBuf {
  ProjectDirs::from("", "", APP_NAME).map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefs_round_trip_through_toml() {
    let config = Config { volume: Some(55), auto_play: Some(true), data_file: None };
    let text = toml::to_string(&config).unwrap();
    assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
  }

  #[test]
  fn missing_keys_default_to_none() {
    let config: Config = toml::from_str("volume = 30\n").unwrap();
    assert_eq!(config.volume, Some(30));
    assert_eq!(config.auto_play, None);
  }

  #[test]
  fn library_path_precedence() {
    let config = Config { data_file: Some(PathBuf::from("/srv/music.json")), ..Default::default() };
    assert_eq!(config.library_path(Some(PathBuf::from("/tmp/x.json"))), PathBuf::from("/tmp/x.json"));
    assert_eq!(config.library_path(None), PathBuf::from("/srv/music.json"));
    assert!(Config::default().library_path(None).ends_with("library.json"));
  }
}
