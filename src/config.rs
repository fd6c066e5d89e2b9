//! Layered configuration: built-in defaults, then a user config file, then
//! CLI flags (highest precedence).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// User-overridable options, mirroring the enumerated option set an
/// `OPENER`/`PAGER`/`EDITOR`-style config file would carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub opener: Option<String>,
    pub pager: Option<String>,
    pub editor: Option<String>,
    pub use_internal_viewer: bool,
    pub count_directories: bool,
    pub tab_size: u32,
    pub show_button_bar: bool,
    pub palette: Palette,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            opener: std::env::var("OPENER").ok(),
            pager: std::env::var("PAGER").ok(),
            editor: std::env::var("EDITOR").ok(),
            use_internal_viewer: true,
            count_directories: true,
            tab_size: 4,
            show_button_bar: true,
            palette: Palette::default(),
        }
    }
}

/// Named colors for the panel chrome; stored as plain strings so a config
/// file can reference any terminal color name without this crate knowing
/// the rendering layer's palette type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Palette {
    pub directory: Option<String>,
    pub executable: Option<String>,
    pub symlink: Option<String>,
    pub selected: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, message } => write!(f, "cannot read {}: {message}", path.display()),
            ConfigError::Parse { path, message } => write!(f, "cannot parse {}: {message}", path.display()),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Default config directory, `$XDG_CONFIG_HOME/twinpane` or the
    /// platform equivalent.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("twinpane"))
    }

    fn default_config_file() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Loads defaults, then merges a user config file if present at
    /// `override_path` or the platform default location. Missing files are
    /// not an error; only malformed ones are.
    pub fn load(override_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = override_path.map(Path::to_path_buf).or_else(Self::default_config_file);

        let mut config = Self::default();
        let Some(path) = path else {
            return Ok(config);
        };
        if !path.exists() {
            return Ok(config);
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let file_config: PartialConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        file_config.apply(&mut config);
        Ok(config)
    }
}

/// Mirrors [`Config`] but with every field optional, so a user's config file
/// only needs to name the options it overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialConfig {
    opener: Option<String>,
    pager: Option<String>,
    editor: Option<String>,
    use_internal_viewer: Option<bool>,
    count_directories: Option<bool>,
    tab_size: Option<u32>,
    show_button_bar: Option<bool>,
    palette: Option<Palette>,
}

impl PartialConfig {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.opener {
            config.opener = Some(v);
        }
        if let Some(v) = self.pager {
            config.pager = Some(v);
        }
        if let Some(v) = self.editor {
            config.editor = Some(v);
        }
        if let Some(v) = self.use_internal_viewer {
            config.use_internal_viewer = v;
        }
        if let Some(v) = self.count_directories {
            config.count_directories = v;
        }
        if let Some(v) = self.tab_size {
            config.tab_size = v;
        }
        if let Some(v) = self.show_button_bar {
            config.show_button_bar = v;
        }
        if let Some(v) = self.palette {
            config.palette = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated() {
        let config = Config::default();
        assert!(config.use_internal_viewer);
        assert_eq!(config.tab_size, 4);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tab_size, 4);
    }

    #[test]
    fn partial_overrides_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tab_size = 8\ncount_directories = false\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tab_size, 8);
        assert!(!config.count_directories);
        assert!(config.use_internal_viewer);
    }
}
