use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

pub const DEFAULT_HIGHLIGHT_LIMIT: u64 = 1_000_000;

const DEFAULT_CONFIG: &str = r#"# peek configuration

# Files larger than this many bytes are previewed as plain text
highlight_limit = 1000000

# Editor used by the edit keys. Falls back to $EDITOR, then vim, nano, vi
# editor = "vim"

[search]
# Search tool: "ag" or "rg"
driver = "ag"
# Extra command line arguments passed to the search tool
extra_args = []

# Key bindings: key = "HandlerName". Single characters bind that character,
# longer names are keys such as "Enter", "Esc", "Ctrl-R" or "F5".
[keymap.files]
# "r" = "FilesRefresh"

[keymap.search]

[keymap.help]
"#;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub highlight_limit: u64,
    pub editor: Option<String>,
    pub search: SearchConfig,
    pub keymap: KeymapConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub driver: String,
    pub extra_args: Vec<String>,
}

/// User key overrides per view.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeymapConfig {
    pub files: HashMap<String, String>,
    pub search: HashMap<String, String>,
    pub help: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            highlight_limit: DEFAULT_HIGHLIGHT_LIMIT,
            editor: None,
            search: SearchConfig::default(),
            keymap: KeymapConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            driver: "ag".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("peek");
        Ok(config_dir.join("config.toml"))
    }

    /// Loads `explicit` if given, otherwise the default location. A missing
    /// default file is created with commented defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::path()?;
                if !path.exists() {
                    write_default(&path);
                    return Ok(Self::default());
                }
                path
            }
        };

        let config = Self::read(&path)?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The editor command: config, then `$EDITOR`, then the first of
    /// vim/nano found on `PATH`, then `vi`.
    pub fn editor(&self) -> String {
        if let Some(editor) = self.editor.as_ref().filter(|e| !e.trim().is_empty()) {
            return editor.clone();
        }
        if let Ok(editor) = std::env::var("EDITOR") {
            if !editor.trim().is_empty() {
                return editor;
            }
        }
        ["vim", "nano"]
            .iter()
            .find(|candidate| which::which(candidate).is_ok())
            .map(|candidate| candidate.to_string())
            .unwrap_or_else(|| "vi".to_string())
    }
}

/// Best effort: failures are logged and the defaults are used in memory.
fn write_default(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!("failed to create {}: {}", parent.display(), err);
            return;
        }
    }
    match fs::write(path, DEFAULT_CONFIG) {
        Ok(()) => info!("wrote default config to {}", path.display()),
        Err(err) => warn!("failed to write default config {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_parses_to_defaults() {
        let config = Config::parse(Path::new("default.toml"), DEFAULT_CONFIG).unwrap();
        assert_eq!(config.highlight_limit, DEFAULT_HIGHLIGHT_LIMIT);
        assert_eq!(config.search.driver, "ag");
        assert!(config.search.extra_args.is_empty());
        assert!(config.keymap.files.is_empty());
        assert!(config.editor.is_none());
    }

    #[test]
    fn test_parse_overrides() {
        let content = r#"
editor = "nvim"

[search]
driver = "rg"
extra_args = ["--hidden"]

[keymap.files]
"x" = "FilesQuit"
"Ctrl-R" = "FilesRefresh"
"#;
        let config = Config::parse(Path::new("c.toml"), content).unwrap();
        assert_eq!(config.editor(), "nvim");
        assert_eq!(config.search.driver, "rg");
        assert_eq!(config.search.extra_args, vec!["--hidden"]);
        assert_eq!(config.keymap.files.get("x").unwrap(), "FilesQuit");
        assert_eq!(config.keymap.files.get("Ctrl-R").unwrap(), "FilesRefresh");
        assert_eq!(config.highlight_limit, DEFAULT_HIGHLIGHT_LIMIT);
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let err = Config::parse(Path::new("/tmp/bad.toml"), "highlight_limit = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("/tmp/bad.toml"));
    }

    #[test]
    fn test_write_default_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peek").join("config.toml");
        write_default(&path);
        let config = Config::read(&path).unwrap();
        assert_eq!(config.search.driver, "ag");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
