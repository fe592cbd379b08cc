//! Typed errors for the tree, search and keymap layers.

use std::path::PathBuf;
use thiserror::Error;

/// Keymap merge failures. These are fatal at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeymapError {
    #[error(
        "unknown function '{name}' for [keymap.{view}]\nAvailable functions: {}",
        available.join(", ")
    )]
    UnknownHandler {
        view: String,
        name: String,
        available: Vec<String>,
    },

    #[error(
        "unknown key name '{key}' in [keymap.{view}]\nAvailable key names are: {}",
        available.join(", ")
    )]
    UnknownKey {
        view: String,
        key: String,
        available: Vec<String>,
    },
}

/// Failures of the on-demand git queries.
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("git not found in $PATH")]
    GitMissing,

    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: &'static str,
        source: std::io::Error,
    },

    #[error("git {command} failed for {path}: {stderr}")]
    Query {
        command: &'static str,
        path: PathBuf,
        stderr: String,
    },
}

/// Session-level search failures, rendered as a single error entry.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search driver '{0}' is not available. Please install it or choose another driver.")]
    Unavailable(String),

    #[error("Failed to build search command: {0}")]
    Command(String),

    #[error("Failed to start search command: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_handler_lists_alternatives() {
        let err = KeymapError::UnknownHandler {
            view: "files".to_string(),
            name: "FilesFly".to_string(),
            available: vec!["FilesExpand".to_string(), "FilesQuit".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unknown function 'FilesFly' for [keymap.files]\nAvailable functions: FilesExpand, FilesQuit"
        );
    }

    #[test]
    fn test_unavailable_driver_message() {
        let err = SearchError::Unavailable("rg".to_string());
        assert!(err.to_string().starts_with("Search driver 'rg' is not available."));
    }
}
