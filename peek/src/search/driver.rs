use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::warn;

use crate::error::SearchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub use_regex: bool,
    pub ignore_case: bool,
    pub extra_args: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_regex: false,
            ignore_case: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub file_path: PathBuf,
    pub line_number: u64,
    pub matched_line: String,
    pub is_error: bool,
}

impl SearchResult {
    /// A synthetic entry carrying a message instead of a match.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            file_path: PathBuf::new(),
            line_number: 0,
            matched_line: message.into(),
            is_error: true,
        }
    }
}

/// An external full-text search tool.
pub trait SearchDriver: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        which::which(self.name()).is_ok()
    }

    fn build_command(
        &self,
        options: &SearchOptions,
        query: &str,
        root: &Path,
    ) -> Result<Command, SearchError>;

    fn parse_line(&self, line: &str) -> Option<SearchResult> {
        parse_line(line)
    }
}

/// The Silver Searcher.
pub struct Ag;

impl SearchDriver for Ag {
    fn name(&self) -> &str {
        "ag"
    }

    fn build_command(
        &self,
        options: &SearchOptions,
        query: &str,
        root: &Path,
    ) -> Result<Command, SearchError> {
        check_query(query)?;
        let mut command = Command::new("ag");
        if options.ignore_case {
            command.arg("-i");
        }
        if !options.use_regex {
            command.arg("-Q");
        }
        command.args(&options.extra_args).arg("--").arg(query).arg(root);
        Ok(command)
    }
}

/// ripgrep.
pub struct Rg;

impl SearchDriver for Rg {
    fn name(&self) -> &str {
        "rg"
    }

    fn build_command(
        &self,
        options: &SearchOptions,
        query: &str,
        root: &Path,
    ) -> Result<Command, SearchError> {
        check_query(query)?;
        let mut command = Command::new("rg");
        command.args(["--line-number", "--no-heading", "--color", "never"]);
        if options.ignore_case {
            command.arg("-i");
        }
        if !options.use_regex {
            command.arg("-F");
        }
        command.args(&options.extra_args).arg("--").arg(query).arg(root);
        Ok(command)
    }
}

fn check_query(query: &str) -> Result<(), SearchError> {
    if query.is_empty() {
        return Err(SearchError::Command("empty query".to_string()));
    }
    Ok(())
}

/// Selects a driver by its configured name, falling back to `ag`.
pub fn driver_for(name: &str) -> Arc<dyn SearchDriver> {
    match name {
        "ag" => Arc::new(Ag),
        "rg" => Arc::new(Rg),
        other => {
            warn!("unknown search driver '{}', using ag", other);
            Arc::new(Ag)
        }
    }
}

/// Parses `path:line:content`. An unreadable line number becomes 0.
pub fn parse_line(line: &str) -> Option<SearchResult> {
    let mut fields = line.splitn(3, ':');
    let file_path = fields.next()?;
    let line_number = fields.next()?;
    let matched_line = fields.next()?;

    Some(SearchResult {
        file_path: PathBuf::from(file_path),
        line_number: line_number.trim().parse().unwrap_or(0),
        matched_line: matched_line.to_string(),
        is_error: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("src/main.go:42:// TODO fix"),
            Some(SearchResult {
                file_path: PathBuf::from("src/main.go"),
                line_number: 42,
                matched_line: "// TODO fix".to_string(),
                is_error: false,
            })
        );
    }

    #[test]
    fn test_parse_line_keeps_colons_in_content() {
        let result = parse_line("a.rs:7:let x: u8 = 1;").unwrap();
        assert_eq!(result.matched_line, "let x: u8 = 1;");
    }

    #[test]
    fn test_parse_line_lenient_line_number() {
        let result = parse_line("a.rs:abc:text").unwrap();
        assert_eq!(result.line_number, 0);
        assert_eq!(parse_line("no separators"), None);
        assert_eq!(parse_line("only:one"), None);
    }

    #[test]
    fn test_ag_arguments() {
        let options = SearchOptions {
            use_regex: false,
            ignore_case: true,
            extra_args: vec!["--hidden".to_string()],
        };
        let command = Ag
            .build_command(&options, "needle", Path::new("/r"))
            .unwrap();
        assert_eq!(args(&command), vec!["-i", "-Q", "--hidden", "--", "needle", "/r"]);
    }

    #[test]
    fn test_rg_arguments() {
        let options = SearchOptions {
            use_regex: true,
            ignore_case: false,
            extra_args: Vec::new(),
        };
        let command = Rg
            .build_command(&options, "fn \\w+", Path::new("/r"))
            .unwrap();
        assert_eq!(
            args(&command),
            vec!["--line-number", "--no-heading", "--color", "never", "--", "fn \\w+", "/r"]
        );
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = Rg
            .build_command(&SearchOptions::default(), "", Path::new("/r"))
            .unwrap_err();
        assert!(matches!(err, SearchError::Command(_)));
    }

    #[test]
    fn test_unknown_driver_falls_back_to_ag() {
        assert_eq!(driver_for("rg").name(), "rg");
        assert_eq!(driver_for("grep").name(), "ag");
    }
}
