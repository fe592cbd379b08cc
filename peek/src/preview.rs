use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::sink::Sink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewKind {
    Text,
    /// Over the highlight limit; shown without decoration.
    Plain,
    Binary,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub path: PathBuf,
    pub title: String,
    pub kind: PreviewKind,
    pub lines: Vec<String>,
}

/// Reads `path` on the blocking pool and sends the result to the sink.
pub fn spawn(path: PathBuf, highlight_limit: u64, sink: Sink) {
    tokio::spawn(async move {
        let target = path.clone();
        let preview = tokio::task::spawn_blocking(move || load(&target, highlight_limit))
            .await
            .unwrap_or_else(|err| Preview::error(&path, err.to_string()));
        sink.send(preview);
    });
}

pub fn load(path: &Path, highlight_limit: u64) -> Preview {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => return Preview::error(path, err.to_string()),
    };
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => return Preview::error(path, err.to_string()),
    };

    let title = match metadata.modified() {
        Ok(time) => {
            let dt: DateTime<Local> = time.into();
            format!("{} ({})", path.display(), dt.format("%Y-%m-%d %H:%M"))
        }
        Err(_) => path.display().to_string(),
    };

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            return Preview {
                path: path.to_path_buf(),
                title,
                kind: PreviewKind::Binary,
                lines: vec!["Binary".to_string()],
            }
        }
    };

    let kind = if metadata.len() > highlight_limit {
        debug!(
            "{} is too large to highlight ({} > {} bytes)",
            path.display(),
            metadata.len(),
            highlight_limit
        );
        PreviewKind::Plain
    } else {
        PreviewKind::Text
    };

    Preview {
        path: path.to_path_buf(),
        title,
        kind,
        lines: text.lines().map(|line| line.replace('\t', "    ")).collect(),
    }
}

impl Preview {
    fn error(path: &Path, message: String) -> Self {
        Self {
            path: path.to_path_buf(),
            title: path.display().to_string(),
            lines: vec![format!("Error opening file: {}", message)],
            kind: PreviewKind::Error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "one\n\ttwo\n").unwrap();

        let preview = load(&path, 1000);
        assert_eq!(preview.kind, PreviewKind::Text);
        assert_eq!(preview.lines, vec!["one", "    two"]);
        assert!(preview.title.starts_with(&path.display().to_string()));
    }

    #[test]
    fn test_binary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        assert_eq!(load(&path, 1000).kind, PreviewKind::Binary);
    }

    #[test]
    fn test_large_file_is_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        fs::write(&path, "x".repeat(64)).unwrap();
        assert_eq!(load(&path, 16).kind, PreviewKind::Plain);
    }

    #[test]
    fn test_missing_file() {
        let preview = load(Path::new("/definitely/not/here"), 1000);
        assert!(matches!(preview.kind, PreviewKind::Error(_)));
        assert!(preview.lines[0].starts_with("Error opening file"));
    }
}
