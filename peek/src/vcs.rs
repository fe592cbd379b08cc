use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::VcsError;

/// Answers "is this path ignored by git?" for tree decoration.
///
/// The cache is seeded once from a bulk `git ls-files` query and grows with
/// per-path verdicts from [`IgnoreClassifier::classify`]. Cached verdicts are
/// never invalidated.
pub struct IgnoreClassifier {
    root: PathBuf,
    git_available: bool,
    cache: Mutex<HashMap<PathBuf, bool>>,
}

impl IgnoreClassifier {
    /// A classifier that reports everything outside `.git` as not ignored.
    pub fn disabled(root: &Path) -> Self {
        Self::seeded(root, false, Vec::new())
    }

    pub fn initialize(root: &Path) -> Self {
        if which::which("git").is_err() {
            info!("git not found in $PATH, ignore classification disabled");
            return Self::disabled(root);
        }

        let output = Command::new("git")
            .arg("-C")
            .arg(root)
            .args([
                "ls-files",
                "--others",
                "--ignored",
                "--exclude-standard",
                "--directory",
                "-z",
            ])
            .output();

        let ignored = match output {
            Ok(output) if output.status.success() => parse_ls_files(root, &output.stdout),
            Ok(output) => {
                // Not a repository, most likely.
                debug!(
                    "git ls-files failed in {}: {}",
                    root.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Vec::new()
            }
            Err(err) => {
                warn!("failed to run git ls-files: {}", err);
                Vec::new()
            }
        };

        debug!("seeded {} ignored paths under {}", ignored.len(), root.display());
        Self::seeded(root, true, ignored)
    }

    pub(crate) fn seeded(root: &Path, git_available: bool, ignored: Vec<PathBuf>) -> Self {
        let cache = ignored.into_iter().map(|path| (path, true)).collect();
        Self {
            root: root.to_path_buf(),
            git_available,
            cache: Mutex::new(cache),
        }
    }

    /// Cheap point query: `.git` rule, then the cache (the path itself, then
    /// its ancestors, since ignored directories are reported whole).
    pub fn is_ignored(&self, path: &Path) -> bool {
        if in_git_metadata(path) {
            return true;
        }
        self.cached(path).unwrap_or(false)
    }

    /// Point query for paths that appeared after startup. Falls back to
    /// [`classify`](Self::classify) when the cache has no verdict; a failing
    /// query is logged and the path is treated as not ignored.
    pub fn is_ignored_live(&self, path: &Path) -> bool {
        if in_git_metadata(path) {
            return true;
        }
        if let Some(verdict) = self.cached(path) {
            return verdict;
        }
        match self.classify(path) {
            Ok(verdict) => verdict,
            Err(err) => {
                debug!("ignore classification unknown for {}: {}", path.display(), err);
                false
            }
        }
    }

    /// Precise classification through git: tracked files are never
    /// ignored, everything else is decided by `git check-ignore`.
    pub fn classify(&self, path: &Path) -> Result<bool, VcsError> {
        if let Some(verdict) = self.cache.lock().get(path).copied() {
            return Ok(verdict);
        }
        if !self.git_available {
            return Err(VcsError::GitMissing);
        }

        let verdict = if self.is_tracked(path)? {
            false
        } else {
            self.check_ignore(path)?
        };

        self.cache
            .lock()
            .entry(path.to_path_buf())
            .or_insert(verdict);
        Ok(verdict)
    }

    fn cached(&self, path: &Path) -> Option<bool> {
        let cache = self.cache.lock();
        if let Some(verdict) = cache.get(path) {
            return Some(*verdict);
        }
        let mut current = path.parent();
        while let Some(dir) = current {
            if !dir.starts_with(&self.root) {
                break;
            }
            if cache.get(dir) == Some(&true) {
                return Some(true);
            }
            current = dir.parent();
        }
        None
    }

    fn is_tracked(&self, path: &Path) -> Result<bool, VcsError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["ls-files", "--error-unmatch", "--"])
            .arg(path)
            .output()
            .map_err(|source| VcsError::Spawn {
                command: "ls-files",
                source,
            })?;
        Ok(output.status.success())
    }

    fn check_ignore(&self, path: &Path) -> Result<bool, VcsError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["check-ignore", "-q", "--"])
            .arg(path)
            .output()
            .map_err(|source| VcsError::Spawn {
                command: "check-ignore",
                source,
            })?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(VcsError::Query {
                command: "check-ignore",
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

fn in_git_metadata(path: &Path) -> bool {
    path.components()
        .any(|component| component.as_os_str() == ".git")
}

fn parse_ls_files(root: &Path, bytes: &[u8]) -> Vec<PathBuf> {
    bytes
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let rel = String::from_utf8_lossy(entry);
            root.join(rel.trim_end_matches('/'))
        })
        .collect()
}
