use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Entry, LoadState, NodeId, Tree, TreeUpdate};
use crate::sink::Sink;
use crate::vcs::IgnoreClassifier;
use crate::watch::WatchBridge;

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Directory listing seam, so loads can be driven by a fake in tests.
pub trait DirReader: Send + Sync {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

pub struct FsReader;

impl DirReader for FsReader {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let is_dir = match entry.file_type() {
                Ok(ft) if ft.is_symlink() => entry.path().is_dir(),
                Ok(ft) => ft.is_dir(),
                Err(_) => false,
            };
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir,
            });
        }
        Ok(out)
    }
}

/// Paths with a directory read in flight.
#[derive(Default, Clone)]
pub struct LoadingRegistry {
    loading: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LoadingRegistry {
    /// Claims `path` for loading. Returns `None` if a load already runs.
    pub fn try_begin(&self, path: &Path) -> Option<LoadTicket> {
        if !self.loading.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(LoadTicket {
            loading: Arc::clone(&self.loading),
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn is_loading(&self, path: &Path) -> bool {
        self.loading.lock().contains(path)
    }
}

/// Releases the registry entry when dropped.
pub struct LoadTicket {
    loading: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        self.loading.lock().remove(&self.path);
    }
}

pub struct Loader {
    registry: LoadingRegistry,
    reader: Arc<dyn DirReader>,
    ignore: Arc<IgnoreClassifier>,
    watch: Option<Arc<WatchBridge>>,
    sink: Sink,
    batch_size: usize,
}

impl Loader {
    pub fn new(reader: Arc<dyn DirReader>, ignore: Arc<IgnoreClassifier>, sink: Sink) -> Self {
        Self {
            registry: LoadingRegistry::default(),
            reader,
            ignore,
            watch: None,
            sink,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_watch(mut self, watch: Arc<WatchBridge>) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Marks a directory expanded and loads it if it has no children yet.
    /// Returns false for anything that is not a directory.
    pub fn expand(&self, tree: &mut Tree, id: NodeId) -> bool {
        let Some(node) = tree.get_mut(id) else {
            return false;
        };
        if !node.is_dir() {
            return false;
        }
        node.expanded = true;
        if node.children.is_empty() {
            self.load_children(tree, id);
        }
        true
    }

    /// Starts an asynchronous read of `id`. The placeholder is attached
    /// before this returns; the listing arrives later through the sink.
    pub fn load_children(&self, tree: &mut Tree, id: NodeId) -> bool {
        let path = match tree.get(id) {
            Some(node) if node.is_dir() => node.path.clone(),
            _ => return false,
        };
        let Some(ticket) = self.registry.try_begin(&path) else {
            debug!("load already in flight for {}", path.display());
            return false;
        };
        let Some(placeholder) = tree.add_placeholder(id) else {
            return false;
        };
        if let Some(node) = tree.get_mut(id) {
            node.state = LoadState::Loading;
        }

        let job = LoadJob {
            parent: id,
            placeholder,
            path,
            reader: Arc::clone(&self.reader),
            ignore: Arc::clone(&self.ignore),
            watch: self.watch.clone(),
            sink: self.sink.clone(),
            batch_size: self.batch_size,
        };
        tokio::spawn(job.run(ticket));
        true
    }

    /// Restarts the read of a directory left expanded but empty because its
    /// load finished after a collapse. Call it when a load of `id` settles.
    pub fn resume(&self, tree: &mut Tree, id: NodeId) -> bool {
        match tree.get(id) {
            Some(node)
                if node.is_dir()
                    && node.expanded
                    && node.state == LoadState::Unloaded
                    && node.children.is_empty() =>
            {
                debug!("restarting discarded load of {}", node.path.display());
                self.load_children(tree, id)
            }
            _ => false,
        }
    }

    /// Drops the loaded subtree and reads the directory again.
    pub fn reload(&self, tree: &mut Tree, id: NodeId) -> bool {
        tree.collapse(id);
        self.expand(tree, id)
    }
}

struct LoadJob {
    parent: NodeId,
    placeholder: NodeId,
    path: PathBuf,
    reader: Arc<dyn DirReader>,
    ignore: Arc<IgnoreClassifier>,
    watch: Option<Arc<WatchBridge>>,
    sink: Sink,
    batch_size: usize,
}

impl LoadJob {
    async fn run(self, ticket: LoadTicket) {
        let done = self.load().await;
        // Released before the final update, so the UI can restart a load
        // whose results were discarded.
        drop(ticket);
        self.sink.send(done);
    }

    /// Streams the listing in batches and returns the closing update.
    async fn load(&self) -> TreeUpdate {
        let reader = Arc::clone(&self.reader);
        let ignore = Arc::clone(&self.ignore);
        let dir = self.path.clone();
        let listing =
            tokio::task::spawn_blocking(move || read_sorted(reader.as_ref(), &ignore, &dir)).await;

        let entries = match listing {
            Ok(Ok(entries)) => entries,
            Ok(Err(err)) => return self.failed(err.to_string()),
            Err(err) => return self.failed(err.to_string()),
        };
        debug!("read {} entries from {}", entries.len(), self.path.display());

        for chunk in entries.chunks(self.batch_size) {
            let batch = TreeUpdate::Batch {
                parent: self.parent,
                placeholder: self.placeholder,
                entries: chunk.to_vec(),
            };
            if !self.sink.send(batch) {
                return self.finished();
            }
        }

        if let Some(watch) = self.watch.clone() {
            let dir = self.path.clone();
            let subdirs: Vec<PathBuf> = entries
                .iter()
                .filter(|entry| entry.is_dir)
                .map(|entry| entry.path.clone())
                .collect();
            let registered =
                tokio::task::spawn_blocking(move || watch.register_listing(&dir, &subdirs)).await;
            if let Err(err) = registered {
                warn!("watch registration for {} aborted: {}", self.path.display(), err);
            }
        }

        self.finished()
    }

    fn finished(&self) -> TreeUpdate {
        TreeUpdate::Finished {
            parent: self.parent,
            placeholder: self.placeholder,
        }
    }

    fn failed(&self, message: String) -> TreeUpdate {
        warn!("failed to read {}: {}", self.path.display(), message);
        TreeUpdate::LoadFailed {
            parent: self.parent,
            placeholder: self.placeholder,
            message,
        }
    }
}

/// Lists `dir` with directories first, then by case-insensitive name.
fn read_sorted(
    reader: &dyn DirReader,
    ignore: &IgnoreClassifier,
    dir: &Path,
) -> io::Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = reader
        .read_dir(dir)?
        .into_iter()
        .map(|entry| {
            let path = dir.join(&entry.name);
            Entry {
                ignored: ignore.is_ignored(&path),
                path,
                is_dir: entry.is_dir,
            }
        })
        .collect();
    entries.sort_by_cached_key(sort_key);
    Ok(entries)
}

fn sort_key(entry: &Entry) -> (bool, String) {
    let name = entry
        .path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    (!entry.is_dir, name)
}
