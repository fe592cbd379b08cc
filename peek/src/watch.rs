//! Bridges OS change notifications into tree updates.
//!
//! Directories are watched one level at a time as they are loaded. The
//! notify callback only forwards raw events into a channel; [`WatchBridge::run`]
//! turns them into [`TreeUpdate`]s on the sink.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, trace, warn};

use crate::sink::{Sink, Update};
use crate::tree::{Entry, TreeUpdate};
use crate::vcs::IgnoreClassifier;

pub type EventReceiver = UnboundedReceiver<notify::Result<Event>>;

/// What a raw notify event means for the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    Created(PathBuf),
    Removed(PathBuf),
    Written(PathBuf),
    /// A rename whose side the platform did not report.
    Moved(PathBuf),
}

pub struct WatchBridge {
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<HashSet<PathBuf>>,
}

impl WatchBridge {
    pub fn new() -> notify::Result<(Arc<Self>, EventReceiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })?;
        let bridge = Self {
            watcher: Mutex::new(watcher),
            watched: Mutex::new(HashSet::new()),
        };
        Ok((Arc::new(bridge), rx))
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.watched.lock().contains(dir)
    }

    /// Subscribes to changes directly inside `dir`. Failures are logged and
    /// leave that directory without live updates.
    pub fn register(&self, dir: &Path) {
        if !self.watched.lock().insert(dir.to_path_buf()) {
            return;
        }
        // `watch` needs the handle exclusively and may block on notify's
        // event thread; only the watcher lock is held across it, never
        // `watched`, and the guard drops before logging.
        let result = {
            let mut watcher = self.watcher.lock();
            watcher.watch(dir, RecursiveMode::NonRecursive)
        };
        match result {
            Ok(()) => trace!("watching {}", dir.display()),
            Err(err) => {
                warn!("failed to watch {}: {}", dir.display(), err);
                self.watched.lock().remove(dir);
            }
        }
    }

    /// Registers a freshly listed directory and the subdirectories it holds.
    pub fn register_listing(&self, dir: &Path, subdirs: &[PathBuf]) {
        self.register(dir);
        for subdir in subdirs {
            self.register(subdir);
        }
    }

    /// Registers a directory that appeared after startup, plus whatever
    /// subdirectories it already contained (one level deep).
    pub fn register_created(&self, dir: &Path) {
        self.register(dir);
        let walker = WalkBuilder::new(dir)
            .max_depth(Some(1))
            .standard_filters(false)
            .build();
        for entry in walker.flatten() {
            if entry.depth() == 1 && entry.file_type().is_some_and(|ft| ft.is_dir()) {
                self.register(entry.path());
            }
        }
    }

    /// Drops the watches for `path` and everything below it.
    pub fn unregister(&self, path: &Path) {
        let removed: Vec<PathBuf> = {
            let mut watched = self.watched.lock();
            let removed = watched
                .iter()
                .filter(|dir| dir.starts_with(path))
                .cloned()
                .collect::<Vec<_>>();
            for dir in &removed {
                watched.remove(dir);
            }
            removed
        };
        let mut watcher = self.watcher.lock();
        for dir in removed {
            // The OS usually dropped the watch together with the directory.
            if let Err(err) = watcher.unwatch(&dir) {
                trace!("unwatch {}: {}", dir.display(), err);
            }
        }
    }

    /// Consumes notify events until the watcher goes away.
    pub async fn run(
        self: Arc<Self>,
        mut events: EventReceiver,
        ignore: Arc<IgnoreClassifier>,
        sink: Sink,
    ) {
        while let Some(event) = events.recv().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!("watch error: {}", err);
                    continue;
                }
            };
            for change in classify(&event) {
                if !self.handle(change, &ignore, &sink).await {
                    return;
                }
            }
        }
        debug!("watch loop finished");
    }

    async fn handle(self: &Arc<Self>, change: FsChange, ignore: &Arc<IgnoreClassifier>, sink: &Sink) -> bool {
        match change {
            FsChange::Created(path) => self.created(path, ignore, sink).await,
            FsChange::Removed(path) => self.removed(path, sink),
            FsChange::Written(path) => sink.send(Update::FileChanged(path)),
            FsChange::Moved(path) => {
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    self.created(path, ignore, sink).await
                } else {
                    self.removed(path, sink)
                }
            }
        }
    }

    async fn created(self: &Arc<Self>, path: PathBuf, ignore: &Arc<IgnoreClassifier>, sink: &Sink) -> bool {
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("created path {} is gone: {}", path.display(), err);
                return true;
            }
        };
        let is_dir = metadata.is_dir();

        let bridge = Arc::clone(self);
        let ignore = Arc::clone(ignore);
        let target = path.clone();
        let ignored = tokio::task::spawn_blocking(move || {
            if is_dir {
                bridge.register_created(&target);
            }
            ignore.is_ignored_live(&target)
        })
        .await
        .unwrap_or(false);

        sink.send(TreeUpdate::Created(Entry {
            path,
            is_dir,
            ignored,
        }))
    }

    fn removed(&self, path: PathBuf, sink: &Sink) -> bool {
        self.unregister(&path);
        sink.send(TreeUpdate::Removed(path))
    }
}

/// Maps a notify event onto tree-level changes. Permission and access
/// events produce nothing.
pub fn classify(event: &Event) -> Vec<FsChange> {
    let paths = event.paths.iter().cloned();
    match event.kind {
        EventKind::Create(_) => paths.map(FsChange::Created).collect(),
        EventKind::Remove(_) => paths.map(FsChange::Removed).collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => paths.map(FsChange::Removed).collect(),
            RenameMode::To => paths.map(FsChange::Created).collect(),
            RenameMode::Both => {
                let mut changes = Vec::new();
                if let Some(from) = event.paths.first() {
                    changes.push(FsChange::Removed(from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    changes.push(FsChange::Created(to.clone()));
                }
                changes
            }
            _ => paths.map(FsChange::Moved).collect(),
        },
        EventKind::Modify(_) => paths.map(FsChange::Written).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
