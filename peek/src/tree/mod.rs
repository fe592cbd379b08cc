mod loader;
mod node;

use std::path::PathBuf;

pub use loader::{FsReader, Loader};
pub use node::{Entry, LoadState, NodeId, NodeKind, Row, Tree};

/// Tree mutations produced off the UI thread.
///
/// Load updates name the placeholder they were started with. The tree
/// applies them only while that placeholder is still a child of `parent`.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeUpdate {
    Batch {
        parent: NodeId,
        placeholder: NodeId,
        entries: Vec<Entry>,
    },
    LoadFailed {
        parent: NodeId,
        placeholder: NodeId,
        message: String,
    },
    Finished {
        parent: NodeId,
        placeholder: NodeId,
    },
    Created(Entry),
    Removed(PathBuf),
}
