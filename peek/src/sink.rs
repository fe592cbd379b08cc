//! The single serialized entry point for background work.
//!
//! Loaders, the watch loop and search sessions never touch UI state. They
//! send [`Update`]s here, and the UI loop applies them one at a time.

use std::path::PathBuf;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::preview::Preview;
use crate::search::SearchUpdate;
use crate::tree::TreeUpdate;

#[derive(Debug)]
pub enum Update {
    Tree(TreeUpdate),
    Search(SearchUpdate),
    Preview(Preview),
    /// A watched file was written to.
    FileChanged(PathBuf),
}

impl From<TreeUpdate> for Update {
    fn from(update: TreeUpdate) -> Self {
        Update::Tree(update)
    }
}

impl From<SearchUpdate> for Update {
    fn from(update: SearchUpdate) -> Self {
        Update::Search(update)
    }
}

impl From<Preview> for Update {
    fn from(preview: Preview) -> Self {
        Update::Preview(preview)
    }
}

#[derive(Clone)]
pub struct Sink {
    tx: UnboundedSender<Update>,
}

impl Sink {
    pub fn channel() -> (Self, UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the UI loop has gone away.
    pub fn send(&self, update: impl Into<Update>) -> bool {
        match self.tx.send(update.into()) {
            Ok(()) => true,
            Err(_) => {
                trace!("sink closed, dropping update");
                false
            }
        }
    }
}
