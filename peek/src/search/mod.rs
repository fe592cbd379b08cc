mod driver;
mod session;

pub use driver::{driver_for, SearchDriver, SearchOptions, SearchResult};
pub use session::Orchestrator;

/// Result-list changes produced by a search session.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchUpdate {
    /// A new session started; everything shown so far is stale.
    Cleared { generation: u64 },
    Appended {
        generation: u64,
        results: Vec<SearchResult>,
    },
}

/// The displayed results. Only updates from the newest session are kept.
#[derive(Debug, Default)]
pub struct ResultList {
    generation: u64,
    results: Vec<SearchResult>,
}

impl ResultList {
    pub fn apply(&mut self, update: SearchUpdate) -> bool {
        match update {
            SearchUpdate::Cleared { generation } => {
                if generation < self.generation {
                    return false;
                }
                self.generation = generation;
                self.results.clear();
                true
            }
            SearchUpdate::Appended {
                generation,
                results,
            } => {
                if generation != self.generation {
                    return false;
                }
                self.results.extend(results);
                true
            }
        }
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn get(&self, index: usize) -> Option<&SearchResult> {
        self.results.get(index)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
