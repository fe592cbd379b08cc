use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::TreeUpdate;

/// Stable handle into a [`Tree`]. Ids are never reused, so a handle held by
/// a background task can go stale but never points at a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
    /// Transient "Loading..." leaf shown while a directory is read.
    Placeholder,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// A directory entry discovered by a listing or a create event.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub ignored: bool,
}

#[derive(Debug)]
pub struct Node {
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    /// Non-owning back-reference; `None` only for the root.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub expanded: bool,
    pub state: LoadState,
    pub ignored: bool,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    /// True for nodes that mirror a filesystem entry.
    fn is_entry(&self) -> bool {
        matches!(self.kind, NodeKind::Dir | NodeKind::File)
    }
}

/// One line of the flattened, visible tree.
#[derive(Debug, Clone)]
pub struct Row {
    pub id: NodeId,
    pub prefix: String,
    pub name: String,
    pub kind: NodeKind,
    pub ignored: bool,
}

/// Arena holding the in-memory mirror of the browsed subtree.
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl Tree {
    pub fn new(root_path: &Path) -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            root: NodeId(0),
            next_id: 0,
        };
        tree.root = tree.alloc(Node {
            path: root_path.to_path_buf(),
            name: display_name(root_path, true),
            kind: NodeKind::Dir,
            parent: None,
            children: Vec::new(),
            expanded: false,
            state: LoadState::Unloaded,
            ignored: false,
        });
        tree
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.nodes[&self.root].path
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    /// Detached nodes are dropped from the arena, so a live node whose
    /// parent link matches is still attached.
    pub fn is_child(&self, parent: NodeId, child: NodeId) -> bool {
        self.get(child).is_some_and(|node| node.parent == Some(parent))
    }

    /// Ancestors of `id`, nearest first, ending with the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    pub fn add_placeholder(&mut self, parent: NodeId) -> Option<NodeId> {
        let path = self.get(parent)?.path.clone();
        let id = self.alloc(Node {
            path,
            name: "Loading...".to_string(),
            kind: NodeKind::Placeholder,
            parent: Some(parent),
            children: Vec::new(),
            expanded: false,
            state: LoadState::Unloaded,
            ignored: false,
        });
        self.nodes.get_mut(&parent)?.children.push(id);
        Some(id)
    }

    /// Appends `entry` under `parent` unless a child with that path exists.
    pub fn append(&mut self, parent: NodeId, entry: &Entry) -> Option<NodeId> {
        if self.child_by_path(parent, &entry.path).is_some() {
            return None;
        }
        let id = self.alloc(node_for(entry, parent));
        self.nodes.get_mut(&parent)?.children.push(id);
        Some(id)
    }

    pub fn child_by_path(&self, parent: NodeId, path: &Path) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|child| {
            self.get(*child)
                .is_some_and(|node| node.is_entry() && node.path == path)
        })
    }

    /// Walks down from the root one path segment at a time.
    pub fn find_by_path(&self, path: &Path) -> Option<NodeId> {
        let rel = path.strip_prefix(self.root_path()).ok()?;
        let mut current = self.root;
        for component in rel.components() {
            let name = component.as_os_str();
            current = self
                .children(current)
                .iter()
                .copied()
                .find(|child| self.is_entry_named(*child, name))?;
        }
        Some(current)
    }

    fn is_entry_named(&self, id: NodeId, name: &OsStr) -> bool {
        self.get(id)
            .is_some_and(|node| node.is_entry() && node.path.file_name() == Some(name))
    }

    /// First loaded node in display order matching `pred`.
    pub fn find(&self, pred: impl Fn(&Node) -> bool) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.get(id)?;
            if pred(node) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Removes `id` and its whole subtree. The root cannot be detached.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.parent(id) else {
            return false;
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|child| *child != id);
        }
        self.drop_subtree(id);
        true
    }

    fn drop_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.drop_subtree(child);
            }
        }
    }

    /// Discards the children of `id`. An in-flight load is left running;
    /// its updates no longer find their placeholder and are dropped.
    pub fn collapse(&mut self, id: NodeId) {
        let children = match self.nodes.get_mut(&id) {
            Some(node) => {
                node.expanded = false;
                node.state = LoadState::Unloaded;
                std::mem::take(&mut node.children)
            }
            None => return,
        };
        for child in children {
            self.drop_subtree(child);
        }
    }

    /// Applies one background update. Returns whether the tree changed.
    pub fn apply(&mut self, update: TreeUpdate) -> bool {
        match update {
            TreeUpdate::Batch {
                parent,
                placeholder,
                entries,
            } => {
                if !self.is_child(parent, placeholder) {
                    return false;
                }
                let existing: HashSet<PathBuf> = self
                    .children(parent)
                    .iter()
                    .filter_map(|child| self.get(*child))
                    .filter(|node| node.is_entry())
                    .map(|node| node.path.clone())
                    .collect();
                let new_ids: Vec<NodeId> = entries
                    .iter()
                    .filter(|entry| !existing.contains(&entry.path))
                    .map(|entry| self.alloc(node_for(entry, parent)))
                    .collect();
                if let Some(node) = self.nodes.get_mut(&parent) {
                    // Keep the placeholder below the entries loaded so far.
                    let at = node
                        .children
                        .iter()
                        .position(|child| *child == placeholder)
                        .unwrap_or(node.children.len());
                    node.children.splice(at..at, new_ids);
                }
                true
            }
            TreeUpdate::LoadFailed {
                parent,
                placeholder,
                message,
            } => {
                if !self.is_child(parent, placeholder) {
                    return false;
                }
                if let Some(node) = self.nodes.get_mut(&placeholder) {
                    node.name = format!("Error: {}", message);
                    node.kind = NodeKind::Error(message);
                }
                if let Some(node) = self.nodes.get_mut(&parent) {
                    node.state = LoadState::Loaded;
                }
                true
            }
            TreeUpdate::Finished {
                parent,
                placeholder,
            } => {
                if !self.is_child(parent, placeholder) {
                    return false;
                }
                self.detach(placeholder);
                if let Some(node) = self.nodes.get_mut(&parent) {
                    node.state = LoadState::Loaded;
                }
                true
            }
            TreeUpdate::Created(entry) => {
                let Some(parent) = entry.path.parent().and_then(|dir| self.find_by_path(dir))
                else {
                    return false;
                };
                // An unloaded directory will pick the entry up when it is read.
                match self.get(parent) {
                    Some(node) if node.is_dir() && node.state != LoadState::Unloaded => {}
                    _ => return false,
                }
                self.append(parent, &entry).is_some()
            }
            TreeUpdate::Removed(path) => match self.find_by_path(&path) {
                Some(id) => self.detach(id),
                None => false,
            },
        }
    }

    pub fn rows(&self) -> Vec<Row> {
        let mut out = Vec::new();
        let mut bars = Vec::new();
        self.collect_rows(self.root, &mut bars, true, true, &mut out);
        out
    }

    fn collect_rows(
        &self,
        id: NodeId,
        bars: &mut Vec<bool>,
        is_root: bool,
        is_last: bool,
        out: &mut Vec<Row>,
    ) {
        let Some(node) = self.get(id) else {
            return;
        };
        let prefix = if is_root {
            String::new()
        } else {
            make_prefix(bars, is_last)
        };

        out.push(Row {
            id,
            prefix,
            name: node.name.clone(),
            kind: node.kind.clone(),
            ignored: node.ignored,
        });

        if node.expanded {
            if !is_root {
                bars.push(!is_last);
            }
            let last_index = node.children.len().saturating_sub(1);
            for (idx, child) in node.children.iter().enumerate() {
                self.collect_rows(*child, bars, false, idx == last_index, out);
            }
            if !is_root {
                bars.pop();
            }
        }
    }
}

fn node_for(entry: &Entry, parent: NodeId) -> Node {
    Node {
        path: entry.path.clone(),
        name: display_name(&entry.path, entry.is_dir),
        kind: if entry.is_dir {
            NodeKind::Dir
        } else {
            NodeKind::File
        },
        parent: Some(parent),
        children: Vec::new(),
        expanded: false,
        state: LoadState::Unloaded,
        ignored: entry.ignored,
    }
}

fn make_prefix(bars: &[bool], is_last: bool) -> String {
    let mut prefix = String::new();
    for &bar in bars {
        prefix.push(if bar { '│' } else { ' ' });
    }
    prefix.push(if is_last { '└' } else { '├' });
    prefix
}

fn display_name(path: &Path, is_dir: bool) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    if is_dir && !name.ends_with('/') {
        format!("{}/", name)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, is_dir: bool) -> Entry {
        Entry {
            path: PathBuf::from(path),
            is_dir,
            ignored: false,
        }
    }

    /// Root `/r` loaded with `src/` and `README.md`, `src/` loaded with `lib.rs`.
    fn loaded_tree() -> Tree {
        let mut tree = Tree::new(Path::new("/r"));
        let root = tree.root();
        let placeholder = tree.add_placeholder(root).unwrap();
        tree.apply(TreeUpdate::Batch {
            parent: root,
            placeholder,
            entries: vec![entry("/r/src", true), entry("/r/README.md", false)],
        });
        tree.apply(TreeUpdate::Finished {
            parent: root,
            placeholder,
        });
        tree.get_mut(root).unwrap().expanded = true;

        let src = tree.find_by_path(Path::new("/r/src")).unwrap();
        let placeholder = tree.add_placeholder(src).unwrap();
        tree.apply(TreeUpdate::Batch {
            parent: src,
            placeholder,
            entries: vec![entry("/r/src/lib.rs", false)],
        });
        tree.apply(TreeUpdate::Finished {
            parent: src,
            placeholder,
        });
        tree.get_mut(src).unwrap().expanded = true;
        tree
    }

    #[test]
    fn test_find_by_path_walks_segments() {
        let tree = loaded_tree();
        let lib = tree.find_by_path(Path::new("/r/src/lib.rs")).unwrap();
        assert_eq!(tree.get(lib).unwrap().name, "lib.rs");
        assert_eq!(tree.find_by_path(Path::new("/r")), Some(tree.root()));
        assert_eq!(tree.find_by_path(Path::new("/r/src/missing.rs")), None);
        assert_eq!(tree.find_by_path(Path::new("/elsewhere")), None);
    }

    #[test]
    fn test_created_is_idempotent() {
        let mut tree = loaded_tree();
        let src = tree.find_by_path(Path::new("/r/src")).unwrap();

        assert!(tree.apply(TreeUpdate::Created(entry("/r/src/main.rs", false))));
        assert!(!tree.apply(TreeUpdate::Created(entry("/r/src/main.rs", false))));
        assert!(!tree.apply(TreeUpdate::Created(entry("/r/src/lib.rs", false))));
        assert_eq!(tree.children(src).len(), 2);
    }

    #[test]
    fn test_created_skips_unloaded_parent() {
        let mut tree = loaded_tree();
        let src = tree.find_by_path(Path::new("/r/src")).unwrap();
        tree.collapse(src);
        assert!(!tree.apply(TreeUpdate::Created(entry("/r/src/new.rs", false))));
        assert!(tree.children(src).is_empty());
    }

    #[test]
    fn test_batch_racing_create_does_not_duplicate() {
        let mut tree = Tree::new(Path::new("/r"));
        let root = tree.root();
        let placeholder = tree.add_placeholder(root).unwrap();
        tree.get_mut(root).unwrap().state = LoadState::Loading;

        assert!(tree.apply(TreeUpdate::Created(entry("/r/a.txt", false))));
        tree.apply(TreeUpdate::Batch {
            parent: root,
            placeholder,
            entries: vec![entry("/r/a.txt", false), entry("/r/b.txt", false)],
        });
        tree.apply(TreeUpdate::Finished {
            parent: root,
            placeholder,
        });

        let names: Vec<_> = tree
            .children(root)
            .iter()
            .map(|id| tree.get(*id).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
        assert_eq!(tree.get(root).unwrap().state, LoadState::Loaded);
    }

    #[test]
    fn test_batch_after_collapse_is_discarded() {
        let mut tree = Tree::new(Path::new("/r"));
        let root = tree.root();
        let placeholder = tree.add_placeholder(root).unwrap();
        tree.collapse(root);

        assert!(!tree.apply(TreeUpdate::Batch {
            parent: root,
            placeholder,
            entries: vec![entry("/r/a.txt", false)],
        }));
        assert!(!tree.apply(TreeUpdate::Finished {
            parent: root,
            placeholder,
        }));
        assert!(tree.children(root).is_empty());
        assert_eq!(tree.get(root).unwrap().state, LoadState::Unloaded);
    }

    #[test]
    fn test_load_failure_replaces_placeholder() {
        let mut tree = Tree::new(Path::new("/r"));
        let root = tree.root();
        let placeholder = tree.add_placeholder(root).unwrap();
        tree.apply(TreeUpdate::LoadFailed {
            parent: root,
            placeholder,
            message: "Permission denied".to_string(),
        });

        assert_eq!(tree.children(root), &[placeholder]);
        let node = tree.get(placeholder).unwrap();
        assert_eq!(node.kind, NodeKind::Error("Permission denied".to_string()));
        assert_eq!(node.name, "Error: Permission denied");
    }

    #[test]
    fn test_removed_drops_subtree() {
        let mut tree = loaded_tree();
        let before = tree.len();
        assert!(tree.apply(TreeUpdate::Removed(PathBuf::from("/r/src"))));
        assert_eq!(tree.len(), before - 2);
        assert_eq!(tree.find_by_path(Path::new("/r/src/lib.rs")), None);
        assert!(!tree.apply(TreeUpdate::Removed(PathBuf::from("/r"))));
    }

    #[test]
    fn test_rows_draw_branches() {
        let tree = loaded_tree();
        let rows: Vec<String> = tree
            .rows()
            .iter()
            .map(|row| format!("{}{}", row.prefix, row.name))
            .collect();
        assert_eq!(rows, vec!["r/", "├src/", "│└lib.rs", "└README.md"]);
    }

    #[test]
    fn test_ancestors_end_at_root() {
        let tree = loaded_tree();
        let lib = tree.find_by_path(Path::new("/r/src/lib.rs")).unwrap();
        let src = tree.find_by_path(Path::new("/r/src")).unwrap();
        assert_eq!(tree.ancestors(lib), vec![src, tree.root()]);
    }
}
