use std::path::{Path, PathBuf};

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use tracing::debug;

use super::{preview_lines, Outcome, View};
use crate::preview::{self, Preview, PreviewKind};
use crate::sink::Sink;
use crate::tree::{Loader, NodeId, NodeKind, Row, Tree, TreeUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesAction {
    ScrollDown,
    ScrollUp,
    Quit,
    ShowHelp,
    MoveUp,
    MoveDown,
    ShowSearch,
    Edit,
    NavigateUp,
    Expand,
    ScrollPageDown,
    DecreaseTreeWidth,
    IncreaseTreeWidth,
    EnterFindMode,
    Refresh,
}

pub const HANDLERS: &[(&str, FilesAction)] = &[
    ("FilesScrollDown", FilesAction::ScrollDown),
    ("FilesScrollUp", FilesAction::ScrollUp),
    ("FilesQuit", FilesAction::Quit),
    ("FilesShowHelp", FilesAction::ShowHelp),
    ("FilesMoveUp", FilesAction::MoveUp),
    ("FilesMoveDown", FilesAction::MoveDown),
    ("FilesShowSearch", FilesAction::ShowSearch),
    ("FilesEdit", FilesAction::Edit),
    ("FilesNavigateUp", FilesAction::NavigateUp),
    ("FilesExpand", FilesAction::Expand),
    ("FilesScrollPageDown", FilesAction::ScrollPageDown),
    ("FilesDecreaseTreeWidth", FilesAction::DecreaseTreeWidth),
    ("FilesIncreaseTreeWidth", FilesAction::IncreaseTreeWidth),
    ("FilesEnterFindMode", FilesAction::EnterFindMode),
    ("FilesRefresh", FilesAction::Refresh),
];

pub const DEFAULT_KEYS: &[(&str, &str)] = &[
    ("j", "FilesScrollDown"),
    ("k", "FilesScrollUp"),
    ("q", "FilesQuit"),
    ("?", "FilesShowHelp"),
    ("w", "FilesMoveUp"),
    ("s", "FilesMoveDown"),
    ("S", "FilesShowSearch"),
    ("e", "FilesEdit"),
    ("a", "FilesNavigateUp"),
    ("d", "FilesExpand"),
    (" ", "FilesScrollPageDown"),
    ("H", "FilesDecreaseTreeWidth"),
    ("L", "FilesIncreaseTreeWidth"),
    ("f", "FilesEnterFindMode"),
    ("r", "FilesRefresh"),
];

const SCROLL_STEP: usize = 9;
const MIN_TREE_WIDTH: u16 = 12;
const DEFAULT_TREE_WIDTH: u16 = 32;

/// Incremental name search started by `FilesEnterFindMode`.
struct Find {
    query: String,
    origin: NodeId,
}

pub struct FilesView {
    tree: Tree,
    loader: Loader,
    rows: Vec<Row>,
    selected: usize,
    selected_id: NodeId,
    tree_scroll: usize,
    tree_width: u16,
    preview: Option<Preview>,
    preview_path: Option<PathBuf>,
    preview_scroll: usize,
    preview_height: usize,
    find: Option<Find>,
    sink: Sink,
    highlight_limit: u64,
}

impl FilesView {
    pub fn new(root: &Path, loader: Loader, sink: Sink, highlight_limit: u64) -> Self {
        let mut tree = Tree::new(root);
        let root_id = tree.root();
        loader.expand(&mut tree, root_id);

        let mut view = Self {
            tree,
            loader,
            rows: Vec::new(),
            selected: 0,
            selected_id: root_id,
            tree_scroll: 0,
            tree_width: DEFAULT_TREE_WIDTH,
            preview: None,
            preview_path: None,
            preview_scroll: 0,
            preview_height: 0,
            find: None,
            sink,
            highlight_limit,
        };
        view.refresh_rows();
        view
    }

    pub fn selected_path(&self) -> Option<&Path> {
        self.tree.get(self.selected_id).map(|node| node.path.as_path())
    }

    pub fn is_finding(&self) -> bool {
        self.find.is_some()
    }

    pub fn dispatch(&mut self, action: FilesAction) -> Outcome {
        match action {
            FilesAction::ScrollDown => self.scroll_preview(SCROLL_STEP as isize),
            FilesAction::ScrollUp => self.scroll_preview(-(SCROLL_STEP as isize)),
            FilesAction::Quit => return Outcome::Quit,
            FilesAction::ShowHelp => return Outcome::Show(View::Help),
            FilesAction::MoveUp => self.move_selection(-1),
            FilesAction::MoveDown => self.move_selection(1),
            FilesAction::ShowSearch => return Outcome::Show(View::Search),
            FilesAction::Edit => return self.edit_request(),
            FilesAction::NavigateUp => self.navigate_up(),
            FilesAction::Expand => self.expand_selected(),
            FilesAction::ScrollPageDown => self.scroll_preview(self.preview_height.max(1) as isize),
            FilesAction::DecreaseTreeWidth => {
                self.tree_width = self.tree_width.saturating_sub(2).max(MIN_TREE_WIDTH);
            }
            FilesAction::IncreaseTreeWidth => {
                self.tree_width = self.tree_width.saturating_add(2);
            }
            FilesAction::EnterFindMode => {
                self.find = Some(Find {
                    query: String::new(),
                    origin: self.selected_id,
                });
            }
            FilesAction::Refresh => self.refresh_selected(),
        }
        Outcome::Stay
    }

    /// Plain tree navigation for keys no binding claimed.
    pub fn handle_unbound(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Enter | KeyCode::Right => self.expand_selected(),
            KeyCode::Left => self.navigate_up(),
            KeyCode::PageDown => self.scroll_preview(self.preview_height.max(1) as isize),
            KeyCode::PageUp => self.scroll_preview(-(self.preview_height.max(1) as isize)),
            _ => {}
        }
    }

    pub fn handle_find_key(&mut self, key: KeyEvent) {
        let Some(find) = self.find.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Enter => self.find = None,
            KeyCode::Esc => {
                let origin = find.origin;
                self.find = None;
                self.select_node(origin);
            }
            KeyCode::Backspace => {
                find.query.pop();
                self.run_find();
            }
            KeyCode::Char(c) => {
                find.query.push(c);
                self.run_find();
            }
            _ => {}
        }
    }

    pub fn apply_tree(&mut self, update: TreeUpdate) -> bool {
        let settled = match &update {
            TreeUpdate::Finished { parent, .. } | TreeUpdate::LoadFailed { parent, .. } => Some(*parent),
            _ => None,
        };
        let mut changed = self.tree.apply(update);
        if let Some(parent) = settled {
            changed |= self.loader.resume(&mut self.tree, parent);
        }
        if changed {
            self.refresh_rows();
        }
        changed
    }

    pub fn apply_preview(&mut self, preview: &Preview) -> bool {
        if self.preview_path.as_deref() != Some(preview.path.as_path()) {
            return false;
        }
        let max = preview.lines.len().saturating_sub(1);
        self.preview_scroll = self.preview_scroll.min(max);
        self.preview = Some(preview.clone());
        true
    }

    /// Reloads the preview when the file on screen was written to.
    pub fn file_changed(&mut self, path: &Path) {
        if self.preview_path.as_deref() == Some(path) {
            debug!("reloading preview of {}", path.display());
            preview::spawn(path.to_path_buf(), self.highlight_limit, self.sink.clone());
        }
    }

    fn refresh_rows(&mut self) {
        self.rows = self.tree.rows();
        match self.rows.iter().position(|row| row.id == self.selected_id) {
            Some(index) => self.selected = index,
            None => {
                self.selected = self.selected.min(self.rows.len().saturating_sub(1));
                if let Some(row) = self.rows.get(self.selected) {
                    self.selected_id = row.id;
                }
            }
        }
        self.sync_preview();
    }

    fn select_node(&mut self, id: NodeId) {
        if let Some(index) = self.rows.iter().position(|row| row.id == id) {
            self.selected = index;
            self.selected_id = id;
            self.sync_preview();
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let last = self.rows.len() as isize - 1;
        let next = (self.selected as isize + delta).clamp(0, last) as usize;
        self.selected = next;
        self.selected_id = self.rows[next].id;
        self.sync_preview();
    }

    /// Starts loading a preview when the selection lands on a new file.
    fn sync_preview(&mut self) {
        let path = self
            .tree
            .get(self.selected_id)
            .filter(|node| node.kind == NodeKind::File)
            .map(|node| node.path.clone());
        if path == self.preview_path {
            return;
        }
        self.preview = None;
        self.preview_scroll = 0;
        self.preview_path = path.clone();
        if let Some(path) = path {
            preview::spawn(path, self.highlight_limit, self.sink.clone());
        }
    }

    fn scroll_preview(&mut self, delta: isize) {
        let Some(preview) = &self.preview else {
            return;
        };
        let max = preview.lines.len().saturating_sub(self.preview_height.max(1)) as isize;
        self.preview_scroll = (self.preview_scroll as isize + delta).clamp(0, max.max(0)) as usize;
    }

    fn expand_selected(&mut self) {
        if self.loader.expand(&mut self.tree, self.selected_id) {
            self.refresh_rows();
        }
    }

    /// Collapses an expanded directory, otherwise moves to the parent.
    fn navigate_up(&mut self) {
        let Some(node) = self.tree.get(self.selected_id) else {
            return;
        };
        let collapse = node.is_dir() && node.expanded;
        let parent = node.parent;

        if collapse {
            self.tree.collapse(self.selected_id);
            self.refresh_rows();
        } else if let Some(parent) = parent {
            self.select_node(parent);
        }
    }

    /// Reloads the selected directory, or the one containing the selected file.
    fn refresh_selected(&mut self) {
        let target = match self.tree.get(self.selected_id) {
            Some(node) if node.is_dir() => self.selected_id,
            Some(node) => match node.parent {
                Some(parent) => parent,
                None => return,
            },
            None => return,
        };
        self.loader.reload(&mut self.tree, target);
        self.selected_id = target;
        self.refresh_rows();
    }

    fn run_find(&mut self) {
        let Some(find) = &self.find else {
            return;
        };
        let query = find.query.to_lowercase();
        let origin = find.origin;
        if query.is_empty() {
            return;
        }

        let found = self.tree.find(|node| {
            matches!(node.kind, NodeKind::Dir | NodeKind::File)
                && is_subsequence(&query, &node.name.to_lowercase())
        });
        match found {
            Some(id) => self.reveal(id),
            None => {
                debug!("no node matches '{}'", query);
                self.select_node(origin);
            }
        }
    }

    /// Expands every ancestor of `id` so it becomes visible, then selects it.
    fn reveal(&mut self, id: NodeId) {
        for ancestor in self.tree.ancestors(id) {
            if let Some(node) = self.tree.get_mut(ancestor) {
                node.expanded = true;
            }
        }
        self.refresh_rows();
        self.select_node(id);
    }

    fn edit_request(&self) -> Outcome {
        let Some(path) = self.preview_path.clone() else {
            return Outcome::Stay;
        };
        let line = self.preview.as_ref().map(|preview| {
            let center = self.preview_scroll + self.preview_height / 2;
            (center.min(preview.lines.len().saturating_sub(1)) + 1) as u64
        });
        Outcome::Edit { path, line }
    }

    pub fn draw(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::horizontal([
            Constraint::Length(self.tree_width.min(area.width.saturating_sub(10))),
            Constraint::Min(10),
        ])
        .split(area);

        let tree_area = if let Some(find) = &self.find {
            let left = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).split(chunks[0]);
            let prompt = Paragraph::new(Line::from(vec![
                Span::styled("Find: ", Style::default().fg(Color::Cyan)),
                Span::raw(find.query.as_str()),
            ]));
            frame.render_widget(prompt, left[1]);
            left[0]
        } else {
            chunks[0]
        };

        self.draw_tree(frame, tree_area);
        self.draw_preview(frame, chunks[1]);
    }

    fn draw_tree(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray));
        let height = block.inner(area).height as usize;

        if self.selected < self.tree_scroll {
            self.tree_scroll = self.selected;
        } else if height > 0 && self.selected >= self.tree_scroll + height {
            self.tree_scroll = self.selected + 1 - height;
        }

        let lines: Vec<Line> = self
            .rows
            .iter()
            .enumerate()
            .skip(self.tree_scroll)
            .take(height)
            .map(|(index, row)| {
                let mut style = match &row.kind {
                    NodeKind::Dir => Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
                    NodeKind::File => Style::default(),
                    NodeKind::Placeholder => Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
                    NodeKind::Error(_) => Style::default().fg(Color::Red),
                };
                if row.ignored {
                    style = style.fg(Color::DarkGray);
                }
                if index == self.selected {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                Line::from(vec![
                    Span::styled(row.prefix.clone(), Style::default().fg(Color::DarkGray)),
                    Span::styled(row.name.clone(), style),
                ])
            })
            .collect();

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_preview(&mut self, frame: &mut Frame, area: Rect) {
        let title = match &self.preview {
            Some(preview) if preview.kind == PreviewKind::Plain => format!(" {} [plain] ", preview.title),
            Some(preview) => format!(" {} ", preview.title),
            None => " Preview ".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::DarkGray));
        self.preview_height = block.inner(area).height as usize;

        let lines = match &self.preview {
            Some(preview) => preview_lines(preview, self.preview_scroll, self.preview_height, 0, None),
            None => Vec::new(),
        };
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }
}

/// True if every character of `needle` appears in `haystack` in order.
fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|c| chars.any(|h| h == c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Update;
    use crate::tree::FsReader;
    use crate::vcs::IgnoreClassifier;
    use crossterm::event::KeyModifiers;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    /// Applies tree updates until no load is in flight.
    async fn settle(view: &mut FilesView, rx: &mut UnboundedReceiver<Update>) {
        loop {
            let loading = view.rows.iter().any(|row| row.kind == NodeKind::Placeholder);
            if !loading {
                return;
            }
            match rx.recv().await {
                Some(Update::Tree(update)) => {
                    view.apply_tree(update);
                }
                Some(_) => {}
                None => return,
            }
        }
    }

    /// Applies updates until `done` holds.
    async fn apply_until(
        view: &mut FilesView,
        rx: &mut UnboundedReceiver<Update>,
        done: impl Fn(&FilesView) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(view) {
                match rx.recv().await {
                    Some(Update::Tree(update)) => {
                        view.apply_tree(update);
                    }
                    Some(Update::Preview(preview)) => {
                        view.apply_preview(&preview);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await
        .expect("view never reached the expected state");
    }

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("src").join("tree")).unwrap();
        fs::write(root.join("src").join("main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("src").join("tree").join("node.rs"), "struct Node;\n").unwrap();
        fs::write(root.join("README.md"), "# peek\n").unwrap();
        (dir, root)
    }

    fn view(root: &Path) -> (FilesView, UnboundedReceiver<Update>) {
        let (sink, rx) = Sink::channel();
        let ignore = Arc::new(IgnoreClassifier::disabled(root));
        let loader = Loader::new(Arc::new(FsReader), ignore, sink.clone());
        (FilesView::new(root, loader, sink, 1000), rx)
    }

    #[test]
    fn test_is_subsequence() {
        assert!(is_subsequence("nrs", "node.rs"));
        assert!(is_subsequence("", "anything"));
        assert!(!is_subsequence("srn", "node.rs"));
    }

    #[tokio::test]
    async fn test_expand_and_navigate_up() {
        let (_dir, root) = fixture();
        let (mut view, mut rx) = view(&root);
        settle(&mut view, &mut rx).await;

        // Root row, then src/ first since directories sort first.
        view.dispatch(FilesAction::MoveDown);
        assert_eq!(view.selected_path(), Some(root.join("src").as_path()));

        view.dispatch(FilesAction::Expand);
        settle(&mut view, &mut rx).await;
        view.dispatch(FilesAction::MoveDown);
        assert_eq!(view.selected_path(), Some(root.join("src").join("tree").as_path()));

        view.dispatch(FilesAction::NavigateUp);
        assert_eq!(view.selected_path(), Some(root.join("src").as_path()));
        view.dispatch(FilesAction::NavigateUp);
        assert_eq!(view.rows.len(), 3);
    }

    #[tokio::test]
    async fn test_find_mode_reveals_and_restores() {
        let (_dir, root) = fixture();
        let (mut view, mut rx) = view(&root);
        settle(&mut view, &mut rx).await;
        view.dispatch(FilesAction::MoveDown);
        view.dispatch(FilesAction::Expand);
        settle(&mut view, &mut rx).await;
        view.dispatch(FilesAction::NavigateUp);
        let before = view.selected_path().map(Path::to_path_buf);

        view.dispatch(FilesAction::EnterFindMode);
        for c in "readme".chars() {
            view.handle_find_key(key(KeyCode::Char(c)));
        }
        assert_eq!(view.selected_path(), Some(root.join("README.md").as_path()));

        view.handle_find_key(key(KeyCode::Esc));
        assert!(!view.is_finding());
        assert_eq!(view.selected_path().map(Path::to_path_buf), before);
    }

    #[tokio::test]
    async fn test_reexpand_during_load_still_lists_children() {
        let (_dir, root) = fixture();
        let (mut view, mut rx) = view(&root);
        settle(&mut view, &mut rx).await;
        view.dispatch(FilesAction::MoveDown);

        view.dispatch(FilesAction::Expand);
        view.dispatch(FilesAction::NavigateUp);
        view.dispatch(FilesAction::Expand);

        let main_rs = root.join("src").join("main.rs");
        apply_until(&mut view, &mut rx, |view| view.tree.find_by_path(&main_rs).is_some()).await;
        assert!(view.rows.iter().any(|row| row.name == "main.rs"));
    }

    #[tokio::test]
    async fn test_written_preview_is_reloaded() {
        let (_dir, root) = fixture();
        let readme = root.join("README.md");
        let (mut view, mut rx) = view(&root);
        settle(&mut view, &mut rx).await;
        view.dispatch(FilesAction::MoveDown);
        view.dispatch(FilesAction::MoveDown);
        assert_eq!(view.selected_path(), Some(readme.as_path()));
        apply_until(&mut view, &mut rx, |view| view.preview.is_some()).await;

        fs::write(&readme, "# peek\nlive\n").unwrap();
        view.file_changed(&readme);
        apply_until(&mut view, &mut rx, |view| {
            view.preview.as_ref().is_some_and(|preview| preview.lines.len() == 2)
        })
        .await;
        assert_eq!(view.preview.as_ref().unwrap().lines[1], "live");
    }

    #[tokio::test]
    async fn test_live_create_shows_up() {
        let (_dir, root) = fixture();
        let (mut view, mut rx) = view(&root);
        settle(&mut view, &mut rx).await;

        let created = crate::tree::Entry {
            path: root.join("NEW.md"),
            is_dir: false,
            ignored: false,
        };
        assert!(view.apply_tree(TreeUpdate::Created(created.clone())));
        assert!(!view.apply_tree(TreeUpdate::Created(created)));
        assert!(view.rows.iter().any(|row| row.name == "NEW.md"));
    }
}
