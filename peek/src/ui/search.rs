use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::{preview_lines, Outcome, View};
use crate::keymap::Keymap;
use crate::preview::{self, Preview};
use crate::search::{Orchestrator, ResultList, SearchResult, SearchUpdate};
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAction {
    FocusInput,
    PreviousItem,
    NextItem,
    ExitView,
    ScrollLeft,
    ScrollDown,
    ScrollUp,
    ScrollRight,
    Edit,
    ScrollToEnd,
    DecreaseLeftWidth,
    IncreaseLeftWidth,
    ToggleRegex,
    ToggleCase,
}

pub const HANDLERS: &[(&str, SearchAction)] = &[
    ("SearchFocusInput", SearchAction::FocusInput),
    ("SearchPreviousItem", SearchAction::PreviousItem),
    ("SearchNextItem", SearchAction::NextItem),
    ("SearchExitView", SearchAction::ExitView),
    ("SearchScrollLeft", SearchAction::ScrollLeft),
    ("SearchScrollDown", SearchAction::ScrollDown),
    ("SearchScrollUp", SearchAction::ScrollUp),
    ("SearchScrollRight", SearchAction::ScrollRight),
    ("SearchEdit", SearchAction::Edit),
    ("SearchScrollToEnd", SearchAction::ScrollToEnd),
    ("SearchDecreaseLeftWidth", SearchAction::DecreaseLeftWidth),
    ("SearchIncreaseLeftWidth", SearchAction::IncreaseLeftWidth),
    ("SearchToggleRegex", SearchAction::ToggleRegex),
    ("SearchToggleCase", SearchAction::ToggleCase),
];

pub const DEFAULT_KEYS: &[(&str, &str)] = &[
    ("Esc", "SearchExitView"),
    ("Up", "SearchPreviousItem"),
    ("Down", "SearchNextItem"),
    ("Ctrl-R", "SearchToggleRegex"),
    ("Ctrl-I", "SearchToggleCase"),
    ("S", "SearchFocusInput"),
    ("w", "SearchPreviousItem"),
    ("s", "SearchNextItem"),
    ("q", "SearchExitView"),
    ("h", "SearchScrollLeft"),
    ("j", "SearchScrollDown"),
    ("k", "SearchScrollUp"),
    ("l", "SearchScrollRight"),
    ("e", "SearchEdit"),
    ("G", "SearchScrollToEnd"),
    ("H", "SearchDecreaseLeftWidth"),
    ("L", "SearchIncreaseLeftWidth"),
];

const MIN_LEFT_WIDTH: u16 = 16;
const DEFAULT_LEFT_WIDTH: u16 = 48;

pub struct SearchView {
    orchestrator: Arc<Orchestrator>,
    results: ResultList,
    input: String,
    editing: bool,
    selected: usize,
    list_scroll: usize,
    left_width: u16,
    preview: Option<Preview>,
    preview_path: Option<PathBuf>,
    /// 0-based line of the selected match.
    preview_mark: Option<usize>,
    preview_scroll: usize,
    preview_hscroll: usize,
    preview_height: usize,
    sink: Sink,
    highlight_limit: u64,
}

impl SearchView {
    pub fn new(orchestrator: Arc<Orchestrator>, sink: Sink, highlight_limit: u64) -> Self {
        Self {
            orchestrator,
            results: ResultList::default(),
            input: String::new(),
            editing: false,
            selected: 0,
            list_scroll: 0,
            left_width: DEFAULT_LEFT_WIDTH,
            preview: None,
            preview_path: None,
            preview_mark: None,
            preview_scroll: 0,
            preview_hscroll: 0,
            preview_height: 0,
            sink,
            highlight_limit,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn focus_input(&mut self) {
        self.editing = true;
    }

    pub fn dispatch(&mut self, action: SearchAction) -> Outcome {
        match action {
            SearchAction::FocusInput => self.editing = true,
            SearchAction::PreviousItem => self.select(self.selected.saturating_sub(1)),
            SearchAction::NextItem => self.select(self.selected + 1),
            SearchAction::ExitView => return Outcome::Show(View::Files),
            SearchAction::ScrollLeft => self.preview_hscroll = self.preview_hscroll.saturating_sub(1),
            SearchAction::ScrollRight => self.preview_hscroll += 1,
            SearchAction::ScrollDown => self.scroll_preview(1),
            SearchAction::ScrollUp => self.scroll_preview(-1),
            SearchAction::Edit => return self.edit_request(),
            SearchAction::ScrollToEnd => {
                if let Some(preview) = &self.preview {
                    self.preview_scroll = preview.lines.len().saturating_sub(self.preview_height.max(1));
                }
            }
            SearchAction::DecreaseLeftWidth => {
                self.left_width = self.left_width.saturating_sub(2).max(MIN_LEFT_WIDTH);
            }
            SearchAction::IncreaseLeftWidth => {
                self.left_width = self.left_width.saturating_add(2);
            }
            SearchAction::ToggleRegex => {
                self.orchestrator.toggle_regex();
            }
            SearchAction::ToggleCase => {
                self.orchestrator.toggle_case();
            }
        }
        Outcome::Stay
    }

    /// Keys while the query input has focus. Only the toggles are taken from
    /// the keymap; everything else edits the query.
    pub fn handle_input_key(&mut self, key: KeyEvent, keymap: &Keymap<SearchAction>) -> Outcome {
        if let Some(action @ (SearchAction::ToggleRegex | SearchAction::ToggleCase)) = keymap.resolve(&key) {
            return self.dispatch(action);
        }

        match key.code {
            KeyCode::Enter => {
                self.editing = false;
                if !self.input.trim().is_empty() {
                    self.submit();
                }
            }
            KeyCode::Esc => {
                self.editing = false;
                if self.input.is_empty() && self.results.is_empty() {
                    return Outcome::Show(View::Files);
                }
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => self.input.clear(),
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                self.input.push(c);
            }
            _ => {}
        }
        Outcome::Stay
    }

    fn submit(&mut self) {
        self.selected = 0;
        self.list_scroll = 0;
        self.clear_preview();
        self.orchestrator.execute_search(&self.input);
    }

    pub fn apply_results(&mut self, update: SearchUpdate) -> bool {
        if !self.results.apply(update) {
            return false;
        }
        if self.results.is_empty() {
            self.selected = 0;
            self.clear_preview();
        } else if self.preview_path.is_none() {
            self.select(self.selected);
        }
        true
    }

    pub fn apply_preview(&mut self, preview: &Preview) -> bool {
        if self.preview_path.as_deref() != Some(preview.path.as_path()) {
            return false;
        }
        let mark = self.preview_mark.unwrap_or(0);
        self.preview_scroll = mark.saturating_sub(self.preview_height / 2);
        self.preview = Some(preview.clone());
        true
    }

    pub fn file_changed(&mut self, path: &Path) {
        if self.preview_path.as_deref() == Some(path) {
            preview::spawn(path.to_path_buf(), self.highlight_limit, self.sink.clone());
        }
    }

    /// Selects result `index` (clamped) and previews around its line.
    fn select(&mut self, index: usize) {
        if self.results.is_empty() {
            return;
        }
        self.selected = index.min(self.results.len() - 1);

        let target = self.results.get(self.selected).filter(|result| !result.is_error).map(|result| {
            (self.absolute(&result.file_path), result.line_number.saturating_sub(1) as usize)
        });
        match target {
            Some((path, mark)) => {
                self.preview_mark = Some(mark);
                self.preview_hscroll = 0;
                if self.preview_path.as_ref() == Some(&path) {
                    self.preview_scroll = mark.saturating_sub(self.preview_height / 2);
                    return;
                }
                self.preview = None;
                self.preview_path = Some(path.clone());
                preview::spawn(path, self.highlight_limit, self.sink.clone());
            }
            None => self.clear_preview(),
        }
    }

    fn clear_preview(&mut self) {
        self.preview = None;
        self.preview_path = None;
        self.preview_mark = None;
        self.preview_scroll = 0;
        self.preview_hscroll = 0;
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.orchestrator.root().join(path)
        }
    }

    fn scroll_preview(&mut self, delta: isize) {
        let Some(preview) = &self.preview else {
            return;
        };
        let max = preview.lines.len().saturating_sub(1) as isize;
        self.preview_scroll = (self.preview_scroll as isize + delta).clamp(0, max) as usize;
    }

    fn edit_request(&self) -> Outcome {
        match self.results.get(self.selected) {
            Some(result) if !result.is_error => Outcome::Edit {
                path: self.absolute(&result.file_path),
                line: Some(result.line_number.max(1)),
            },
            _ => Outcome::Stay,
        }
    }

    pub fn status_line(&self) -> String {
        let options = self.orchestrator.options();
        let on_off = |flag: bool| if flag { "on" } else { "off" };
        format!(
            "Ignore case: {}  Regex: {}  Driver: {}  Esc: back",
            on_off(options.ignore_case),
            on_off(options.use_regex),
            self.orchestrator.driver_name()
        )
    }

    pub fn draw(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::horizontal([
            Constraint::Length(self.left_width.min(area.width.saturating_sub(10))),
            Constraint::Min(10),
        ])
        .split(area);
        let left = Layout::vertical([Constraint::Length(3), Constraint::Min(3)]).split(chunks[0]);

        let input_style = if self.editing {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let mut query = vec![Span::raw(self.input.clone())];
        if self.editing {
            query.push(Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)));
        }
        let input = Paragraph::new(Line::from(query)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Search ")
                .border_style(input_style),
        );
        frame.render_widget(input, left[0]);

        self.draw_results(frame, left[1]);
        self.draw_preview(frame, chunks[1]);
    }

    fn draw_results(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(results_title(&self.orchestrator.query(), self.results.len()))
            .border_style(Style::default().fg(Color::DarkGray));
        let height = block.inner(area).height as usize;

        if self.selected < self.list_scroll {
            self.list_scroll = self.selected;
        } else if height > 0 && self.selected >= self.list_scroll + height {
            self.list_scroll = self.selected + 1 - height;
        }

        let root = self.orchestrator.root().to_path_buf();
        let lines: Vec<Line> = self
            .results
            .results()
            .iter()
            .enumerate()
            .skip(self.list_scroll)
            .take(height)
            .map(|(index, result)| {
                let mut line = result_line(result, &root);
                if index == self.selected && !self.editing {
                    line = line.style(Style::default().add_modifier(Modifier::REVERSED));
                }
                line
            })
            .collect();

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_preview(&mut self, frame: &mut Frame, area: Rect) {
        let title = match &self.preview {
            Some(preview) => format!(" {} ", preview.title),
            None => " Preview ".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::DarkGray));
        self.preview_height = block.inner(area).height as usize;

        let lines = match &self.preview {
            Some(preview) => preview_lines(
                preview,
                self.preview_scroll,
                self.preview_height,
                self.preview_hscroll,
                self.preview_mark,
            ),
            None => Vec::new(),
        };
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }
}

fn results_title(query: &str, count: usize) -> String {
    if query.is_empty() {
        format!(" Results ({}) ", count)
    } else {
        format!(" Results for '{}' ({}) ", query, count)
    }
}

fn result_line(result: &SearchResult, root: &Path) -> Line<'static> {
    if result.is_error {
        return Line::from(Span::styled(
            result.matched_line.clone(),
            Style::default().fg(Color::Red),
        ));
    }
    let shown = result.file_path.strip_prefix(root).unwrap_or(&result.file_path);
    Line::from(vec![
        Span::styled(shown.display().to_string(), Style::default().fg(Color::Cyan)),
        Span::styled(format!(":{}: ", result.line_number), Style::default().fg(Color::DarkGray)),
        Span::raw(result.matched_line.trim().to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{driver_for, SearchOptions};
    use std::collections::HashMap;

    fn view() -> SearchView {
        let (sink, _rx) = Sink::channel();
        let orchestrator = Arc::new(Orchestrator::new(
            driver_for("rg"),
            PathBuf::from("/r"),
            SearchOptions::default(),
            sink.clone(),
        ));
        SearchView::new(orchestrator, sink, 1000)
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_input_typing_and_toggles() {
        let keymap = Keymap::build("search", DEFAULT_KEYS, &HashMap::new(), HANDLERS).unwrap();
        let mut view = view();
        view.focus_input();

        // `s` is bound to SearchNextItem, but the input has focus.
        for c in "fn s".chars() {
            view.handle_input_key(key(KeyCode::Char(c), KeyModifiers::NONE), &keymap);
        }
        view.handle_input_key(key(KeyCode::Backspace, KeyModifiers::NONE), &keymap);
        assert_eq!(view.input, "fn ");

        view.handle_input_key(key(KeyCode::Char('r'), KeyModifiers::CONTROL), &keymap);
        view.handle_input_key(key(KeyCode::Tab, KeyModifiers::NONE), &keymap);
        let options = view.orchestrator.options();
        assert!(options.use_regex);
        assert!(!options.ignore_case);
        assert!(view.status_line().contains("Regex: on"));
    }

    #[test]
    fn test_results_title_names_query() {
        assert_eq!(results_title("", 0), " Results (0) ");
        assert_eq!(results_title("fn main", 3), " Results for 'fn main' (3) ");
    }

    #[test]
    fn test_esc_on_empty_input_leaves_view() {
        let keymap = Keymap::build("search", DEFAULT_KEYS, &HashMap::new(), HANDLERS).unwrap();
        let mut view = view();
        view.focus_input();
        let outcome = view.handle_input_key(key(KeyCode::Esc, KeyModifiers::NONE), &keymap);
        assert_eq!(outcome, Outcome::Show(View::Files));
        assert!(!view.is_editing());
    }

    #[test]
    fn test_edit_targets_selected_result() {
        let mut view = view();
        view.results.apply(SearchUpdate::Appended {
            generation: 0,
            results: vec![
                SearchResult {
                    file_path: PathBuf::from("src/lib.rs"),
                    line_number: 7,
                    matched_line: "pub fn run()".to_string(),
                    is_error: false,
                },
                SearchResult::error("rg: bad flag"),
            ],
        });

        assert_eq!(
            view.dispatch(SearchAction::Edit),
            Outcome::Edit {
                path: PathBuf::from("/r/src/lib.rs"),
                line: Some(7),
            }
        );
        view.selected = 1;
        assert_eq!(view.dispatch(SearchAction::Edit), Outcome::Stay);
    }
}
