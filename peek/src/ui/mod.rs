//! Views and the application state the event loop drives.

mod files;
mod help;
mod search;
pub mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use crossterm::event::KeyEvent;
use ratatui::{
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tracing::debug;

use crate::config::KeymapConfig;
use crate::error::KeymapError;
use crate::keymap::Keymap;
use crate::preview::{Preview, PreviewKind};
use crate::search::Orchestrator;
use crate::sink::{Sink, Update};
use crate::tree::Loader;

pub use files::FilesAction;
pub use help::HelpAction;
pub use search::SearchAction;

use files::FilesView;
use help::HelpView;
use search::SearchView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Files,
    Search,
    Help,
}

/// What a handler asks the application to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Stay,
    Quit,
    Show(View),
    /// Leave the help overlay.
    Back,
    Edit { path: PathBuf, line: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub path: PathBuf,
    pub line: Option<u64>,
}

pub struct Keymaps {
    pub files: Keymap<FilesAction>,
    pub search: Keymap<SearchAction>,
    pub help: Keymap<HelpAction>,
}

impl Keymaps {
    pub fn build(config: &KeymapConfig) -> Result<Self, KeymapError> {
        Ok(Self {
            files: Keymap::build("files", files::DEFAULT_KEYS, &config.files, files::HANDLERS)?,
            search: Keymap::build("search", search::DEFAULT_KEYS, &config.search, search::HANDLERS)?,
            help: Keymap::build("help", help::DEFAULT_KEYS, &config.help, help::HANDLERS)?,
        })
    }
}

pub struct App {
    view: View,
    return_to: View,
    keymaps: Keymaps,
    files: FilesView,
    search: SearchView,
    help: HelpView,
    root: PathBuf,
    quit: bool,
    edit: Option<EditRequest>,
}

impl App {
    pub fn new(
        root: PathBuf,
        loader: Loader,
        orchestrator: Arc<Orchestrator>,
        keymaps: Keymaps,
        highlight_limit: u64,
        sink: Sink,
    ) -> Self {
        let help = HelpView::new(&keymaps);
        Self {
            view: View::Files,
            return_to: View::Files,
            files: FilesView::new(&root, loader, sink.clone(), highlight_limit),
            search: SearchView::new(orchestrator, sink, highlight_limit),
            help,
            keymaps,
            root,
            quit: false,
            edit: None,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn take_edit_request(&mut self) -> Option<EditRequest> {
        self.edit.take()
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        let outcome = match self.view {
            View::Files => {
                if self.files.is_finding() {
                    self.files.handle_find_key(key);
                    Outcome::Stay
                } else if let Some(action) = self.keymaps.files.resolve(&key) {
                    debug!(?action, "files");
                    self.files.dispatch(action)
                } else {
                    self.files.handle_unbound(key);
                    Outcome::Stay
                }
            }
            View::Search => {
                if self.search.is_editing() {
                    self.search.handle_input_key(key, &self.keymaps.search)
                } else if let Some(action) = self.keymaps.search.resolve(&key) {
                    debug!(?action, "search");
                    self.search.dispatch(action)
                } else {
                    Outcome::Stay
                }
            }
            View::Help => match self.keymaps.help.resolve(&key) {
                Some(action) => self.help.dispatch(action),
                None => Outcome::Stay,
            },
        };
        self.follow(outcome);
    }

    fn follow(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Stay => {}
            Outcome::Quit => self.quit = true,
            Outcome::Show(View::Help) => {
                self.return_to = self.view;
                self.view = View::Help;
            }
            Outcome::Show(View::Search) => {
                self.search.focus_input();
                self.view = View::Search;
            }
            Outcome::Show(View::Files) => self.view = View::Files,
            Outcome::Back => self.view = self.return_to,
            Outcome::Edit { path, line } => self.edit = Some(EditRequest { path, line }),
        }
    }

    /// Applies one background update. Returns true when the screen changed.
    pub fn apply(&mut self, update: Update) -> bool {
        match update {
            Update::Tree(update) => self.files.apply_tree(update),
            Update::Search(update) => self.search.apply_results(update),
            Update::Preview(preview) => {
                let files = self.files.apply_preview(&preview);
                let search = self.search.apply_preview(&preview);
                files || search
            }
            Update::FileChanged(path) => {
                self.files.file_changed(&path);
                self.search.file_changed(&path);
                false
            }
        }
    }

    pub fn draw(&mut self, frame: &mut Frame) {
        let chunks = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).split(frame.area());

        let underlying = if self.view == View::Help { self.return_to } else { self.view };
        match underlying {
            View::Search => self.search.draw(frame, chunks[0]),
            _ => self.files.draw(frame, chunks[0]),
        }
        if self.view == View::Help {
            self.help.draw(frame, chunks[0]);
        }

        let hint = match self.view {
            View::Files => "?: help  S: search  f: find  q: quit".to_string(),
            View::Search => self.search.status_line(),
            View::Help => "Esc: close".to_string(),
        };
        let footer = Paragraph::new(Line::from(vec![
            Span::styled(
                format!(" {} ", self.root.display()),
                Style::default().fg(Color::Black).bg(Color::Cyan),
            ),
            Span::raw(" "),
            Span::styled(hint, Style::default().fg(Color::DarkGray)),
        ]));
        frame.render_widget(footer, chunks[1]);
    }
}

/// Renders `height` lines of `preview` starting at `top`, shifted left by
/// `hscroll` columns. Line `mark` (0-based) is highlighted.
fn preview_lines(
    preview: &Preview,
    top: usize,
    height: usize,
    hscroll: usize,
    mark: Option<usize>,
) -> Vec<Line<'static>> {
    let width = preview.lines.len().max(1).to_string().len();
    let text_style = match preview.kind {
        PreviewKind::Error(_) => Style::default().fg(Color::Red),
        PreviewKind::Binary => Style::default().fg(Color::DarkGray),
        _ => Style::default(),
    };

    preview
        .lines
        .iter()
        .enumerate()
        .skip(top)
        .take(height)
        .map(|(index, text)| {
            let shown: String = text.chars().skip(hscroll).collect();
            let style = if mark == Some(index) {
                text_style.fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                text_style
            };
            Line::from(vec![
                Span::styled(
                    format!("{:>width$} ", index + 1, width = width),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(shown, style),
            ])
        })
        .collect()
}
