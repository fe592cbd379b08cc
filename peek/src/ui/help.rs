use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use super::{Keymaps, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpAction {
    Close,
    ScrollDown,
    ScrollUp,
}

pub const HANDLERS: &[(&str, HelpAction)] = &[
    ("HelpClose", HelpAction::Close),
    ("HelpScrollDown", HelpAction::ScrollDown),
    ("HelpScrollUp", HelpAction::ScrollUp),
];

pub const DEFAULT_KEYS: &[(&str, &str)] = &[
    ("Esc", "HelpClose"),
    ("Enter", "HelpClose"),
    ("j", "HelpScrollDown"),
    ("k", "HelpScrollUp"),
];

/// Overlay listing the effective bindings of every view.
pub struct HelpView {
    lines: Vec<Line<'static>>,
    scroll: usize,
}

impl HelpView {
    pub fn new(keymaps: &Keymaps) -> Self {
        let sections = [
            ("Files", keymaps.files.bindings().collect::<Vec<_>>()),
            ("Search", keymaps.search.bindings().collect()),
            ("Help", keymaps.help.bindings().collect()),
        ];

        let mut lines = Vec::new();
        for (title, bindings) in sections {
            if !lines.is_empty() {
                lines.push(Line::default());
            }
            lines.push(Line::from(Span::styled(
                title,
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )));
            for (key, handler) in bindings {
                let key = if key == " " { "Space" } else { key };
                lines.push(Line::from(vec![
                    Span::styled(format!("  {:<10}", key), Style::default().fg(Color::Yellow)),
                    Span::raw(handler.to_string()),
                ]));
            }
        }

        Self { lines, scroll: 0 }
    }

    pub fn dispatch(&mut self, action: HelpAction) -> Outcome {
        match action {
            HelpAction::Close => return Outcome::Back,
            HelpAction::ScrollDown => {
                self.scroll = (self.scroll + 1).min(self.lines.len().saturating_sub(1));
            }
            HelpAction::ScrollUp => self.scroll = self.scroll.saturating_sub(1),
        }
        Outcome::Stay
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let vertical = Layout::vertical([
            Constraint::Percentage(10),
            Constraint::Percentage(80),
            Constraint::Percentage(10),
        ])
        .split(area);
        let popup = Layout::horizontal([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(vertical[1])[1];

        let help = Paragraph::new(self.lines[self.scroll..].to_vec()).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Key bindings ")
                .border_style(Style::default().fg(Color::Cyan)),
        );
        frame.render_widget(Clear, popup);
        frame.render_widget(help, popup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeymapConfig;

    #[test]
    fn test_lists_overridden_bindings() {
        let mut config = KeymapConfig::default();
        config.files.insert("x".to_string(), "FilesQuit".to_string());
        let keymaps = Keymaps::build(&config).unwrap();
        let help = HelpView::new(&keymaps);

        let text: Vec<String> = help
            .lines
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect();
        assert!(text.iter().any(|line| line.trim_start().starts_with("x") && line.ends_with("FilesQuit")));
        assert!(text.iter().any(|line| line.contains("Space") && line.ends_with("FilesScrollPageDown")));
        assert!(text.contains(&"Search".to_string()));
    }

    #[test]
    fn test_close_and_scroll() {
        let keymaps = Keymaps::build(&KeymapConfig::default()).unwrap();
        let mut help = HelpView::new(&keymaps);
        help.dispatch(HelpAction::ScrollUp);
        assert_eq!(help.scroll, 0);
        help.dispatch(HelpAction::ScrollDown);
        assert_eq!(help.scroll, 1);
        assert_eq!(help.dispatch(HelpAction::Close), Outcome::Back);
    }
}
