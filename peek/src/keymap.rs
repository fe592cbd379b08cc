//! Per-view key bindings.
//!
//! A binding maps a key to a handler name. Defaults and the user's
//! `[keymap.<view>]` table are merged, then every name is resolved against the
//! view's static handler table, so a typo fails at startup rather than on
//! the first key press.

use std::collections::HashMap;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::error::KeymapError;

pub struct Keymap<A> {
    bindings: Vec<(String, String)>,
    named: HashMap<(KeyCode, KeyModifiers), A>,
    runes: HashMap<char, A>,
}

/// A key spelling resolved to what the terminal actually reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Rune(char),
    Named(KeyCode, KeyModifiers),
}

impl<A: Copy> Keymap<A> {
    /// Merges `defaults` with `overrides`. Entries are merged on the key they
    /// resolve to, so `"ESC"` in the overrides replaces a default `"Esc"`.
    pub fn build(
        view: &str,
        defaults: &[(&str, &str)],
        overrides: &HashMap<String, String>,
        handlers: &[(&'static str, A)],
    ) -> Result<Self, KeymapError> {
        let mut overrides: Vec<(&str, &str)> = overrides
            .iter()
            .map(|(key, name)| (key.as_str(), name.as_str()))
            .collect();
        overrides.sort();

        let mut merged: HashMap<Key, (String, String, A)> = HashMap::new();
        for (key, name) in defaults.iter().copied().chain(overrides) {
            let action = lookup_handler(view, name, handlers)?;
            let resolved = resolve_key(view, key)?;
            merged.insert(resolved, (key.to_string(), name.to_string(), action));
        }

        let mut bindings = Vec::with_capacity(merged.len());
        let mut named = HashMap::new();
        let mut runes = HashMap::new();
        for (resolved, (key, name, action)) in merged {
            match resolved {
                Key::Rune(c) => {
                    runes.insert(c, action);
                }
                Key::Named(code, modifiers) => {
                    named.insert((code, modifiers), action);
                }
            }
            bindings.push((key, name));
        }
        bindings.sort();

        Ok(Self {
            bindings,
            named,
            runes,
        })
    }

    /// Named keys win over runes. `None` lets the event fall through to
    /// whatever widget has focus.
    pub fn resolve(&self, event: &KeyEvent) -> Option<A> {
        let plain = event.modifiers.difference(KeyModifiers::SHIFT);
        if let Some(action) = self
            .named
            .get(&(event.code, event.modifiers))
            .or_else(|| self.named.get(&(event.code, plain)))
        {
            return Some(*action);
        }
        match event.code {
            KeyCode::Char(c) if !plain.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                self.runes.get(&c).copied()
            }
            _ => None,
        }
    }

    /// Effective `(key, handler)` pairs, sorted by key. A key overridden
    /// under another spelling appears once, with the winning handler.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings
            .iter()
            .map(|(key, name)| (key.as_str(), name.as_str()))
    }
}

fn lookup_handler<A: Copy>(
    view: &str,
    name: &str,
    handlers: &[(&'static str, A)],
) -> Result<A, KeymapError> {
    if let Some((_, action)) = handlers.iter().find(|(handler, _)| *handler == name) {
        return Ok(*action);
    }
    let mut available: Vec<String> = handlers.iter().map(|(handler, _)| handler.to_string()).collect();
    available.sort();
    Err(KeymapError::UnknownHandler {
        view: view.to_string(),
        name: name.to_string(),
        available,
    })
}

/// Single characters bind that character; anything longer is a key name.
fn resolve_key(view: &str, key: &str) -> Result<Key, KeymapError> {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(Key::Rune(c));
    }
    match parse_key_name(key) {
        Some((code, modifiers)) => Ok(Key::Named(code, modifiers)),
        None => Err(KeymapError::UnknownKey {
            view: view.to_string(),
            key: key.to_string(),
            available: key_names(),
        }),
    }
}

fn parse_key_name(name: &str) -> Option<(KeyCode, KeyModifiers)> {
    let lower = name.to_lowercase();
    let none = KeyModifiers::NONE;
    let code = match lower.as_str() {
        "enter" => (KeyCode::Enter, none),
        "esc" => (KeyCode::Esc, none),
        "tab" => (KeyCode::Tab, none),
        "backtab" => (KeyCode::BackTab, none),
        "backspace" => (KeyCode::Backspace, none),
        "delete" => (KeyCode::Delete, none),
        "insert" => (KeyCode::Insert, none),
        "home" => (KeyCode::Home, none),
        "end" => (KeyCode::End, none),
        "pgup" => (KeyCode::PageUp, none),
        "pgdn" => (KeyCode::PageDown, none),
        "up" => (KeyCode::Up, none),
        "down" => (KeyCode::Down, none),
        "left" => (KeyCode::Left, none),
        "right" => (KeyCode::Right, none),
        // Terminals send these as Tab and Enter.
        "ctrl-i" => (KeyCode::Tab, none),
        "ctrl-m" => (KeyCode::Enter, none),
        "ctrl-space" => (KeyCode::Char(' '), KeyModifiers::CONTROL),
        other => {
            if let Some(n) = other.strip_prefix('f') {
                let n: u8 = n.parse().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                (KeyCode::F(n), none)
            } else if let Some(letter) = other.strip_prefix("ctrl-") {
                let mut chars = letter.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_lowercase() => {
                        (KeyCode::Char(c), KeyModifiers::CONTROL)
                    }
                    _ => return None,
                }
            } else {
                return None;
            }
        }
    };
    Some(code)
}

/// Every accepted key name, sorted.
fn key_names() -> Vec<String> {
    let mut names: Vec<String> = [
        "enter",
        "esc",
        "tab",
        "backtab",
        "backspace",
        "delete",
        "insert",
        "home",
        "end",
        "pgup",
        "pgdn",
        "up",
        "down",
        "left",
        "right",
        "ctrl-space",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();
    names.extend((1..=12).map(|n| format!("f{}", n)));
    names.extend(('a'..='z').map(|c| format!("ctrl-{}", c)));
    names.sort();
    names
}
