//! Terminal event polling and key predicates.

use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What the main loop reacts to.
#[derive(Debug)]
pub enum Event {
    /// Key press (repeats and releases are dropped)
    Key(KeyEvent),
    /// Nothing happened within the tick; time to drain child output
    Tick,
    /// New terminal size; forces a full redraw
    Resize(u16, u16),
}

/// Polls crossterm with a fixed tick.
pub struct EventHandler {
    tick_rate: Duration,
}

impl EventHandler {
    /// `tick_rate` bounds how stale child output can get on screen.
    pub fn new(tick_rate: Duration) -> Self {
        Self { tick_rate }
    }

    /// Wait up to one tick for the next event.
    pub fn next(&self) -> Result<Event> {
        if !event::poll(self.tick_rate)? {
            return Ok(Event::Tick);
        }
        Ok(match event::read()? {
            // key repeats and releases are ignored
            CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Event::Key(key),
            CrosstermEvent::Resize(w, h) => Event::Resize(w, h),
            _ => Event::Tick,
        })
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

fn ctrl(key: &KeyEvent, c: char) -> bool {
    key.code == KeyCode::Char(c) && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Ctrl+C: close a running tab (after confirmation) or leave the menu.
pub fn is_ctrl_c(key: &KeyEvent) -> bool {
    ctrl(key, 'c')
}

/// Ctrl+S: save the form's config under a timestamped name.
pub fn is_ctrl_s(key: &KeyEvent) -> bool {
    ctrl(key, 's')
}

/// Escape: stop a run or dismiss a dialog.
pub fn is_esc(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc
}

/// Enter: confirm or pick the highlighted entry.
pub fn is_enter(key: &KeyEvent) -> bool {
    key.code == KeyCode::Enter
}

/// Up arrow.
pub fn is_up(key: &KeyEvent) -> bool {
    key.code == KeyCode::Up
}

/// Down arrow.
pub fn is_down(key: &KeyEvent) -> bool {
    key.code == KeyCode::Down
}

/// Left arrow: cursor left, or previous protocol in the new-subject dialog.
pub fn is_left(key: &KeyEvent) -> bool {
    key.code == KeyCode::Left
}

/// Right arrow: cursor right, or next protocol in the new-subject dialog.
pub fn is_right(key: &KeyEvent) -> bool {
    key.code == KeyCode::Right
}

/// Page Up: scroll output or the browser by half a screen.
pub fn is_page_up(key: &KeyEvent) -> bool {
    key.code == KeyCode::PageUp
}

/// Page Down.
pub fn is_page_down(key: &KeyEvent) -> bool {
    key.code == KeyCode::PageDown
}

/// Home: cursor to the start of the field.
pub fn is_home(key: &KeyEvent) -> bool {
    key.code == KeyCode::Home
}

/// End: cursor to the end of the field.
pub fn is_end(key: &KeyEvent) -> bool {
    key.code == KeyCode::End
}

/// Tab without Shift: next tab.
pub fn is_tab(key: &KeyEvent) -> bool {
    key.code == KeyCode::Tab && !key.modifiers.contains(KeyModifiers::SHIFT)
}

/// Shift+Tab arrives as BackTab on most terminals.
pub fn is_shift_tab(key: &KeyEvent) -> bool {
    key.code == KeyCode::BackTab || (key.code == KeyCode::Tab && key.modifiers.contains(KeyModifiers::SHIFT))
}

/// Backspace: delete left, or go to the parent folder in the browser.
pub fn is_backspace(key: &KeyEvent) -> bool {
    key.code == KeyCode::Backspace
}

/// Delete: delete under the cursor.
pub fn is_delete(key: &KeyEvent) -> bool {
    key.code == KeyCode::Delete
}

/// Space: toggles or cycles non-text fields.
pub fn is_space(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char(' ')
}

/// Plain character without Ctrl/Alt.
pub fn typed_char(key: &KeyEvent) -> Option<char> {
    match key.code {
        KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => Some(c),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_chords_are_not_typed() {
        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        assert!(is_ctrl_s(&save));
        assert_eq!(typed_char(&save), None);

        let upper = KeyEvent::new(KeyCode::Char('S'), KeyModifiers::SHIFT);
        assert_eq!(typed_char(&upper), Some('S'));
        assert!(!is_ctrl_s(&upper));
    }
}
