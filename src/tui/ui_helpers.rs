//! Small rendering helpers shared by the views.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;

use bci_launcher::state::RunState;

use super::tab::TabMode;

/// Longest tab title shown before it is cut.
pub const MAX_TAB_TITLE_LEN: usize = 22;

/// Rows needed to show `text_len` characters wrapped in a bordered box.
/// Returns `(lines, height)`, the height counting both borders.
pub fn calculate_command_height(text_len: usize, available_width: u16) -> (u16, u16) {
    let inner_width = available_width.saturating_sub(2) as usize;
    let lines = if inner_width > 0 {
        text_len.div_ceil(inner_width).max(1) as u16
    } else {
        1
    };
    (lines, lines + 2)
}

/// Cut to `max_len` characters, ending in `...`.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

/// Marker and colour of a tab in the tab bar.
pub fn tab_status_indicator(mode: TabMode) -> (&'static str, Color) {
    match mode {
        TabMode::Configure => ("[*]", Color::Cyan),
        TabMode::Running => ("[>]", Color::Green),
        TabMode::Completed => ("[x]", Color::Yellow),
    }
}

/// `name state` span for the record/protocol flags of a running tab,
/// coloured by the flag value.
pub fn run_state_span(name: &str, state: RunState) -> Span<'static> {
    let color = match state {
        RunState::Stopped => Color::DarkGray,
        RunState::Started => Color::Green,
        RunState::Waiting => Color::Yellow,
    };
    Span::styled(format!("{} {} ", name, state.label()), Style::default().fg(color))
}

/// `[Key] Action  `
pub fn help_item(key: &str, action: &str) -> Vec<Span<'static>> {
    vec![
        Span::styled("[", Style::default().fg(Color::DarkGray)),
        Span::styled(key.to_string(), Style::default().fg(Color::Cyan)),
        Span::styled(format!("] {} ", action), Style::default().fg(Color::DarkGray)),
    ]
}

/// Same as [`help_item`] with the key in green, for the main action.
pub fn help_item_primary(key: &str, action: &str) -> Vec<Span<'static>> {
    vec![
        Span::styled("[", Style::default().fg(Color::DarkGray)),
        Span::styled(key.to_string(), Style::default().fg(Color::Green)),
        Span::styled(format!("] {} ", action), Style::default().fg(Color::DarkGray)),
    ]
}

/// One entry of the tab bar.
/// Returns spans for ` | [status title]` when active and ` |  status title ` otherwise.
pub fn render_tab_item(mode: TabMode, title: &str, is_active: bool) -> Vec<Span<'static>> {
    let (status, status_color) = tab_status_indicator(mode);
    let title = truncate_with_ellipsis(title, MAX_TAB_TITLE_LEN);
    let (title_style, open, close) = if is_active {
        let style = Style::default().fg(Color::Yellow);
        (style.add_modifier(Modifier::BOLD), Span::styled("[", style), Span::styled("]", style))
    } else {
        (Style::default().fg(Color::Gray), Span::raw(" "), Span::raw(" "))
    };

    vec![
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        open,
        Span::styled(status, Style::default().fg(status_color)),
        Span::raw(" "),
        Span::styled(title, title_style),
        close,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_with_ellipsis("Offline S01-mi", 40), "Offline S01-mi");
        assert_eq!(truncate_with_ellipsis("Électrodes frontales", 8), "Élect...");
    }

    #[test]
    fn command_box_grows_with_text() {
        assert_eq!(calculate_command_height(0, 42), (1, 3));
        assert_eq!(calculate_command_height(81, 42), (3, 5));
    }
}
