//! Tab bar.

use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use super::app::App;
use super::ui_helpers::{help_item, render_tab_item};

pub fn render_tab_bar(frame: &mut Frame, area: Rect, app: &App) {
    let menu_style = if app.is_in_menu() {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let mut spans = vec![Span::raw(" "), Span::styled("[=] Menu", menu_style), Span::raw(" ")];
    for (i, tab) in app.tabs.iter().enumerate() {
        spans.extend(render_tab_item(tab.mode, &tab.title, Some(i) == app.active_tab_index));
    }

    let mut hints = help_item("Tab", "Next");
    hints.extend(help_item("Shift+Tab", "Previous"));
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" BCI Launcher ")
        .title_bottom(Line::from(hints))
        .border_style(Style::default().fg(Color::White));

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}
