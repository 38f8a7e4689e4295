//! File browser overlay.

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};

use super::file_browser::{BrowseTarget, FileBrowserState};
use super::ui_helpers::help_item;

pub fn render_file_browser(frame: &mut Frame, browser: &FileBrowserState) {
    let area = frame.area();
    let width = (area.width * 4 / 5).clamp(40, 90).min(area.width);
    let height = (area.height * 4 / 5).clamp(10, 30).min(area.height);
    let dialog_area = Rect {
        x: area.width.saturating_sub(width) / 2,
        y: area.height.saturating_sub(height) / 2,
        width,
        height,
    };
    frame.render_widget(Clear, dialog_area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3), Constraint::Length(2)])
        .split(dialog_area);

    let title = match (browser.target, browser.select_dir) {
        (BrowseTarget::SubjectDir, _) => " Subject Folder ",
        (_, true) => " Select Directory ",
        (_, false) => " Select File ",
    };
    let frame_style = Style::default().fg(Color::Cyan);
    let background = Style::default().bg(Color::Black);

    let path = Paragraph::new(browser.current_dir.to_string_lossy().to_string()).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .title_style(frame_style.add_modifier(Modifier::BOLD))
            .border_style(frame_style)
            .style(background),
    );
    frame.render_widget(path, chunks[0]);

    let list_block = Block::default()
        .borders(Borders::ALL)
        .border_style(frame_style)
        .style(background);

    if let Some(ref error) = browser.error {
        let error = Paragraph::new(error.as_str())
            .style(Style::default().fg(Color::Red))
            .block(list_block);
        frame.render_widget(error, chunks[1]);
    } else {
        let rows = chunks[1].height.saturating_sub(2) as usize;
        let items: Vec<ListItem> = browser
            .entries
            .iter()
            .enumerate()
            .skip(browser.scroll_offset)
            .take(rows)
            .map(|(i, entry)| {
                let selected = i == browser.selected_index;
                let name_style = match (selected, entry.is_dir, entry.has_configs) {
                    (true, _, _) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    (false, true, true) => Style::default().fg(Color::Green),
                    (false, true, false) => Style::default().fg(Color::Cyan),
                    (false, false, _) => Style::default().fg(Color::White),
                };
                let name = if entry.is_dir {
                    format!("{}/", entry.name)
                } else {
                    entry.name.clone()
                };
                let mut spans = vec![
                    Span::styled(if selected { "> " } else { "  " }, Style::default().fg(Color::Yellow)),
                    Span::styled(name, name_style),
                ];
                if entry.has_configs {
                    spans.push(Span::styled("  (configs)", Style::default().fg(Color::DarkGray)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();
        frame.render_widget(List::new(items).block(list_block), chunks[1]);
    }

    let mut help = vec![Span::raw(" ")];
    help.extend(help_item("Up/Dn", "Navigate"));
    if browser.select_dir {
        help.extend(help_item("Enter", "Open"));
        help.extend(help_item("Space", "Select this folder"));
    } else {
        help.extend(help_item("Enter", "Select/Open"));
    }
    help.extend(help_item("Backspace", "Up"));
    help.extend(help_item("Esc", "Cancel"));
    let help = Paragraph::new(Line::from(help))
        .style(background)
        .alignment(Alignment::Center);
    frame.render_widget(help, chunks[2]);
}
