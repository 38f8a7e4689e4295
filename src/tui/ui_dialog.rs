//! Modal dialogs: close confirmation, errors, new subject.

use ratatui::{
    Frame,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use super::app::{App, NewSubjectState};
use super::ui_helpers::help_item;

/// Centered rectangle clipped to the screen.
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.width.saturating_sub(width) / 2,
        y: area.height.saturating_sub(height) / 2,
        width,
        height,
    }
}

fn dialog_block(title: &str, color: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .title_style(Style::default().fg(color).add_modifier(Modifier::BOLD))
        .border_style(Style::default().fg(color))
        .style(Style::default().bg(Color::Black))
}

pub fn render_close_confirmation(frame: &mut Frame, app: &App) {
    let area = centered(frame.area(), 56, 8);
    let tab_name = app
        .close_confirmation
        .as_ref()
        .and_then(|conf| app.tabs.get(conf.tab_index))
        .map(|tab| tab.title.as_str())
        .unwrap_or("Unknown");

    let mut answers = help_item("Y", "Kill and close");
    answers.extend(help_item("N", "Keep running"));
    let lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled(tab_name, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw(" is still running."),
        ]),
        Line::from(Span::styled(
            "Its processes will be killed; prefer Esc to stop cleanly.",
            Style::default().fg(Color::Yellow),
        )),
        Line::from(""),
        Line::from(answers),
    ];

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(dialog_block(" Confirm Close ", Color::Yellow)),
        area,
    );
}

pub fn render_error(frame: &mut Frame, message: &str) {
    let area = centered(frame.area(), 70, 10);
    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(message.to_string(), Style::default().fg(Color::White))),
        Line::from(""),
        Line::from(help_item("Enter/Esc", "Dismiss")),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(dialog_block(" Error ", Color::Red)),
        area,
    );
}

pub fn render_new_subject(frame: &mut Frame, dialog: &NewSubjectState) {
    let area = centered(frame.area(), 60, 9);
    let protocol = dialog.protocol().unwrap_or("-");

    let mut keys = help_item("Left/Right", "Protocol");
    keys.extend(help_item("Enter", "Create"));
    keys.extend(help_item("Esc", "Cancel"));
    let lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("Subject:  ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("[{}|]", dialog.name),
                Style::default().fg(Color::Yellow).bg(Color::DarkGray),
            ),
        ]),
        Line::from(vec![
            Span::styled("Protocol: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("< {} >", protocol), Style::default().fg(Color::Cyan)),
            Span::styled(
                format!(" ({}/{})", dialog.protocol_idx + 1, dialog.protocols.len()),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        Line::from(Span::styled(
            format!("Folder: {}-{}", dialog.name.trim(), protocol),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(""),
        Line::from(keys),
    ];

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines).block(dialog_block(" New Subject ", Color::Cyan)),
        area,
    );
}
