//! Configuration form view.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};

use bci_launcher::config::ParamGroup;

use super::form::{FieldType, FormField, FormState};
use super::ui_helpers::{calculate_command_height, help_item, help_item_primary, truncate_with_ellipsis};

const LABEL_WIDTH: u16 = 22;

pub fn render_configure_form(frame: &mut Frame, area: Rect, form: &FormState, subject_file: &str) {
    let help_text = form
        .active_field()
        .map(|f| if f.help.is_empty() { f.name.clone() } else { format!("{}: {}", f.name, f.help) })
        .unwrap_or_else(|| "Validate the parameters and start the run".to_string());
    let (_, help_height) = calculate_command_height(help_text.len(), area.width);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(help_height),
            Constraint::Length(2),
        ])
        .split(area);

    let title = Paragraph::new(Line::from(vec![
        Span::styled(&form.title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {}", subject_file), Style::default().fg(Color::DarkGray)),
    ]))
    .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));
    frame.render_widget(title, chunks[0]);

    render_form_fields(frame, form, chunks[1]);

    let help = Paragraph::new(help_text)
        .style(Style::default().fg(Color::Gray))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help ")
                .border_style(Style::default().fg(Color::Green)),
        );
    frame.render_widget(help, chunks[2]);

    let status = if let Some(ref err) = form.error_message {
        Line::from(vec![
            Span::styled(" Error: ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled(err.as_str(), Style::default().fg(Color::Red)),
        ])
    } else if let Some(ref info) = form.info_message {
        Line::from(Span::styled(format!(" {}", info), Style::default().fg(Color::Green)))
    } else {
        let mut spans = vec![Span::raw(" ")];
        spans.extend(help_item_primary("Enter on Run", "Start"));
        spans.extend(help_item("Up/Dn", "Navigate"));
        spans.extend(help_item("Ctrl+S", "Save copy"));
        spans.extend(help_item("Esc", "Close"));
        Line::from(spans)
    };
    frame.render_widget(Paragraph::new(status), chunks[3]);
}

fn render_form_fields(frame: &mut Frame, form: &FormState, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Parameters ")
        .border_style(Style::default().fg(Color::White));
    frame.render_widget(block, area);
    let inner = area.inner(Margin { vertical: 1, horizontal: 1 });

    // the Run button takes the last row
    let rows = inner.height.saturating_sub(1) as usize;
    let total = form.fields.len();
    let scroll_offset = if rows == 0 {
        0
    } else if form.active_field_idx.min(total.saturating_sub(1)) >= form.scroll_offset + rows {
        form.active_field_idx.min(total.saturating_sub(1)) + 1 - rows
    } else {
        form.scroll_offset.min(form.active_field_idx)
    };

    for (i, field) in form.fields.iter().enumerate().skip(scroll_offset).take(rows) {
        let y = inner.y + (i - scroll_offset) as u16;
        render_field(frame, field, Rect { y, height: 1, ..inner }, i == form.active_field_idx);
    }

    let run_style = if form.is_run_button_focused() {
        Style::default().fg(Color::Black).bg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Green)
    };
    let run_row = Rect {
        y: inner.y + inner.height.saturating_sub(1),
        height: 1,
        ..inner
    };
    frame.render_widget(Paragraph::new(Span::styled("  [ Run ]  ", run_style)), run_row);

    if total > rows {
        let mut state = ScrollbarState::new(total).position(scroll_offset);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area.inner(Margin { vertical: 1, horizontal: 0 }),
            &mut state,
        );
    }
}

fn render_field(frame: &mut Frame, field: &FormField, row: Rect, is_active: bool) {
    let label_style = match (is_active, field.group) {
        (true, _) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        (false, Some(ParamGroup::Advanced)) => Style::default().fg(Color::Gray),
        (false, _) => Style::default().fg(Color::White),
    };
    let marker = match (field.group, field.locked) {
        (_, true) => "#",
        (Some(ParamGroup::Advanced), _) => "+",
        _ => " ",
    };
    let label = format!("{}{}:", marker, truncate_with_ellipsis(&field.label, LABEL_WIDTH as usize - 2));
    frame.render_widget(
        Paragraph::new(label).style(label_style),
        Rect { width: LABEL_WIDTH.min(row.width), ..row },
    );

    let input = Rect {
        x: row.x + LABEL_WIDTH + 1,
        width: row.width.saturating_sub(LABEL_WIDTH + 2),
        ..row
    };
    let bg = if is_active && !field.locked {
        Style::default().bg(Color::DarkGray)
    } else {
        Style::default()
    };

    let line = match &field.field_type {
        FieldType::Bool => {
            let (on, off) = if field.is_true() {
                (Style::default().fg(Color::Green).add_modifier(Modifier::BOLD), Style::default().fg(Color::DarkGray))
            } else {
                (Style::default().fg(Color::DarkGray), Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
            };
            Line::from(vec![
                Span::styled(" ", bg),
                Span::styled("ON", on.patch(bg)),
                Span::styled(" / ", bg.fg(Color::Gray)),
                Span::styled("OFF", off.patch(bg)),
                Span::styled(" ", bg),
            ])
        }
        FieldType::Select(options) => {
            let arrows = if is_active && !field.locked {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            let counter = format!(" ({}/{})", field.select_idx + 1, options.len().max(1));
            let max_value = (input.width as usize).saturating_sub(4 + counter.len());
            Line::from(vec![
                Span::styled("< ", arrows.patch(bg)),
                Span::styled(truncate_with_ellipsis(&field.value, max_value), Style::default().fg(Color::Yellow).patch(bg)),
                Span::styled(" >", arrows.patch(bg)),
                Span::styled(counter, Style::default().fg(Color::DarkGray)),
            ])
        }
        _ => text_line(field, input.width as usize, is_active),
    };
    frame.render_widget(Paragraph::new(line), input);
}

/// Text-like fields, cursor shown as `|`, long values keep their tail visible.
fn text_line(field: &FormField, width: usize, is_active: bool) -> Line<'static> {
    let suffix = match field.field_type {
        FieldType::Integer => " #",
        FieldType::Float => " .#",
        FieldType::Path { .. } if is_active => " [Space]",
        FieldType::Names => " a, b",
        FieldType::Json => " {}",
        _ => "",
    };
    let room = width.saturating_sub(3 + suffix.len());

    let mut text = field.value.clone();
    if is_active {
        let pos = field.cursor_pos.min(text.len());
        text.insert(pos, '|');
    }
    let chars = text.chars().count();
    if chars > room {
        let tail: String = text.chars().skip(chars + 3 - room.max(3)).collect();
        text = format!("...{}", tail);
    }

    let style = if is_active {
        Style::default().fg(Color::Yellow).bg(Color::DarkGray)
    } else if field.value.is_empty() {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White)
    };
    Line::from(vec![
        Span::styled(format!("[{}]", text), style),
        Span::styled(suffix, Style::default().fg(Color::Cyan)),
    ])
}
