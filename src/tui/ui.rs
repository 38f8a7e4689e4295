//! Screen layout: tab bar, menu or tab, launcher log, then overlays.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};

use super::app::{App, MenuAction};
use super::tab::{TabKind, TabMode, TabState};
use super::ui_dialog::{render_close_confirmation, render_error, render_new_subject};
use super::ui_file_browser::render_file_browser;
use super::ui_form::render_configure_form;
use super::ui_helpers::{calculate_command_height, help_item, run_state_span};
use super::ui_tabs::render_tab_bar;

/// Rows of the launcher log panel.
pub const LOG_HEIGHT: u16 = 8;

/// Rows taken by everything but a tab's output lines: tab bar, log,
/// header, one-line command box, help row and the output borders.
pub const OUTPUT_CHROME: usize = 3 + LOG_HEIGHT as usize + 3 + 3 + 1 + 2;

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(LOG_HEIGHT),
        ])
        .split(frame.area());

    render_tab_bar(frame, chunks[0], app);
    match app.active_tab_index.and_then(|i| app.tabs.get(i)) {
        None => render_menu(frame, chunks[1], app),
        Some(tab) => match (tab.mode, tab.form_state.as_ref()) {
            (TabMode::Configure, Some(form)) => {
                let file = tab
                    .config
                    .as_ref()
                    .map(|c| c.subject_path.display().to_string())
                    .unwrap_or_default();
                render_configure_form(frame, chunks[1], form, &file);
            }
            _ => render_output(frame, chunks[1], tab),
        },
    }
    render_log(frame, chunks[2], app);

    if let Some(ref browser) = app.file_browser {
        render_file_browser(frame, browser);
    } else if let Some(ref dialog) = app.new_subject {
        render_new_subject(frame, dialog);
    }
    if app.close_confirmation.is_some() {
        render_close_confirmation(frame, app);
    }
    if let Some(ref error) = app.error {
        render_error(frame, error);
    }
}

fn render_menu(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(1)])
        .split(area);

    let subject = match app.subject_dir {
        Some(ref dir) => Span::styled(dir.display().to_string(), Style::default().fg(Color::Green)),
        None => Span::styled("none selected", Style::default().fg(Color::Red)),
    };
    let scan = if app.is_scanning() {
        Span::styled(format!("scanning, {} amplifier(s)", app.amps.len()), Style::default().fg(Color::Green))
    } else {
        Span::styled(format!("off, {} amplifier(s) known", app.amps.len()), Style::default().fg(Color::DarkGray))
    };
    let header = Paragraph::new(vec![
        Line::from(vec![Span::styled("Subject:    ", Style::default().fg(Color::Gray)), subject]),
        Line::from(vec![Span::styled("Amplifiers: ", Style::default().fg(Color::Gray)), scan]),
        Line::from(vec![
            Span::styled("Data:       ", Style::default().fg(Color::Gray)),
            Span::styled(app.settings.data.display().to_string(), Style::default().fg(Color::White)),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));
    frame.render_widget(header, chunks[0]);

    let items: Vec<ListItem> = MenuAction::ALL
        .iter()
        .enumerate()
        .map(|(i, action)| {
            let selected = i == app.selected_index;
            let name_style = if selected {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            let mut name = action.name().to_string();
            if *action == MenuAction::ToggleScan {
                name.push_str(if app.is_scanning() { " (on)" } else { " (off)" });
            }
            ListItem::new(Line::from(vec![
                Span::styled(if selected { "> " } else { "  " }, Style::default().fg(Color::Yellow)),
                Span::styled(format!("{:<22}", name), name_style),
                Span::styled(action.description(), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Actions ")
            .border_style(Style::default().fg(Color::White)),
    );
    frame.render_widget(list, chunks[1]);

    let mut help = vec![Span::raw(" ")];
    help.extend(help_item("Up/Dn", "Navigate"));
    help.extend(help_item("Enter", "Run"));
    help.extend(help_item("q", "Quit"));
    frame.render_widget(Paragraph::new(Line::from(help)), chunks[2]);
}

fn render_output(frame: &mut Frame, area: Rect, tab: &TabState) {
    let command = format!("$ {}", tab.command.as_deref().unwrap_or(""));
    let (_, command_height) = calculate_command_height(command.len(), area.width);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(command_height),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    let (status, color) = match (tab.mode, tab.stopping) {
        (TabMode::Running, true) => ("Stopping", Color::Yellow),
        (TabMode::Running, false) => ("Running", Color::Green),
        _ => ("Completed", Color::Yellow),
    };
    let mut spans = vec![
        Span::styled(format!("[{}] ", status), Style::default().fg(color)),
        Span::styled(tab.title.clone(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
    ];
    if let TabKind::Experiment(_) = tab.kind {
        spans.push(run_state_span("record", tab.states.0));
        spans.push(run_state_span("protocol", tab.states.1));
        if let Some(ref p) = tab.progress {
            spans.push(Span::styled(
                format!(" trial {}/{} {}", p.index, p.total, p.label),
                Style::default().fg(Color::White),
            ));
        }
    }
    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(color)));
    frame.render_widget(header, chunks[0]);

    let command = Paragraph::new(command)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(" Command ").border_style(Style::default().fg(Color::Green)));
    frame.render_widget(command, chunks[1]);

    let visible = chunks[2].height.saturating_sub(2) as usize;
    let lines: Vec<Line> = tab
        .output_lines
        .iter()
        .skip(tab.scroll_offset)
        .take(visible)
        .map(|s| Line::from(s.as_str()))
        .collect();
    let position = if tab.output_lines.len() > visible {
        format!(
            " [lines {}-{}/{}]",
            tab.scroll_offset + 1,
            (tab.scroll_offset + visible).min(tab.output_lines.len()),
            tab.output_lines.len()
        )
    } else {
        String::new()
    };
    let output = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Output{} ", position))
            .border_style(Style::default().fg(Color::White)),
    );
    frame.render_widget(output, chunks[2]);

    let mut help = vec![Span::raw(" ")];
    help.extend(help_item("Up/Dn/PgUp/PgDn", "Scroll"));
    match tab.mode {
        TabMode::Running => {
            help.extend(help_item("Esc", "Stop"));
            help.extend(help_item("Ctrl+C", "Kill & close"));
        }
        _ => {
            if tab.form_state.is_some() {
                help.extend(help_item("r", "Back to form"));
            }
            help.extend(help_item("Esc/Enter", "Close"));
        }
    }
    frame.render_widget(Paragraph::new(Line::from(help)), chunks[3]);
}

fn render_log(frame: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .log_lines
        .iter()
        .skip(app.log_lines.len().saturating_sub(visible))
        .map(|line| {
            let color = if line.contains("ERROR") {
                Color::Red
            } else if line.contains("WARN") {
                Color::Yellow
            } else {
                Color::Gray
            };
            Line::from(Span::styled(line.as_str(), Style::default().fg(color)))
        })
        .collect();
    let log = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Log ")
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(log, area);
}
