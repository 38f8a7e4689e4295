//! BCI Launcher - terminal front-end for BCI experiments
//!
//! Pick a subject folder, open the Offline/Train/Online parameter form of its
//! protocol, then run the protocol (and the amplifier recorder) as child
//! processes. Amplifier discovery and signal viewers are started from the
//! menu. The launcher's own log is shown at the bottom of the screen.
//!
//! ```bash
//! BCI_ROOT=. BCI_DATA=~/bci/data BCI_SCRIPTS=~/bci/scripts bci-launcher
//! bci-launcher --subject ~/bci/scripts/S01-mi
//! ```

use std::io;
use std::panic;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    cursor::{Hide, Show},
    event::KeyEvent,
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::Level;

use bci_launcher::config::Settings;
use bci_launcher::error::ConfigError;

mod tui;

use tui::{
    App,
    events::{
        Event, EventHandler, is_backspace, is_ctrl_c, is_ctrl_s, is_delete, is_down, is_end, is_enter, is_esc,
        is_home, is_left, is_page_down, is_page_up, is_right, is_shift_tab, is_space, is_tab, is_up, typed_char,
    },
    tab::TabMode,
    ui::{OUTPUT_CHROME, render},
};

#[derive(Parser)]
#[command(name = "bci-launcher")]
#[command(about = "Terminal front-end for BCI experiments over LSL")]
struct Args {
    #[arg(long, env = "BCI_ROOT", help = "Installation root holding config_files/")]
    root: Option<PathBuf>,

    #[arg(long, env = "BCI_DATA", help = "Folder receiving the recordings")]
    data: Option<PathBuf>,

    #[arg(long, env = "BCI_SCRIPTS", help = "Folder holding the subject folders")]
    scripts: Option<PathBuf>,

    #[arg(long, help = "Subject folder to select at start")]
    subject: Option<PathBuf>,

    #[arg(long, default_value = "2.0", help = "Seconds between amplifier searches while scanning")]
    scan_interval: f64,

    #[arg(long, short = 'v', help = "Show debug messages in the log panel")]
    verbose: bool,
}

impl Args {
    fn settings(&self) -> Result<Settings, ConfigError> {
        let root = self.root.clone().ok_or(ConfigError::MissingEnv("BCI_ROOT"))?;
        let data = self.data.clone().ok_or(ConfigError::MissingEnv("BCI_DATA"))?;
        let scripts = self.scripts.clone().ok_or(ConfigError::MissingEnv("BCI_SCRIPTS"))?;
        Ok(Settings::new(root, data, scripts))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = args.settings()?;

    bci_launcher::display_license_notice("bci-launcher");

    let (log_tx, log_rx) = mpsc::channel();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    bci_launcher::logging::init_channel(log_tx, level);

    let mut app = App::new(settings, log_rx, Duration::from_secs_f64(args.scan_interval.max(0.5)));
    if let Some(subject) = args.subject {
        app.set_subject(subject);
    }

    // leave the terminal usable if anything panics
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        cleanup_terminal();
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = run_app(&mut terminal, &mut app);

    app.shutdown();
    cleanup_terminal();
    result
}

fn cleanup_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    let events = EventHandler::default();
    let mut needs_full_redraw = true;

    loop {
        let visible_height = (terminal.get_frame().area().height as usize)
            .saturating_sub(OUTPUT_CHROME)
            .max(1);
        for tab in &mut app.tabs {
            if tab.mode != TabMode::Configure {
                tab.update_visible_height(visible_height);
            }
        }

        if needs_full_redraw {
            terminal.clear()?;
            needs_full_redraw = false;
        }
        terminal.draw(|f| render(f, app))?;

        match events.next()? {
            Event::Key(key) => needs_full_redraw = handle_key(app, &key),
            Event::Resize(..) => needs_full_redraw = true,
            Event::Tick => needs_full_redraw = app.tick(),
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

/// Dispatch a key press by priority: dialogs first, then tabs or menu.
/// Returns true when the screen should be cleared.
fn handle_key(app: &mut App, key: &KeyEvent) -> bool {
    if app.error.is_some() {
        if is_enter(key) || is_esc(key) {
            app.error = None;
        }
        return true;
    }
    if app.file_browser.is_some() {
        handle_browser_key(app, key);
        return true;
    }
    if app.new_subject.is_some() {
        handle_new_subject_key(app, key);
        return true;
    }
    if app.close_confirmation.is_some() {
        match typed_char(key) {
            Some('y' | 'Y') => app.confirm_close(),
            Some('n' | 'N') => app.cancel_close(),
            _ if is_enter(key) => app.confirm_close(),
            _ if is_esc(key) => app.cancel_close(),
            _ => {}
        }
        return true;
    }

    if is_tab(key) {
        app.next_tab();
        return true;
    }
    if is_shift_tab(key) {
        app.prev_tab();
        return true;
    }

    if app.is_in_menu() {
        handle_menu_key(app, key)
    } else {
        handle_tab_key(app, key)
    }
}

fn handle_menu_key(app: &mut App, key: &KeyEvent) -> bool {
    if is_esc(key) || is_ctrl_c(key) || typed_char(key) == Some('q') {
        if app.has_running_tabs() {
            app.show_error("Sessions are still running: stop them (Esc) or close their tabs (Ctrl+C) first");
        } else {
            app.should_quit = true;
        }
    } else if is_up(key) {
        app.select_previous();
    } else if is_down(key) {
        app.select_next();
    } else if is_enter(key) {
        app.run_selected();
        return true;
    }
    false
}

fn handle_browser_key(app: &mut App, key: &KeyEvent) {
    let Some(browser) = app.file_browser.as_mut() else {
        return;
    };
    let picked = if is_esc(key) {
        app.file_browser = None;
        return;
    } else if is_up(key) {
        browser.select_previous();
        None
    } else if is_down(key) {
        browser.select_next();
        None
    } else if is_page_up(key) {
        browser.page_up(10);
        None
    } else if is_page_down(key) {
        browser.page_down(10);
        None
    } else if is_backspace(key) {
        browser.go_up();
        None
    } else if is_enter(key) {
        browser.enter_selected()
    } else if is_space(key) && browser.select_dir {
        Some(browser.current_dir.clone())
    } else {
        None
    };
    if let Some(browser) = app.file_browser.as_mut() {
        browser.update_scroll(20);
    }
    if let Some(path) = picked {
        app.browser_picked(path);
    }
}

fn handle_new_subject_key(app: &mut App, key: &KeyEvent) {
    let Some(dialog) = app.new_subject.as_mut() else {
        return;
    };
    if is_esc(key) {
        app.new_subject = None;
    } else if is_enter(key) {
        app.confirm_new_subject();
    } else if is_left(key) {
        dialog.cycle_protocol(false);
    } else if is_right(key) {
        dialog.cycle_protocol(true);
    } else if is_backspace(key) {
        dialog.name.pop();
    } else if let Some(c) = typed_char(key)
        && dialog.name.len() < 64
    {
        dialog.name.push(c);
    }
}

fn handle_tab_key(app: &mut App, key: &KeyEvent) -> bool {
    let Some(index) = app.active_tab_index else {
        return false;
    };
    let Some(mode) = app.tabs.get(index).map(|t| t.mode) else {
        return false;
    };

    match mode {
        TabMode::Configure => handle_form_key(app, index, key),
        TabMode::Running => {
            let tab = &mut app.tabs[index];
            if is_esc(key) {
                tab.stop();
            } else if is_ctrl_c(key) {
                app.request_close_active_tab();
                return true;
            } else {
                scroll(tab, key);
            }
            false
        }
        TabMode::Completed => {
            let tab = &mut app.tabs[index];
            if is_esc(key) || is_enter(key) {
                app.close_tab(index);
                return true;
            } else if typed_char(key) == Some('r') {
                tab.reconfigure();
                return true;
            }
            scroll(tab, key);
            false
        }
    }
}

fn scroll(tab: &mut tui::tab::TabState, key: &KeyEvent) {
    let page = (tab.cached_visible_height / 2).max(1);
    if is_up(key) {
        tab.scroll_up(1);
    } else if is_down(key) {
        tab.scroll_down(1);
    } else if is_page_up(key) {
        tab.scroll_up(page);
    } else if is_page_down(key) {
        tab.scroll_down(page);
    }
}

fn handle_form_key(app: &mut App, index: usize, key: &KeyEvent) -> bool {
    if is_esc(key) {
        app.close_tab(index);
        return true;
    }
    if is_ctrl_s(key) {
        app.save_active_config();
        return false;
    }

    let Some(form) = app.tabs[index].form_state.as_mut() else {
        return false;
    };
    if is_enter(key) && form.is_run_button_focused() {
        app.run_active_tab();
        return true;
    }

    // path fields open the browser on Space or Enter
    if (is_space(key) || is_enter(key))
        && let Some(field) = form.active_field()
        && field.is_path_field()
        && !field.locked
    {
        let (idx, current, select_dir) = (form.active_field_idx, field.value.clone(), field.selects_directory());
        app.browse_field(idx, &current, select_dir);
        return true;
    }

    if is_up(key) {
        form.prev_field();
    } else if is_down(key) {
        form.next_field();
    } else if is_left(key) {
        form.move_cursor_left();
    } else if is_right(key) {
        form.move_cursor_right();
    } else if is_home(key) {
        form.move_cursor_home();
    } else if is_end(key) {
        form.move_cursor_end();
    } else if is_backspace(key) {
        form.backspace();
    } else if is_delete(key) {
        form.delete_char();
    } else if is_enter(key) || is_space(key) {
        let typing = form.active_field().is_some_and(|f| f.accepts_text_input());
        match (typing, is_enter(key)) {
            (true, true) => form.next_field(),
            (true, false) => form.insert_char(' '),
            (false, _) => form.toggle_or_cycle(),
        }
    } else if let Some(c) = typed_char(key) {
        form.insert_char(c);
    }
    false
}
