//! Terminal front-end of the launcher.
//!
//! The menu selects a subject and opens one tab per experiment run; each tab
//! shows the protocol's parameter form, then the merged output of the
//! session's processes. Signal viewers run in their own tabs.

pub mod app;
pub mod events;
pub mod file_browser;
pub mod form;
pub mod launch;
pub mod tab;
pub mod ui;
pub mod ui_dialog;
pub mod ui_file_browser;
pub mod ui_form;
pub mod ui_helpers;
pub mod ui_tabs;

pub use app::App;
