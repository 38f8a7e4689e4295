//! Directory and file picker used for the subject folder and path parameters.

use std::fs;
use std::path::{Path, PathBuf};

/// What the picked path is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrowseTarget {
    /// Menu's "Select subject" action.
    SubjectDir,
    /// Form field of the active tab.
    Field(usize),
}

/// One row of the listing.
#[derive(Clone, Debug)]
pub struct BrowserEntry {
    /// File name, or `..` for the parent
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Directory holding JSON configs (likely a subject folder).
    pub has_configs: bool,
}

/// Picker state, open while the dialog is shown.
pub struct FileBrowserState {
    /// Folder being listed
    pub current_dir: PathBuf,
    pub entries: Vec<BrowserEntry>,
    /// Index into `entries`
    pub selected_index: usize,
    /// Pick directories instead of files
    pub select_dir: bool,
    /// First visible row
    pub scroll_offset: usize,
    /// Shown instead of the listing when the folder cannot be read
    pub error: Option<String>,
    pub target: BrowseTarget,
}

/// True when `dir` directly holds a `.json` file.
fn contains_configs(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        })
        .unwrap_or(false)
}

impl FileBrowserState {
    /// Open at `start` (its parent when it is a file), or at `fallback`.
    pub fn new(start: &str, fallback: &Path, select_dir: bool, target: BrowseTarget) -> Self {
        let fallback = if fallback.is_dir() {
            fallback.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        };
        let start = PathBuf::from(start);
        let current_dir = if start.is_dir() {
            start
        } else {
            start
                .parent()
                .filter(|p| !p.as_os_str().is_empty() && p.is_dir())
                .map(Path::to_path_buf)
                .unwrap_or(fallback)
        };

        let mut browser = Self {
            current_dir,
            entries: Vec::new(),
            selected_index: 0,
            select_dir,
            scroll_offset: 0,
            error: None,
            target,
        };
        browser.refresh();
        browser
    }

    /// Re-read the current directory: `..`, then folders, then files (sorted, hidden skipped).
    pub fn refresh(&mut self) {
        self.entries.clear();
        self.error = None;
        self.selected_index = 0;
        self.scroll_offset = 0;

        if let Some(parent) = self.current_dir.parent() {
            self.entries.push(BrowserEntry {
                name: "..".to_string(),
                path: parent.to_path_buf(),
                is_dir: true,
                has_configs: false,
            });
        }

        let listing = match fs::read_dir(&self.current_dir) {
            Ok(listing) => listing,
            Err(e) => {
                self.error = Some(format!("Cannot read directory: {}", e));
                return;
            }
        };

        let (mut dirs, mut files): (Vec<BrowserEntry>, Vec<BrowserEntry>) = listing
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    return None;
                }
                let path = entry.path();
                let is_dir = path.is_dir();
                let has_configs = is_dir && self.select_dir && contains_configs(&path);
                Some(BrowserEntry {
                    name,
                    path,
                    is_dir,
                    has_configs,
                })
            })
            .partition(|e| e.is_dir);

        let by_name = |a: &BrowserEntry, b: &BrowserEntry| a.name.to_lowercase().cmp(&b.name.to_lowercase());
        dirs.sort_by(by_name);
        files.sort_by(by_name);
        self.entries.extend(dirs);
        if !self.select_dir {
            self.entries.extend(files);
        }
    }

    /// Highlighted row, if the listing is not empty.
    pub fn selected_entry(&self) -> Option<&BrowserEntry> {
        self.entries.get(self.selected_index)
    }

    /// Move the highlight up one row.
    pub fn select_previous(&mut self) {
        self.selected_index = self.selected_index.saturating_sub(1);
        self.scroll_offset = self.scroll_offset.min(self.selected_index);
    }

    /// Move the highlight down one row, stopping at the last entry.
    pub fn select_next(&mut self) {
        if self.selected_index + 1 < self.entries.len() {
            self.selected_index += 1;
        }
    }

    /// Jump `page_size` rows up.
    pub fn page_up(&mut self, page_size: usize) {
        self.selected_index = self.selected_index.saturating_sub(page_size);
        self.scroll_offset = self.scroll_offset.min(self.selected_index);
    }

    /// Jump `page_size` rows down, clamped to the last entry.
    pub fn page_down(&mut self, page_size: usize) {
        self.selected_index = (self.selected_index + page_size).min(self.entries.len().saturating_sub(1));
    }

    /// Keep the selection inside a window of `visible_height` rows.
    pub fn update_scroll(&mut self, visible_height: usize) {
        if visible_height == 0 {
            return;
        }
        if self.selected_index < self.scroll_offset {
            self.scroll_offset = self.selected_index;
        } else if self.selected_index >= self.scroll_offset + visible_height {
            self.scroll_offset = self.selected_index + 1 - visible_height;
        }
    }

    /// Open the selected directory, or return the selected file.
    pub fn enter_selected(&mut self) -> Option<PathBuf> {
        let entry = self.selected_entry()?.clone();
        if entry.is_dir {
            self.current_dir = entry.path;
            self.refresh();
            None
        } else {
            Some(entry.path)
        }
    }

    /// List the parent folder; no-op at the filesystem root.
    pub fn go_up(&mut self) {
        if let Some(parent) = self.current_dir.parent() {
            self.current_dir = parent.to_path_buf();
            self.refresh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_folders_first_and_flags_config_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("S01-mi")).unwrap();
        std::fs::write(dir.path().join("S01-mi").join("config_offline-mi.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();

        let browser = FileBrowserState::new(&dir.path().display().to_string(), dir.path(), true, BrowseTarget::SubjectDir);
        let names: Vec<&str> = browser.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["..", "empty", "S01-mi"]);
        assert!(browser.entries[2].has_configs);
        assert!(!browser.entries[1].has_configs);

        let files = FileBrowserState::new("", dir.path(), false, BrowseTarget::Field(0));
        assert!(files.entries.iter().any(|e| e.name == "notes.txt"));
    }

    #[test]
    fn entering_a_file_returns_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("triggers.txt"), "").unwrap();
        let mut browser = FileBrowserState::new("", dir.path(), false, BrowseTarget::Field(3));
        browser.select_next();
        assert_eq!(browser.enter_selected(), Some(dir.path().join("triggers.txt")));
    }
}
