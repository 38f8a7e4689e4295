//! Form fields for editing an experiment configuration.

use crate::config::{ParamGroup, ParamKind};

/// Input behaviour of a field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    /// Space/Enter flips it
    Bool,
    /// Left/Right cycles through the options
    Select(Vec<String>),
    /// Space opens the file browser
    Path { select_dir: bool },
    /// Comma-separated names (channels, directions)
    Names,
    /// Raw JSON (lists and mappings)
    Json,
}

/// One row of the form.
#[derive(Clone, Debug)]
pub struct FormField {
    /// Parameter name, or one of the fixed launcher fields
    pub name: String,
    pub label: String,
    pub value: String,
    pub help: String,
    pub cursor_pos: usize,
    pub field_type: FieldType,
    /// Current selection index (for Select type)
    pub select_idx: usize,
    /// Schema kind the value converts back to; `None` for launcher fields.
    pub kind: Option<ParamKind>,
    pub group: Option<ParamGroup>,
    /// Shown but not editable.
    pub locked: bool,
}

impl FormField {
    pub fn new(name: &str, field_type: FieldType, value: String) -> Self {
        let cursor_pos = value.len();
        Self {
            name: name.to_string(),
            label: name.to_string(),
            value,
            help: String::new(),
            cursor_pos,
            field_type,
            select_idx: 0,
            kind: None,
            group: None,
            locked: false,
        }
    }

    pub fn bool_field(name: &str, value: bool) -> Self {
        Self::new(name, FieldType::Bool, value.to_string())
    }

    /// Selection field; `selected` falls back to the first option.
    pub fn select_field(name: &str, options: Vec<String>, selected: &str) -> Self {
        let select_idx = options.iter().position(|o| o == selected).unwrap_or(0);
        let value = options.get(select_idx).cloned().unwrap_or_default();
        let mut field = Self::new(name, FieldType::Select(options), value);
        field.select_idx = select_idx;
        field
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn with_kind(mut self, kind: ParamKind, group: ParamGroup) -> Self {
        self.kind = Some(kind);
        self.group = Some(group);
        self
    }

    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn is_true(&self) -> bool {
        self.value == "true"
    }

    pub fn toggle_bool(&mut self) {
        if self.field_type == FieldType::Bool && !self.locked {
            self.value = (!self.is_true()).to_string();
        }
    }

    pub fn next_option(&mut self) {
        if self.locked {
            return;
        }
        if let FieldType::Select(ref options) = self.field_type
            && !options.is_empty()
        {
            self.select_idx = (self.select_idx + 1) % options.len();
            self.value = options[self.select_idx].clone();
        }
    }

    pub fn prev_option(&mut self) {
        if self.locked {
            return;
        }
        if let FieldType::Select(ref options) = self.field_type
            && !options.is_empty()
        {
            self.select_idx = self.select_idx.checked_sub(1).unwrap_or(options.len() - 1);
            self.value = options[self.select_idx].clone();
        }
    }

    /// Swap the option list, keeping the current value when it is still offered.
    pub fn set_options(&mut self, options: Vec<String>) {
        if let FieldType::Select(_) = self.field_type {
            self.select_idx = options.iter().position(|o| *o == self.value).unwrap_or(0);
            self.value = options.get(self.select_idx).cloned().unwrap_or_default();
            self.field_type = FieldType::Select(options);
        }
    }

    /// Integers drop their decimals once the field loses focus.
    pub fn normalize_value(&mut self) {
        if self.field_type == FieldType::Integer
            && let Ok(f) = self.value.trim().parse::<f64>()
        {
            self.value = (f as i64).to_string();
            self.cursor_pos = self.value.len();
        }
    }

    pub fn accepts_text_input(&self) -> bool {
        !self.locked
            && matches!(
                self.field_type,
                FieldType::Text
                    | FieldType::Integer
                    | FieldType::Float
                    | FieldType::Path { .. }
                    | FieldType::Names
                    | FieldType::Json
            )
    }

    pub fn is_path_field(&self) -> bool {
        matches!(self.field_type, FieldType::Path { .. })
    }

    pub fn selects_directory(&self) -> bool {
        matches!(self.field_type, FieldType::Path { select_dir: true })
    }

    fn accepts_char(&self, c: char) -> bool {
        match self.field_type {
            FieldType::Integer => c.is_ascii_digit() || c == '-',
            FieldType::Float => c.is_ascii_digit() || c == '-' || c == '.' || c == 'e',
            _ => true,
        }
    }
}

/// Configuration form: schema fields then the launcher fields, then Run.
pub struct FormState {
    pub fields: Vec<FormField>,
    /// `fields.len()` means the Run button
    pub active_field_idx: usize,
    pub title: String,
    pub error_message: Option<String>,
    /// Last status message (saved file, ...)
    pub info_message: Option<String>,
    pub scroll_offset: usize,
}

impl FormState {
    pub fn new(title: &str, fields: Vec<FormField>) -> Self {
        Self {
            fields,
            active_field_idx: 0,
            title: title.to_string(),
            error_message: None,
            info_message: None,
            scroll_offset: 0,
        }
    }

    pub fn is_run_button_focused(&self) -> bool {
        self.active_field_idx >= self.fields.len()
    }

    pub fn active_field(&self) -> Option<&FormField> {
        self.fields.get(self.active_field_idx)
    }

    pub fn active_field_mut(&mut self) -> Option<&mut FormField> {
        self.fields.get_mut(self.active_field_idx)
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FormField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    fn clear_messages(&mut self) {
        self.error_message = None;
        self.info_message = None;
    }

    pub fn insert_char(&mut self, c: char) {
        if let Some(field) = self.active_field_mut()
            && field.accepts_text_input()
            && field.accepts_char(c)
            && field.value.len() < 1024
        {
            field.value.insert(field.cursor_pos, c);
            field.cursor_pos += c.len_utf8();
        }
        self.clear_messages();
    }

    pub fn delete_char(&mut self) {
        if let Some(field) = self.active_field_mut()
            && field.accepts_text_input()
            && field.cursor_pos < field.value.len()
        {
            field.value.remove(field.cursor_pos);
        }
        self.clear_messages();
    }

    pub fn backspace(&mut self) {
        if let Some(field) = self.active_field_mut()
            && field.accepts_text_input()
            && let Some(prev) = field.value[..field.cursor_pos].chars().next_back()
        {
            field.cursor_pos -= prev.len_utf8();
            field.value.remove(field.cursor_pos);
        }
        self.clear_messages();
    }

    pub fn move_cursor_left(&mut self) {
        if let Some(field) = self.active_field_mut() {
            match field.field_type {
                FieldType::Select(_) => field.prev_option(),
                FieldType::Bool => field.toggle_bool(),
                _ => {
                    if let Some(prev) = field.value[..field.cursor_pos].chars().next_back() {
                        field.cursor_pos -= prev.len_utf8();
                    }
                }
            }
        }
    }

    pub fn move_cursor_right(&mut self) {
        if let Some(field) = self.active_field_mut() {
            match field.field_type {
                FieldType::Select(_) => field.next_option(),
                FieldType::Bool => field.toggle_bool(),
                _ => {
                    if let Some(next) = field.value[field.cursor_pos..].chars().next() {
                        field.cursor_pos += next.len_utf8();
                    }
                }
            }
        }
    }

    pub fn toggle_or_cycle(&mut self) {
        if let Some(field) = self.active_field_mut() {
            match field.field_type {
                FieldType::Bool => field.toggle_bool(),
                FieldType::Select(_) => field.next_option(),
                _ => {}
            }
        }
        self.clear_messages();
    }

    pub fn move_cursor_home(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.cursor_pos = 0;
        }
    }

    pub fn move_cursor_end(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.cursor_pos = field.value.len();
        }
    }

    pub fn next_field(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.normalize_value();
        }
        let total = self.fields.len() + 1;
        self.active_field_idx = (self.active_field_idx + 1) % total;
        self.move_cursor_end();
    }

    pub fn prev_field(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.normalize_value();
        }
        let total = self.fields.len() + 1;
        self.active_field_idx = self.active_field_idx.checked_sub(1).unwrap_or(total - 1);
        self.move_cursor_end();
    }

    /// Put a path picked in the browser into a field.
    pub fn set_path(&mut self, index: usize, path: String) {
        if let Some(field) = self.fields.get_mut(index) {
            field.cursor_pos = path.len();
            field.value = path;
        }
        self.clear_messages();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> FormState {
        FormState::new(
            "test",
            vec![
                FormField::new("TRIALS_NB", FieldType::Integer, "10".to_string()),
                FormField::bool_field("Record", true).locked(true),
                FormField::select_field("Amplifier", vec!["a".into(), "b".into()], "b"),
            ],
        )
    }

    #[test]
    fn integer_fields_reject_letters_and_truncate_on_leave() {
        let mut form = form();
        form.insert_char('x');
        form.insert_char('.');
        assert_eq!(form.fields[0].value, "10");

        form.fields[0].value = "12.7".to_string();
        form.next_field();
        assert_eq!(form.fields[0].value, "12");
        assert_eq!(form.active_field_idx, 1);
    }

    #[test]
    fn locked_fields_do_not_change() {
        let mut form = form();
        form.active_field_idx = 1;
        form.toggle_or_cycle();
        form.move_cursor_left();
        assert!(form.fields[1].is_true());
    }

    #[test]
    fn select_keeps_value_across_option_updates() {
        let mut form = form();
        let amp = form.field_mut("Amplifier").unwrap();
        assert_eq!(amp.value, "b");
        amp.set_options(vec!["c".into(), "b".into()]);
        assert_eq!(amp.select_idx, 1);
        amp.set_options(vec!["c".into()]);
        assert_eq!(amp.value, "c");
    }

    #[test]
    fn navigation_wraps_through_run_button() {
        let mut form = form();
        form.prev_field();
        assert!(form.is_run_button_focused());
        form.next_field();
        assert_eq!(form.active_field_idx, 0);
    }
}
