use std::time::Instant;

use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use tracing::{error, info, trace};
use tracing_error::SpanTrace;

use recview::cursor::{FieldLabel, Notice, RenderedRow};
use recview::domain::{CMDMode, HELP_TEXT, Message, RVConfig, RVError};
use recview::session::{Session, Upload};

use crate::inputter::{InputResult, Inputter};

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    LOAD,
    VIEWER,
    POPUP,
    CMDINPUT,
}

/// Which form the UI draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screen {
    Load,
    Viewer,
}

/// Snapshot of everything the UI needs for one frame.
pub struct UIData {
    pub screen: Screen,
    pub name: String,
    pub fields: RenderedRow,
    pub selected_field: usize,
    pub record_label: String,
    pub search_column: String,
    pub search_value: String,
    pub notice: Notice,
    pub show_popup: bool,
    pub popup_message: String,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            screen: Screen::Load,
            name: String::new(),
            fields: Vec::new(),
            selected_field: 0,
            record_label: String::new(),
            search_column: String::new(),
            search_value: String::new(),
            notice: Notice::default(),
            show_popup: false,
            popup_message: String::new(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            status_message: String::new(),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
}

pub struct Model {
    config: RVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    session: Session,
    fields: RenderedRow,
    selected_field: usize,
    selected_column: usize,
    search_value: String,
    notice: Notice,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
}

impl Model {
    pub fn init(config: &RVConfig, ui_width: usize, ui_height: usize) -> Result<Self, RVError> {
        let mut model = Self {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::LOAD,
            previous_modus: Modus::LOAD,
            session: Session::new(),
            fields: Vec::new(),
            selected_field: 0,
            selected_column: 0,
            search_value: String::new(),
            notice: Notice::default(),
            uilayout: UILayout {
                width: ui_width,
                height: ui_height,
            },
            uidata: UIData::empty(),
            clipboard: None,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message: "Type the path of a dataset and press Enter".to_string(),
        };
        model.enter_cmd_mode(CMDMode::LoadPath);
        model.update_uidata();
        Ok(model)
    }

    pub fn config(&self) -> &RVConfig {
        &self.config
    }

    /// Load a dataset and switch to the viewer. A failed load stays on the
    /// load form and reports the error in the status line.
    pub fn load(&mut self, upload: Option<Upload>, path: Option<&str>) {
        let start_time = Instant::now();
        match self.session.submit_load_request(upload, path) {
            Ok(true) => {
                let millis = start_time.elapsed().as_millis();
                self.selected_column = 0;
                self.search_value.clear();
                self.active_cmdinput = false;
                self.cmd_mode = None;
                self.modus = Modus::VIEWER;
                self.previous_modus = Modus::LOAD;
                self.view_request(false);
                let name = self
                    .session
                    .cursor()
                    .map(|c| c.name().to_string())
                    .unwrap_or_default();
                self.set_status_message(format!("Loaded {name} in {millis}ms"));
            }
            Ok(false) => self.set_status_message("Nothing to load, type a path"),
            Err(e) => {
                error!("Loading failed: {e}\n{}", SpanTrace::capture());
                self.set_status_message(format!("Error: {e}"));
            }
        }
        self.update_uidata();
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), RVError> {
        let Some(msg) = message else {
            return Ok(());
        };
        trace!("Update: Modus {:?}, Message {:?}", self.modus, msg);
        match self.modus {
            Modus::VIEWER => match msg {
                Message::Quit => self.quit(),
                Message::NextRecord => self.move_record(true)?,
                Message::PrevRecord => self.move_record(false)?,
                Message::FieldUp => self.select_field(-1),
                Message::FieldDown => self.select_field(1),
                Message::NextColumn => self.select_column(1),
                Message::PrevColumn => self.select_column(-1),
                Message::Search => self.enter_cmd_mode(CMDMode::SearchValue),
                Message::Reset => {
                    self.search_value.clear();
                    self.view_request(false);
                }
                Message::CopyField => self.copy_field(),
                Message::Open => self.enter_cmd_mode(CMDMode::LoadPath),
                Message::Help => self.show_help(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::POPUP => match msg {
                Message::Quit => self.quit(),
                Message::Exit | Message::Enter => self.exit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::LOAD | Modus::CMDINPUT => match msg {
                Message::RawKey(key) => self.raw_input(key),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
        }
        self.update_uidata();
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn exit(&mut self) {
        if self.modus == Modus::POPUP {
            trace!("Close popup ...");
            self.modus = self.previous_modus;
            self.previous_modus = Modus::POPUP;
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout { width, height };
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {:?} ...", mode);
        if mode == CMDMode::LoadPath {
            self.modus = Modus::LOAD;
        } else {
            self.previous_modus = self.modus;
            self.modus = Modus::CMDINPUT;
        }
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.input.clear();
        if mode == CMDMode::SearchValue {
            self.input.set(&self.search_value);
        }
        self.last_input = self.input.get();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
        }
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {}", self.last_input.input);
        let cmd_input = self.last_input.input.clone();
        let canceled = self.last_input.canceled;
        self.input.clear();
        self.last_input = self.input.get();

        match self.cmd_mode {
            Some(CMDMode::LoadPath) => {
                if canceled {
                    if self.session.is_loaded() {
                        self.active_cmdinput = false;
                        self.cmd_mode = None;
                        self.modus = Modus::VIEWER;
                    } else {
                        self.quit();
                    }
                } else {
                    self.load(None, Some(&cmd_input));
                }
            }
            Some(CMDMode::SearchValue) => {
                self.active_cmdinput = false;
                self.cmd_mode = None;
                self.modus = self.previous_modus;
                self.previous_modus = Modus::CMDINPUT;
                if !canceled {
                    self.search_value = cmd_input;
                    self.view_request(true);
                }
            }
            None => {
                info!("Cmd mode is none!");
                self.active_cmdinput = false;
            }
        }
    }

    fn search_column(&self) -> String {
        self.session
            .column_choices()
            .get(self.selected_column)
            .cloned()
            .unwrap_or_default()
    }

    fn view_request(&mut self, is_search: bool) {
        let column = self.search_column();
        match self
            .session
            .submit_view_request(&column, is_search, &self.search_value)
        {
            Ok((row, notice)) => self.show_row(row, notice),
            Err(e) => self.set_status_message(format!("Error: {e}")),
        }
    }

    fn move_record(&mut self, forward: bool) -> Result<(), RVError> {
        let (row, notice) = if forward {
            self.session.next()?
        } else {
            self.session.prev()?
        };
        self.show_row(row, notice);
        Ok(())
    }

    fn show_row(&mut self, row: RenderedRow, notice: Notice) {
        self.fields = row;
        self.selected_field = self.selected_field.min(self.fields.len().saturating_sub(1));
        self.notice = notice;
    }

    fn select_field(&mut self, step: isize) {
        if !self.fields.is_empty() {
            let last = self.fields.len() as isize - 1;
            self.selected_field = (self.selected_field as isize + step).clamp(0, last) as usize;
        }
    }

    fn select_column(&mut self, step: isize) {
        let n = self.session.column_choices().len();
        if n > 0 {
            self.selected_column = (self.selected_column as isize + step).rem_euclid(n as isize) as usize;
        }
    }

    fn copy_field(&mut self) {
        let Some(field) = self.fields.get(self.selected_field) else {
            return;
        };
        let content = field.value.clone();
        let column = field.column.clone();
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => {
                    error!("Clipboard not available: {:?}", e);
                    self.set_status_message("Clipboard not available");
                    return;
                }
            }
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            match clipboard.set_text(content) {
                Ok(_) => self.set_status_message(format!("Copied {column}")),
                Err(e) => trace!("Error copying to clipboard: {:?}", e),
            }
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    fn record_label(&self) -> String {
        let Some(cursor) = self.session.cursor() else {
            return String::new();
        };
        let Some(idx) = cursor.current_index() else {
            return "No records".to_string();
        };
        match cursor.filter() {
            Some(rows) => format!(
                "Match {}/{}, record {}/{}",
                cursor.filter_position() + 1,
                rows.len(),
                idx + 1,
                cursor.size()
            ),
            None => format!("Record {}/{}", idx + 1, cursor.size()),
        }
    }

    fn update_uidata(&mut self) {
        let screen = match (self.modus, self.previous_modus) {
            (Modus::LOAD, _) => Screen::Load,
            (Modus::POPUP, Modus::LOAD) => Screen::Load,
            _ => Screen::Viewer,
        };
        self.uidata = UIData {
            screen,
            name: self
                .session
                .cursor()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            fields: self.fields.clone(),
            selected_field: self.selected_field,
            record_label: self.record_label(),
            search_column: self.search_column(),
            search_value: self.search_value.clone(),
            notice: self.notice.clone(),
            show_popup: self.modus == Modus::POPUP,
            popup_message: HELP_TEXT.to_string(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
        };
    }

    /// Number of display lines a field takes. A textarea never takes more
    /// than a quarter of the terminal.
    pub fn field_height(&self, label: FieldLabel) -> u16 {
        match label {
            FieldLabel::Text => 1,
            FieldLabel::Textarea => {
                let cap = (self.uilayout.height / 4).clamp(1, u16::MAX as usize) as u16;
                self.config.textarea_height.clamp(1, cap)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    fn key(model: &mut Model, code: KeyCode) {
        let event = KeyEvent::new(code, KeyModifiers::NONE);
        model.update(Some(Message::RawKey(event))).unwrap();
    }

    fn loaded_model() -> Model {
        let mut model = Model::init(&RVConfig::default(), 80, 24).unwrap();
        model.load(
            Some(Upload {
                name: "people.csv".into(),
                bytes: b"id,team\n1,red\n2,blue\n3,red\n".to_vec(),
            }),
            None,
        );
        model
    }

    #[test]
    fn starts_on_load_form() {
        let model = Model::init(&RVConfig::default(), 80, 24).unwrap();
        assert_eq!(model.get_uidata().screen, Screen::Load);
        assert!(model.raw_keyevents());
    }

    #[test]
    fn failed_load_stays_on_form() {
        let mut model = Model::init(&RVConfig::default(), 80, 24).unwrap();
        for c in "/no/such.json".chars() {
            key(&mut model, KeyCode::Char(c));
        }
        key(&mut model, KeyCode::Enter);
        let ui = model.get_uidata();
        assert_eq!(ui.screen, Screen::Load);
        assert!(ui.status_message.starts_with("Error: "));
    }

    #[test]
    fn browse_and_search() {
        let mut model = loaded_model();
        assert_eq!(model.get_uidata().screen, Screen::Viewer);
        assert_eq!(model.get_uidata().record_label, "Record 1/3");

        model.update(Some(Message::NextRecord)).unwrap();
        assert_eq!(model.get_uidata().fields[0].value, "2");

        model.update(Some(Message::NextColumn)).unwrap();
        assert_eq!(model.get_uidata().search_column, "team");
        model.update(Some(Message::Search)).unwrap();
        for c in "red".chars() {
            key(&mut model, KeyCode::Char(c));
        }
        key(&mut model, KeyCode::Enter);

        let ui = model.get_uidata();
        assert_eq!(ui.fields[0].value, "1");
        assert_eq!(ui.record_label, "Match 1/2, record 1/3");
        assert!(!ui.active_cmdinput);

        model.update(Some(Message::Reset)).unwrap();
        assert_eq!(model.get_uidata().fields[0].value, "2");
    }

    #[test]
    fn no_match_shows_notice() {
        let mut model = loaded_model();
        model.update(Some(Message::Search)).unwrap();
        key(&mut model, KeyCode::Char('9'));
        key(&mut model, KeyCode::Enter);
        assert_eq!(model.get_uidata().notice.text, "No matches");
        model.update(Some(Message::NextRecord)).unwrap();
        assert!(model.get_uidata().notice.is_empty());
    }

    #[test]
    fn textarea_height_follows_terminal_size() {
        let config = RVConfig::default().textarea_height(6);
        let mut model = Model::init(&config, 80, 40).unwrap();
        assert_eq!(model.field_height(FieldLabel::Textarea), 6);
        assert_eq!(model.field_height(FieldLabel::Text), 1);

        model.update(Some(Message::Resize(80, 12))).unwrap();
        assert_eq!(model.field_height(FieldLabel::Textarea), 3);
        model.update(Some(Message::Resize(80, 2))).unwrap();
        assert_eq!(model.field_height(FieldLabel::Textarea), 1);
    }

    #[test]
    fn help_popup_opens_and_closes() {
        let mut model = loaded_model();
        model.update(Some(Message::Help)).unwrap();
        assert!(model.get_uidata().show_popup);
        model.update(Some(Message::Exit)).unwrap();
        assert!(!model.get_uidata().show_popup);
        assert_eq!(model.get_uidata().screen, Screen::Viewer);
    }
}
