use std::fmt;
use std::io::Error;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

pub const HELP_TEXT: &str = "\
recview - browse a dataset one record at a time

Load form
  Enter        load the typed path (csv, sas7bdat or a directory of .txt)
  Esc          back to the viewer, quit when nothing is loaded

Viewer
  n / Right    next record
  p / Left     previous record
  Up / Down    select field
  Tab          next search column
  Shift-Tab    previous search column
  /            enter a search value for the selected column
  r            reset search, back to all records
  y            copy the selected field
  o            open another dataset
  ?            this help
  q            quit

Press Esc to close this help.";

/// Error raised when loading a dataset or talking to the terminal fails.
///
/// Search problems are not errors, they are reported through the notice
/// channel of the cursor.
#[derive(Debug)]
pub enum RVError {
    IoError(Error),
    PolarsError(PolarsError),
    FileNotFound(String),
    PermissionDenied(String),
    UnsupportedFormat(String),
    Decoding(String),
    MalformedSas(String),
    NoDataset,
}

impl fmt::Display for RVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RVError::IoError(e) => write!(f, "I/O error: {e}"),
            RVError::PolarsError(e) => write!(f, "Could not parse table: {e}"),
            RVError::FileNotFound(path) => write!(f, "File not found: {path}"),
            RVError::PermissionDenied(path) => write!(f, "Permission denied: {path}"),
            RVError::UnsupportedFormat(what) => {
                write!(f, "Extension not recognized or not implemented: {what}")
            }
            RVError::Decoding(what) => write!(f, "Could not decode {what}"),
            RVError::MalformedSas(why) => write!(f, "Malformed sas7bdat file: {why}"),
            RVError::NoDataset => write!(f, "No dataset loaded"),
        }
    }
}

impl std::error::Error for RVError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RVError::IoError(e) => Some(e),
            RVError::PolarsError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for RVError {
    fn from(err: Error) -> Self {
        RVError::IoError(err)
    }
}

impl From<PolarsError> for RVError {
    fn from(err: PolarsError) -> Self {
        RVError::PolarsError(err)
    }
}

#[derive(Debug, Clone, Setters)]
pub struct RVConfig {
    pub event_poll_time: u64,
    pub textarea_height: u16, // Lines used by a textarea field
    pub label_width: u16,     // Width of the column name gutter
}

impl Default for RVConfig {
    fn default() -> Self {
        RVConfig {
            event_poll_time: 100,
            textarea_height: 4,
            label_width: 24,
        }
    }
}

/// What a text input is currently used for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    LoadPath,
    SearchValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    Exit,
    Enter,
    NextRecord,
    PrevRecord,
    FieldUp,
    FieldDown,
    NextColumn,
    PrevColumn,
    Search,
    Reset,
    CopyField,
    Open,
    Help,
    Resize(usize, usize),
    RawKey(KeyEvent),
}
