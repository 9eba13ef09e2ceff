use std::fmt;

use rayon::prelude::*;
use tracing::{info, trace};

use crate::domain::RVError;
use crate::loader::{self, Source};
use crate::table::{Column, ColumnKind, Table, Value};

/// Values longer than this are shown in a multi-line field.
pub const TEXTAREA_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    Success,
    Info,
    #[default]
    Warning,
    Danger,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Danger => "danger",
        }
    }
}

// Unknown level names are treated as warnings.
impl From<&str> for Level {
    fn from(name: &str) -> Self {
        match name {
            "success" => Level::Success,
            "info" => Level::Info,
            "danger" => Level::Danger,
            _ => Level::Warning,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-shot message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notice {
    pub text: String,
    pub level: Level,
}

impl Notice {
    pub fn new(text: impl Into<String>, level: impl Into<Level>) -> Self {
        Notice {
            text: text.into(),
            level: level.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldLabel {
    Text,
    Textarea,
}

impl fmt::Display for FieldLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldLabel::Text => f.write_str("text"),
            FieldLabel::Textarea => f.write_str("textarea"),
        }
    }
}

/// One column of a rendered row.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub column: String,
    pub label: FieldLabel,
    pub value: String,
}

pub type RenderedRow = Vec<Field>;

enum CellKind {
    Missing,
    Numeric(String),
    Long(String),
    Short(String),
}

impl CellKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => CellKind::Missing,
            v if v.is_numeric() => CellKind::Numeric(v.to_string()),
            v => {
                let s = v.to_string();
                if s.chars().count() > TEXTAREA_THRESHOLD {
                    CellKind::Long(s)
                } else {
                    CellKind::Short(s)
                }
            }
        }
    }

    fn into_field(self, column: &str) -> Field {
        let (label, value) = match self {
            CellKind::Missing => (FieldLabel::Text, "None".to_string()),
            CellKind::Numeric(s) | CellKind::Short(s) => (FieldLabel::Text, s),
            CellKind::Long(s) => (FieldLabel::Textarea, s),
        };
        Field {
            column: column.to_string(),
            label,
            value,
        }
    }
}

/// The search value interpreted in the native type of a column.
enum Needle {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Needle {
    /// `None` when the value cannot be expressed in the column's type, such
    /// a value equals no cell.
    fn parse(kind: ColumnKind, value: &str) -> Option<Self> {
        let trimmed = value.trim();
        match kind {
            ColumnKind::Int => trimmed
                .parse::<i64>()
                .map(Needle::Int)
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(Needle::Float)),
            ColumnKind::Float => trimmed.parse::<f64>().ok().map(Needle::Float),
            ColumnKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Some(Needle::Bool(true)),
                "false" => Some(Needle::Bool(false)),
                _ => None,
            },
            ColumnKind::Text => Some(Needle::Text(value.to_string())),
        }
    }

    fn matches(&self, cell: &Value) -> bool {
        match (cell, self) {
            (Value::Int(a), Needle::Int(b)) => a == b,
            (Value::Int(a), Needle::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Needle::Float(b)) => a == b,
            (Value::Bool(a), Needle::Bool(b)) => a == b,
            (Value::Text(a), Needle::Text(b)) => a == b,
            _ => false,
        }
    }
}

/// Ascending indices of the cells of `column` equal to `value`.
fn matching_rows(column: &Column, value: &str) -> Vec<usize> {
    match Needle::parse(column.kind, value) {
        Some(needle) => column
            .data
            .par_iter()
            .enumerate()
            .filter(|(_, cell)| needle.matches(cell))
            .map(|(idx, _)| idx)
            .collect(),
        None => Vec::new(),
    }
}

/// Cursor over a loaded table.
///
/// In direct mode `position` indexes the table. A successful search switches
/// to filtered mode where `filter_position` indexes the matching rows; the
/// direct `position` is kept so a reset continues where browsing left off.
pub struct TableCursor {
    name: String,
    table: Table,
    columns: Vec<String>,
    position: usize,
    filter: Option<Vec<usize>>,
    filter_position: usize,
    notice: Option<Notice>,
}

impl TableCursor {
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        TableCursor {
            name: name.into(),
            columns: table.column_names(),
            table,
            position: 0,
            filter: None,
            filter_position: 0,
            notice: None,
        }
    }

    pub fn load(name: &str, source: Source) -> Result<Self, RVError> {
        let table = loader::load(name, source)?;
        Ok(TableCursor::new(loader::strip_quotes(name), table))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn filter(&self) -> Option<&[usize]> {
        self.filter.as_deref()
    }

    pub fn filter_position(&self) -> usize {
        self.filter_position
    }

    /// Table row the cursor points at, `None` for an empty table.
    pub fn current_index(&self) -> Option<usize> {
        match &self.filter {
            Some(rows) => rows.get(self.filter_position).copied(),
            None if self.position < self.table.size() => Some(self.position),
            None => None,
        }
    }

    pub fn reset(&mut self) -> RenderedRow {
        self.filter = None;
        self.filter_position = 0;
        self.render_current()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> RenderedRow {
        self.step(1)
    }

    pub fn prev(&mut self) -> RenderedRow {
        self.step(-1)
    }

    // Moves the active index with wraparound in both directions.
    fn step(&mut self, delta: isize) -> RenderedRow {
        match &self.filter {
            Some(rows) if !rows.is_empty() => {
                self.filter_position = wrap(self.filter_position, delta, rows.len());
                trace!("Filtered cursor at {}/{}", self.filter_position, rows.len());
            }
            Some(_) => {}
            None if self.table.size() > 0 => {
                self.position = wrap(self.position, delta, self.table.size());
                trace!("Cursor at {}/{}", self.position, self.table.size());
            }
            None => {}
        }
        self.render_current()
    }

    /// Keep the rows where `column` equals `value` and show the first one.
    pub fn search(&mut self, column: &str, value: &str) -> RenderedRow {
        let Some(col) = self.table.column(column) else {
            self.set_notice(
                format!("Fatal error in search: unknown column '{column}'"),
                Level::Warning,
            );
            return self.reset();
        };

        let rows = matching_rows(col, value);
        info!(
            "Search {column} == {value:?} found {} of {} rows",
            rows.len(),
            self.table.size()
        );
        if rows.is_empty() {
            self.set_notice("No matches", Level::Warning);
            self.filter = None;
            self.filter_position = 0;
            return self.render_current();
        }

        self.filter = Some(rows);
        self.filter_position = 0;
        self.render_current()
    }

    /// Display fields for the row at `index`, in column order.
    pub fn render(&self, index: usize) -> RenderedRow {
        if index >= self.table.size() {
            return Vec::new();
        }
        self.table
            .columns()
            .iter()
            .map(|c| CellKind::of(&c.data[index]).into_field(&c.name))
            .collect()
    }

    fn render_current(&mut self) -> RenderedRow {
        match self.current_index() {
            Some(idx) => self.render(idx),
            None => {
                if self.notice.is_none() {
                    self.set_notice("Dataset has no rows", Level::Info);
                }
                Vec::new()
            }
        }
    }

    pub fn set_notice(&mut self, text: impl Into<String>, level: impl Into<Level>) {
        self.notice = Some(Notice::new(text, level));
    }

    /// Return the pending notice and clear it.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    /// Like `take_notice`, but an empty warning when nothing is pending.
    pub fn read_and_clear_error(&mut self) -> Notice {
        self.take_notice().unwrap_or_default()
    }
}

fn wrap(current: usize, delta: isize, len: usize) -> usize {
    (current as isize + delta).rem_euclid(len as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(csv: &str) -> TableCursor {
        TableCursor::load("test.csv", Source::Bytes(csv.as_bytes().to_vec())).unwrap()
    }

    fn value_of(row: &RenderedRow, column: &str) -> String {
        row.iter()
            .find(|f| f.column == column)
            .map(|f| f.value.clone())
            .unwrap()
    }

    #[test]
    fn level_falls_back_to_warning() {
        assert_eq!(Level::from("info"), Level::Info);
        assert_eq!(Level::from("critical"), Level::Warning);
        assert_eq!(Notice::default().level, Level::Warning);
    }

    #[test]
    fn next_and_prev_wrap_around() {
        let mut c = cursor("id\n1\n2\n3\n");
        assert_eq!(value_of(&c.reset(), "id"), "1");
        assert_eq!(value_of(&c.prev(), "id"), "3");
        assert_eq!(value_of(&c.next(), "id"), "1");
        assert_eq!(value_of(&c.next(), "id"), "2");
    }

    #[test]
    fn full_cycle_returns_to_start() {
        let mut c = cursor("id\n1\n2\n3\n4\n5\n");
        c.next();
        c.next();
        let start = c.reset();
        for _ in 0..c.size() {
            c.next();
        }
        assert_eq!(c.reset(), start);
        for _ in 0..c.size() {
            c.prev();
        }
        assert_eq!(c.reset(), start);
    }

    #[test]
    fn search_enters_filtered_mode() {
        let mut c = cursor("id,group\n1,a\n2,b\n3,a\n4,a\n");
        let row = c.search("group", "a");
        assert_eq!(value_of(&row, "id"), "1");
        assert_eq!(c.filter(), Some(&[0usize, 2, 3][..]));
        assert_eq!(value_of(&c.next(), "id"), "3");
        assert_eq!(value_of(&c.next(), "id"), "4");
        assert_eq!(value_of(&c.next(), "id"), "1");
        assert_eq!(value_of(&c.prev(), "id"), "4");
        assert!(c.take_notice().is_none());
    }

    #[test]
    fn single_match_stays_put() {
        let mut c = cursor("id\n1\n2\n3\n");
        assert_eq!(value_of(&c.search("id", "2"), "id"), "2");
        assert_eq!(value_of(&c.next(), "id"), "2");
        assert_eq!(value_of(&c.prev(), "id"), "2");
    }

    #[test]
    fn reset_resumes_direct_position() {
        let mut c = cursor("id,group\n1,a\n2,b\n3,a\n4,b\n");
        c.next(); // position 1
        c.search("group", "a");
        c.next();
        c.reset();
        assert_eq!(c.position(), 1);
        assert_eq!(value_of(&c.next(), "id"), "3");
    }

    #[test]
    fn no_matches_is_reported_once() {
        let mut c = cursor("id\n1\n2\n3\n");
        c.next();
        let row = c.search("id", "42");
        assert_eq!(value_of(&row, "id"), "2");
        assert!(c.filter().is_none());
        assert_eq!(c.read_and_clear_error(), Notice::new("No matches", Level::Warning));
        assert_eq!(c.read_and_clear_error(), Notice::default());
        assert_eq!(value_of(&c.next(), "id"), "3");
    }

    #[test]
    fn no_matches_clears_previous_filter() {
        let mut c = cursor("id,group\n1,a\n2,b\n");
        c.search("group", "b");
        c.search("group", "zzz");
        assert!(c.filter().is_none());
        assert_eq!(c.current_index(), Some(0));
    }

    #[test]
    fn unknown_column_falls_back_to_reset() {
        let mut c = cursor("id,group\n1,a\n2,b\n");
        c.search("group", "b");
        let row = c.search("missing", "x");
        assert_eq!(value_of(&row, "id"), "1");
        assert!(c.filter().is_none());
        let notice = c.read_and_clear_error();
        assert!(notice.text.starts_with("Fatal error in search: "));
        assert!(notice.text.contains("missing"));
        assert_eq!(notice.level, Level::Warning);
    }

    #[test]
    fn search_compares_native_values() {
        let mut c = cursor("id,score,name\n1,1.5,x\n2,3.0,007\n3,3,x\n");
        c.search("score", "3");
        assert_eq!(c.filter(), Some(&[1usize, 2][..]));
        c.search("id", "2.0");
        assert_eq!(c.filter(), Some(&[1usize][..]));
        c.search("name", "7");
        assert!(c.filter().is_none());
        c.search("name", "007");
        assert_eq!(c.filter(), Some(&[1usize][..]));
        c.search("id", "abc");
        assert_eq!(c.read_and_clear_error().text, "No matches");
    }

    #[test]
    fn text_search_is_exact() {
        let mut c = cursor("name\nAnna\nanna\nAnnabel\n");
        c.search("name", "Anna");
        assert_eq!(c.filter(), Some(&[0usize][..]));
        c.search("name", " Anna");
        assert!(c.filter().is_none());
    }

    #[test]
    fn render_labels() {
        let long = "x".repeat(25);
        let mut c = cursor(&format!("num,flt,short,long,missing\n7,3.0,hi,{long},\n"));
        let row = c.reset();
        assert_eq!(
            row,
            vec![
                Field {
                    column: "num".into(),
                    label: FieldLabel::Text,
                    value: "7".into()
                },
                Field {
                    column: "flt".into(),
                    label: FieldLabel::Text,
                    value: "3.0".into()
                },
                Field {
                    column: "short".into(),
                    label: FieldLabel::Text,
                    value: "hi".into()
                },
                Field {
                    column: "long".into(),
                    label: FieldLabel::Textarea,
                    value: long.clone()
                },
                Field {
                    column: "missing".into(),
                    label: FieldLabel::Text,
                    value: "None".into()
                },
            ]
        );
    }

    #[test]
    fn twenty_chars_is_still_text() {
        let c = cursor(&format!("s\n{}\n", "y".repeat(20)));
        assert_eq!(c.render(0)[0].label, FieldLabel::Text);
    }

    #[test]
    fn render_is_idempotent() {
        let c = cursor("a,b\n1,x\n2,y\n");
        assert_eq!(c.render(1), c.render(1));
    }

    #[test]
    fn rendered_columns_follow_header_order() {
        let c = cursor("zeta,alpha,mid\n1,2,3\n4,5,6\n");
        for idx in 0..c.size() {
            let names: Vec<String> = c.render(idx).into_iter().map(|f| f.column).collect();
            assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        }
    }

    #[test]
    fn empty_table_renders_nothing() {
        let mut c = TableCursor::new("empty", Table::new(Vec::new()));
        assert!(c.reset().is_empty());
        assert!(c.next().is_empty());
        assert_eq!(c.read_and_clear_error().level, Level::Info);
        c.search("x", "1");
        assert!(c.read_and_clear_error().text.starts_with("Fatal error in search"));
    }
}
