use std::path::Path;

use tracing::{info, instrument};

use crate::cursor::{Notice, RenderedRow, TableCursor};
use crate::domain::RVError;
use crate::loader::{Source, strip_quotes};

/// Dataset content handed over by the front-end, e.g. read from stdin.
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.bytes.is_empty()
    }
}

/// Owns the single active dataset and its cursor.
///
/// A new successful load replaces the previous dataset, a failed one leaves
/// it untouched.
#[derive(Default)]
pub struct Session {
    cursor: Option<TableCursor>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn cursor(&self) -> Option<&TableCursor> {
        self.cursor.as_ref()
    }

    /// Load an upload, or the dataset at `path` when there is no upload.
    /// Returns `false` when neither was given.
    #[instrument(skip(self, upload))]
    pub fn submit_load_request(
        &mut self,
        upload: Option<Upload>,
        path: Option<&str>,
    ) -> Result<bool, RVError> {
        let upload = upload.filter(|u| !u.is_empty());
        let path = path.map(str::trim).filter(|p| !p.is_empty());

        let cursor = match (upload, path) {
            (Some(upload), _) => TableCursor::load(&upload.name, Source::Bytes(upload.bytes))?,
            (None, Some(path)) => {
                let name = Path::new(strip_quotes(path))
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                TableCursor::load(&name, Source::Path(path.to_string()))?
            }
            (None, None) => return Ok(false),
        };

        info!(
            "Active dataset is now {} ({} rows)",
            cursor.name(),
            cursor.size()
        );
        self.cursor = Some(cursor);
        Ok(true)
    }

    /// Search when `is_search` is set, reset otherwise. The pending notice
    /// is read and cleared in both cases.
    pub fn submit_view_request(
        &mut self,
        column: &str,
        is_search: bool,
        value: &str,
    ) -> Result<(RenderedRow, Notice), RVError> {
        let cursor = self.cursor.as_mut().ok_or(RVError::NoDataset)?;
        let row = if is_search {
            cursor.search(column, value)
        } else {
            cursor.reset()
        };
        Ok((row, cursor.read_and_clear_error()))
    }

    pub fn next(&mut self) -> Result<(RenderedRow, Notice), RVError> {
        let cursor = self.cursor.as_mut().ok_or(RVError::NoDataset)?;
        let row = cursor.next();
        Ok((row, cursor.read_and_clear_error()))
    }

    pub fn prev(&mut self) -> Result<(RenderedRow, Notice), RVError> {
        let cursor = self.cursor.as_mut().ok_or(RVError::NoDataset)?;
        let row = cursor.prev();
        Ok((row, cursor.read_and_clear_error()))
    }

    pub fn column_choices(&self) -> &[String] {
        self.cursor.as_ref().map(|c| c.columns()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, content: &str) -> Option<Upload> {
        Some(Upload {
            name: name.to_string(),
            bytes: content.as_bytes().to_vec(),
        })
    }

    #[test]
    fn nothing_submitted() {
        let mut session = Session::new();
        assert!(!session.submit_load_request(None, None).unwrap());
        assert!(!session.submit_load_request(None, Some("  ")).unwrap());
        assert!(!session.is_loaded());
        assert!(session.column_choices().is_empty());
    }

    #[test]
    fn view_without_dataset_fails() {
        let mut session = Session::new();
        assert!(matches!(
            session.submit_view_request("a", false, ""),
            Err(RVError::NoDataset)
        ));
        assert!(matches!(session.next(), Err(RVError::NoDataset)));
    }

    #[test]
    fn upload_wins_over_path() {
        let mut session = Session::new();
        let loaded = session
            .submit_load_request(upload("up.csv", "a,b\n1,2\n"), Some("/no/such/file.csv"))
            .unwrap();
        assert!(loaded);
        assert_eq!(session.column_choices(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn failed_load_keeps_previous_dataset() {
        let mut session = Session::new();
        session
            .submit_load_request(upload("first.csv", "x\n1\n"), None)
            .unwrap();
        let err = session.submit_load_request(upload("second.parquet", "??"), None);
        assert!(matches!(err, Err(RVError::UnsupportedFormat(_))));
        assert_eq!(session.cursor().unwrap().name(), "first.csv");
    }

    #[test]
    fn view_request_returns_notice_once() {
        let mut session = Session::new();
        session
            .submit_load_request(upload("d.csv", "id\n1\n2\n"), None)
            .unwrap();
        let (row, notice) = session.submit_view_request("id", true, "9").unwrap();
        assert_eq!(row[0].value, "1");
        assert_eq!(notice.text, "No matches");
        let (_, notice) = session.submit_view_request("id", false, "").unwrap();
        assert!(notice.is_empty());
    }

    #[test]
    fn navigation_passthrough() {
        let mut session = Session::new();
        session
            .submit_load_request(upload("d.csv", "id\n1\n2\n"), None)
            .unwrap();
        let (row, _) = session.next().unwrap();
        assert_eq!(row[0].value, "2");
        let (row, _) = session.next().unwrap();
        assert_eq!(row[0].value, "1");
        let (row, _) = session.prev().unwrap();
        assert_eq!(row[0].value, "2");
    }
}
