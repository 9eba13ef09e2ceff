use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::time::Instant;

use encoding_rs::WINDOWS_1252;
use polars::prelude::*;
use tracing::{info, instrument, trace, warn};

use crate::domain::RVError;
use crate::sas7bdat;
use crate::table::{Column, ColumnKind, Table, Value};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Where the bytes of a dataset come from.
pub enum Source {
    /// Content that was already read, e.g. an upload or stdin.
    Bytes(Vec<u8>),
    /// A path typed by the user. May point to a file or a directory.
    Path(String),
}

#[derive(Debug, PartialEq)]
enum FileType {
    CSV,
    SAS7BDAT,
    DIRECTORY,
}

/// Strip the quote characters a copy-pasted path tends to carry.
pub fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

/// Expand `~` and environment variables in a typed path.
pub fn expand_path(path: &str) -> String {
    match shellexpand::full(path) {
        Ok(expanded) => expanded.into_owned(),
        Err(e) => {
            trace!("Could not expand {path}: {e}");
            shellexpand::tilde(path).into_owned()
        }
    }
}

/// Load `source` into a table. The kind of source is decided by `name`
/// first and by the shape of the path second.
#[instrument(skip(source))]
pub fn load(name: &str, source: Source) -> Result<Table, RVError> {
    let name = strip_quotes(name);
    let source = match source {
        Source::Path(p) => Source::Path(expand_path(strip_quotes(&p))),
        bytes => bytes,
    };
    let start_time = Instant::now();

    let table = match detect_file_type(name, &source)? {
        FileType::CSV => load_csv(read_source(source)?)?,
        FileType::SAS7BDAT => sas7bdat::read(&read_source(source)?)?,
        FileType::DIRECTORY => match source {
            Source::Path(dir) => load_directory(Path::new(&dir))?,
            Source::Bytes(_) => return Err(RVError::UnsupportedFormat(name.to_string())),
        },
    };

    info!(
        "Loaded {} rows x {} columns from {name} in {}ms",
        table.size(),
        table.columns().len(),
        start_time.elapsed().as_millis()
    );
    Ok(table)
}

fn detect_file_type(name: &str, source: &Source) -> Result<FileType, RVError> {
    match Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("CSV") => Ok(FileType::CSV),
        Some("SAS7BDAT") => Ok(FileType::SAS7BDAT),
        _ => match source {
            Source::Path(p) if Path::new(p).is_dir() => Ok(FileType::DIRECTORY),
            Source::Path(p) => Err(RVError::UnsupportedFormat(p.clone())),
            Source::Bytes(_) => Err(RVError::UnsupportedFormat(name.to_string())),
        },
    }
}

fn read_source(source: Source) -> Result<Vec<u8>, RVError> {
    match source {
        Source::Bytes(bytes) => Ok(bytes),
        Source::Path(path) => fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RVError::FileNotFound(path),
            ErrorKind::PermissionDenied => RVError::PermissionDenied(path),
            _ => RVError::IoError(e),
        }),
    }
}

/// Decode bytes with the legacy single byte encoding (cp1252).
///
/// encoding_rs maps every one of the 256 bytes, so this never fails.
pub(crate) fn decode_legacy(bytes: &[u8]) -> String {
    WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
}

fn load_csv(bytes: Vec<u8>) -> Result<Table, RVError> {
    let bytes = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_vec(),
        None => bytes,
    };
    // Not utf-8, give the legacy encoding one chance before failing.
    let bytes = if std::str::from_utf8(&bytes).is_ok() {
        bytes
    } else {
        warn!("CSV is not valid utf-8, retrying as cp1252");
        decode_legacy(&bytes).into_bytes()
    };

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    Ok(Table::from_frame(&df)?)
}

/// Every entry of `dir` becomes one record `{filename, text}`. Only `.txt`
/// entries are allowed, anything else fails the whole load.
fn load_directory(dir: &Path) -> Result<Table, RVError> {
    let mut filenames = Vec::new();
    let mut texts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        let text = read_text_file(&filename, &entry.path())?;
        trace!("Read {filename} ({} bytes)", text.len());
        filenames.push(Value::Text(filename));
        texts.push(Value::Text(text));
    }
    Ok(Table::new(vec![
        Column::new("filename", ColumnKind::Text, filenames),
        Column::new("text", ColumnKind::Text, texts),
    ]))
}

fn read_text_file(filename: &str, path: &Path) -> Result<String, RVError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("TXT") => fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::InvalidData => RVError::Decoding(filename.to_string()),
            _ => RVError::IoError(e),
        }),
        _ => Err(RVError::UnsupportedFormat(filename.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(content: &[u8]) -> Source {
        Source::Bytes(content.to_vec())
    }

    #[test]
    fn strips_quotes_on_both_ends() {
        assert_eq!(strip_quotes("\"/tmp/a.csv\""), "/tmp/a.csv");
        assert_eq!(strip_quotes("'a.csv'"), "a.csv");
        assert_eq!(strip_quotes("a.csv"), "a.csv");
    }

    #[test]
    fn csv_header_order_is_kept() {
        let table = load("data.csv", csv(b"b,a,c\n1,x,2.5\n2,y,3.0\n")).unwrap();
        assert_eq!(table.column_names(), vec!["b", "a", "c"]);
        assert_eq!(table.size(), 2);
        assert_eq!(table.cell(0, 0), &Value::Int(1));
        assert_eq!(table.cell(1, 1), &Value::Text("y".into()));
        assert_eq!(table.cell(1, 2), &Value::Float(3.0));
    }

    #[test]
    fn csv_extension_is_case_insensitive() {
        assert!(load("DATA.CSV", csv(b"a\n1\n")).is_ok());
    }

    #[test]
    fn quoted_name_is_recognized() {
        assert!(load("\"data.csv\"", csv(b"a\n1\n")).is_ok());
    }

    #[test]
    fn legacy_encoded_csv_is_retried() {
        // 0xE9 is an e with acute accent in cp1252 and invalid utf-8 here.
        let table = load("data.csv", csv(b"name\ncaf\xE9\n")).unwrap();
        assert_eq!(table.cell(0, 0), &Value::Text("café".into()));
    }

    #[test]
    fn legacy_decoding_maps_every_byte() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_legacy(&all).chars().count(), 256);
        assert_eq!(decode_legacy(b"M\xFCnchen"), "München");
    }

    #[test]
    fn text_file_that_is_not_utf8_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"caf\xE9").unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        match load("notes", Source::Path(path)) {
            Err(RVError::Decoding(what)) => assert_eq!(what, "a.txt"),
            other => panic!("unexpected result {:?}", other.map(|t| t.size())),
        }
    }

    #[test]
    fn utf8_bom_is_ignored() {
        let table = load("data.csv", csv(b"\xEF\xBB\xBFid\n1\n")).unwrap();
        assert_eq!(table.column_names(), vec!["id"]);
    }

    #[test]
    fn missing_cells_are_null() {
        let table = load("data.csv", csv(b"a,b\n1,\n2,x\n")).unwrap();
        assert_eq!(table.cell(0, 1), &Value::Null);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        match load("data.json", csv(b"{}")) {
            Err(RVError::UnsupportedFormat(what)) => assert_eq!(what, "data.json"),
            other => panic!("unexpected result {:?}", other.map(|t| t.size())),
        }
    }

    #[test]
    fn missing_csv_file_is_reported() {
        let err = load("nope.csv", Source::Path("/definitely/not/here/nope.csv".into()));
        assert!(matches!(err, Err(RVError::FileNotFound(_))));
    }

    #[test]
    fn directory_of_text_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "world").unwrap();
        let path = dir.path().to_string_lossy().into_owned();

        let table = load("ignored", Source::Path(path)).unwrap();
        assert_eq!(table.column_names(), vec!["filename", "text"]);
        let mut records: Vec<(String, String)> = (0..table.size())
            .map(|r| (table.cell(r, 0).to_string(), table.cell(r, 1).to_string()))
            .collect();
        records.sort();
        assert_eq!(
            records,
            vec![
                ("a.txt".to_string(), "hello".to_string()),
                ("b.txt".to_string(), "world".to_string())
            ]
        );
    }

    #[test]
    fn directory_with_foreign_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.csv"), "x\n1\n").unwrap();
        let path = dir.path().to_string_lossy().into_owned();

        match load("ignored", Source::Path(path)) {
            Err(RVError::UnsupportedFormat(what)) => assert_eq!(what, "b.csv"),
            other => panic!("unexpected result {:?}", other.map(|t| t.size())),
        }
    }

    #[test]
    fn empty_directory_keeps_record_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        let table = load("", Source::Path(path)).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.column_names(), vec!["filename", "text"]);
    }

    #[test]
    fn bytes_without_extension_are_rejected() {
        assert!(matches!(
            load("upload", csv(b"a\n1\n")),
            Err(RVError::UnsupportedFormat(_))
        ));
    }
}
