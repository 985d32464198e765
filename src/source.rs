//! Source adapter: normalizes every supported input into one row-major
//! [`SourceTable`] of text cells, where an empty cell means NULL.

use std::{
    fs,
    path::{Path, PathBuf},
};

use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde_json::{Map, Value};

use crate::{
    error::{UploadError, UploadResult},
    io_utils,
};

/// The inputs an upload accepts.
#[derive(Debug, Clone)]
pub enum Source {
    /// Header names plus rows of optional cells.
    Rows {
        headers: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// Structured records; columns appear in first-seen key order.
    Records(Vec<Map<String, Value>>),
    /// Delimited text held in memory.
    DelimitedText(String),
    /// A file on disk, dispatched on its extension.
    FilePath(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
    pub has_header: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
            has_header: true,
        }
    }
}

/// Canonical row-major table produced by every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// False when the headers were synthesized for header-less text.
    pub has_header: bool,
}

impl SourceTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }
}

pub fn load(source: Source, options: &ReadOptions) -> UploadResult<SourceTable> {
    let table = match source {
        Source::Rows { headers, rows } => from_rows(headers, rows)?,
        Source::Records(records) => from_records(&records),
        Source::DelimitedText(text) => {
            let delimiter = options.delimiter.unwrap_or(io_utils::DEFAULT_CSV_DELIMITER);
            // Already decoded; `encoding` only applies to bytes read from disk.
            let reader = io_utils::open_csv_reader(text.as_bytes(), delimiter, false);
            from_delimited(reader, UTF_8, options.has_header)?
        }
        Source::FilePath(path) => from_path(&path, options)?,
    };
    debug!(
        "Loaded source with {} column(s) and {} row(s)",
        table.headers.len(),
        table.rows.len()
    );
    Ok(table)
}

fn from_rows(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> UploadResult<SourceTable> {
    let width = headers.len();
    let rows = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| {
            if row.len() != width {
                return Err(UploadError::Source(format!(
                    "Row {idx} has {} value(s) but there are {width} header(s)",
                    row.len()
                )));
            }
            Ok(row.into_iter().map(Option::unwrap_or_default).collect())
        })
        .collect::<UploadResult<Vec<Vec<String>>>>()?;
    Ok(SourceTable {
        headers,
        rows,
        has_header: true,
    })
}

fn from_records(records: &[Map<String, Value>]) -> SourceTable {
    let mut headers: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !headers.iter().any(|existing| existing == key) {
                headers.push(key.clone());
            }
        }
    }
    let rows = records
        .iter()
        .map(|record| {
            headers
                .iter()
                .map(|header| record.get(header).map(stringify).unwrap_or_default())
                .collect()
        })
        .collect();
    SourceTable {
        headers,
        rows,
        has_header: true,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        nested => nested.to_string(),
    }
}

fn from_delimited<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    encoding: &'static Encoding,
    has_header: bool,
) -> UploadResult<SourceTable> {
    let mut records = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let decoded = io_utils::decode_record(&record, encoding)
            .map_err(|err| UploadError::Source(format!("{err:#}")))?;
        records.push(decoded);
    }
    let mut rows = records.into_iter();
    let headers = if has_header {
        rows.next().unwrap_or_default()
    } else {
        Vec::new()
    };
    let rows: Vec<Vec<String>> = rows.collect();
    let headers = if has_header {
        headers
    } else {
        let count = rows.first().map(Vec::len).unwrap_or_default();
        generate_field_names(count)
    };
    Ok(SourceTable {
        headers,
        rows,
        has_header,
    })
}

fn from_path(path: &Path, options: &ReadOptions) -> UploadResult<SourceTable> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        _ if io_utils::is_dash(path) => delimited_file(path, options),
        Some("csv" | "tsv" | "txt") => delimited_file(path, options),
        Some("json") => {
            let text = fs::read_to_string(path)?;
            let records: Vec<Map<String, Value>> = serde_json::from_str(&text)?;
            Ok(from_records(&records))
        }
        Some("jsonl" | "ndjson") => {
            let text = fs::read_to_string(path)?;
            let records = text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<Result<Vec<Map<String, Value>>, _>>()?;
            Ok(from_records(&records))
        }
        _ => Err(UploadError::Source(format!(
            "Unsupported source file {path:?}; expected .csv, .tsv, .txt, .json, .jsonl or .ndjson"
        ))),
    }
}

fn delimited_file(path: &Path, options: &ReadOptions) -> UploadResult<SourceTable> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let reader = io_utils::open_csv_reader_from_path(path, delimiter, false)
        .map_err(|err| UploadError::Source(format!("{err:#}")))?;
    from_delimited(reader, options.encoding, options.has_header)
}

fn generate_field_names(count: usize) -> Vec<String> {
    (1..=count).map(|idx| format!("field_{idx}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_keep_first_seen_key_order() {
        let records = vec![
            json!({"b": 1, "a": true}).as_object().unwrap().clone(),
            json!({"a": null, "c": "x"}).as_object().unwrap().clone(),
        ];
        let table = load(Source::Records(records), &ReadOptions::default()).unwrap();
        assert_eq!(table.headers, vec!["b", "a", "c"]);
        assert_eq!(table.rows[0], vec!["1", "true", ""]);
        assert_eq!(table.rows[1], vec!["", "", "x"]);
    }

    #[test]
    fn delimited_text_uses_first_row_as_header() {
        let text = "id,name\n1,alpha\n2,\"be,ta\"\n".to_string();
        let table = load(Source::DelimitedText(text), &ReadOptions::default()).unwrap();
        assert_eq!(table.headers, vec!["id", "name"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column(1).collect::<Vec<_>>(), vec!["alpha", "be,ta"]);
    }

    #[test]
    fn in_memory_text_ignores_the_file_encoding() {
        let options = ReadOptions {
            encoding: encoding_rs::WINDOWS_1252,
            ..ReadOptions::default()
        };
        let text = "city,price\nZ\u{fc}rich,\u{20ac}5\n".to_string();
        let table = load(Source::DelimitedText(text), &options).unwrap();
        assert_eq!(table.rows[0], vec!["Z\u{fc}rich", "\u{20ac}5"]);
    }

    #[test]
    fn header_less_text_gets_synthetic_names() {
        let options = ReadOptions {
            has_header: false,
            ..ReadOptions::default()
        };
        let table = load(Source::DelimitedText("1,2\n3,4\n".into()), &options).unwrap();
        assert_eq!(table.headers, vec!["field_1", "field_2"]);
        assert_eq!(table.row_count(), 2);
        assert!(!table.has_header);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let source = Source::Rows {
            headers: vec!["a".into(), "b".into()],
            rows: vec![vec![Some("1".into())]],
        };
        let err = load(source, &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, UploadError::Source(_)));
    }

    #[test]
    fn unsupported_extension_is_a_source_error() {
        let err = load(
            Source::FilePath(PathBuf::from("report.xlsx")),
            &ReadOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported source file"));
    }
}
