//! Error taxonomy for the upload pipeline.
//!
//! Every fatal condition maps to one [`UploadError`] variant so callers can
//! match on the class (for example retrying only on
//! [`UploadError::LockContention`]). Messages carry enough context (table,
//! column, example values) to diagnose a failure without re-running.

use std::fmt::Write as _;

use thiserror::Error;

use crate::catalog::{CatalogError, StoreError};

/// Maximum number of offending values reported in an error message.
pub const MAX_REPORTED_VALUES: usize = 5;

/// Offending values are cut to this many characters in messages.
pub const MAX_REPORTED_VALUE_CHARS: usize = 200;

/// A value that could not be represented, with its zero-based row position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadValue {
    pub row: usize,
    pub value: String,
}

impl BadValue {
    pub fn new(row: usize, value: &str) -> Self {
        Self {
            row,
            value: value.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    /// Incompatible options or missing credentials (U001)
    #[error("[U001] Invalid configuration: {0}")]
    Configuration(String),

    /// No candidate type fits, or a predefined type is rejected by the data (U002)
    #[error(
        "[U002] Column '{column}' failed to be cast to {attempted}\n{}",
        render_values(.examples)
    )]
    TypeResolution {
        column: String,
        attempted: String,
        examples: Vec<BadValue>,
    },

    /// Local columns that do not exist on the remote table (U003)
    #[error(
        "[U003] Table {table} has no column(s) named {}. Adding columns is not supported; \
         if these columns are not a mistake, add them to the table by running:\n{}",
        .columns.join(", "),
        .statements.join("\n")
    )]
    SchemaIncompatible {
        table: String,
        columns: Vec<String>,
        statements: Vec<String>,
    },

    /// Strings wider than the table can hold even after widening (U004)
    #[error(
        "[U004] Unable to load data to table {table}: column '{column}' had {count} string(s) \
         longer than the table can support (max length: {max_width})\n{}",
        render_values(.examples)
    )]
    Capacity {
        table: String,
        column: String,
        count: usize,
        max_width: usize,
        examples: Vec<BadValue>,
    },

    /// The warehouse refused to grow a VARCHAR column in place (U009)
    #[error(
        "[U009] Unable to expand column '{column}' of {table} from VARCHAR({from}) to \
         VARCHAR({to}) for {count} string(s) longer than {from}: {message}\n{}",
        render_values(.examples)
    )]
    WideningFailed {
        table: String,
        column: String,
        from: usize,
        to: usize,
        count: usize,
        examples: Vec<BadValue>,
        message: String,
    },

    /// A competing session kept the table lock (U005)
    #[error("[U005] Could not acquire an exclusive lock on {table}: {message}")]
    LockContention { table: String, message: String },

    /// Expired or mismatched blob store credentials (U006)
    #[error(
        "[U006] Staging '{key}' was rejected by the blob store. \
         This happens when the store credentials have expired: {message}"
    )]
    TransientStore { key: String, message: String },

    /// Two source headers normalize to the same column name (U007)
    #[error("[U007] Columns '{first}' and '{second}' both normalize to '{name}'")]
    DuplicateColumn {
        name: String,
        first: String,
        second: String,
    },

    /// Source data could not be read (U008)
    #[error("[U008] Invalid source: {0}")]
    Source(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Truncates a value to [`MAX_REPORTED_VALUE_CHARS`] characters.
pub fn clip(value: &str) -> &str {
    match value.char_indices().nth(MAX_REPORTED_VALUE_CHARS) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

fn render_values(values: &[BadValue]) -> String {
    let mut rendered = String::from("The first offending values are:");
    for bad in values.iter().take(MAX_REPORTED_VALUES) {
        let _ = write!(
            rendered,
            "\n  {} <- (length: {}, index: {})",
            clip(&bad.value),
            bad.value.len(),
            bad.row
        );
    }
    rendered
}
