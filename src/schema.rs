//! Column model and the column resolver.
//!
//! The resolver turns a [`SourceTable`] into a [`TableSnapshot`]: headers are
//! normalized into warehouse column names, then every column is either checked
//! against a known type (remote or caller-declared) or inferred by walking the
//! type lattice over all of its values.
//!
//! ## Responsibilities
//!
//! - Column name normalization and collision detection
//! - Remote-over-declared-over-inferred type precedence
//! - Reporting up to five offending values when a type does not fit
//! - YAML column-type files (`infer -o`, `--column-types`)

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::RemoteColumn,
    error::{BadValue, MAX_REPORTED_VALUES, UploadError, UploadResult},
    source::SourceTable,
    sql::TableName,
    types::{ColumnType, MAX_VARCHAR_WIDTH, TypeKind, TypeState, probe},
};

/// Longest identifier the warehouse accepts.
pub const MAX_COLUMN_NAME_LENGTH: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrigin {
    /// Supplied by the caller.
    #[default]
    Predefined,
    /// Read from the existing warehouse table.
    Remote,
    /// Discovered by scanning the data.
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub origin: ColumnOrigin,
    /// Longest local value in UTF-8 bytes.
    #[serde(skip)]
    pub observed_width: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, origin: ColumnOrigin) -> Self {
        Self {
            name: name.into(),
            column_type,
            origin,
            observed_width: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub table: TableName,
    pub columns: Vec<Column>,
    pub exists_remotely: bool,
}

impl TableSnapshot {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn to_schema_file(&self) -> SchemaFile {
        SchemaFile {
            columns: self.columns.clone(),
        }
    }
}

/// Column types persisted as YAML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaFile {
    pub columns: Vec<Column>,
}

impl SchemaFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening column type file {path:?}"))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).context("Parsing column type YAML")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating column type file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing column type YAML")
    }

    /// Declared types keyed by normalized column name.
    pub fn declared(&self) -> BTreeMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|column| (normalize_name(&column.name), column.column_type))
            .collect()
    }
}

/// Lower-cases, maps `.` to `_` and truncates to [`MAX_COLUMN_NAME_LENGTH`].
pub fn normalize_name(header: &str) -> String {
    truncate_chars(&header.to_lowercase().replace('.', "_"), MAX_COLUMN_NAME_LENGTH)
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Normalizes every header. A repeated header gets its prior occurrence count
/// appended (`a`, `a1`, `a2`); any collision left after that is an error.
pub fn normalize_column_names(headers: &[String]) -> UploadResult<Vec<String>> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut assigned: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let lowered = header.to_lowercase();
        let count = occurrences.entry(lowered.clone()).or_insert(0);
        let prior = *count;
        *count += 1;

        let base = lowered.replace('.', "_");
        let name = if prior == 0 {
            truncate_chars(&base, MAX_COLUMN_NAME_LENGTH)
        } else {
            let suffix = prior.to_string();
            let mut name = truncate_chars(&base, MAX_COLUMN_NAME_LENGTH - suffix.len());
            name.push_str(&suffix);
            name
        };
        if let Some(&first) = assigned.get(&name) {
            return Err(UploadError::DuplicateColumn {
                name,
                first: headers[first].clone(),
                second: header.clone(),
            });
        }
        assigned.insert(name.clone(), idx);
        names.push(name);
    }
    Ok(names)
}

/// Resolves a type for every column of `data`.
///
/// Remote definitions win over `declared` ones, which win over inference.
/// Remote VARCHAR columns keep their declared width here; overflow is left
/// to the reconciler, which can widen the column in place.
pub fn resolve(
    table: &TableName,
    data: &SourceTable,
    declared: &BTreeMap<String, ColumnType>,
    remote: &[RemoteColumn],
    exists_remotely: bool,
) -> UploadResult<TableSnapshot> {
    info!("Determining proper column types for serialization");
    let names = normalize_column_names(&data.headers)?;
    let declared: BTreeMap<String, ColumnType> = declared
        .iter()
        .map(|(name, column_type)| (normalize_name(name), *column_type))
        .collect();

    let mut columns = Vec::with_capacity(names.len());
    for (idx, name) in names.into_iter().enumerate() {
        let values = data.column(idx);
        let column = if let Some(existing) = remote.iter().find(|col| col.name == name) {
            check_known(name, existing.column_type, ColumnOrigin::Remote, values)?
        } else if let Some(column_type) = declared.get(&name) {
            check_known(name, *column_type, ColumnOrigin::Predefined, values)?
        } else {
            infer_column(name, values)?
        };
        debug!(
            "Column '{}' resolved to {} ({:?})",
            column.name, column.column_type, column.origin
        );
        columns.push(column);
    }

    Ok(TableSnapshot {
        table: table.clone(),
        columns,
        exists_remotely,
    })
}

/// Probes only `column_type` over every value.
fn check_known<'a>(
    name: String,
    mut column_type: ColumnType,
    origin: ColumnOrigin,
    values: impl Iterator<Item = &'a str>,
) -> UploadResult<Column> {
    let mut state = TypeState::default();
    let mut bad = Vec::new();
    for (row, value) in values.enumerate() {
        if !probe(column_type.kind, value, &mut state) && bad.len() < MAX_REPORTED_VALUES {
            bad.push(BadValue::new(row, value));
        }
    }
    let remote_varchar = origin == ColumnOrigin::Remote && column_type.is_varchar();
    if !bad.is_empty() && !remote_varchar {
        return Err(UploadError::TypeResolution {
            column: name,
            attempted: column_type.to_string(),
            examples: bad,
        });
    }
    if origin == ColumnOrigin::Predefined {
        column_type.widen_to(state.varchar_width());
    }
    Ok(Column {
        name,
        column_type,
        origin,
        observed_width: state.max_width,
    })
}

/// Keeps the first candidate of the discovery order that fits every value.
fn infer_column<'a>(name: String, values: impl Iterator<Item = &'a str>) -> UploadResult<Column> {
    let mut viable = TypeKind::DISCOVERY_ORDER.to_vec();
    let mut state = TypeState::default();
    let mut has_values = false;
    let mut oversized = Vec::new();

    for (row, value) in values.enumerate() {
        has_values |= !value.is_empty();
        viable.retain(|kind| probe(*kind, value, &mut state));
        if value.len() > MAX_VARCHAR_WIDTH && oversized.len() < MAX_REPORTED_VALUES {
            oversized.push(BadValue::new(row, value));
        }
    }

    let column_type = match viable.first() {
        _ if !has_values => ColumnType::varchar(state.varchar_width()),
        Some(TypeKind::Varchar) => ColumnType::varchar(state.varchar_width()),
        Some(kind) => ColumnType::scalar(*kind),
        None => {
            return Err(UploadError::TypeResolution {
                column: name,
                attempted: "any supported type".to_string(),
                examples: oversized,
            });
        }
    };
    Ok(Column {
        name,
        column_type,
        origin: ColumnOrigin::Inferred,
        observed_width: state.max_width,
    })
}
