//! Schema reconciliation between a resolved local snapshot and the remote
//! table.

use std::borrow::Cow;

use log::{info, warn};

use crate::{
    catalog::{Catalog, RemoteColumn},
    error::{BadValue, MAX_REPORTED_VALUES, UploadError, UploadResult},
    schema::{Column, ColumnOrigin, TableSnapshot},
    source::SourceTable,
    sql::{Statement, TableName, quote_ident},
    types::{ColumnType, MAX_VARCHAR_WIDTH},
};

/// A remote VARCHAR column that must grow before the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widening {
    pub column: String,
    pub from: usize,
    pub to: usize,
    /// Values longer than `from`.
    pub count: usize,
    pub examples: Vec<BadValue>,
}

/// Final column layout for the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub columns: Vec<Column>,
    /// Source column feeding each final column; `None` loads NULL.
    pub source_indices: Vec<Option<usize>>,
    pub widenings: Vec<Widening>,
}

impl Reconciliation {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn definitions(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|column| (column.name.clone(), column.column_type))
            .collect()
    }

    /// Rows in final column order, each cell coerced for its column type.
    pub fn rows<'d>(&self, data: &'d SourceTable) -> impl Iterator<Item = Vec<Cow<'d, str>>> {
        data.rows.iter().map(move |row| {
            self.columns
                .iter()
                .zip(&self.source_indices)
                .map(|(column, source)| match source {
                    Some(idx) => column
                        .column_type
                        .coerce(row.get(*idx).map(String::as_str).unwrap_or("")),
                    None => Cow::Borrowed(""),
                })
                .collect()
        })
    }
}

/// Aligns `local` with the remote table.
///
/// When the table is being dropped or does not exist yet the local snapshot
/// is taken as is. Otherwise columns follow remote order, remote columns
/// missing locally load as NULL, and extra local columns are rejected.
pub fn reconcile(
    local: &TableSnapshot,
    remote: &[RemoteColumn],
    data: &SourceTable,
    drop_table: bool,
) -> UploadResult<Reconciliation> {
    if drop_table || !local.exists_remotely {
        return Ok(Reconciliation {
            columns: local.columns.clone(),
            source_indices: (0..local.columns.len()).map(Some).collect(),
            widenings: Vec::new(),
        });
    }

    let extra: Vec<&Column> = local
        .columns
        .iter()
        .filter(|column| !remote.iter().any(|existing| existing.name == column.name))
        .collect();
    if !extra.is_empty() {
        return Err(UploadError::SchemaIncompatible {
            table: local.table.qualified(),
            columns: extra.iter().map(|column| column.name.clone()).collect(),
            statements: extra
                .iter()
                .map(|column| {
                    format!(
                        "ALTER TABLE {} ADD COLUMN {} {} DEFAULT NULL;",
                        local.table,
                        quote_ident(&column.name),
                        column.column_type
                    )
                })
                .collect(),
        });
    }

    let mut columns = Vec::with_capacity(remote.len());
    let mut source_indices = Vec::with_capacity(remote.len());
    let mut widenings = Vec::new();
    for existing in remote {
        let position = local
            .columns
            .iter()
            .position(|column| column.name == existing.name);
        let mut column = Column::new(&existing.name, existing.column_type, ColumnOrigin::Remote);
        match position {
            Some(idx) => {
                let observed = local.columns[idx].observed_width;
                column.observed_width = observed;
                if existing.column_type.is_varchar()
                    && observed > existing.column_type.varchar_width()
                {
                    check_capacity(&local.table, &column.name, data, idx, observed)?;
                    let from = existing.column_type.varchar_width();
                    let (count, examples) = oversized(data, idx, from);
                    widenings.push(Widening {
                        column: column.name.clone(),
                        from,
                        to: observed,
                        count,
                        examples,
                    });
                    column.column_type.widen_to(observed);
                }
            }
            None => info!("Column '{}' is absent locally and loads as NULL", existing.name),
        }
        columns.push(column);
        source_indices.push(position);
    }

    Ok(Reconciliation {
        columns,
        source_indices,
        widenings,
    })
}

fn check_capacity(
    table: &TableName,
    column: &str,
    data: &SourceTable,
    idx: usize,
    observed: usize,
) -> UploadResult<()> {
    if observed <= MAX_VARCHAR_WIDTH {
        return Ok(());
    }
    let (count, examples) = oversized(data, idx, MAX_VARCHAR_WIDTH);
    Err(UploadError::Capacity {
        table: table.qualified(),
        column: column.to_string(),
        count,
        max_width: MAX_VARCHAR_WIDTH,
        examples,
    })
}

/// Counts the values in column `idx` longer than `limit`, keeping the first
/// few as examples.
fn oversized(data: &SourceTable, idx: usize, limit: usize) -> (usize, Vec<BadValue>) {
    let mut count = 0;
    let mut examples = Vec::new();
    for (row, value) in data.column(idx).enumerate() {
        if value.len() > limit {
            count += 1;
            if examples.len() < MAX_REPORTED_VALUES {
                examples.push(BadValue::new(row, value));
            }
        }
    }
    (count, examples)
}

/// Grows a remote VARCHAR column in place. Returns `false`, without touching
/// the table, when the new width is over the cap.
pub fn widen<C: Catalog + ?Sized>(
    catalog: &C,
    table: &TableName,
    widening: &Widening,
) -> UploadResult<bool> {
    if widening.to > MAX_VARCHAR_WIDTH {
        return Ok(false);
    }
    info!(
        "Expanding column '{}' of {} from VARCHAR({}) to VARCHAR({})",
        widening.column,
        table.qualified(),
        widening.from,
        widening.to
    );
    let statement = Statement::AlterColumnType {
        table: table.clone(),
        column: widening.column.clone(),
        column_type: ColumnType::varchar(widening.to),
    };
    catalog.execute(&statement).map_err(|err| {
        warn!("Failed to expand column '{}': {err}", widening.column);
        UploadError::WideningFailed {
            table: table.qualified(),
            column: widening.column.clone(),
            from: widening.from,
            to: widening.to,
            count: widening.count,
            examples: widening.examples.clone(),
            message: err.to_string(),
        }
    })?;
    Ok(true)
}
