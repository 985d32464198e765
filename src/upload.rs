//! Public upload entry point.
//!
//! [`upload`] runs the whole pipeline against borrowed ports: load the
//! source, resolve and reconcile column types, capture dependent views,
//! stage chunks, run the locked mutation and copy, replay views, record the
//! upload and clean up. The ports stay owned by the caller and can be reused
//! for further uploads.

use std::{
    borrow::Cow,
    collections::BTreeMap,
    env,
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{debug, info, warn};

use crate::{
    catalog::{BlobStore, Catalog, RemoteColumn},
    config::{ConnectionConfig, UploadOptions},
    error::{UploadError, UploadResult},
    lock::{self, LoadPlan, Mutation},
    reconcile::{self, Widening},
    schema::{self, Column, ColumnOrigin},
    source::{self, ReadOptions, Source, SourceTable},
    sql::{CopyCredentials, Statement, TableLayout, TableName, UploadRecord},
    staging,
    types::ColumnType,
    views::{self, ReplayReport, ViewStore},
};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: Source,
    /// Caller-declared column types, keyed by column name.
    pub column_types: BTreeMap<String, ColumnType>,
    pub table: TableName,
    pub options: UploadOptions,
    pub connection: ConnectionConfig,
    pub read: ReadOptions,
}

impl UploadRequest {
    pub fn new(source: Source, table: TableName, connection: ConnectionConfig) -> Self {
        Self {
            source,
            column_types: BTreeMap::new(),
            table,
            options: UploadOptions::default(),
            connection,
            read: ReadOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub table: TableName,
    pub columns: Vec<Column>,
    pub rows: usize,
    pub chunks: usize,
    pub widened: Vec<Widening>,
    pub views: ReplayReport,
    pub elapsed: Duration,
}

/// Column layout and cells ready for staging.
struct Prepared<'a> {
    columns: Vec<Column>,
    rows: Vec<Vec<Cow<'a, str>>>,
    copy_columns: Option<Vec<String>>,
    widenings: Vec<Widening>,
}

pub fn upload<C, S>(request: UploadRequest, catalog: &C, store: &S) -> UploadResult<UploadReport>
where
    C: Catalog + ?Sized,
    S: BlobStore + ?Sized,
{
    let started = Instant::now();
    let options = request.options.resolve()?;
    request.connection.validate()?;
    let table = request.table;

    info!("{}", "=".repeat(20));
    info!("Beginning to upload table: {}", table.qualified());
    info!("Checking if {} exists", table.qualified());
    let exists = catalog.table_exists(&table.schema, &table.table)?;
    if !exists && options.skip_checks {
        return Err(UploadError::Configuration(format!(
            "table {} does not exist yet; column checks are needed to decide what to create",
            table.qualified()
        )));
    }

    let read = ReadOptions {
        has_header: !options.no_header,
        ..request.read
    };
    let data = source::load(request.source, &read)?;

    let remote = if exists && !options.drop_table {
        catalog.columns_of(&table.schema, &table.table)?
    } else {
        Vec::new()
    };
    let prepared = if options.skip_checks {
        info!("Skipping data checks");
        prepare_verbatim(&data, &remote)?
    } else {
        prepare_checked(&table, &data, &request.column_types, &remote, exists, &options)?
    };

    let view_store = ViewStore::new(&options.view_store);
    let preserve_views = !options.skip_views && exists;
    if preserve_views {
        info!("Logging any dependent views");
        let captured = views::capture(catalog, &table)?;
        for view in &captured {
            let path = view_store.save(&table, view)?;
            debug!("Saved {} to {}", view.full_name, path.display());
        }
        info!("Captured {} dependent view(s)", captured.len());
    }

    let chunks = staging::serialize_chunks(&prepared.rows, options.load_in_parallel)?;
    let prefix = staging::staging_prefix(&table, Utc::now());
    let staged = staging::stage_chunks(store, &prefix, &chunks)?;
    if staged.is_empty() {
        info!("No rows to load; skipping the copy");
    }

    let plan = LoadPlan {
        table: table.clone(),
        exists,
        mutation: Mutation::choose(options.drop_table, exists, options.truncate_table),
        columns: prepared
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.column_type))
            .collect(),
        layout: TableLayout {
            diststyle: options.diststyle,
            distkey: options.distkey.clone(),
            sortkey: options.sortkey.clone(),
        },
        widenings: prepared.widenings.clone(),
        copy_source: (!staged.is_empty()).then(|| store.uri(&prefix)),
        copy_columns: prepared.copy_columns.clone(),
        credentials: CopyCredentials {
            access_key: request.connection.access_key.clone(),
            secret_key: request.connection.secret_key.clone(),
        },
        grant_access: options.grant_access.clone(),
    };
    if let Err(err) = lock::load_table(catalog, &plan) {
        if options.cleanup_blob_store {
            staging::cleanup(store, &staged);
        }
        return Err(err);
    }

    let replayed = if preserve_views {
        views::replay(
            catalog,
            &view_store,
            &table,
            options.drop_table,
            &options.grant_access,
        )?
    } else {
        ReplayReport::default()
    };
    for failed in &replayed.failed {
        warn!("View {} was not reinstantiated: {}", failed.name, failed.error);
    }

    if let Some(records_table) = &options.records_table {
        record_upload(catalog, records_table, &table, data.row_count())?;
    }
    if options.cleanup_blob_store {
        staging::cleanup(store, &staged);
    }

    let elapsed = started.elapsed();
    info!(
        "Upload to {} finished in {:.2} seconds!",
        table.qualified(),
        elapsed.as_secs_f64()
    );
    Ok(UploadReport {
        table,
        columns: prepared.columns,
        rows: data.row_count(),
        chunks: staged.keys.len(),
        widened: prepared.widenings,
        views: replayed,
        elapsed,
    })
}

fn prepare_checked<'a>(
    table: &TableName,
    data: &'a SourceTable,
    declared: &BTreeMap<String, ColumnType>,
    remote: &[RemoteColumn],
    exists: bool,
    options: &UploadOptions,
) -> UploadResult<Prepared<'a>> {
    let snapshot = schema::resolve(table, data, declared, remote, exists)?;
    let reconciled = reconcile::reconcile(&snapshot, remote, data, options.drop_table)?;
    let rows: Vec<Vec<Cow<'a, str>>> = reconciled.rows(data).collect();
    Ok(Prepared {
        copy_columns: Some(reconciled.column_names()),
        columns: reconciled.columns,
        rows,
        widenings: reconciled.widenings,
    })
}

/// Rows go in untouched, in source column order.
fn prepare_verbatim<'a>(
    data: &'a SourceTable,
    remote: &[RemoteColumn],
) -> UploadResult<Prepared<'a>> {
    let copy_columns = if data.has_header {
        Some(schema::normalize_column_names(&data.headers)?)
    } else {
        None
    };
    Ok(Prepared {
        columns: remote
            .iter()
            .map(|column| Column::new(&column.name, column.column_type, ColumnOrigin::Remote))
            .collect(),
        rows: data
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| Cow::Borrowed(cell.as_str())).collect())
            .collect(),
        copy_columns,
        widenings: Vec::new(),
    })
}

fn os_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn record_upload<C: Catalog + ?Sized>(
    catalog: &C,
    records_table: &str,
    table: &TableName,
    rows: usize,
) -> UploadResult<()> {
    info!("Recording the upload in {records_table}");
    let statement = Statement::RecordUpload {
        records_table: records_table.to_string(),
        record: UploadRecord {
            table_name: table.qualified(),
            upload_time: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            rows,
            warehouse_user: catalog.current_user()?,
            os_user: os_user(),
        },
    };
    catalog.begin()?;
    if let Err(err) = catalog.execute(&statement) {
        catalog.rollback()?;
        return Err(err.into());
    }
    catalog.commit()?;
    Ok(())
}
