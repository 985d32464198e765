pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod io_utils;
pub mod lock;
pub mod memory;
pub mod reconcile;
pub mod schema;
pub mod source;
pub mod sql;
pub mod staging;
pub mod table;
pub mod types;
pub mod upload;
pub mod views;

use std::{collections::BTreeMap, env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, InputArgs},
    config::{ConnectionConfig, UploadOptions},
    memory::{MemoryBlobStore, MemoryWarehouse},
    schema::SchemaFile,
    source::{ReadOptions, Source},
    sql::TableName,
    types::ColumnType,
    views::ViewStore,
};

pub use crate::{
    error::{UploadError, UploadResult},
    upload::{UploadReport, UploadRequest, upload},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("redshift_upload", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Infer(args) => handle_infer(&args),
        Commands::Plan(args) => handle_plan(args),
        Commands::Views(args) => handle_views(&args),
    }
}

fn read_options(input: &InputArgs) -> Result<ReadOptions> {
    Ok(ReadOptions {
        delimiter: input.delimiter,
        encoding: io_utils::resolve_encoding(input.input_encoding.as_deref())?,
        has_header: true,
    })
}

fn declared_types(input: &InputArgs) -> Result<BTreeMap<String, ColumnType>> {
    match &input.column_types {
        Some(path) => Ok(SchemaFile::load(path)
            .with_context(|| format!("Loading column types from {path:?}"))?
            .declared()),
        None => Ok(BTreeMap::new()),
    }
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    info!("Resolving column types for '{}'", args.input.input.display());
    let read = read_options(&args.input)?;
    let declared = declared_types(&args.input)?;
    let data = source::load(Source::FilePath(args.input.input.clone()), &read)
        .with_context(|| format!("Reading {:?}", args.input.input))?;
    let snapshot = schema::resolve(&TableName::new("local", "input"), &data, &declared, &[], false)
        .with_context(|| format!("Resolving column types of {:?}", args.input.input))?;
    print!("{}", table::render_columns(&snapshot.columns));
    if let Some(output) = &args.output {
        snapshot
            .to_schema_file()
            .save(output)
            .with_context(|| format!("Writing column types to {output:?}"))?;
        info!(
            "Column types for {} column(s) written to {:?}",
            snapshot.columns.len(),
            output
        );
    }
    Ok(())
}

fn dry_run_connection() -> ConnectionConfig {
    ConnectionConfig {
        host: "memory".to_string(),
        port: 5439,
        dbname: "dry_run".to_string(),
        user: "loader".to_string(),
        password: "unused".to_string(),
        bucket: "dry-run".to_string(),
        access_key: "DRYRUNACCESSKEY".to_string(),
        secret_key: "dry-run-secret".to_string(),
    }
}

fn handle_plan(args: cli::PlanArgs) -> Result<()> {
    let mut options = match &args.options {
        Some(path) => UploadOptions::load(path)?,
        None => UploadOptions::default(),
    };
    options.drop_table |= args.drop_table;
    options.truncate_table |= args.truncate_table;
    options.grant_access.extend(args.grant_access.iter().cloned());
    if let Some(diststyle) = args.diststyle {
        options.diststyle = diststyle;
    }
    if args.distkey.is_some() {
        options.distkey = args.distkey.clone();
    }
    if args.sortkey.is_some() {
        options.sortkey = args.sortkey.clone();
    }
    if let Some(parallel) = args.load_in_parallel {
        options.load_in_parallel = parallel;
    }
    let scratch = tempfile::tempdir().context("Creating scratch view store")?;
    options.view_store = scratch.path().to_path_buf();
    debug!("Dry-run options: {options:?}");

    let connection = dry_run_connection();
    let store = Arc::new(MemoryBlobStore::new(connection.bucket.clone()));
    let warehouse = MemoryWarehouse::with_user(Arc::clone(&store), connection.user.clone());
    let table = TableName::new(args.target.schema.clone(), args.target.table.clone());
    let mut request = UploadRequest::new(
        Source::FilePath(args.input.input.clone()),
        table,
        connection,
    );
    request.column_types = declared_types(&args.input)?;
    request.read = read_options(&args.input)?;
    request.options = options;

    let report = upload(request, &warehouse, store.as_ref())
        .with_context(|| format!("Planning upload of {:?}", args.input.input))?;
    for statement in warehouse.statements() {
        println!("{statement};");
    }
    info!(
        "Planned {} row(s) in {} chunk(s) across {} column(s)",
        report.rows,
        report.chunks,
        report.columns.len()
    );
    Ok(())
}

fn handle_views(args: &cli::ViewsArgs) -> Result<()> {
    let store = ViewStore::new(&args.view_store).with_interface(args.interface.clone());
    let table = TableName::new(args.target.schema.clone(), args.target.table.clone());
    let saved = store
        .list(&table)
        .with_context(|| format!("Reading captured views under {:?}", store.table_dir(&table)))?;
    if saved.is_empty() {
        info!("No captured views for {}", table.qualified());
        return Ok(());
    }
    print!("{}", table::render_saved_views(&saved, store.max_age()));
    Ok(())
}
