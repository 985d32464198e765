//! Chunking and blob store fan-out for the bulk load.

use std::{
    borrow::Cow,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::{
    catalog::{BlobStore, StoreError},
    error::{UploadError, UploadResult},
    io_utils,
    sql::TableName,
};

/// Upper bound on concurrent chunk uploads.
pub const MAX_THREAD_COUNT: usize = 10;

/// Splits `rows` into `min(parallel, rows.len())` contiguous chunks of
/// `ceil(len / n)` rows; the last chunk may be shorter.
pub fn chunkify<T>(rows: &[T], parallel: usize) -> Vec<&[T]> {
    if rows.is_empty() {
        return Vec::new();
    }
    let count = parallel.clamp(1, rows.len());
    let size = rows.len().div_ceil(count);
    rows.chunks(size).collect()
}

/// Key prefix shared by every chunk of one upload.
pub fn staging_prefix(table: &TableName, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        table.schema,
        table.table,
        now.format("%Y_%m_%d_%H_%M_%S_%6f")
    )
}

/// Objects written for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagedLoad {
    pub prefix: String,
    pub keys: Vec<String>,
}

impl StagedLoad {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Serializes rows into CSV chunks.
pub fn serialize_chunks<'a>(
    rows: &[Vec<Cow<'a, str>>],
    parallel: usize,
) -> UploadResult<Vec<Vec<u8>>> {
    chunkify(rows, parallel)
        .into_iter()
        .map(|chunk| {
            io_utils::write_csv_chunk(
                chunk.iter().map(|row| row.iter().map(|cell| cell.as_ref())),
                io_utils::DEFAULT_CSV_DELIMITER,
            )
            .map_err(|err| UploadError::Source(format!("{err:#}")))
        })
        .collect()
}

fn store_error(key: &str, err: StoreError) -> UploadError {
    match err {
        StoreError::SignatureMismatch(message) => UploadError::TransientStore {
            key: key.to_string(),
            message,
        },
        other => other.into(),
    }
}

fn stage_one<S: BlobStore + ?Sized>(store: &S, key: &str, body: &[u8]) -> UploadResult<()> {
    store.delete(key).map_err(|err| store_error(key, err))?;
    store
        .wait_until_not_exists(key)
        .map_err(|err| store_error(key, err))?;
    store.put(key, body).map_err(|err| store_error(key, err))?;
    store
        .wait_until_exists(key)
        .map_err(|err| store_error(key, err))?;
    debug!("Staged {key} ({} bytes)", body.len());
    Ok(())
}

/// Uploads every chunk under `prefix` on at most [`MAX_THREAD_COUNT`] workers.
///
/// The store is connected once here, before any worker starts.
pub fn stage_chunks<S: BlobStore + ?Sized>(
    store: &S,
    prefix: &str,
    chunks: &[Vec<u8>],
) -> UploadResult<StagedLoad> {
    let keys: Vec<String> = (0..chunks.len()).map(|idx| format!("{prefix}{idx}")).collect();
    if chunks.is_empty() {
        return Ok(StagedLoad {
            prefix: prefix.to_string(),
            keys,
        });
    }
    store.connect().map_err(|err| store_error(prefix, err))?;

    let workers = chunks.len().min(MAX_THREAD_COUNT);
    info!(
        "Staging {} chunk(s) on {workers} worker(s) under '{prefix}'",
        chunks.len()
    );
    let cursor = AtomicUsize::new(0);
    let failure: Mutex<Option<UploadError>> = Mutex::new(None);
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    if idx >= chunks.len() {
                        break;
                    }
                    if let Err(err) = stage_one(store, &keys[idx], &chunks[idx]) {
                        let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
                        slot.get_or_insert(err);
                        cursor.store(chunks.len(), Ordering::Relaxed);
                        break;
                    }
                }
            });
        }
    });
    if let Some(err) = failure
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
    {
        return Err(err);
    }
    Ok(StagedLoad {
        prefix: prefix.to_string(),
        keys,
    })
}

/// Deletes staged objects, overwriting any that cannot be deleted with an
/// empty body.
pub fn cleanup<S: BlobStore + ?Sized>(store: &S, staged: &StagedLoad) {
    info!("Removing {} staged object(s)", staged.keys.len());
    for key in &staged.keys {
        if let Err(err) = store.delete(key) {
            error!("Could not delete staged object {key}: {err}");
            if let Err(err) = store.put(key, &[]) {
                error!("Could not blank staged object {key}: {err}");
            }
        }
    }
}
