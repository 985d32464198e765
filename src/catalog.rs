//! Ports to the warehouse catalog and the blob store.
//!
//! The upload pipeline only talks to the outside world through [`Catalog`]
//! and [`BlobStore`]. Implementations must be `Send + Sync`; the blob store
//! is shared across staging workers.

use std::fmt;

use thiserror::Error;

use crate::{sql::Statement, types::ColumnType, views::ViewKind};

/// Warehouse catalog errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Statement execution failed (C001)
    #[error("[C001] Statement failed: {message}\n  while running: {statement}")]
    Execution { statement: String, message: String },

    /// The session was cancelled or terminated by another session (C002)
    #[error("[C002] Session cancelled: {0}")]
    Cancelled(String),

    /// The connection is unusable (C003)
    #[error("[C003] Connection failed: {0}")]
    Connection(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Blob store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Request signature rejected, usually expired credentials (S001)
    #[error("[S001] SignatureDoesNotMatch: {0}")]
    SignatureMismatch(String),

    /// Any other request failure (S002)
    #[error("[S002] Request for '{key}' failed: {message}")]
    Request { key: String, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A column of an existing table, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl RemoteColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A view depending directly on some relation, as the catalog reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentViewRow {
    pub schema: String,
    pub name: String,
    pub kind: ViewKind,
    pub owner: String,
    /// SELECT text, without the `CREATE ... AS` prefix.
    pub body: String,
    /// Grantees holding SELECT on the view.
    pub grants: Vec<String>,
    /// Qualified names of every relation the view reads from.
    pub dependencies: Vec<String>,
}

impl DependentViewRow {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Another session connected to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub user: String,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.user)
    }
}

/// Warehouse catalog and statement execution.
///
/// Statements run inside the transaction opened by [`Catalog::begin`] until
/// [`Catalog::commit`] or [`Catalog::rollback`].
pub trait Catalog: Send + Sync {
    fn table_exists(&self, schema: &str, table: &str) -> CatalogResult<bool>;

    /// Columns in ordinal order; empty when the table does not exist.
    fn columns_of(&self, schema: &str, table: &str) -> CatalogResult<Vec<RemoteColumn>>;

    /// Views reading directly from `relation` (`schema.name`).
    fn dependent_views_of(&self, relation: &str) -> CatalogResult<Vec<DependentViewRow>>;

    /// Sessions other than this one holding or waiting on locks of the table.
    fn competing_sessions(&self, schema: &str, table: &str) -> CatalogResult<Vec<Session>>;

    fn terminate(&self, session: &Session) -> CatalogResult<()>;

    /// Takes an exclusive lock inside the current transaction.
    fn lock_table(&self, schema: &str, table: &str) -> CatalogResult<()>;

    fn execute(&self, statement: &Statement) -> CatalogResult<()>;

    fn begin(&self) -> CatalogResult<()>;

    fn commit(&self) -> CatalogResult<()>;

    fn rollback(&self) -> CatalogResult<()>;

    /// User the connection is authenticated as.
    fn current_user(&self) -> CatalogResult<String>;
}

/// Object storage used to stage chunks for bulk loading.
pub trait BlobStore: Send + Sync {
    /// Establishes the client. Called once before any concurrent use.
    fn connect(&self) -> StoreResult<()>;

    fn put(&self, key: &str, body: &[u8]) -> StoreResult<()>;

    fn delete(&self, key: &str) -> StoreResult<()>;

    fn wait_until_exists(&self, key: &str) -> StoreResult<()>;

    fn wait_until_not_exists(&self, key: &str) -> StoreResult<()>;

    /// Location the warehouse COPY reads `key` (or every key with that prefix) from.
    fn uri(&self, key: &str) -> String;
}
