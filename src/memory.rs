//! In-memory warehouse and blob store.
//!
//! [`MemoryWarehouse`] interprets [`Statement`]s directly against tables and
//! views held in a mutex, with transaction snapshots for rollback, competing
//! sessions for lock contention, and statement failure injection. COPY reads
//! header-less CSV objects from a linked [`MemoryBlobStore`]. Both back the
//! `plan` dry run and the test suite.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use log::debug;
use regex::Regex;

use crate::{
    catalog::{
        BlobStore, Catalog, CatalogError, CatalogResult, DependentViewRow, RemoteColumn, Session,
        StoreError, StoreResult,
    },
    sql::{Statement, TableName, UploadRecord},
    types::{ColumnType, TypeKind, TypeState, probe},
    views::ViewKind,
};

pub type Row = Vec<Option<String>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    connections: AtomicUsize,
    expired: AtomicBool,
    undeletable: Mutex<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Objects under `prefix`, in key order.
    pub fn objects_with_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        lock(&self.objects)
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| (key.clone(), body.clone()))
            .collect()
    }

    /// Number of times [`BlobStore::connect`] was called.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Makes every later request fail with a signature mismatch.
    pub fn expire_credentials(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Makes deletes of `key` fail.
    pub fn refuse_delete(&self, key: impl Into<String>) {
        lock(&self.undeletable).insert(key.into());
    }

    fn check_credentials(&self) -> StoreResult<()> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(StoreError::SignatureMismatch(
                "The request signature we calculated does not match the signature you provided"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn key_of<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix("memory://")?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
    }
}

impl BlobStore for MemoryBlobStore {
    fn connect(&self) -> StoreResult<()> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()
    }

    fn put(&self, key: &str, body: &[u8]) -> StoreResult<()> {
        self.check_credentials()?;
        lock(&self.objects).insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_credentials()?;
        if lock(&self.undeletable).contains(key) {
            return Err(StoreError::Request {
                key: key.to_string(),
                message: "AccessDenied".to_string(),
            });
        }
        lock(&self.objects).remove(key);
        Ok(())
    }

    fn wait_until_exists(&self, key: &str) -> StoreResult<()> {
        if lock(&self.objects).contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::Request {
                key: key.to_string(),
                message: "object never appeared".to_string(),
            })
        }
    }

    fn wait_until_not_exists(&self, key: &str) -> StoreResult<()> {
        if lock(&self.objects).contains_key(key) {
            Err(StoreError::Request {
                key: key.to_string(),
                message: "object still present".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://{}/{key}", self.bucket)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<RemoteColumn>,
    rows: Vec<Row>,
    grants: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryView {
    pub schema: String,
    pub name: String,
    pub kind: ViewKind,
    pub owner: String,
    pub body: String,
    pub dependencies: Vec<String>,
    pub grants: Vec<String>,
    /// Persisted rows of a materialized view.
    materialized: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
struct CatalogData {
    tables: BTreeMap<String, MemoryTable>,
    views: BTreeMap<String, MemoryView>,
}

#[derive(Debug, Clone)]
struct CompetingSession {
    session: Session,
    table: String,
    terminable: bool,
}

#[derive(Debug)]
struct WarehouseState {
    data: CatalogData,
    snapshot: Option<CatalogData>,
    locked: Option<String>,
    search_path: String,
    sessions: Vec<CompetingSession>,
    terminated: Vec<i64>,
    statements: Vec<String>,
    failures: Vec<String>,
    next_session: i64,
}

/// Warehouse double interpreting statements in memory.
#[derive(Debug)]
pub struct MemoryWarehouse {
    state: Mutex<WarehouseState>,
    store: Arc<MemoryBlobStore>,
    user: String,
}

fn relation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:from|join)\s+("?\w+"?(?:\s*\.\s*"?\w+"?)?)"#).expect("static regex")
    })
}

/// Relations named after FROM or JOIN, qualified with `search_path` when bare.
pub fn referenced_relations(body: &str, search_path: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in relation_pattern().captures_iter(body) {
        let raw: String = caps[1].chars().filter(|c| *c != '"' && !c.is_whitespace()).collect();
        let qualified = if raw.contains('.') {
            raw.to_lowercase()
        } else {
            format!("{search_path}.{}", raw.to_lowercase())
        };
        if !found.contains(&qualified) {
            found.push(qualified);
        }
    }
    found
}

fn split_qualified(name: &str) -> (String, String) {
    match name.split_once('.') {
        Some((schema, relation)) => (schema.to_string(), relation.to_string()),
        None => ("public".to_string(), name.to_string()),
    }
}

fn execution_error(statement: &Statement, message: impl Into<String>) -> CatalogError {
    CatalogError::Execution {
        statement: statement.redacted(),
        message: message.into(),
    }
}

impl MemoryWarehouse {
    pub fn new(store: Arc<MemoryBlobStore>) -> Self {
        Self::with_user(store, "loader")
    }

    pub fn with_user(store: Arc<MemoryBlobStore>, user: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(WarehouseState {
                data: CatalogData::default(),
                snapshot: None,
                locked: None,
                search_path: "public".to_string(),
                sessions: Vec::new(),
                terminated: Vec::new(),
                statements: Vec::new(),
                failures: Vec::new(),
                next_session: 100,
            }),
            store,
            user: user.into(),
        }
    }

    pub fn store(&self) -> &Arc<MemoryBlobStore> {
        &self.store
    }

    fn state(&self) -> MutexGuard<'_, WarehouseState> {
        lock(&self.state)
    }

    pub fn create_table(&self, table: &TableName, columns: &[(&str, ColumnType)]) {
        self.state().data.tables.insert(
            table.qualified(),
            MemoryTable {
                columns: columns
                    .iter()
                    .map(|(name, column_type)| RemoteColumn::new(*name, *column_type))
                    .collect(),
                ..MemoryTable::default()
            },
        );
    }

    pub fn insert_rows(&self, table: &TableName, rows: Vec<Row>) {
        if let Some(existing) = self.state().data.tables.get_mut(&table.qualified()) {
            existing.rows.extend(rows);
        }
    }

    /// Defines a view as `owner`, with SELECT granted to `grants`.
    pub fn create_view(
        &self,
        name: &str,
        kind: ViewKind,
        body: &str,
        owner: &str,
        grants: &[&str],
    ) -> CatalogResult<()> {
        let mut state = self.state();
        let statement = Statement::CreateView {
            name: name.to_string(),
            kind,
            body: body.to_string(),
        };
        Self::create_view_in(&mut state, &statement, name, kind, body, owner)?;
        if let Some(view) = state.data.views.get_mut(name) {
            view.grants = grants.iter().map(|g| g.to_string()).collect();
        }
        Ok(())
    }

    /// Registers another session holding a lock on `table`.
    pub fn add_session(&self, table: &TableName, user: &str, terminable: bool) -> i64 {
        let mut state = self.state();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.push(CompetingSession {
            session: Session {
                id,
                user: user.to_string(),
            },
            table: table.qualified(),
            terminable,
        });
        id
    }

    pub fn terminated_sessions(&self) -> Vec<i64> {
        self.state().terminated.clone()
    }

    /// Fails every later statement whose SQL contains `needle`.
    pub fn fail_statements_containing(&self, needle: impl Into<String>) {
        self.state().failures.push(needle.into());
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn rows(&self, table: &TableName) -> Option<Vec<Row>> {
        self.state()
            .data
            .tables
            .get(&table.qualified())
            .map(|t| t.rows.clone())
    }

    pub fn columns(&self, table: &TableName) -> Option<Vec<RemoteColumn>> {
        self.state()
            .data
            .tables
            .get(&table.qualified())
            .map(|t| t.columns.clone())
    }

    pub fn table_grants(&self, table: &TableName) -> Vec<String> {
        self.state()
            .data
            .tables
            .get(&table.qualified())
            .map(|t| t.grants.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn view(&self, name: &str) -> Option<MemoryView> {
        self.state().data.views.get(name).cloned()
    }

    pub fn view_names(&self) -> Vec<String> {
        self.state().data.views.keys().cloned().collect()
    }

    /// Rows a SELECT against the view would return.
    pub fn view_rows(&self, name: &str) -> Option<Vec<Row>> {
        let state = self.state();
        Self::relation_rows(&state.data, name, 0)
    }

    /// Rendered statements in execution order, COPY secrets masked.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.state().snapshot.is_some()
    }

    fn relation_rows(data: &CatalogData, name: &str, depth: usize) -> Option<Vec<Row>> {
        if depth > 32 {
            return None;
        }
        if let Some(table) = data.tables.get(name) {
            return Some(table.rows.clone());
        }
        let view = data.views.get(name)?;
        match view.kind {
            ViewKind::MaterializedView => Some(view.materialized.clone()),
            ViewKind::View => {
                let source = view.dependencies.first()?;
                Self::relation_rows(data, source, depth + 1)
            }
        }
    }

    fn relation_exists(data: &CatalogData, name: &str) -> bool {
        data.tables.contains_key(name) || data.views.contains_key(name)
    }

    fn create_view_in(
        state: &mut WarehouseState,
        statement: &Statement,
        name: &str,
        kind: ViewKind,
        body: &str,
        owner: &str,
    ) -> CatalogResult<()> {
        if Self::relation_exists(&state.data, name) {
            return Err(execution_error(
                statement,
                format!("relation \"{name}\" already exists"),
            ));
        }
        let dependencies = referenced_relations(body, &state.search_path);
        if let Some(missing) = dependencies
            .iter()
            .find(|dep| !Self::relation_exists(&state.data, dep))
        {
            return Err(execution_error(
                statement,
                format!("relation \"{missing}\" does not exist"),
            ));
        }
        let materialized = match kind {
            ViewKind::MaterializedView => dependencies
                .first()
                .and_then(|dep| Self::relation_rows(&state.data, dep, 0))
                .unwrap_or_default(),
            ViewKind::View => Vec::new(),
        };
        let (schema, view_name) = split_qualified(name);
        state.data.views.insert(
            name.to_string(),
            MemoryView {
                schema,
                name: view_name,
                kind,
                owner: owner.to_string(),
                body: body.to_string(),
                dependencies,
                grants: Vec::new(),
                materialized,
            },
        );
        Ok(())
    }

    /// Removes every view reading, directly or not, from `relation`.
    fn drop_dependents(data: &mut CatalogData, relation: &str) {
        let mut pending = vec![relation.to_string()];
        while let Some(current) = pending.pop() {
            let dependents: Vec<String> = data
                .views
                .iter()
                .filter(|(_, view)| view.dependencies.contains(&current))
                .map(|(name, _)| name.clone())
                .collect();
            for name in dependents {
                debug!("Dropping dependent view {name}");
                data.views.remove(&name);
                pending.push(name);
            }
        }
    }

    fn apply(&self, state: &mut WarehouseState, statement: &Statement) -> CatalogResult<()> {
        match statement {
            Statement::DropTable { table, cascade } => {
                let name = table.qualified();
                if !state.data.tables.contains_key(&name) {
                    return Ok(());
                }
                let has_dependents = state
                    .data
                    .views
                    .values()
                    .any(|view| view.dependencies.contains(&name));
                if has_dependents && !*cascade {
                    return Err(execution_error(
                        statement,
                        "cannot drop table because other objects depend on it",
                    ));
                }
                Self::drop_dependents(&mut state.data, &name);
                state.data.tables.remove(&name);
            }
            Statement::CreateTable { table, columns, .. } => {
                state
                    .data
                    .tables
                    .entry(table.qualified())
                    .or_insert_with(|| MemoryTable {
                        columns: columns
                            .iter()
                            .map(|(name, column_type)| RemoteColumn::new(name, *column_type))
                            .collect(),
                        ..MemoryTable::default()
                    });
            }
            Statement::Truncate(table) => {
                let existing = state
                    .data
                    .tables
                    .get_mut(&table.qualified())
                    .ok_or_else(|| execution_error(statement, "relation does not exist"))?;
                existing.rows.clear();
            }
            Statement::AlterColumnType {
                table,
                column,
                column_type,
            } => {
                let existing = state
                    .data
                    .tables
                    .get_mut(&table.qualified())
                    .ok_or_else(|| execution_error(statement, "relation does not exist"))?;
                let target = existing
                    .columns
                    .iter_mut()
                    .find(|c| c.name == *column)
                    .ok_or_else(|| {
                        execution_error(statement, format!("column \"{column}\" does not exist"))
                    })?;
                if !target.column_type.is_varchar()
                    || !column_type.is_varchar()
                    || column_type.varchar_width() < target.column_type.varchar_width()
                {
                    return Err(execution_error(
                        statement,
                        "only VARCHAR columns can be widened",
                    ));
                }
                target.column_type = *column_type;
            }
            Statement::Copy {
                table,
                columns,
                source,
                ..
            } => {
                let rows = self.read_staged(statement, state, table, columns.as_deref(), source)?;
                if let Some(existing) = state.data.tables.get_mut(&table.qualified()) {
                    existing.rows.extend(rows);
                }
            }
            Statement::Grant {
                object, grantees, ..
            } => {
                let name = object.replace('"', "");
                if let Some(existing) = state.data.tables.get_mut(&name) {
                    existing.grants.extend(grantees.iter().cloned());
                } else if let Some(view) = state.data.views.get_mut(&name) {
                    for grantee in grantees {
                        if !view.grants.contains(grantee) {
                            view.grants.push(grantee.clone());
                        }
                    }
                } else {
                    return Err(execution_error(
                        statement,
                        format!("relation \"{name}\" does not exist"),
                    ));
                }
            }
            Statement::SetSearchPath(schema) => state.search_path = schema.clone(),
            Statement::CreateView { name, kind, body } => {
                let owner = self.user.clone();
                Self::create_view_in(state, statement, name, *kind, body, &owner)?;
            }
            Statement::AlterOwner { name, owner } => {
                let view = state
                    .data
                    .views
                    .get_mut(name)
                    .ok_or_else(|| execution_error(statement, "relation does not exist"))?;
                view.owner = owner.clone();
            }
            Statement::RefreshMaterializedView(name) => {
                let source = state
                    .data
                    .views
                    .get(name)
                    .and_then(|view| view.dependencies.first().cloned())
                    .ok_or_else(|| execution_error(statement, "relation does not exist"))?;
                let rows = Self::relation_rows(&state.data, &source, 0).unwrap_or_default();
                if let Some(view) = state.data.views.get_mut(name) {
                    view.materialized = rows;
                }
            }
            Statement::RecordUpload {
                records_table,
                record,
            } => {
                let existing = state
                    .data
                    .tables
                    .get_mut(records_table.as_str())
                    .ok_or_else(|| {
                        execution_error(
                            statement,
                            format!("relation \"{records_table}\" does not exist"),
                        )
                    })?;
                let row = existing
                    .columns
                    .iter()
                    .map(|column| record_field(record, &column.name))
                    .collect();
                existing.rows.push(row);
            }
        }
        Ok(())
    }

    fn read_staged(
        &self,
        statement: &Statement,
        state: &WarehouseState,
        table: &TableName,
        columns: Option<&[String]>,
        source: &str,
    ) -> CatalogResult<Vec<Row>> {
        let existing = state
            .data
            .tables
            .get(&table.qualified())
            .ok_or_else(|| execution_error(statement, "relation does not exist"))?;
        let targets: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .map(|name| {
                    existing
                        .columns
                        .iter()
                        .position(|c| c.name == *name)
                        .ok_or_else(|| {
                            execution_error(statement, format!("column \"{name}\" does not exist"))
                        })
                })
                .collect::<CatalogResult<_>>()?,
            None => (0..existing.columns.len()).collect(),
        };
        let prefix = self
            .store
            .key_of(source)
            .ok_or_else(|| execution_error(statement, format!("unreadable location {source}")))?;
        let objects = self.store.objects_with_prefix(prefix);
        if objects.is_empty() {
            return Err(execution_error(statement, "no staged objects found"));
        }

        let mut rows = Vec::new();
        for (key, body) in objects {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(body.as_slice());
            for record in reader.records() {
                let record = record
                    .map_err(|err| execution_error(statement, format!("{key}: {err}")))?;
                if record.len() != targets.len() {
                    return Err(execution_error(
                        statement,
                        format!(
                            "{key}: expected {} field(s), found {}",
                            targets.len(),
                            record.len()
                        ),
                    ));
                }
                let mut row: Row = vec![None; existing.columns.len()];
                for (value, target) in record.iter().zip(&targets) {
                    if value.is_empty() {
                        continue;
                    }
                    let column = &existing.columns[*target];
                    if !fits(column.column_type, value) {
                        return Err(execution_error(
                            statement,
                            format!(
                                "{key}: invalid value '{value}' for column \"{}\" of type {}",
                                column.name, column.column_type
                            ),
                        ));
                    }
                    row[*target] = Some(value.to_string());
                }
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

fn fits(column_type: ColumnType, value: &str) -> bool {
    let mut state = TypeState::default();
    match column_type.kind {
        TypeKind::Varchar => value.len() <= column_type.varchar_width(),
        kind => probe(kind, value, &mut state),
    }
}

fn record_field(record: &UploadRecord, column: &str) -> Option<String> {
    match column {
        "table_name" => Some(record.table_name.clone()),
        "upload_time" => Some(record.upload_time.clone()),
        "rows" => Some(record.rows.to_string()),
        "redshift_user" => Some(record.warehouse_user.clone()),
        "os_user" => Some(record.os_user.clone()),
        _ => None,
    }
}

impl Catalog for MemoryWarehouse {
    fn table_exists(&self, schema: &str, table: &str) -> CatalogResult<bool> {
        Ok(self
            .state()
            .data
            .tables
            .contains_key(&format!("{schema}.{table}")))
    }

    fn columns_of(&self, schema: &str, table: &str) -> CatalogResult<Vec<RemoteColumn>> {
        Ok(self
            .state()
            .data
            .tables
            .get(&format!("{schema}.{table}"))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    fn dependent_views_of(&self, relation: &str) -> CatalogResult<Vec<DependentViewRow>> {
        Ok(self
            .state()
            .data
            .views
            .values()
            .filter(|view| view.dependencies.iter().any(|dep| dep == relation))
            .map(|view| DependentViewRow {
                schema: view.schema.clone(),
                name: view.name.clone(),
                kind: view.kind,
                owner: view.owner.clone(),
                body: view.body.clone(),
                grants: view.grants.clone(),
                dependencies: view.dependencies.clone(),
            })
            .collect())
    }

    fn competing_sessions(&self, schema: &str, table: &str) -> CatalogResult<Vec<Session>> {
        let name = format!("{schema}.{table}");
        Ok(self
            .state()
            .sessions
            .iter()
            .filter(|s| s.table == name)
            .map(|s| s.session.clone())
            .collect())
    }

    fn terminate(&self, session: &Session) -> CatalogResult<()> {
        let mut state = self.state();
        let position = state
            .sessions
            .iter()
            .position(|s| s.session.id == session.id)
            .ok_or_else(|| CatalogError::Connection(format!("no session {}", session.id)))?;
        if !state.sessions[position].terminable {
            return Err(CatalogError::Execution {
                statement: format!("SELECT pg_terminate_backend({})", session.id),
                message: "permission denied to terminate session".to_string(),
            });
        }
        state.sessions.remove(position);
        state.terminated.push(session.id);
        Ok(())
    }

    fn lock_table(&self, schema: &str, table: &str) -> CatalogResult<()> {
        let name = format!("{schema}.{table}");
        let mut state = self.state();
        state.statements.push(format!("LOCK TABLE \"{schema}\".\"{table}\""));
        if let Some(holder) = state.sessions.iter().find(|s| s.table == name) {
            return Err(CatalogError::Cancelled(format!(
                "canceling statement due to lock timeout; {name} is held by session {}",
                holder.session
            )));
        }
        state.locked = Some(name);
        Ok(())
    }

    fn execute(&self, statement: &Statement) -> CatalogResult<()> {
        let mut state = self.state();
        let rendered = statement.redacted();
        state.statements.push(rendered.clone());
        let full = statement.to_string();
        if state.failures.iter().any(|needle| full.contains(needle.as_str())) {
            return Err(execution_error(statement, "injected failure"));
        }
        self.apply(&mut state, statement)
    }

    fn begin(&self) -> CatalogResult<()> {
        let mut state = self.state();
        if state.snapshot.is_none() {
            state.snapshot = Some(state.data.clone());
        }
        Ok(())
    }

    fn commit(&self) -> CatalogResult<()> {
        let mut state = self.state();
        state.snapshot = None;
        state.locked = None;
        Ok(())
    }

    fn rollback(&self) -> CatalogResult<()> {
        let mut state = self.state();
        if let Some(snapshot) = state.snapshot.take() {
            state.data = snapshot;
        }
        state.locked = None;
        Ok(())
    }

    fn current_user(&self) -> CatalogResult<String> {
        Ok(self.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> MemoryWarehouse {
        MemoryWarehouse::new(Arc::new(MemoryBlobStore::new("bucket")))
    }

    #[test]
    fn relations_are_qualified_with_search_path() {
        let found = referenced_relations(
            "select a.x from \"public\".\"orders\" a join items i on a.id = i.id",
            "sales",
        );
        assert_eq!(found, vec!["public.orders", "sales.items"]);
    }

    #[test]
    fn drop_cascade_removes_transitive_views() {
        let wh = warehouse();
        let table = TableName::new("public", "t");
        wh.create_table(&table, &[("id", ColumnType::scalar(TypeKind::Integer))]);
        wh.create_view("public.v1", ViewKind::View, "select * from public.t", "o", &[])
            .expect("v1");
        wh.create_view("public.v2", ViewKind::View, "select * from public.v1", "o", &[])
            .expect("v2");
        wh.execute(&Statement::DropTable {
            table,
            cascade: true,
        })
        .expect("drop");
        assert!(wh.view_names().is_empty());
    }

    #[test]
    fn rollback_restores_snapshot() {
        let wh = warehouse();
        let table = TableName::new("public", "t");
        wh.create_table(&table, &[("id", ColumnType::scalar(TypeKind::Integer))]);
        wh.insert_rows(&table, vec![vec![Some("1".into())]]);
        wh.begin().expect("begin");
        wh.execute(&Statement::Truncate(table.clone())).expect("truncate");
        assert!(wh.rows(&table).expect("rows").is_empty());
        wh.rollback().expect("rollback");
        assert_eq!(wh.rows(&table).expect("rows").len(), 1);
        assert!(!wh.in_transaction());
    }

    #[test]
    fn copy_type_checks_staged_values() {
        let store = Arc::new(MemoryBlobStore::new("bucket"));
        let wh = MemoryWarehouse::new(Arc::clone(&store));
        let table = TableName::new("public", "t");
        wh.create_table(
            &table,
            &[
                ("id", ColumnType::scalar(TypeKind::SmallInt)),
                ("name", ColumnType::varchar(3)),
            ],
        );
        store.put("p0", b"1,abc\n2,\n").expect("put");
        let copy = |columns: Option<Vec<String>>| Statement::Copy {
            table: table.clone(),
            columns,
            source: store.uri("p"),
            credentials: crate::sql::CopyCredentials {
                access_key: "a".into(),
                secret_key: "s".into(),
            },
        };
        wh.execute(&copy(None)).expect("copy");
        assert_eq!(
            wh.rows(&table).expect("rows"),
            vec![
                vec![Some("1".into()), Some("abc".into())],
                vec![Some("2".into()), None]
            ]
        );
        store.put("p1", b"3,abcd\n").expect("put");
        assert!(wh.execute(&copy(None)).is_err());
    }

    #[test]
    fn undeletable_objects_report_errors() {
        let store = MemoryBlobStore::new("bucket");
        store.put("k", b"x").expect("put");
        store.refuse_delete("k");
        assert!(store.delete("k").is_err());
        store.expire_credentials();
        assert!(matches!(
            store.put("k", b""),
            Err(StoreError::SignatureMismatch(_))
        ));
    }
}
