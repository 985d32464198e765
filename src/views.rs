//! Dependent view capture and reinstantiation.
//!
//! Dropping a table cascades to every view built on it. Before a load the
//! dependent views are walked transitively through the catalog and saved to a
//! side store as JSON; afterwards they are replayed in dependency order.
//! Replay is best-effort per view: a failing view is rolled back, reported,
//! and left on disk for manual recovery.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    fmt, fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use log::{debug, info, warn};
use petgraph::{algo::toposort, graph::DiGraph};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Catalog, CatalogResult, DependentViewRow},
    error::UploadResult,
    sql::{Privilege, Statement, TableName},
};

/// Captures older than this are never replayed.
pub const MAX_CAPTURE_AGE: Duration = Duration::from_secs(4 * 60 * 60);

pub const DEFAULT_INTERFACE: &str = "redshift";

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewKind {
    #[serde(rename = "view")]
    View,
    #[serde(rename = "materialized view")]
    MaterializedView,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::View => f.write_str("VIEW"),
            ViewKind::MaterializedView => f.write_str("MATERIALIZED VIEW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    /// `schema.name`
    pub full_name: String,
    pub schema: String,
    pub kind: ViewKind,
    pub owner: String,
    /// Defining query, verbatim from the catalog.
    pub body: String,
    pub dependencies: BTreeSet<String>,
    pub grants: Vec<String>,
}

impl From<DependentViewRow> for ViewDescriptor {
    fn from(row: DependentViewRow) -> Self {
        Self {
            full_name: row.qualified(),
            schema: row.schema,
            kind: row.kind,
            owner: row.owner,
            body: row.body,
            dependencies: row.dependencies.into_iter().collect(),
            grants: row.grants,
        }
    }
}

/// Breadth-first walk over every view depending, directly or not, on `table`.
pub fn capture<C: Catalog + ?Sized>(
    catalog: &C,
    table: &TableName,
) -> CatalogResult<Vec<ViewDescriptor>> {
    let root = table.qualified();
    let mut visited: HashSet<String> = HashSet::from([root.clone()]);
    let mut queue = VecDeque::from([root]);
    let mut captured = Vec::new();
    while let Some(relation) = queue.pop_front() {
        for row in catalog.dependent_views_of(&relation)? {
            let name = row.qualified();
            if visited.insert(name.clone()) {
                debug!("Captured dependent view {name}");
                queue.push_back(name);
                captured.push(ViewDescriptor::from(row));
            }
        }
    }
    Ok(captured)
}

/// A saved capture, as found on disk.
#[derive(Debug, Clone)]
pub struct SavedView {
    pub path: PathBuf,
    pub descriptor: ViewDescriptor,
    pub age: Duration,
}

impl SavedView {
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age <= max_age
    }
}

/// Side storage for captured views:
/// `{root}/{interface}/{table}/{schema.view}.json`, freshness from file mtime.
#[derive(Debug, Clone)]
pub struct ViewStore {
    root: PathBuf,
    interface: String,
    max_age: Duration,
}

impl ViewStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            interface: DEFAULT_INTERFACE.to_string(),
            max_age: MAX_CAPTURE_AGE,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn table_dir(&self, table: &TableName) -> PathBuf {
        self.root.join(&self.interface).join(&table.table)
    }

    pub fn path_for(&self, table: &TableName, view: &str) -> PathBuf {
        self.table_dir(table)
            .join(format!("{view}.{RECORD_EXTENSION}"))
    }

    pub fn save(&self, table: &TableName, view: &ViewDescriptor) -> UploadResult<PathBuf> {
        let dir = self.table_dir(table);
        fs::create_dir_all(&dir)?;
        let path = self.path_for(table, &view.full_name);
        fs::write(&path, serde_json::to_vec_pretty(view)?)?;
        Ok(path)
    }

    /// Every saved capture for `table`, stale ones included, sorted by name.
    ///
    /// Records that cannot be read or parsed are logged and left on disk.
    pub fn list(&self, table: &TableName) -> UploadResult<Vec<SavedView>> {
        let dir = self.table_dir(table);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let now = SystemTime::now();
        let mut saved = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    warn!("Skipping unreadable entry in {}: {err}", dir.display());
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path, now) {
                Ok(record) => saved.push(record),
                Err(err) => warn!("Skipping view capture {}: {err}", path.display()),
            }
        }
        saved.sort_by(|a, b| a.descriptor.full_name.cmp(&b.descriptor.full_name));
        Ok(saved)
    }

    /// Captures young enough to replay.
    pub fn load_fresh(&self, table: &TableName) -> UploadResult<Vec<SavedView>> {
        let (fresh, stale): (Vec<_>, Vec<_>) = self
            .list(table)?
            .into_iter()
            .partition(|saved| saved.is_fresh(self.max_age));
        for saved in &stale {
            debug!("Ignoring stale view capture {:?}", saved.path);
        }
        Ok(fresh)
    }

    pub fn remove(&self, path: &Path) -> UploadResult<()> {
        fs::remove_file(path)?;
        Ok(())
    }
}

fn read_record(path: &Path, now: SystemTime) -> UploadResult<SavedView> {
    let modified = fs::metadata(path)?.modified()?;
    let age = now.duration_since(modified).unwrap_or_default();
    let descriptor: ViewDescriptor = serde_json::from_slice(&fs::read(path)?)?;
    Ok(SavedView {
        path: path.to_path_buf(),
        descriptor,
        age,
    })
}

/// Dependency order for replay; views a view reads from come first. The base
/// table and relations outside `views` impose no ordering.
pub fn replay_order(views: &[ViewDescriptor], base: &TableName) -> Vec<String> {
    let base = base.qualified();
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    let mut by_name: Vec<&ViewDescriptor> = views.iter().collect();
    by_name.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    for view in &by_name {
        nodes
            .entry(view.full_name.clone())
            .or_insert_with(|| graph.add_node(view.full_name.clone()));
    }
    for view in &by_name {
        let dependent = nodes[&view.full_name];
        for dependency in view.dependencies.iter().filter(|dep| **dep != base) {
            if let Some(&source) = nodes.get(dependency) {
                graph.add_edge(source, dependent, ());
            }
        }
    }
    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|idx| graph[idx].clone()).collect(),
        Err(cycle) => {
            warn!(
                "View dependencies contain a cycle through {}; replaying in name order",
                graph[cycle.node_id()]
            );
            by_name.iter().map(|view| view.full_name.clone()).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedView {
    pub name: String,
    /// Where the view's captured body remains on disk.
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a replay; failures are expected terminal states, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: Vec<String>,
    pub failed: Vec<FailedView>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

fn replay_statements(
    view: &ViewDescriptor,
    table_dropped: bool,
    grant_access: &[String],
) -> Vec<Statement> {
    if !table_dropped {
        return match view.kind {
            ViewKind::View => Vec::new(),
            ViewKind::MaterializedView => {
                vec![Statement::RefreshMaterializedView(view.full_name.clone())]
            }
        };
    }
    let mut statements = vec![
        Statement::SetSearchPath(view.schema.clone()),
        Statement::CreateView {
            name: view.full_name.clone(),
            kind: view.kind,
            body: view.body.clone(),
        },
        Statement::AlterOwner {
            name: view.full_name.clone(),
            owner: view.owner.clone(),
        },
    ];
    if !view.grants.is_empty() {
        statements.push(Statement::Grant {
            privilege: Privilege::Select,
            object: view.full_name.clone(),
            grantees: view.grants.clone(),
        });
    }
    if !grant_access.is_empty() {
        statements.push(Statement::Grant {
            privilege: Privilege::All,
            object: view.full_name.clone(),
            grantees: grant_access.to_vec(),
        });
    }
    statements
}

fn run_in_transaction<C: Catalog + ?Sized>(
    catalog: &C,
    statements: &[Statement],
) -> CatalogResult<()> {
    catalog.begin()?;
    for statement in statements {
        if let Err(err) = catalog.execute(statement) {
            if let Err(rollback) = catalog.rollback() {
                warn!("Rollback after failed view statement also failed: {rollback}");
            }
            return Err(err);
        }
    }
    catalog.commit()
}

/// Replays every fresh capture for `table`, each in its own transaction.
pub fn replay<C: Catalog + ?Sized>(
    catalog: &C,
    store: &ViewStore,
    table: &TableName,
    table_dropped: bool,
    grant_access: &[String],
) -> UploadResult<ReplayReport> {
    info!("Collecting views to reinstantiate");
    let mut report = ReplayReport::default();
    let saved = match store.load_fresh(table) {
        Ok(saved) => saved,
        Err(err) => {
            warn!("Unable to read view captures for {}: {err}", table.qualified());
            return Ok(report);
        }
    };
    if saved.is_empty() {
        return Ok(report);
    }
    let descriptors: Vec<ViewDescriptor> =
        saved.iter().map(|saved| saved.descriptor.clone()).collect();
    let by_name: BTreeMap<&str, &SavedView> = saved
        .iter()
        .map(|saved| (saved.descriptor.full_name.as_str(), saved))
        .collect();

    info!("Reinstantiating {} view(s)", saved.len());
    for name in replay_order(&descriptors, table) {
        let Some(entry) = by_name.get(name.as_str()) else {
            continue;
        };
        let statements = replay_statements(&entry.descriptor, table_dropped, grant_access);
        match run_in_transaction(catalog, &statements) {
            Ok(()) => {
                if let Err(err) = store.remove(&entry.path) {
                    warn!("Could not remove view capture {}: {err}", entry.path.display());
                }
                debug!("Reinstantiated view {name}");
                report.replayed.push(name);
            }
            Err(err) => {
                warn!("Unable to reinstantiate view: {name}");
                warn!("The view body is saved at {}", entry.path.display());
                report.failed.push(FailedView {
                    name,
                    path: entry.path.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(report)
}
