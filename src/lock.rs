//! Exclusive lock and mutation protocol.
//!
//! ```text
//! Unlocked -> Locked -> Mutated -> Copied -> Committed
//!                \________\__________\______> RolledBack
//! ```
//!
//! Competing sessions are terminated (best effort) before a blocking
//! `LOCK TABLE`. Every statement after that runs in the one transaction held
//! by [`ExclusiveLock`]; dropping the guard before [`ExclusiveLock::commit`]
//! rolls the transaction back, so no exit path leaks the lock.

use log::{info, warn};

use crate::{
    catalog::{Catalog, CatalogError},
    error::{UploadError, UploadResult},
    reconcile::{self, Widening},
    sql::{CopyCredentials, Privilege, Statement, TableLayout, TableName},
    types::{ColumnType, MAX_VARCHAR_WIDTH},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
    Mutated,
    Copied,
    Committed,
    RolledBack,
}

/// What happens to the table before the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    DropAndCreate,
    Create,
    Truncate,
    Append,
}

impl Mutation {
    pub fn choose(drop_table: bool, exists: bool, truncate_table: bool) -> Self {
        if drop_table {
            Mutation::DropAndCreate
        } else if !exists {
            Mutation::Create
        } else if truncate_table {
            Mutation::Truncate
        } else {
            Mutation::Append
        }
    }
}

pub struct ExclusiveLock<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    table: TableName,
    state: LockState,
}

impl<'a, C: Catalog + ?Sized> ExclusiveLock<'a, C> {
    /// Clears competing sessions, opens a transaction and locks the table.
    /// A table that does not exist yet has nothing to lock against.
    pub fn acquire(catalog: &'a C, table: &TableName, exists: bool) -> UploadResult<Self> {
        if exists {
            for session in catalog.competing_sessions(&table.schema, &table.table)? {
                match catalog.terminate(&session) {
                    Ok(()) => info!("Terminated competing session {session}"),
                    Err(err) => warn!("Could not terminate session {session}: {err}"),
                }
            }
        }
        catalog.begin()?;
        let mut guard = Self {
            catalog,
            table: table.clone(),
            state: LockState::Unlocked,
        };
        if exists {
            info!("Acquiring an exclusive lock on {}", table.qualified());
            catalog
                .lock_table(&table.schema, &table.table)
                .map_err(|err| match err {
                    CatalogError::Cancelled(message) => UploadError::LockContention {
                        table: table.qualified(),
                        message,
                    },
                    other => other.into(),
                })?;
        }
        guard.state = LockState::Locked;
        Ok(guard)
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    fn execute(&mut self, statement: &Statement) -> UploadResult<()> {
        self.catalog.execute(statement)?;
        Ok(())
    }

    pub fn widen(&mut self, widening: &Widening) -> UploadResult<()> {
        if !reconcile::widen(self.catalog, &self.table, widening)? {
            return Err(UploadError::Capacity {
                table: self.table.qualified(),
                column: widening.column.clone(),
                count: widening.count,
                max_width: MAX_VARCHAR_WIDTH,
                examples: widening.examples.clone(),
            });
        }
        Ok(())
    }

    pub fn mutate(
        &mut self,
        mutation: Mutation,
        columns: &[(String, ColumnType)],
        layout: &TableLayout,
    ) -> UploadResult<()> {
        let create = Statement::CreateTable {
            table: self.table.clone(),
            columns: columns.to_vec(),
            layout: layout.clone(),
        };
        match mutation {
            Mutation::DropAndCreate => {
                info!("Dropping and recreating {}", self.table.qualified());
                self.execute(&Statement::DropTable {
                    table: self.table.clone(),
                    cascade: true,
                })?;
                self.execute(&create)?;
            }
            Mutation::Create => {
                info!("Creating {}", self.table.qualified());
                self.execute(&create)?;
            }
            Mutation::Truncate => {
                info!("Truncating {}", self.table.qualified());
                self.execute(&Statement::Truncate(self.table.clone()))?;
            }
            Mutation::Append => {}
        }
        self.state = LockState::Mutated;
        Ok(())
    }

    pub fn copy(
        &mut self,
        columns: Option<Vec<String>>,
        source: String,
        credentials: CopyCredentials,
    ) -> UploadResult<()> {
        info!("Copying staged data into {}", self.table.qualified());
        self.execute(&Statement::Copy {
            table: self.table.clone(),
            columns,
            source,
            credentials,
        })?;
        self.state = LockState::Copied;
        Ok(())
    }

    /// Reapplied on every load; existing grants are not diffed.
    pub fn grant(&mut self, grantees: &[String]) -> UploadResult<()> {
        if grantees.is_empty() {
            return Ok(());
        }
        info!("Granting SELECT on {} to {}", self.table.qualified(), grantees.join(", "));
        self.execute(&Statement::Grant {
            privilege: Privilege::Select,
            object: self.table.qualified(),
            grantees: grantees.to_vec(),
        })
    }

    pub fn commit(mut self) -> UploadResult<()> {
        self.catalog.commit()?;
        self.state = LockState::Committed;
        Ok(())
    }
}

impl<C: Catalog + ?Sized> Drop for ExclusiveLock<'_, C> {
    fn drop(&mut self) {
        if self.state == LockState::Committed {
            return;
        }
        warn!("Rolling back changes to {}", self.table.qualified());
        if let Err(err) = self.catalog.rollback() {
            warn!("Rollback of {} failed: {err}", self.table.qualified());
        }
        self.state = LockState::RolledBack;
    }
}

/// Everything the critical section needs.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub table: TableName,
    pub exists: bool,
    pub mutation: Mutation,
    pub columns: Vec<(String, ColumnType)>,
    pub layout: TableLayout,
    pub widenings: Vec<Widening>,
    /// `None` when nothing was staged.
    pub copy_source: Option<String>,
    /// Explicit COPY column list; `None` loads positionally.
    pub copy_columns: Option<Vec<String>>,
    pub credentials: CopyCredentials,
    pub grant_access: Vec<String>,
}

/// Runs lock, widen, mutate, copy, grant and commit as one unit.
pub fn load_table<C: Catalog + ?Sized>(catalog: &C, plan: &LoadPlan) -> UploadResult<()> {
    let mut lock = ExclusiveLock::acquire(catalog, &plan.table, plan.exists)?;
    if plan.mutation != Mutation::DropAndCreate {
        for widening in &plan.widenings {
            lock.widen(widening)?;
        }
    }
    lock.mutate(plan.mutation, &plan.columns, &plan.layout)?;
    if let Some(source) = &plan.copy_source {
        lock.copy(
            plan.copy_columns.clone(),
            source.clone(),
            plan.credentials.clone(),
        )?;
    }
    lock.grant(&plan.grant_access)?;
    lock.commit()
}
