//! Create-or-alter synchronization of one physical table: probe live
//! state, compute a change plan, apply it through the dialect's
//! alteration strategy (in-place `ALTER` or rebuild-and-copy).

use log::{debug, info, warn};
use rusqlite::Connection;

use crate::columns::ColumnSpec;
use crate::content_type::PrimaryKeyType;
use crate::dialect::{AlterCapability, SqlDialect};
use crate::error::SchemaSyncError;

/// Name of the primary-key column on every synchronized table.
pub const ID_COLUMN: &str = "id";

const REBUILD_SAVEPOINT: &str = "schemasync_rebuild";

/// Desired state for one physical table, primary key excluded from
/// `columns`.
#[derive(Debug, Clone)]
pub struct TableTarget {
    pub table: String,
    pub primary_key: PrimaryKeyType,
    pub columns: Vec<ColumnSpec>,
    /// Optional multi-column uniqueness constraint (junction tables).
    pub composite_unique: Option<Vec<String>>,
}

/// One column as reported by the live database. Read at migration time,
/// never cached across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalColumn {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub is_pk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PhysicalTableState {
    pub columns: Vec<PhysicalColumn>,
    pub unique_indexes: Vec<UniqueIndex>,
}

impl PhysicalTableState {
    pub fn column(&self, name: &str) -> Option<&PhysicalColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Single-column unique index covering `column`, if any. Matched on
    /// the indexed column rather than the index name, so indexes that
    /// followed a column through a rename are still found.
    pub fn unique_index_on(&self, column: &str) -> Option<&UniqueIndex> {
        self.unique_indexes
            .iter()
            .find(|idx| idx.columns.len() == 1 && idx.columns[0] == column)
    }
}

/// Structural changes needed to take a live table to its target state.
#[derive(Debug, Clone, Default)]
pub struct TablePlan {
    pub added: Vec<ColumnSpec>,
    /// Physical column renames `(old, new)`, applied data-preserving.
    pub renamed: Vec<(String, String)>,
    /// Columns needing a new uniqueness constraint.
    pub unique_added: Vec<String>,
    /// Index names of uniqueness constraints to drop (only indexes this
    /// engine created; foreign indexes are left alone).
    pub unique_dropped: Vec<String>,
    /// Columns whose nullability differs from the target.
    pub not_null_changed: Vec<String>,
    /// Columns eligible for removal. Dropped only as a side effect of a
    /// rebuild that is already required for another reason — deletion is
    /// dangerous, so it is never triggered opportunistically.
    pub droppable: Vec<String>,
}

impl TablePlan {
    /// True when no action is required. Droppable columns alone never
    /// justify action.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.renamed.is_empty()
            && self.unique_added.is_empty()
            && self.unique_dropped.is_empty()
            && self.not_null_changed.is_empty()
    }

    /// Nullability cannot be altered in place even on direct-alter
    /// engines backed by SQLite; it always routes through the rebuild.
    pub fn needs_rebuild(&self) -> bool {
        !self.not_null_changed.is_empty()
    }
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, SchemaSyncError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Probe the live structure of `table`.
pub fn read_table_state(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    table: &str,
) -> Result<PhysicalTableState, SchemaSyncError> {
    let mut state = PhysicalTableState::default();

    let sql = format!("PRAGMA table_info({})", dialect.quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(PhysicalColumn {
            name: row.get(1)?,
            sql_type: row.get(2)?,
            not_null: row.get::<_, i64>(3)? != 0,
            is_pk: row.get::<_, i64>(5)? != 0,
        })
    })?;
    for row in rows {
        state.columns.push(row?);
    }

    let sql = format!("PRAGMA index_list({})", dialect.quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let index_rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)? != 0))
    })?;
    let mut unique_names = Vec::new();
    for row in index_rows {
        let (name, unique) = row?;
        if unique {
            unique_names.push(name);
        }
    }

    for name in unique_names {
        let sql = format!("PRAGMA index_info({})", dialect.quote_ident(&name));
        let mut stmt = conn.prepare(&sql)?;
        let col_rows = stmt.query_map([], |row| row.get::<_, String>(2))?;
        let mut columns = Vec::new();
        for col in col_rows {
            columns.push(col?);
        }
        state.unique_indexes.push(UniqueIndex { name, columns });
    }

    Ok(state)
}

/// Compute the change plan for an existing table.
///
/// Only missing columns are added: attribute order changes and renames
/// already applied in place never produce spurious additions. Physical
/// columns that no target attribute accounts for are ignored unless
/// they appear in `droppable`.
pub fn build_plan(
    target: &TableTarget,
    state: &PhysicalTableState,
    renames: &[(String, String)],
    droppable: &[String],
) -> TablePlan {
    let mut plan = TablePlan::default();

    // A rename is only actionable when the old column is still there and
    // the new name is still free; anything else was already applied or
    // never materialized
    plan.renamed = renames
        .iter()
        .filter(|(old, new)| state.has_column(old) && !state.has_column(new))
        .cloned()
        .collect();

    for spec in &target.columns {
        let physical_name = plan
            .renamed
            .iter()
            .find(|(_, new)| new == &spec.name)
            .map(|(old, _)| old.as_str())
            .unwrap_or(spec.name.as_str());

        let Some(physical) = state.column(physical_name) else {
            if spec.unique {
                plan.unique_added.push(spec.name.clone());
            }
            plan.added.push(spec.clone());
            continue;
        };

        if physical.not_null != spec.not_null && !physical.is_pk {
            plan.not_null_changed.push(spec.name.clone());
        }

        let existing_unique = state.unique_index_on(physical_name);
        if spec.unique && existing_unique.is_none() {
            plan.unique_added.push(spec.name.clone());
        }
        if !spec.unique {
            if let Some(index) = existing_unique {
                if index.name.starts_with("uq_") {
                    plan.unique_dropped.push(index.name.clone());
                }
            }
        }
    }

    plan.droppable = droppable
        .iter()
        .filter(|name| state.has_column(name))
        .cloned()
        .collect();

    plan
}

/// Bring one physical table in line with its target state, creating it
/// if absent.
pub fn synchronize_table(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    target: &TableTarget,
    renames: &[(String, String)],
    droppable: &[String],
) -> Result<(), SchemaSyncError> {
    if !table_exists(conn, &target.table)? {
        info!("Creating table '{}'", target.table);
        create_table(conn, dialect, target)?;
        create_unique_indexes(conn, dialect, target)?;
        return Ok(());
    }

    let state = read_table_state(conn, dialect, &target.table)?;
    let plan = build_plan(target, &state, renames, droppable);

    if plan.is_noop() {
        debug!("Table '{}' is up to date", target.table);
        return Ok(());
    }

    match dialect.alter_capability() {
        AlterCapability::InPlace if !plan.needs_rebuild() => {
            alter_in_place(conn, dialect, &target.table, &plan)
        }
        _ => rebuild_via_copy(conn, dialect, target, &state, &plan),
    }
}

fn create_table(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    target: &TableTarget,
) -> Result<(), SchemaSyncError> {
    let mut defs = vec![dialect.primary_key_clause(target.primary_key)];
    defs.extend(target.columns.iter().map(|c| c.ddl_fragment(dialect)));

    let sql = format!(
        "CREATE TABLE {} ({})",
        dialect.quote_ident(&target.table),
        defs.join(", ")
    );
    conn.execute(&sql, [])?;
    Ok(())
}

fn create_unique_indexes(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    target: &TableTarget,
) -> Result<(), SchemaSyncError> {
    for spec in target.columns.iter().filter(|c| c.unique) {
        create_unique_index(conn, dialect, &target.table, &spec.name)?;
    }

    if let Some(columns) = &target.composite_unique {
        let name = format!("uq_{}", target.table);
        let quoted: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
        let sql = format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            dialect.quote_ident(&name),
            dialect.quote_ident(&target.table),
            quoted.join(", ")
        );
        conn.execute(&sql, []).map_err(|err| {
            constraint_or_database(err, &target.table, &columns.join("+"))
        })?;
    }

    Ok(())
}

fn create_unique_index(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    table: &str,
    column: &str,
) -> Result<(), SchemaSyncError> {
    let name = unique_index_name(table, column);
    let sql = format!(
        "CREATE UNIQUE INDEX {} ON {} ({})",
        dialect.quote_ident(&name),
        dialect.quote_ident(table),
        dialect.quote_ident(column)
    );
    conn.execute(&sql, [])
        .map_err(|err| constraint_or_database(err, table, column))?;
    Ok(())
}

fn constraint_or_database(err: rusqlite::Error, table: &str, column: &str) -> SchemaSyncError {
    if SchemaSyncError::is_constraint_violation(&err) {
        warn!("Existing data in {table}.{column} violates the requested unique constraint; column left unaltered");
        SchemaSyncError::UniqueConstraintViolation {
            table: table.to_string(),
            column: column.to_string(),
        }
    } else {
        err.into()
    }
}

fn unique_index_name(table: &str, column: &str) -> String {
    format!("uq_{table}_{column}")
}

/// Direct-alter strategy: apply the plan statement by statement.
fn alter_in_place(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    table: &str,
    plan: &TablePlan,
) -> Result<(), SchemaSyncError> {
    for (old, new) in &plan.renamed {
        info!("Renaming column {table}.{old} -> {table}.{new}");
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            dialect.quote_ident(table),
            dialect.quote_ident(old),
            dialect.quote_ident(new)
        );
        conn.execute(&sql, [])?;
    }

    for spec in &plan.added {
        info!("Adding column {table}.{}", spec.name);
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            dialect.quote_ident(table),
            spec.ddl_fragment(dialect)
        );
        conn.execute(&sql, [])?;
    }

    for column in &plan.unique_added {
        debug!("Adding unique constraint on {table}.{column}");
        create_unique_index(conn, dialect, table, column)?;
    }

    for index in &plan.unique_dropped {
        debug!("Dropping unique constraint '{index}' on {table}");
        let sql = format!("DROP INDEX {}", dialect.quote_ident(index));
        conn.execute(&sql, [])?;
    }

    if !plan.droppable.is_empty() {
        debug!(
            "Leaving {} removable column(s) on '{table}' in place; deletion is deferred to the next rebuild",
            plan.droppable.len()
        );
    }

    Ok(())
}

/// Rebuild strategy: rename the live table aside, create a fresh table
/// under the original name with the full target schema, copy forward
/// only the still-relevant columns (renamed data under its new name),
/// and drop the temporary table. Runs under a savepoint; any failure
/// rolls the whole sequence back, leaving the original table untouched.
fn rebuild_via_copy(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    target: &TableTarget,
    state: &PhysicalTableState,
    plan: &TablePlan,
) -> Result<(), SchemaSyncError> {
    info!(
        "Rebuilding table '{}' via copy ({} strategy)",
        target.table,
        dialect.name()
    );

    conn.execute_batch(&format!("SAVEPOINT {REBUILD_SAVEPOINT}"))?;
    match run_rebuild(conn, dialect, target, state, plan) {
        Ok(()) => {
            conn.execute_batch(&format!("RELEASE {REBUILD_SAVEPOINT}"))?;
            Ok(())
        }
        Err(err) => {
            conn.execute_batch(&format!(
                "ROLLBACK TO {REBUILD_SAVEPOINT}; RELEASE {REBUILD_SAVEPOINT}"
            ))?;
            Err(match err {
                violation @ SchemaSyncError::UniqueConstraintViolation { .. } => violation,
                SchemaSyncError::Database(db) => SchemaSyncError::RebuildFailure {
                    table: target.table.clone(),
                    message: db.to_string(),
                },
                other => other,
            })
        }
    }
}

fn run_rebuild(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    target: &TableTarget,
    state: &PhysicalTableState,
    plan: &TablePlan,
) -> Result<(), SchemaSyncError> {
    let table = &target.table;
    let tmp = format!("{table}_rebuild_tmp");

    let sql = format!(
        "ALTER TABLE {} RENAME TO {}",
        dialect.quote_ident(table),
        dialect.quote_ident(&tmp)
    );
    conn.execute(&sql, [])?;

    create_table(conn, dialect, target)?;

    // Copy forward surviving columns using the post-rename-resolution
    // key set; droppable columns simply don't make the list
    let mut sources = Vec::new();
    let mut destinations = Vec::new();
    if state.has_column(ID_COLUMN) {
        sources.push(dialect.quote_ident(ID_COLUMN));
        destinations.push(dialect.quote_ident(ID_COLUMN));
    }
    for spec in &target.columns {
        let source = plan
            .renamed
            .iter()
            .find(|(_, new)| new == &spec.name)
            .map(|(old, _)| old.as_str())
            .unwrap_or(spec.name.as_str());
        if state.has_column(source) {
            sources.push(dialect.quote_ident(source));
            destinations.push(dialect.quote_ident(&spec.name));
        }
    }

    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        dialect.quote_ident(table),
        destinations.join(", "),
        sources.join(", "),
        dialect.quote_ident(&tmp)
    );
    conn.execute(&sql, [])?;

    let sql = format!("DROP TABLE {}", dialect.quote_ident(&tmp));
    conn.execute(&sql, [])?;

    // Indexes last: the old table's index names are only freed by the
    // drop above
    create_unique_indexes(conn, dialect, target)?;

    if !plan.droppable.is_empty() {
        info!(
            "Dropped {} removed column(s) from '{table}' during rebuild",
            plan.droppable.len()
        );
    }

    Ok(())
}
