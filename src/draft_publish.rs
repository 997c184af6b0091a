//! Data migration for the draft-and-publish option.
//!
//! Flipping the option on or off changes the meaning of existing rows,
//! so the structural sync alone is not enough: enabling marks every
//! pre-existing row as published (they were all live before drafts
//! existed), and disabling deletes draft rows outright since a
//! non-draftable table has no way to represent them.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use rusqlite::Connection;

use crate::columns::PUBLISHED_AT;
use crate::content_type::ContentTypeDeclaration;
use crate::dialect::{AlterCapability, SqlDialect};
use crate::error::SchemaSyncError;
use crate::snapshot::SchemaSnapshot;
use crate::table_sync::{read_table_state, table_exists};

/// How the draft-and-publish option changed since the last applied
/// schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftPublishTransition {
    None,
    /// Off -> on. After the structural sync adds the publish timestamp
    /// column, every existing row is backfilled as published.
    Enable,
    /// On -> off. Draft rows are deleted before the structural sync so
    /// no row silently changes meaning. This is irreversible data loss
    /// and is logged as such.
    Disable,
}

/// Classify the transition by comparing the stored snapshot with the
/// incoming declaration. A missing snapshot counts as the option being
/// off, so a never-migrated draftable type classifies as `Enable` and
/// any rows already in its table get backfilled as published.
pub fn classify(
    snapshot: Option<&SchemaSnapshot>,
    decl: &ContentTypeDeclaration,
) -> DraftPublishTransition {
    let was = snapshot.map(|s| s.options.draft_and_publish).unwrap_or(false);
    let is = decl.options.draft_and_publish;
    match (was, is) {
        (false, true) => DraftPublishTransition::Enable,
        (true, false) => DraftPublishTransition::Disable,
        _ => DraftPublishTransition::None,
    }
}

/// Backfill the publish timestamp on every row that predates the
/// option. Runs after the structural sync, inside the same transaction.
pub fn migrate_enable(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    table: &str,
    now: DateTime<Utc>,
) -> Result<(), SchemaSyncError> {
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {} IS NULL",
        dialect.quote_ident(table),
        dialect.quote_ident(PUBLISHED_AT),
        dialect.quote_ident(PUBLISHED_AT)
    );
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let updated = conn.execute(&sql, [stamp])?;
    info!("Marked {updated} existing row(s) in '{table}' as published");
    Ok(())
}

/// Delete draft rows, then remove the publish timestamp column itself.
/// Skips quietly when the table or column never existed (the option was
/// enabled but no migration ever ran).
///
/// The column is a bookkeeping column rather than an attribute, so the
/// structural sync never plans its removal; it is handled here. On the
/// rebuild-only strategy the orphaned column is retained until the next
/// rebuild — its rows carry no draft data at that point, only NULLs.
pub fn migrate_disable(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    table: &str,
) -> Result<(), SchemaSyncError> {
    if !table_exists(conn, table)? {
        return Ok(());
    }
    let state = read_table_state(conn, dialect, table)?;
    if !state.has_column(PUBLISHED_AT) {
        return Ok(());
    }

    let sql = format!(
        "DELETE FROM {} WHERE {} IS NULL",
        dialect.quote_ident(table),
        dialect.quote_ident(PUBLISHED_AT)
    );
    let deleted = conn.execute(&sql, [])?;
    if deleted > 0 {
        warn!("Deleted {deleted} draft row(s) from '{table}' while disabling draft-and-publish");
    }

    match dialect.alter_capability() {
        AlterCapability::InPlace => {
            let sql = format!(
                "ALTER TABLE {} DROP COLUMN {}",
                dialect.quote_ident(table),
                dialect.quote_ident(PUBLISHED_AT)
            );
            conn.execute(&sql, [])?;
        }
        AlterCapability::RebuildOnly => {
            info!("Publish timestamp column on '{table}' retained until the next rebuild");
        }
    }
    Ok(())
}
