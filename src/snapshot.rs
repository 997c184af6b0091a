use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::content_type::{Attribute, ContentTypeDeclaration, ContentTypeKind, Options};
use crate::error::SchemaSyncError;
use crate::table_sync::table_exists;

/// Metadata table holding the last-applied schema per content type.
/// The name is stable across versions; rows are keyed by uid.
pub const SCHEMA_STORE_TABLE: &str = "schemasync_store";

const CREATE_STORE_SQL: &str = "
CREATE TABLE IF NOT EXISTS schemasync_store (
    uid        TEXT PRIMARY KEY,
    store_type TEXT NOT NULL,
    value      TEXT NOT NULL
)";

/// The last schema declaration successfully applied to physical storage.
///
/// Holds only the fields that affect physical layout; display labels,
/// icons and other cosmetic properties are excluded by construction so
/// that cosmetic edits never trigger a migration. Used solely for change
/// detection — never to serve queries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub uid: String,
    pub collection_name: String,
    pub kind: ContentTypeKind,
    pub options: Options,
    pub attributes: Vec<Attribute>,
}

impl SchemaSnapshot {
    pub fn of(decl: &ContentTypeDeclaration) -> Self {
        SchemaSnapshot {
            uid: decl.uid.clone(),
            collection_name: decl.collection_name.clone(),
            kind: decl.kind,
            options: decl.options,
            attributes: decl.attributes.clone(),
        }
    }

    /// Canonical serialized form; change detection is a byte comparison
    /// of this string.
    pub fn to_canonical_json(&self) -> Result<String, SchemaSyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Persistence for [`SchemaSnapshot`] values.
pub struct SchemaStore;

impl SchemaStore {
    /// Load the stored snapshot for a content type. Returns `Ok(None)`
    /// when no snapshot exists — including when the store table itself
    /// has never been created (first-ever boot).
    pub fn load(conn: &Connection, uid: &str) -> Result<Option<SchemaSnapshot>, SchemaSyncError> {
        if !table_exists(conn, SCHEMA_STORE_TABLE)? {
            debug!("Schema store table absent; treating '{uid}' as never migrated");
            return Ok(None);
        }

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM schemasync_store WHERE uid = ?",
                [uid],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Persist the snapshot for a successfully migrated content type.
    /// Must only be called after the physical tables are synchronized;
    /// the orchestrator enforces that ordering.
    pub fn save(conn: &Connection, decl: &ContentTypeDeclaration) -> Result<(), SchemaSyncError> {
        conn.execute_batch(CREATE_STORE_SQL)?;

        let snapshot = SchemaSnapshot::of(decl);
        let store_type = match decl.kind {
            ContentTypeKind::CollectionType => "contentType",
            ContentTypeKind::Component => "component",
        };

        conn.execute(
            "INSERT OR REPLACE INTO schemasync_store (uid, store_type, value) VALUES (?, ?, ?)",
            params![decl.uid, store_type, snapshot.to_canonical_json()?],
        )?;

        Ok(())
    }
}
