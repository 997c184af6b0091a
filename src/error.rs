use rusqlite::Error as RusqliteError;
use thiserror::Error;

use crate::orchestrator::MigrationPhase;

/// Main error type for schema synchronization operations.
#[derive(Error, Debug)]
pub enum SchemaSyncError {
    /// Storage-level error, propagated unchanged from the driver.
    #[error("Database error: {0}")]
    Database(#[from] RusqliteError),

    /// Snapshot serialization/deserialization error.
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A declaration references a relation target that is not registered
    /// in the schema catalog.
    #[error("Content type '{uid}' references unknown target '{target}'")]
    ValidationMismatch { uid: String, target: String },

    /// Existing data does not satisfy a newly requested uniqueness
    /// constraint. The column is left unaltered.
    #[error("Unique constraint violation on {table}.{column}: existing data does not satisfy the new constraint")]
    UniqueConstraintViolation { table: String, column: String },

    /// The rebuild-and-copy sequence failed. The transaction is rolled
    /// back in full; the original table is untouched.
    #[error("Rebuild of table '{table}' failed: {message}")]
    RebuildFailure { table: String, message: String },

    /// Wrapper carrying content-type identity and the failing phase.
    #[error("Migration of '{uid}' failed during {phase}: {source}")]
    Migration {
        uid: String,
        phase: MigrationPhase,
        #[source]
        source: Box<SchemaSyncError>,
    },

    /// Custom application errors.
    #[error("Error: {0}")]
    Error(String),
}

impl SchemaSyncError {
    /// Wrap an error with the content type and phase it occurred in.
    pub fn migration(uid: impl Into<String>, phase: MigrationPhase, source: SchemaSyncError) -> Self {
        // Don't double-wrap: the innermost phase is the interesting one
        if matches!(source, SchemaSyncError::Migration { .. }) {
            return source;
        }
        SchemaSyncError::Migration {
            uid: uid.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// True when the underlying storage error is a constraint violation.
    pub fn is_constraint_violation(err: &RusqliteError) -> bool {
        matches!(
            err,
            RusqliteError::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
