//! schemasync keeps relational storage in sync with declared content
//! types.
//!
//! At boot the host application hands over a [`catalog::SchemaCatalog`]
//! of finalized declarations; [`orchestrator::run_migrations`] diffs
//! each one against the snapshot persisted after the last successful
//! migration and applies the difference: creating tables, adding and
//! renaming columns (renames are detected heuristically, see
//! [`rename`]), synchronizing junction and morph tables, and running
//! the draft-and-publish data migrations. Dialect differences are
//! isolated behind [`dialect::SqlDialect`]; engines that cannot alter
//! tables in place go through a rebuild-and-copy path instead.
//!
//! The engine is deliberately conservative: a change it cannot apply
//! safely fails the pass, the failing content type's transaction rolls
//! back, and the caller is expected to abort boot.

pub mod catalog;
pub mod columns;
pub mod config;
pub mod content_type;
pub mod dialect;
pub mod draft_publish;
pub mod error;
pub mod orchestrator;
pub mod relation_sync;
pub mod rename;
pub mod snapshot;
pub mod table_sync;

pub use catalog::SchemaCatalog;
pub use config::EngineConfig;
pub use content_type::ContentTypeDeclaration;
pub use dialect::{AlterCapability, SqlDialect, SqliteDialect};
pub use error::SchemaSyncError;
pub use orchestrator::{run_migrations, MigrationPhase, MigrationReport, Migrator};
