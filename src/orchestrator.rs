//! Boot-time migration pass over the full schema catalog.
//!
//! Content types are processed in registration order, each inside its
//! own transaction so a failure leaves earlier types fully migrated and
//! the failing type fully untouched. The pass is fail-fast: the first
//! error aborts the run, wrapped with the content type and phase it
//! occurred in, and the caller is expected to abort boot.

use std::collections::HashSet;

use chrono::Utc;
use log::{debug, info};
use rusqlite::Connection;
use strum::Display;

use crate::catalog::SchemaCatalog;
use crate::columns::{bookkeeping_columns, column_name, map_column};
use crate::config::EngineConfig;
use crate::content_type::ContentTypeDeclaration;
use crate::dialect::{SqlDialect, SqliteDialect};
use crate::draft_publish::{self, DraftPublishTransition};
use crate::error::SchemaSyncError;
use crate::relation_sync::synchronize_relations;
use crate::rename::{apply_rename_detections, detect_renames};
use crate::snapshot::{SchemaSnapshot, SchemaStore};
use crate::table_sync::{synchronize_table, TableTarget};

/// The step a per-type migration was in when it failed. Carried in
/// [`SchemaSyncError::Migration`] so an operator can tell a change
/// detection problem from a structural one.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    CheckChanged,
    DraftPublishPrecheck,
    SyncMainTable,
    SyncRelationTables,
    DraftPublishMigrate,
    PersistSnapshot,
}

/// Outcome summary of one migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Uids whose physical storage was changed this pass.
    pub migrated: Vec<String>,
    /// Uids skipped because their snapshot matched the declaration.
    pub unchanged: Vec<String>,
}

/// Drives one migration pass. Borrows everything; owns nothing beyond
/// the pass itself.
pub struct Migrator<'a> {
    conn: &'a mut Connection,
    catalog: &'a SchemaCatalog,
    dialect: &'a dyn SqlDialect,
    config: &'a EngineConfig,
}

/// Run a full migration pass with the dialect flavor selected by the
/// configuration.
pub fn run_migrations(
    conn: &mut Connection,
    catalog: &SchemaCatalog,
    config: &EngineConfig,
) -> Result<MigrationReport, SchemaSyncError> {
    let dialect = if config.legacy_alter {
        SqliteDialect::legacy()
    } else {
        SqliteDialect::modern()
    };
    Migrator::new(conn, catalog, &dialect, config).run()
}

impl<'a> Migrator<'a> {
    pub fn new(
        conn: &'a mut Connection,
        catalog: &'a SchemaCatalog,
        dialect: &'a dyn SqlDialect,
        config: &'a EngineConfig,
    ) -> Self {
        Migrator {
            conn,
            catalog,
            dialect,
            config,
        }
    }

    pub fn run(&mut self) -> Result<MigrationReport, SchemaSyncError> {
        self.catalog.validate()?;
        info!(
            "Migration pass over {} content type(s) using the '{}' dialect",
            self.catalog.len(),
            self.dialect.name()
        );

        let mut report = MigrationReport::default();
        let catalog = self.catalog;
        for decl in catalog.iter() {
            if self.migrate_content_type(decl)? {
                report.migrated.push(decl.uid.clone());
            } else {
                report.unchanged.push(decl.uid.clone());
            }
        }

        info!(
            "Migration pass complete: {} migrated, {} unchanged",
            report.migrated.len(),
            report.unchanged.len()
        );
        Ok(report)
    }

    /// Migrate one content type; returns whether anything was applied.
    fn migrate_content_type(
        &mut self,
        decl: &ContentTypeDeclaration,
    ) -> Result<bool, SchemaSyncError> {
        let wrap = |phase| move |err| SchemaSyncError::migration(decl.uid.as_str(), phase, err);

        let snapshot =
            SchemaStore::load(self.conn, &decl.uid).map_err(wrap(MigrationPhase::CheckChanged))?;
        if let Some(stored) = &snapshot {
            let current = SchemaSnapshot::of(decl)
                .to_canonical_json()
                .map_err(wrap(MigrationPhase::CheckChanged))?;
            let previous = stored
                .to_canonical_json()
                .map_err(wrap(MigrationPhase::CheckChanged))?;
            if current == previous {
                debug!("'{}' is unchanged; skipping", decl.uid);
                return Ok(false);
            }
        }

        info!("Migrating '{}'", decl.uid);
        let transition = draft_publish::classify(snapshot.as_ref(), decl);
        let (renames, droppable) = match &snapshot {
            Some(stored) => resolve_physical_renames(stored, decl, self.config),
            None => (Vec::new(), Vec::new()),
        };

        let dialect = self.dialect;
        let catalog = self.catalog;
        let tx = self
            .conn
            .transaction()
            .map_err(SchemaSyncError::from)
            .map_err(wrap(MigrationPhase::CheckChanged))?;

        // Draft rows must go before the structural sync removes the
        // column that identifies them
        if transition == DraftPublishTransition::Disable {
            draft_publish::migrate_disable(&tx, dialect, &decl.collection_name)
                .map_err(wrap(MigrationPhase::DraftPublishPrecheck))?;
        }

        let target = main_table_target(decl, catalog, dialect)
            .map_err(wrap(MigrationPhase::SyncMainTable))?;
        synchronize_table(&tx, dialect, &target, &renames, &droppable)
            .map_err(wrap(MigrationPhase::SyncMainTable))?;

        synchronize_relations(&tx, dialect, catalog, decl)
            .map_err(wrap(MigrationPhase::SyncRelationTables))?;

        if transition == DraftPublishTransition::Enable {
            draft_publish::migrate_enable(&tx, dialect, &decl.collection_name, Utc::now())
                .map_err(wrap(MigrationPhase::DraftPublishMigrate))?;
        }

        SchemaStore::save(&tx, decl).map_err(wrap(MigrationPhase::PersistSnapshot))?;
        tx.commit()
            .map_err(SchemaSyncError::from)
            .map_err(wrap(MigrationPhase::PersistSnapshot))?;

        Ok(true)
    }
}

/// Desired main-table state for a declaration: mapped attribute columns
/// plus the bookkeeping timestamps.
pub fn main_table_target(
    decl: &ContentTypeDeclaration,
    catalog: &SchemaCatalog,
    dialect: &dyn SqlDialect,
) -> Result<TableTarget, SchemaSyncError> {
    let mut columns = Vec::new();
    for attr in &decl.attributes {
        if let Some(spec) = map_column(decl, attr, catalog, dialect)? {
            columns.push(spec);
        }
    }
    columns.extend(bookkeeping_columns(decl, dialect));

    Ok(TableTarget {
        table: decl.collection_name.clone(),
        primary_key: decl.primary_key_type,
        columns,
        composite_unique: None,
    })
}

/// Diff the stored snapshot against the declaration and translate the
/// attribute-level rename resolution into physical column terms.
fn resolve_physical_renames(
    snapshot: &SchemaSnapshot,
    decl: &ContentTypeDeclaration,
    config: &EngineConfig,
) -> (Vec<(String, String)>, Vec<String>) {
    let old_names: HashSet<&str> = snapshot.attributes.iter().map(|a| a.name.as_str()).collect();
    let new_names: HashSet<&str> = decl.attributes.iter().map(|a| a.name.as_str()).collect();

    let deleted: Vec<String> = snapshot
        .attributes
        .iter()
        .filter(|a| !new_names.contains(a.name.as_str()))
        .map(|a| a.name.clone())
        .collect();
    let added: Vec<String> = decl
        .attributes
        .iter()
        .filter(|a| !old_names.contains(a.name.as_str()))
        .map(|a| a.name.clone())
        .collect();

    let candidates = detect_renames(
        &snapshot.attributes,
        &decl.attributes,
        &deleted,
        &added,
        &config.rename,
    );
    let resolution = apply_rename_detections(&candidates, &deleted, &added);

    let old_attr = |name: &str| snapshot.attributes.iter().find(|a| a.name == name);

    // Only column-bearing attributes translate into physical work; a
    // renamed dynamic zone or component has no column to carry over
    let mut renames = Vec::new();
    for (old, new) in &resolution.renames {
        let (Some(old_attr), Some(new_attr)) = (old_attr(old), decl.attribute(new)) else {
            continue;
        };
        if let (Some(old_col), Some(new_col)) = (column_name(old_attr), column_name(new_attr)) {
            if old_col != new_col {
                renames.push((old_col, new_col));
            }
        }
    }

    let droppable: Vec<String> = resolution
        .actual_deletions
        .iter()
        .filter_map(|name| old_attr(name).and_then(column_name))
        .collect();

    (renames, droppable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::PUBLISHED_AT;
    use crate::content_type::{
        Attribute, AttributeKind, Cardinality, ContentTypeKind, Options, PrimaryKeyType,
        RelationAttribute, ScalarAttribute, ScalarKind,
    };
    use crate::table_sync::{read_table_state, table_exists};
    use pretty_assertions::assert_eq;

    fn scalar(name: &str, kind: ScalarKind) -> Attribute {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Scalar(ScalarAttribute::of(kind)),
        }
    }

    fn declaration(
        uid: &str,
        collection: &str,
        draft_and_publish: bool,
        attributes: Vec<Attribute>,
    ) -> ContentTypeDeclaration {
        ContentTypeDeclaration {
            uid: uid.to_string(),
            collection_name: collection.to_string(),
            kind: ContentTypeKind::CollectionType,
            options: Options { draft_and_publish },
            primary_key_type: PrimaryKeyType::Increments,
            attributes,
        }
    }

    fn article(attributes: Vec<Attribute>) -> ContentTypeDeclaration {
        declaration("api::article.article", "articles", false, attributes)
    }

    fn run(conn: &mut Connection, catalog: &SchemaCatalog) -> MigrationReport {
        run_migrations(conn, catalog, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_phase_display_is_screaming_snake_case() {
        assert_eq!(MigrationPhase::SyncMainTable.to_string(), "SYNC_MAIN_TABLE");
        assert_eq!(MigrationPhase::CheckChanged.to_string(), "CHECK_CHANGED");
        assert_eq!(
            MigrationPhase::DraftPublishPrecheck.to_string(),
            "DRAFT_PUBLISH_PRECHECK"
        );
    }

    #[test]
    fn test_first_run_creates_tables_and_snapshot() {
        let mut conn = Connection::open_in_memory().unwrap();
        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);

        let report = run(&mut conn, &catalog);

        assert_eq!(report.migrated, vec!["api::article.article".to_string()]);
        assert!(table_exists(&conn, "articles").unwrap());
        assert!(SchemaStore::load(&conn, "api::article.article")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_snapshots_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");
        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);

        {
            let mut conn = Connection::open(&path).unwrap();
            let report = run(&mut conn, &catalog);
            assert_eq!(report.migrated.len(), 1);
        }

        // A fresh boot sees the persisted snapshot and skips the type
        let mut conn = Connection::open(&path).unwrap();
        let report = run(&mut conn, &catalog);
        assert_eq!(report.unchanged, vec!["api::article.article".to_string()]);
    }

    #[test]
    fn test_second_run_is_skipped_by_change_detection() {
        let mut conn = Connection::open_in_memory().unwrap();
        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);

        run(&mut conn, &catalog);
        let report = run(&mut conn, &catalog);

        assert!(report.migrated.is_empty());
        assert_eq!(report.unchanged, vec!["api::article.article".to_string()]);
    }

    #[test]
    fn test_rename_carries_data_across_runs() {
        let mut conn = Connection::open_in_memory().unwrap();

        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);
        run(&mut conn, &catalog);
        conn.execute("INSERT INTO articles (title) VALUES ('hello')", [])
            .unwrap();

        let catalog =
            SchemaCatalog::new(vec![article(vec![scalar("heading", ScalarKind::String)])]);
        let report = run(&mut conn, &catalog);

        assert_eq!(report.migrated.len(), 1);
        let heading: String = conn
            .query_row("SELECT heading FROM articles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(heading, "hello");
    }

    #[test]
    fn test_foreign_key_rename_translates_to_column_pair() {
        let mut conn = Connection::open_in_memory().unwrap();
        let author = declaration("api::author.author", "authors", false, vec![]);
        let relation = |name: &str| Attribute {
            name: name.to_string(),
            kind: AttributeKind::Relation(RelationAttribute {
                cardinality: Cardinality::ManyToOne,
                target: "api::author.author".to_string(),
                via: None,
                dominant: false,
            }),
        };

        let catalog = SchemaCatalog::new(vec![article(vec![relation("author")]), author.clone()]);
        run(&mut conn, &catalog);
        conn.execute("INSERT INTO articles (author_id) VALUES (7)", [])
            .unwrap();

        let catalog = SchemaCatalog::new(vec![article(vec![relation("writer")]), author]);
        run(&mut conn, &catalog);

        let dialect = SqliteDialect::modern();
        let state = read_table_state(&conn, &dialect, "articles").unwrap();
        assert!(state.has_column("writer_id"));
        assert!(!state.has_column("author_id"));
        let id: i64 = conn
            .query_row("SELECT writer_id FROM articles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn test_enabling_draft_and_publish_backfills_existing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();

        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);
        run(&mut conn, &catalog);
        for i in 0..3 {
            conn.execute("INSERT INTO articles (title) VALUES (?)", [format!("t{i}")])
                .unwrap();
        }

        let catalog = SchemaCatalog::new(vec![declaration(
            "api::article.article",
            "articles",
            true,
            vec![scalar("title", ScalarKind::String)],
        )]);
        let before = Utc::now() - chrono::Duration::seconds(5);
        run(&mut conn, &catalog);
        let after = Utc::now() + chrono::Duration::seconds(5);

        // Every row is backfilled with the migration time itself
        let stamps: Vec<String> = conn
            .prepare("SELECT published_at FROM articles")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(stamps.len(), 3);
        for stamp in stamps {
            let ts = chrono::DateTime::parse_from_rfc3339(&stamp)
                .unwrap()
                .with_timezone(&Utc);
            assert!(ts >= before && ts <= after, "backfill time out of range: {stamp}");
        }
    }

    #[test]
    fn test_disabling_draft_and_publish_deletes_draft_rows() {
        let mut conn = Connection::open_in_memory().unwrap();

        let draftable = declaration(
            "api::article.article",
            "articles",
            true,
            vec![scalar("title", ScalarKind::String)],
        );
        let catalog = SchemaCatalog::new(vec![draftable]);
        run(&mut conn, &catalog);
        conn.execute(
            "INSERT INTO articles (title, published_at) VALUES
                 ('live1', '2020-01-01'), ('live2', '2020-01-02'), ('draft', NULL)",
            [],
        )
        .unwrap();

        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);
        run(&mut conn, &catalog);

        let titles: Vec<String> = conn
            .prepare("SELECT title FROM articles ORDER BY title")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(titles, vec!["live1".to_string(), "live2".to_string()]);
        let dialect = SqliteDialect::modern();
        let state = read_table_state(&conn, &dialect, "articles").unwrap();
        assert!(!state.has_column(PUBLISHED_AT));
    }

    #[test]
    fn test_legacy_dialect_runs_the_same_pass() {
        let mut conn = Connection::open_in_memory().unwrap();
        let config = EngineConfig {
            legacy_alter: true,
            ..EngineConfig::default()
        };

        let catalog = SchemaCatalog::new(vec![article(vec![scalar("title", ScalarKind::String)])]);
        run_migrations(&mut conn, &catalog, &config).unwrap();
        conn.execute("INSERT INTO articles (title) VALUES ('hello')", [])
            .unwrap();

        let catalog = SchemaCatalog::new(vec![article(vec![
            scalar("title", ScalarKind::String),
            scalar("summary", ScalarKind::Text),
        ])]);
        run_migrations(&mut conn, &catalog, &config).unwrap();

        let title: String = conn
            .query_row("SELECT title FROM articles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(title, "hello");
    }

    #[test]
    fn test_unique_violation_rolls_back_and_names_the_phase() {
        let mut conn = Connection::open_in_memory().unwrap();

        let catalog = SchemaCatalog::new(vec![article(vec![scalar("slug", ScalarKind::Uid)])]);
        run(&mut conn, &catalog);
        conn.execute("INSERT INTO articles (slug) VALUES ('dup'), ('dup')", [])
            .unwrap();

        let unique_slug = Attribute {
            name: "slug".to_string(),
            kind: AttributeKind::Scalar(ScalarAttribute {
                unique: true,
                ..ScalarAttribute::of(ScalarKind::Uid)
            }),
        };
        let catalog = SchemaCatalog::new(vec![article(vec![unique_slug])]);
        let err = run_migrations(&mut conn, &catalog, &EngineConfig::default()).unwrap_err();

        match err {
            SchemaSyncError::Migration { uid, phase, source } => {
                assert_eq!(uid, "api::article.article");
                assert_eq!(phase, MigrationPhase::SyncMainTable);
                assert!(matches!(
                    *source,
                    SchemaSyncError::UniqueConstraintViolation { .. }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The snapshot was not advanced, so the next boot retries
        let stored = SchemaStore::load(&conn, "api::article.article")
            .unwrap()
            .unwrap();
        match &stored.attributes[0].kind {
            AttributeKind::Scalar(s) => assert!(!s.unique),
            other => panic!("unexpected attribute kind: {other:?}"),
        }
    }

    #[test]
    fn test_failure_keeps_earlier_types_migrated() {
        let mut conn = Connection::open_in_memory().unwrap();

        let broken = ContentTypeDeclaration {
            attributes: vec![Attribute {
                name: "author".to_string(),
                kind: AttributeKind::Relation(RelationAttribute {
                    cardinality: Cardinality::ManyToOne,
                    target: "api::ghost.ghost".to_string(),
                    via: None,
                    dominant: false,
                }),
            }],
            ..declaration("api::broken.broken", "brokens", false, vec![])
        };
        let catalog = SchemaCatalog::new(vec![
            article(vec![scalar("title", ScalarKind::String)]),
            broken,
        ]);

        // Catalog validation fails the pass before any work happens
        assert!(matches!(
            run_migrations(&mut conn, &catalog, &EngineConfig::default()),
            Err(SchemaSyncError::ValidationMismatch { .. })
        ));
        assert!(!table_exists(&conn, "articles").unwrap());
    }

    #[test]
    fn test_cosmetic_attribute_reorder_still_migrates_nothing_physical() {
        let mut conn = Connection::open_in_memory().unwrap();

        let attrs = vec![
            scalar("title", ScalarKind::String),
            scalar("summary", ScalarKind::Text),
        ];
        let catalog = SchemaCatalog::new(vec![article(attrs.clone())]);
        run(&mut conn, &catalog);
        conn.execute(
            "INSERT INTO articles (title, summary) VALUES ('a', 'b')",
            [],
        )
        .unwrap();

        // Reordered attributes change the snapshot but produce no
        // structural plan; data must be untouched
        let reordered = vec![attrs[1].clone(), attrs[0].clone()];
        let catalog = SchemaCatalog::new(vec![article(reordered)]);
        let report = run(&mut conn, &catalog);

        assert_eq!(report.migrated.len(), 1);
        let (title, summary): (String, String) = conn
            .query_row("SELECT title, summary FROM articles", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(title, "a");
        assert_eq!(summary, "b");
    }
}
