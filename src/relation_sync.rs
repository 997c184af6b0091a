//! Auxiliary-table synchronization for relations that don't fit in a
//! foreign-key column: many-to-many junction tables and polymorphic
//! morph tables. Only the dominant side of a many-to-many pair
//! synchronizes the junction, so the table is touched once per boot.

use log::debug;
use rusqlite::Connection;

use crate::catalog::SchemaCatalog;
use crate::columns::ColumnSpec;
use crate::content_type::{
    AttributeKind, Cardinality, ContentTypeDeclaration, PrimaryKeyType, RelationAttribute,
};
use crate::dialect::SqlDialect;
use crate::error::SchemaSyncError;
use crate::table_sync::{synchronize_table, TableTarget};

/// Synchronize every auxiliary table owned by `decl`'s relation
/// attributes.
pub fn synchronize_relations(
    conn: &Connection,
    dialect: &dyn SqlDialect,
    catalog: &SchemaCatalog,
    decl: &ContentTypeDeclaration,
) -> Result<(), SchemaSyncError> {
    for attr in &decl.attributes {
        let AttributeKind::Relation(rel) = &attr.kind else {
            continue;
        };
        if !rel.owns_auxiliary_table() {
            if rel.cardinality == Cardinality::ManyToMany {
                debug!(
                    "Skipping non-dominant side '{}' of many-to-many on '{}'",
                    attr.name, decl.uid
                );
            }
            continue;
        }

        let target = match rel.cardinality {
            Cardinality::ManyToMany => junction_target(decl, &attr.name, rel, catalog, dialect)?,
            Cardinality::Polymorphic => morph_target(decl, &attr.name, dialect),
            // owns_auxiliary_table() is false for all other cardinalities
            _ => continue,
        };
        synchronize_table(conn, dialect, &target, &[], &[])?;
    }
    Ok(())
}

/// Physical name of the junction table for a many-to-many attribute.
pub fn junction_table_name(decl: &ContentTypeDeclaration, attr_name: &str) -> String {
    format!("{}_{attr_name}_links", decl.collection_name)
}

/// Physical name of the morph table for a polymorphic attribute.
pub fn morph_table_name(decl: &ContentTypeDeclaration, attr_name: &str) -> String {
    format!("{}_{attr_name}_morphs", decl.collection_name)
}

/// Junction table: one key column per side plus a composite unique
/// constraint so a pair can only be linked once. On a self-referencing
/// relation the far column gets an `inv_` prefix to keep the two names
/// distinct.
fn junction_target(
    decl: &ContentTypeDeclaration,
    attr_name: &str,
    rel: &RelationAttribute,
    catalog: &SchemaCatalog,
    dialect: &dyn SqlDialect,
) -> Result<TableTarget, SchemaSyncError> {
    let target_decl = catalog
        .get(&rel.target)
        .ok_or_else(|| SchemaSyncError::ValidationMismatch {
            uid: decl.uid.clone(),
            target: rel.target.clone(),
        })?;

    let owner_column = format!("{}_id", decl.collection_name);
    let far_column = if target_decl.uid == decl.uid {
        format!("inv_{}_id", target_decl.collection_name)
    } else {
        format!("{}_id", target_decl.collection_name)
    };

    let mut owner = ColumnSpec::new(
        owner_column.clone(),
        dialect.key_reference_type(decl.primary_key_type),
    );
    owner.not_null = true;
    let mut far = ColumnSpec::new(
        far_column.clone(),
        dialect.key_reference_type(target_decl.primary_key_type),
    );
    far.not_null = true;

    Ok(TableTarget {
        table: junction_table_name(decl, attr_name),
        primary_key: PrimaryKeyType::Increments,
        columns: vec![owner, far],
        composite_unique: Some(vec![owner_column, far_column]),
    })
}

/// Morph table: the target is identified by `(target_type, target_id)`
/// since a polymorphic relation can point at any registered type.
/// `field` records which attribute the row belongs to and `order`
/// preserves arrangement of the linked entries.
fn morph_target(
    decl: &ContentTypeDeclaration,
    attr_name: &str,
    dialect: &dyn SqlDialect,
) -> TableTarget {
    let mut owner = ColumnSpec::new(
        format!("{}_id", decl.collection_name),
        dialect.key_reference_type(decl.primary_key_type),
    );
    owner.not_null = true;

    let target_id = ColumnSpec::new("target_id", "INTEGER");
    let mut target_type = ColumnSpec::new("target_type", "TEXT");
    target_type.not_null = true;
    let mut field = ColumnSpec::new("field", "TEXT");
    field.not_null = true;
    let order = ColumnSpec::new("order", "INTEGER");

    TableTarget {
        table: morph_table_name(decl, attr_name),
        primary_key: PrimaryKeyType::Increments,
        columns: vec![owner, target_id, target_type, field, order],
        composite_unique: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::{Attribute, ContentTypeKind, Options};
    use crate::dialect::SqliteDialect;
    use crate::table_sync::{read_table_state, table_exists};

    fn declaration(uid: &str, collection: &str, attributes: Vec<Attribute>) -> ContentTypeDeclaration {
        ContentTypeDeclaration {
            uid: uid.to_string(),
            collection_name: collection.to_string(),
            kind: ContentTypeKind::CollectionType,
            options: Options::default(),
            primary_key_type: PrimaryKeyType::Increments,
            attributes,
        }
    }

    fn many_to_many(name: &str, target: &str, dominant: bool) -> Attribute {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Relation(RelationAttribute {
                cardinality: Cardinality::ManyToMany,
                target: target.to_string(),
                via: None,
                dominant,
            }),
        }
    }

    #[test]
    fn test_dominant_side_creates_junction_table() {
        let conn = Connection::open_in_memory().unwrap();
        let dialect = SqliteDialect::modern();

        let article = declaration(
            "api::article.article",
            "articles",
            vec![many_to_many("tags", "api::tag.tag", true)],
        );
        let tag = declaration("api::tag.tag", "tags", vec![]);
        let catalog = SchemaCatalog::new(vec![article.clone(), tag]);

        synchronize_relations(&conn, &dialect, &catalog, &article).unwrap();

        let state = read_table_state(&conn, &dialect, "articles_tags_links").unwrap();
        assert!(state.has_column("articles_id"));
        assert!(state.has_column("tags_id"));
        assert!(state.column("articles_id").unwrap().not_null);

        // Composite uniqueness: the same pair cannot be linked twice
        conn.execute(
            "INSERT INTO articles_tags_links (articles_id, tags_id) VALUES (1, 1)",
            [],
        )
        .unwrap();
        assert!(conn
            .execute(
                "INSERT INTO articles_tags_links (articles_id, tags_id) VALUES (1, 1)",
                [],
            )
            .is_err());
    }

    #[test]
    fn test_non_dominant_side_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        let dialect = SqliteDialect::modern();

        let tag = declaration(
            "api::tag.tag",
            "tags",
            vec![many_to_many("articles", "api::article.article", false)],
        );
        let article = declaration("api::article.article", "articles", vec![]);
        let catalog = SchemaCatalog::new(vec![article, tag.clone()]);

        synchronize_relations(&conn, &dialect, &catalog, &tag).unwrap();

        assert!(!table_exists(&conn, "tags_articles_links").unwrap());
    }

    #[test]
    fn test_self_referencing_junction_disambiguates_columns() {
        let conn = Connection::open_in_memory().unwrap();
        let dialect = SqliteDialect::modern();

        let page = declaration(
            "api::page.page",
            "pages",
            vec![many_to_many("related", "api::page.page", true)],
        );
        let catalog = SchemaCatalog::new(vec![page.clone()]);

        synchronize_relations(&conn, &dialect, &catalog, &page).unwrap();

        let state = read_table_state(&conn, &dialect, "pages_related_links").unwrap();
        assert!(state.has_column("pages_id"));
        assert!(state.has_column("inv_pages_id"));
    }

    #[test]
    fn test_polymorphic_relation_creates_morph_table() {
        let conn = Connection::open_in_memory().unwrap();
        let dialect = SqliteDialect::modern();

        let article = declaration(
            "api::article.article",
            "articles",
            vec![Attribute {
                name: "related".to_string(),
                kind: AttributeKind::Relation(RelationAttribute {
                    cardinality: Cardinality::Polymorphic,
                    target: String::new(),
                    via: None,
                    dominant: false,
                }),
            }],
        );
        let catalog = SchemaCatalog::new(vec![article.clone()]);

        synchronize_relations(&conn, &dialect, &catalog, &article).unwrap();

        let state = read_table_state(&conn, &dialect, "articles_related_morphs").unwrap();
        for column in ["articles_id", "target_id", "target_type", "field", "order"] {
            assert!(state.has_column(column), "missing column {column}");
        }
        assert!(state.column("target_type").unwrap().not_null);
        assert!(state.column("field").unwrap().not_null);
    }

    #[test]
    fn test_junction_sync_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let dialect = SqliteDialect::modern();

        let article = declaration(
            "api::article.article",
            "articles",
            vec![many_to_many("tags", "api::tag.tag", true)],
        );
        let tag = declaration("api::tag.tag", "tags", vec![]);
        let catalog = SchemaCatalog::new(vec![article.clone(), tag]);

        synchronize_relations(&conn, &dialect, &catalog, &article).unwrap();
        conn.execute(
            "INSERT INTO articles_tags_links (articles_id, tags_id) VALUES (1, 2)",
            [],
        )
        .unwrap();
        synchronize_relations(&conn, &dialect, &catalog, &article).unwrap();

        let rows: i64 = conn
            .query_row("SELECT count(*) FROM articles_tags_links", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }
}
