use crate::catalog::SchemaCatalog;
use crate::content_type::{Attribute, AttributeKind, ContentTypeDeclaration, ScalarKind};
use crate::dialect::SqlDialect;
use crate::error::SchemaSyncError;

/// Bookkeeping columns the synchronizer adds to every main table.
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
/// Nullable publish timestamp; NULL marks a draft row.
pub const PUBLISHED_AT: &str = "published_at";

/// Physical column specification, dialect-resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: &'static str,
    pub not_null: bool,
    pub unique: bool,
    pub default_expr: Option<&'static str>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: &'static str) -> Self {
        ColumnSpec {
            name: name.into(),
            sql_type,
            not_null: false,
            unique: false,
            default_expr: None,
        }
    }

    /// Column definition fragment for `CREATE TABLE` / `ADD COLUMN`.
    /// Uniqueness is not inlined; it is applied as a named index so it
    /// can be dropped and re-added without touching the column.
    pub fn ddl_fragment(&self, dialect: &dyn SqlDialect) -> String {
        let mut fragment = format!("{} {}", dialect.quote_ident(&self.name), self.sql_type);
        if self.not_null {
            fragment.push_str(" NOT NULL");
        }
        if let Some(default) = self.default_expr {
            fragment.push_str(" DEFAULT ");
            fragment.push_str(default);
        }
        fragment
    }
}

/// Physical column name produced by an attribute, or `None` for
/// attributes that never materialize as a column on the owning table.
pub fn column_name(attr: &Attribute) -> Option<String> {
    match &attr.kind {
        AttributeKind::Scalar(_) => Some(attr.name.clone()),
        AttributeKind::Relation(rel) if rel.holds_foreign_key() => {
            Some(format!("{}_id", attr.name))
        }
        AttributeKind::Relation(_) | AttributeKind::Component(_) | AttributeKind::DynamicZone => {
            None
        }
    }
}

/// Map an attribute to its physical column specification.
///
/// Returns `None` for components, dynamic zones, and relations whose
/// storage lives in an auxiliary table. For foreign-key relations the
/// physical type is the target's primary-key type, which is why the
/// catalog is needed here.
pub fn map_column(
    decl: &ContentTypeDeclaration,
    attr: &Attribute,
    catalog: &SchemaCatalog,
    dialect: &dyn SqlDialect,
) -> Result<Option<ColumnSpec>, SchemaSyncError> {
    let spec = match &attr.kind {
        AttributeKind::Scalar(scalar) => {
            let mut spec = ColumnSpec::new(attr.name.clone(), dialect.scalar_type(scalar.kind));
            spec.not_null = scalar.required && !decl.relaxes_required();
            spec.unique = scalar.unique;
            Some(spec)
        }
        AttributeKind::Relation(rel) if rel.holds_foreign_key() => {
            let target = catalog.get(&rel.target).ok_or_else(|| {
                SchemaSyncError::ValidationMismatch {
                    uid: decl.uid.clone(),
                    target: rel.target.clone(),
                }
            })?;
            Some(ColumnSpec::new(
                format!("{}_id", attr.name),
                dialect.key_reference_type(target.primary_key_type),
            ))
        }
        AttributeKind::Relation(_) | AttributeKind::Component(_) | AttributeKind::DynamicZone => {
            None
        }
    };
    Ok(spec)
}

/// Timestamp columns added to every main table, plus the publish
/// timestamp when draft-and-publish is enabled.
pub fn bookkeeping_columns(
    decl: &ContentTypeDeclaration,
    dialect: &dyn SqlDialect,
) -> Vec<ColumnSpec> {
    let datetime = dialect.scalar_type(ScalarKind::Datetime);
    let mut columns = Vec::with_capacity(3);

    for name in [CREATED_AT, UPDATED_AT] {
        let mut spec = ColumnSpec::new(name, datetime);
        spec.default_expr = Some(dialect.current_timestamp_expr());
        columns.push(spec);
    }
    if decl.options.draft_and_publish {
        columns.push(ColumnSpec::new(PUBLISHED_AT, datetime));
    }

    columns
}
