use crate::content_type::{PrimaryKeyType, ScalarKind};

/// What a storage dialect can do to an existing table without rebuilding
/// it. Selected once per dialect at startup; the table synchronizer
/// never branches on a dialect name at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterCapability {
    /// `ALTER TABLE ... ADD/RENAME COLUMN` and unique-index drop/add
    /// work in place. Column-definition changes still rebuild.
    InPlace,
    /// Embedded engines without in-place alteration: every structural
    /// change goes through the rebuild-and-copy path.
    RebuildOnly,
}

/// SQL syntax and capability strategy for one storage dialect.
///
/// The dialect affects only physical type names, default-value syntax
/// and alteration capability — never the logical mapping rules.
pub trait SqlDialect {
    fn name(&self) -> &'static str;

    fn alter_capability(&self) -> AlterCapability;

    /// Quote an identifier, doubling embedded quotes.
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Physical type name for a scalar attribute kind.
    fn scalar_type(&self, kind: ScalarKind) -> &'static str;

    /// Full primary-key column clause for `CREATE TABLE`.
    fn primary_key_clause(&self, pk: PrimaryKeyType) -> String;

    /// Physical type of a column referencing a key of the given type.
    fn key_reference_type(&self, pk: PrimaryKeyType) -> &'static str;

    /// Default-value expression producing the current timestamp.
    fn current_timestamp_expr(&self) -> &'static str;
}

/// SQLite dialect. `modern()` assumes SQLite >= 3.35 (in-place
/// `ADD COLUMN`/`RENAME COLUMN`/`DROP COLUMN`); `legacy()` is the
/// rebuild-only fallback for older library versions.
#[derive(Debug, Clone, Copy)]
pub struct SqliteDialect {
    legacy: bool,
}

impl SqliteDialect {
    pub fn modern() -> Self {
        SqliteDialect { legacy: false }
    }

    pub fn legacy() -> Self {
        SqliteDialect { legacy: true }
    }
}

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        if self.legacy {
            "sqlite-legacy"
        } else {
            "sqlite"
        }
    }

    fn alter_capability(&self) -> AlterCapability {
        if self.legacy {
            AlterCapability::RebuildOnly
        } else {
            AlterCapability::InPlace
        }
    }

    fn scalar_type(&self, kind: ScalarKind) -> &'static str {
        match kind {
            ScalarKind::String
            | ScalarKind::Text
            | ScalarKind::Richtext
            | ScalarKind::Uid
            | ScalarKind::Enumeration
            | ScalarKind::Email
            | ScalarKind::Password => "TEXT",
            ScalarKind::Integer => "INTEGER",
            ScalarKind::Biginteger => "BIGINT",
            ScalarKind::Float => "REAL",
            ScalarKind::Decimal => "NUMERIC",
            ScalarKind::Boolean => "BOOLEAN",
            ScalarKind::Date => "DATE",
            ScalarKind::Datetime => "DATETIME",
            ScalarKind::Time => "TIME",
            // Legacy builds predate the JSON1 extension and fall back to
            // long text storage
            ScalarKind::Json => {
                if self.legacy {
                    "TEXT"
                } else {
                    "JSON"
                }
            }
        }
    }

    fn primary_key_clause(&self, pk: PrimaryKeyType) -> String {
        match pk {
            PrimaryKeyType::Increments => {
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote_ident("id"))
            }
            PrimaryKeyType::Uuid => format!("{} TEXT PRIMARY KEY", self.quote_ident("id")),
        }
    }

    fn key_reference_type(&self, pk: PrimaryKeyType) -> &'static str {
        match pk {
            PrimaryKeyType::Increments => "INTEGER",
            PrimaryKeyType::Uuid => "TEXT",
        }
    }

    fn current_timestamp_expr(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_doubles_embedded_quotes() {
        let dialect = SqliteDialect::modern();
        assert_eq!(dialect.quote_ident("title"), "\"title\"");
        assert_eq!(dialect.quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_capability_per_dialect_flavor() {
        assert_eq!(
            SqliteDialect::modern().alter_capability(),
            AlterCapability::InPlace
        );
        assert_eq!(
            SqliteDialect::legacy().alter_capability(),
            AlterCapability::RebuildOnly
        );
    }

    #[test]
    fn test_json_storage_differs_by_flavor() {
        assert_eq!(SqliteDialect::modern().scalar_type(ScalarKind::Json), "JSON");
        assert_eq!(SqliteDialect::legacy().scalar_type(ScalarKind::Json), "TEXT");
    }

    #[test]
    fn test_primary_key_clauses() {
        let dialect = SqliteDialect::modern();
        assert_eq!(
            dialect.primary_key_clause(PrimaryKeyType::Increments),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            dialect.primary_key_clause(PrimaryKeyType::Uuid),
            "\"id\" TEXT PRIMARY KEY"
        );
        assert_eq!(dialect.key_reference_type(PrimaryKeyType::Uuid), "TEXT");
    }
}
