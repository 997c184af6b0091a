use serde::{Deserialize, Serialize};
use strum::Display;

/// The desired-state schema for one entity, as handed over by the
/// (external) schema editor after validation and normalization.
///
/// Declarations are immutable within a single migration pass. The engine
/// only ever reads them; the one persisted artifact derived from a
/// declaration is the snapshot (see [`crate::snapshot`]).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeDeclaration {
    /// Stable identifier, immutable once created.
    pub uid: String,
    /// Physical table name.
    pub collection_name: String,
    pub kind: ContentTypeKind,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub primary_key_type: PrimaryKeyType,
    /// Declaration order is preserved; it only matters as the tie-break
    /// order of the rename detector, never for physical layout.
    pub attributes: Vec<Attribute>,
}

impl ContentTypeDeclaration {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Required constraints are relaxed for draftable content and for
    /// component storage so that partially filled rows stay insertable.
    pub fn relaxes_required(&self) -> bool {
        self.options.draft_and_publish || self.kind == ContentTypeKind::Component
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContentTypeKind {
    CollectionType,
    Component,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    #[serde(default)]
    pub draft_and_publish: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PrimaryKeyType {
    #[default]
    Increments,
    Uuid,
}

/// A named field of a content type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    #[serde(flatten)]
    pub kind: AttributeKind,
}

/// Closed union over attribute variants. The column mapper and the
/// rename detector match exhaustively on this, so a new variant is a
/// compile error everywhere it matters rather than a silently ignored
/// string case.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AttributeKind {
    Scalar(ScalarAttribute),
    Relation(RelationAttribute),
    Component(ComponentAttribute),
    DynamicZone,
}

impl AttributeKind {
    /// Exactly one physical column is produced per scalar attribute and
    /// per relation whose cardinality places the foreign key on this
    /// side. Components and dynamic zones never produce a column here;
    /// their storage is delegated to a separate subsystem.
    pub fn is_column_bearing(&self) -> bool {
        match self {
            AttributeKind::Scalar(_) => true,
            AttributeKind::Relation(rel) => rel.holds_foreign_key(),
            AttributeKind::Component(_) | AttributeKind::DynamicZone => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScalarAttribute {
    pub kind: ScalarKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl ScalarAttribute {
    pub fn of(kind: ScalarKind) -> Self {
        ScalarAttribute {
            kind,
            required: false,
            unique: false,
            private: false,
            min_length: None,
            max_length: None,
        }
    }
}

#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ScalarKind {
    String,
    Text,
    Richtext,
    Integer,
    Biginteger,
    Float,
    Decimal,
    Boolean,
    Date,
    Datetime,
    Time,
    Json,
    Uid,
    Enumeration,
    Email,
    Password,
}

impl ScalarKind {
    /// Text-like kinds carry length constraints that feed the rename
    /// detector's similarity score.
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            ScalarKind::String
                | ScalarKind::Text
                | ScalarKind::Richtext
                | ScalarKind::Uid
                | ScalarKind::Email
                | ScalarKind::Password
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelationAttribute {
    pub cardinality: Cardinality,
    /// Target content-type uid. Ignored for polymorphic relations, which
    /// can point at any registered type.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(default)]
    pub dominant: bool,
}

impl RelationAttribute {
    /// True when the foreign key lives on the owning table.
    pub fn holds_foreign_key(&self) -> bool {
        matches!(self.cardinality, Cardinality::OneToOne | Cardinality::ManyToOne)
    }

    /// True when this side is responsible for synchronizing an auxiliary
    /// junction or morph table. Non-dominant many-to-many sides are
    /// no-ops; they are covered when the dominant side is processed.
    pub fn owns_auxiliary_table(&self) -> bool {
        match self.cardinality {
            Cardinality::ManyToMany => self.dominant,
            Cardinality::Polymorphic => true,
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    Polymorphic,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAttribute {
    /// Reference to a component definition, e.g. `shared.seo`.
    pub component: String,
    #[serde(default)]
    pub repeatable: bool,
}
