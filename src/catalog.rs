use crate::content_type::{AttributeKind, Cardinality, ContentTypeDeclaration};
use crate::error::SchemaSyncError;

/// Explicit per-boot registry of every content type known to the system.
///
/// Constructed once from the finalized declarations, passed by reference
/// into the orchestrator and synchronizers, and discarded after the
/// migration pass completes. Replaces what used to be a process-wide
/// model registry.
pub struct SchemaCatalog {
    types: Vec<ContentTypeDeclaration>,
}

impl SchemaCatalog {
    pub fn new(types: Vec<ContentTypeDeclaration>) -> Self {
        SchemaCatalog { types }
    }

    pub fn get(&self, uid: &str) -> Option<&ContentTypeDeclaration> {
        self.types.iter().find(|t| t.uid == uid)
    }

    /// Declarations in registration order; migration processes them in
    /// this order.
    pub fn iter(&self) -> std::slice::Iter<'_, ContentTypeDeclaration> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Verify that every non-polymorphic relation points at a registered
    /// content type. Polymorphic relations have no single target.
    pub fn validate(&self) -> Result<(), SchemaSyncError> {
        for decl in &self.types {
            for attr in &decl.attributes {
                if let AttributeKind::Relation(rel) = &attr.kind {
                    if rel.cardinality == Cardinality::Polymorphic {
                        continue;
                    }
                    if self.get(&rel.target).is_none() {
                        return Err(SchemaSyncError::ValidationMismatch {
                            uid: decl.uid.clone(),
                            target: rel.target.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
