//! Handle to an entity index that may not be loaded

use super::EntityIndex;
use crate::formula::Formula;
use roaring::RoaringBitmap;
use std::sync::Arc;
use strata_index_core::{EntityIndexKey, Error, Result};

/// Loaded entity index or a placeholder standing in for one
///
/// Placeholders answer primary key reads (the global one from a superset
/// of the keys the index would hold) and fail every other operation.
#[derive(Debug, Clone)]
pub enum EntityIndexHandle {
    /// Regular index
    Loaded(Arc<EntityIndex>),
    /// Global index of an entity type not managed by this catalog
    PlaceholderGlobal {
        /// Entity type
        entity_type: String,
        /// Key of the missing index
        key: EntityIndexKey,
        /// Keys the index would contain
        superset: Arc<RoaringBitmap>,
    },
    /// Referenced type index of a reference that is not indexed
    PlaceholderReferencedType {
        /// Entity type owning the reference
        entity_type: String,
        /// Key of the missing index
        key: EntityIndexKey,
    },
}

impl EntityIndexHandle {
    /// Producer id of the index, `0` for placeholders
    pub fn id(&self) -> u64 {
        match self {
            EntityIndexHandle::Loaded(index) => index.id().as_u64(),
            _ => 0,
        }
    }

    /// Key of the index
    pub fn index_key(&self) -> &EntityIndexKey {
        match self {
            EntityIndexHandle::Loaded(index) => &index.index_key,
            EntityIndexHandle::PlaceholderGlobal { key, .. }
            | EntityIndexHandle::PlaceholderReferencedType { key, .. } => key,
        }
    }

    /// Every primary key of the index
    pub fn get_all_primary_keys(&self) -> Result<Arc<RoaringBitmap>> {
        match self {
            EntityIndexHandle::Loaded(index) => Ok(index.get_all_primary_keys(None)),
            EntityIndexHandle::PlaceholderGlobal { superset, .. } => Ok(Arc::clone(superset)),
            EntityIndexHandle::PlaceholderReferencedType { .. } => Err(self.unavailable()),
        }
    }

    /// Every primary key of the index as a formula
    pub fn get_all_primary_keys_formula(&self) -> Result<Formula> {
        self.get_all_primary_keys().map(Formula::constant)
    }

    /// The loaded index, failing for placeholders
    pub fn loaded(&self) -> Result<&Arc<EntityIndex>> {
        match self {
            EntityIndexHandle::Loaded(index) => Ok(index),
            _ => Err(self.unavailable()),
        }
    }

    fn unavailable(&self) -> Error {
        match self {
            EntityIndexHandle::PlaceholderReferencedType { entity_type, key } => {
                Error::ReferenceNotIndexed {
                    reference: key.reference_name().unwrap_or_default().to_string(),
                    entity_type: entity_type.clone(),
                    scope: key.scope,
                }
            }
            EntityIndexHandle::PlaceholderGlobal { entity_type, .. } => Error::EntityNotManaged {
                entity_type: entity_type.clone(),
            },
            EntityIndexHandle::Loaded(index) => {
                Error::internal(format!("Index `{}` is loaded", index.index_key))
            }
        }
    }
}

impl From<Arc<EntityIndex>> for EntityIndexHandle {
    fn from(index: Arc<EntityIndex>) -> Self {
        EntityIndexHandle::Loaded(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::Scope;

    #[test]
    fn test_global_placeholder_answers_from_superset() {
        let handle = EntityIndexHandle::PlaceholderGlobal {
            entity_type: "brand".to_string(),
            key: EntityIndexKey::global(Scope::Live),
            superset: Arc::new([1u32, 2].into_iter().collect()),
        };
        assert_eq!(handle.id(), 0);
        assert_eq!(handle.get_all_primary_keys().unwrap().len(), 2);
        assert_eq!(handle.get_all_primary_keys_formula().unwrap().len(), 2);
        assert!(matches!(
            handle.loaded(),
            Err(Error::EntityNotManaged { entity_type }) if entity_type == "brand"
        ));
    }

    #[test]
    fn test_referenced_type_placeholder_rejects_reads() {
        let handle = EntityIndexHandle::PlaceholderReferencedType {
            entity_type: "product".to_string(),
            key: EntityIndexKey::referenced_entity_type(Scope::Archived, "brand"),
        };
        match handle.get_all_primary_keys() {
            Err(Error::ReferenceNotIndexed { reference, scope, .. }) => {
                assert_eq!(reference, "brand");
                assert_eq!(scope, Scope::Archived);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(handle.loaded().is_err());
    }

    #[test]
    fn test_loaded_handle_delegates() {
        let index = Arc::new(EntityIndex::global(1, "product", Scope::Live));
        let handle = EntityIndexHandle::from(Arc::clone(&index));
        assert_eq!(handle.id(), index.id().as_u64());
        assert_eq!(handle.index_key(), &EntityIndexKey::global(Scope::Live));
        assert!(handle.get_all_primary_keys_formula().unwrap().is_empty());
        assert!(handle.loaded().is_ok());
    }
}
