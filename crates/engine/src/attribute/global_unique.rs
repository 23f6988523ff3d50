//! Catalog-scoped unique attribute index

use crate::storage::{GlobalUniqueIndexPart, StoragePart};
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBoolean, TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{
    AttributeKey, AttributeValue, CatalogIndexKey, Error, Locale, ProducerId, Result,
};

/// Record owning a globally unique value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityWithTypeTuple {
    /// Entity type of the owner
    pub entity_type: String,
    /// Primary key of the owner
    pub record_id: u32,
    /// Locale of the value for localized attributes
    pub locale: Option<Locale>,
}

impl EntityWithTypeTuple {
    /// Create an owner tuple
    pub fn new(entity_type: impl Into<String>, record_id: u32, locale: Option<Locale>) -> Self {
        EntityWithTypeTuple {
            entity_type: entity_type.into(),
            record_id,
            locale,
        }
    }
}

impl fmt::Display for EntityWithTypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.record_id)?;
        if let Some(locale) = &self.locale {
            write!(f, " ({})", locale)?;
        }
        Ok(())
    }
}

strata_index_concurrency::plain_transactional_value!(EntityWithTypeTuple);

/// Unique values of one attribute across every entity type of a catalog
#[derive(Debug, Clone)]
pub struct GlobalUniqueIndex {
    id: ProducerId,
    catalog_key: CatalogIndexKey,
    attribute: AttributeKey,
    dirty: TransactionalBoolean,
    values: TransactionalMap<AttributeValue, EntityWithTypeTuple>,
}

impl GlobalUniqueIndex {
    /// Create an empty index
    pub fn new(catalog_key: CatalogIndexKey, attribute: AttributeKey) -> Self {
        Self::from_entries(catalog_key, attribute, std::iter::empty())
    }

    /// Rebuild an index from persisted entries
    pub fn from_entries(
        catalog_key: CatalogIndexKey,
        attribute: AttributeKey,
        entries: impl IntoIterator<Item = (AttributeValue, EntityWithTypeTuple)>,
    ) -> Self {
        GlobalUniqueIndex {
            id: ProducerId::next(),
            catalog_key,
            attribute,
            dirty: TransactionalBoolean::new(),
            values: TransactionalMap::from_map(entries.into_iter().collect()),
        }
    }

    /// Attribute this index covers
    pub fn attribute(&self) -> &AttributeKey {
        &self.attribute
    }

    /// Claim `value` for `owner`
    ///
    /// Every element of an array is checked before any of them is written.
    pub fn register_unique_key(
        &self,
        tx: &mut LayerMaintainer,
        value: &AttributeValue,
        owner: EntityWithTypeTuple,
    ) -> Result<()> {
        for element in value.elements() {
            if let Some(existing) = self.values.get(Some(&*tx), element) {
                if existing != &owner {
                    return Err(Error::UniqueValueViolation {
                        attribute: self.attribute.attribute_name.clone(),
                        value: element.clone(),
                        existing_entity_type: existing.entity_type.clone(),
                        existing_record_id: existing.record_id,
                        new_entity_type: owner.entity_type.clone(),
                        new_record_id: owner.record_id,
                    });
                }
            }
        }
        for element in value.elements() {
            self.values.insert(tx, element.clone(), owner.clone())?;
        }
        self.dirty.set_true(tx)
    }

    /// Release `value` claimed by `owner`
    pub fn unregister_unique_key(
        &self,
        tx: &mut LayerMaintainer,
        value: &AttributeValue,
        owner: &EntityWithTypeTuple,
    ) -> Result<()> {
        for element in value.elements() {
            match self.values.get(Some(&*tx), element) {
                Some(existing) if existing == owner => {}
                existing => {
                    return Err(Error::internal(format!(
                        "Unique value {} of attribute `{}` is expected to be owned by {}, found {}",
                        element,
                        self.attribute,
                        owner,
                        existing.map_or_else(|| "nothing".to_string(), |it| it.to_string())
                    )))
                }
            }
        }
        for element in value.elements() {
            self.values.remove(tx, element)?;
        }
        self.dirty.set_true(tx)
    }

    /// Owner of `value`
    pub fn get_entity_reference_by_unique_value(
        &self,
        tx: Option<&LayerMaintainer>,
        value: &AttributeValue,
    ) -> Option<EntityWithTypeTuple> {
        self.values.get(tx, value).cloned()
    }

    /// Number of registered values
    pub fn len(&self, tx: Option<&LayerMaintainer>) -> usize {
        self.values.len(tx)
    }

    /// Whether no value is registered
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.values.is_empty(tx)
    }

    pub(crate) fn storage_part(&self, tx: Option<&LayerMaintainer>) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut entries: Vec<_> = self
            .values
            .iter(tx)
            .map(|(value, owner)| (value.clone(), owner.clone()))
            .collect();
        entries.sort();
        Some(StoragePart::GlobalUniqueIndex(GlobalUniqueIndexPart {
            catalog_key: self.catalog_key,
            attribute: self.attribute.clone(),
            entries,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl TransactionalLayerProducer for GlobalUniqueIndex {
    type Layer = ();

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) {}

    fn merge_committed(
        &self,
        _layer: Option<()>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        if !self.is_modified_in(maintainer) {
            return Ok(self.clone());
        }
        self.dirty.remove_layer(maintainer);
        Ok(GlobalUniqueIndex {
            id: ProducerId::next(),
            catalog_key: self.catalog_key,
            attribute: self.attribute.clone(),
            dirty: TransactionalBoolean::new(),
            values: maintainer.merge(&self.values)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.values.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.values.is_modified_in(maintainer)
    }
}

strata_index_concurrency::producer_transactional_value!(GlobalUniqueIndex);

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::Scope;

    fn index() -> GlobalUniqueIndex {
        GlobalUniqueIndex::new(CatalogIndexKey::new(Scope::Live), AttributeKey::new("url"))
    }

    #[test]
    fn test_collision_across_entity_types() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        let url = AttributeValue::text("/home");
        unique
            .register_unique_key(&mut tx, &url, EntityWithTypeTuple::new("product", 1, None))
            .unwrap();

        let err = unique
            .register_unique_key(&mut tx, &url, EntityWithTypeTuple::new("category", 1, None))
            .unwrap_err();
        match err {
            Error::UniqueValueViolation {
                existing_entity_type,
                new_entity_type,
                ..
            } => {
                assert_eq!(existing_entity_type, "product");
                assert_eq!(new_entity_type, "category");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_reregistering_same_owner_is_allowed() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        let owner = EntityWithTypeTuple::new("product", 4, Some(Locale::new("en")));
        let url = AttributeValue::text("/p/4");
        unique.register_unique_key(&mut tx, &url, owner.clone()).unwrap();
        unique.register_unique_key(&mut tx, &url, owner.clone()).unwrap();
        assert_eq!(unique.len(Some(&tx)), 1);
        assert_eq!(
            unique.get_entity_reference_by_unique_value(Some(&tx), &url),
            Some(owner)
        );
    }

    #[test]
    fn test_unregister_checks_ownership_before_removing() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        let owner = EntityWithTypeTuple::new("product", 1, None);
        let values =
            AttributeValue::Array(vec![AttributeValue::text("/a"), AttributeValue::text("/b")]);
        unique.register_unique_key(&mut tx, &values, owner.clone()).unwrap();

        let partial =
            AttributeValue::Array(vec![AttributeValue::text("/a"), AttributeValue::text("/c")]);
        assert!(unique.unregister_unique_key(&mut tx, &partial, &owner).is_err());
        assert_eq!(unique.len(Some(&tx)), 2);

        unique.unregister_unique_key(&mut tx, &values, &owner).unwrap();
        assert!(unique.is_empty(Some(&tx)));
    }
}
