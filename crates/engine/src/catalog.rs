//! Catalog index
//!
//! One [`CatalogIndex`] exists per scope. It enforces attribute values that
//! must be unique across every entity collection of the catalog, keeping a
//! [`GlobalUniqueIndex`] per attribute (and per locale when the uniqueness
//! is locale scoped).

use crate::attachment::{CatalogAttachment, CatalogRef};
use crate::attribute::{verify_localized_attribute, EntityWithTypeTuple, GlobalUniqueIndex};
use crate::index::Index;
use crate::storage::{CatalogIndexPart, StoragePart};
use std::collections::BTreeSet;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBoolean, TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{
    AttributeKey, AttributeSchema, AttributeValue, CatalogIndexKey, EntitySchema, Error, Locale,
    ProducerId, Result, Scope,
};

/// Catalog-wide index of globally unique attributes
#[derive(Debug, Clone)]
pub struct CatalogIndex {
    id: ProducerId,
    index_key: CatalogIndexKey,
    version: u64,
    dirty: TransactionalBoolean,
    unique_indexes: TransactionalMap<AttributeKey, GlobalUniqueIndex>,
    attachment: CatalogAttachment,
}

impl CatalogIndex {
    /// Create the empty catalog index of `scope`
    pub fn new(scope: Scope) -> Self {
        Self::restore(CatalogIndexKey::new(scope), 1, Vec::new())
    }

    /// Restore an index from its persisted version and unique indices
    pub fn restore(
        index_key: CatalogIndexKey,
        version: u64,
        unique_indexes: Vec<GlobalUniqueIndex>,
    ) -> Self {
        let unique_indexes = unique_indexes
            .into_iter()
            .map(|index| (index.attribute().clone(), index))
            .collect();
        CatalogIndex {
            id: ProducerId::next(),
            index_key,
            version,
            dirty: TransactionalBoolean::new(),
            unique_indexes: TransactionalMap::from_map(unique_indexes),
            attachment: CatalogAttachment::new(),
        }
    }

    /// Version of this generation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Identity of this generation
    pub fn id(&self) -> ProducerId {
        self.id
    }

    /// Attach the index to the catalog instance owning it
    pub fn attach_to_catalog(&self, catalog: CatalogRef) -> Result<()> {
        self.attachment.attach(None, catalog)
    }

    /// Catalog the index is attached to
    pub fn catalog(&self) -> Option<&CatalogRef> {
        self.attachment.catalog()
    }

    fn lookup_key(
        attribute: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
    ) -> Result<AttributeKey> {
        if attribute.localized {
            verify_localized_attribute(attribute, allowed_locales, locale)?;
        }
        if attribute.is_unique_globally_within_locale() {
            Ok(AttributeKey::with_locale(attribute.name.as_str(), locale))
        } else {
            Ok(AttributeKey::new(attribute.name.as_str()))
        }
    }

    fn owner(
        entity_schema: &EntitySchema,
        attribute: &AttributeSchema,
        locale: Option<&Locale>,
        record_id: u32,
    ) -> EntityWithTypeTuple {
        let locale = locale.filter(|_| attribute.localized).cloned();
        EntityWithTypeTuple::new(entity_schema.name.as_str(), record_id, locale)
    }

    /// Claim a globally unique value for `record_id` of `entity_schema`
    pub fn insert_unique_attribute(
        &self,
        tx: &mut LayerMaintainer,
        entity_schema: &EntitySchema,
        attribute: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        let key = Self::lookup_key(attribute, allowed_locales, locale)?;
        let owner = Self::owner(entity_schema, attribute, locale, record_id);
        let created = !self.unique_indexes.contains_key(Some(&*tx), &key);
        let index = self.unique_indexes.compute_if_absent(tx, &key, || {
            GlobalUniqueIndex::new(self.index_key, key.clone())
        })?;
        if let Err(err) = index.register_unique_key(tx, value, owner) {
            if created {
                self.unique_indexes.remove(tx, &key)?;
                index.remove_layer(tx);
            }
            return Err(err);
        }
        if created {
            self.dirty.set_true(tx)?;
        }
        Ok(())
    }

    /// Release a globally unique value of `record_id`
    pub fn remove_unique_attribute(
        &self,
        tx: &mut LayerMaintainer,
        entity_schema: &EntitySchema,
        attribute: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        let key = Self::lookup_key(attribute, allowed_locales, locale)?;
        let owner = Self::owner(entity_schema, attribute, locale, record_id);
        let index = self
            .unique_indexes
            .get_for_update(tx, &key)
            .ok_or_else(|| {
                Error::internal(format!(
                    "Global unique index for attribute `{}` not found in `{}`",
                    key, self.index_key
                ))
            })?;
        index.unregister_unique_key(tx, value, &owner)?;
        if index.is_empty(Some(&*tx)) {
            self.unique_indexes.remove(tx, &key)?;
            index.remove_layer(tx);
            self.dirty.set_true(tx)?;
        }
        Ok(())
    }

    /// Record owning a globally unique value
    pub fn get_entity_reference_by_unique_value(
        &self,
        tx: Option<&LayerMaintainer>,
        attribute: &str,
        locale: Option<&Locale>,
        value: &AttributeValue,
    ) -> Option<EntityWithTypeTuple> {
        let localized = AttributeKey::with_locale(attribute, locale);
        self.unique_indexes
            .get(tx, &localized)
            .or_else(|| self.unique_indexes.get(tx, &AttributeKey::new(attribute)))
            .and_then(|index| index.get_entity_reference_by_unique_value(tx, value))
    }

    /// Unique index kept for `key`
    pub fn get_global_unique_index(
        &self,
        tx: Option<&LayerMaintainer>,
        key: &AttributeKey,
    ) -> Option<GlobalUniqueIndex> {
        self.unique_indexes.get(tx, key).cloned()
    }

    /// Whether no globally unique value is registered
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.unique_indexes.values(tx).all(|index| index.is_empty(tx))
    }
}

impl Index for CatalogIndex {
    type Key = CatalogIndexKey;

    fn index_key(&self) -> &CatalogIndexKey {
        &self.index_key
    }

    fn get_modified_storage_parts(
        &self,
        tx: Option<&LayerMaintainer>,
        sink: &mut Vec<StoragePart>,
    ) {
        if self.dirty.is_true(tx) {
            sink.push(StoragePart::CatalogIndex(CatalogIndexPart {
                key: self.index_key,
                version: self.version + 1,
                unique_attribute_keys: self.unique_indexes.keys(tx).cloned().collect(),
            }));
        }
        let mut indexes: Vec<_> = self.unique_indexes.iter(tx).collect();
        indexes.sort_by(|a, b| a.0.cmp(b.0));
        for (_, index) in indexes {
            sink.extend(index.storage_part(tx));
        }
    }

    fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)?;
        for index in self.unique_indexes.values_for_update(tx) {
            index.reset_dirty(tx)?;
        }
        Ok(())
    }
}

impl TransactionalLayerProducer for CatalogIndex {
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
        let version = if self.dirty.is_true(Some(&*maintainer)) {
            self.version + 1
        } else {
            self.version
        };
        self.dirty.remove_layer(maintainer);
        Ok(CatalogIndex {
            id: ProducerId::next(),
            index_key: self.index_key,
            version,
            dirty: TransactionalBoolean::new(),
            unique_indexes: maintainer.merge(&self.unique_indexes)?,
            attachment: self.attachment.clone(),
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.unique_indexes.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.unique_indexes.is_modified_in(maintainer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::GlobalAttributeUniquenessType;

    fn url() -> AttributeSchema {
        AttributeSchema::new("url")
            .localized()
            .unique_globally(GlobalAttributeUniquenessType::UniqueWithinCatalogLocale)
    }

    fn locales() -> BTreeSet<Locale> {
        [Locale::new("en"), Locale::new("de")].into_iter().collect()
    }

    #[test]
    fn test_locale_scoped_uniqueness() {
        let catalog = CatalogIndex::new(Scope::Live);
        let product = EntitySchema::new("product");
        let category = EntitySchema::new("category");
        let (en, de) = (Locale::new("en"), Locale::new("de"));
        let home = AttributeValue::text("/home");
        let mut tx = LayerMaintainer::new(1);

        catalog
            .insert_unique_attribute(&mut tx, &product, &url(), &locales(), Some(&en), &home, 1)
            .unwrap();
        catalog
            .insert_unique_attribute(&mut tx, &category, &url(), &locales(), Some(&de), &home, 1)
            .unwrap();
        let err = catalog
            .insert_unique_attribute(&mut tx, &category, &url(), &locales(), Some(&en), &home, 2)
            .unwrap_err();
        assert!(matches!(err, Error::UniqueValueViolation { .. }));
        assert!(err.is_recoverable());

        let owner = catalog
            .get_entity_reference_by_unique_value(Some(&tx), "url", Some(&de), &home)
            .unwrap();
        assert_eq!(owner, EntityWithTypeTuple::new("category", 1, Some(de)));
    }

    #[test]
    fn test_localized_attribute_needs_allowed_locale() {
        let catalog = CatalogIndex::new(Scope::Live);
        let mut tx = LayerMaintainer::new(1);
        let err = catalog
            .insert_unique_attribute(
                &mut tx,
                &EntitySchema::new("product"),
                &url(),
                &locales(),
                Some(&Locale::new("fr")),
                &AttributeValue::text("/x"),
                1,
            )
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
        assert_eq!(tx.pending_layers(), 0);
    }

    #[test]
    fn test_insert_remove_round_trip_frees_value() {
        let catalog = CatalogIndex::new(Scope::Live);
        let schema = EntitySchema::new("product");
        let code = AttributeSchema::new("code")
            .unique_globally(GlobalAttributeUniquenessType::UniqueWithinCatalog);
        let value = AttributeValue::text("A-1");
        let none = BTreeSet::new();
        let mut tx = LayerMaintainer::new(1);

        catalog
            .insert_unique_attribute(&mut tx, &schema, &code, &none, None, &value, 1)
            .unwrap();
        catalog
            .remove_unique_attribute(&mut tx, &schema, &code, &none, None, &value, 1)
            .unwrap();
        assert!(catalog
            .get_global_unique_index(Some(&tx), &AttributeKey::new("code"))
            .is_none());
        catalog
            .insert_unique_attribute(&mut tx, &schema, &code, &none, None, &value, 2)
            .unwrap();

        let mut parts = Vec::new();
        catalog.get_modified_storage_parts(Some(&tx), &mut parts);
        let kinds: Vec<_> = parts.iter().map(StoragePart::kind).collect();
        assert_eq!(kinds, vec!["catalog_index", "global_unique_index"]);

        let committed = tx.commit(&catalog).unwrap();
        tx.finish().unwrap();
        assert_eq!(committed.version(), 2);
        assert!(!committed.is_empty(None));
        assert!(catalog.is_empty(None));
    }
}
