//! Attribute indices of an entity index
//!
//! An [`AttributeIndex`] owns, per attribute key, at most one index of each
//! kind:
//! - [`UniqueIndex`]: value → owning record
//! - [`FilterIndex`]: value → records
//! - [`SortIndex`]: record → sortable value (also used for compounds)
//!
//! Sub-indices are created lazily on first insert and dropped as soon as
//! they become empty.

mod cardinality;
mod filter;
mod global_unique;
mod sort;
mod unique;

pub use cardinality::AttributeCardinalityIndex;
pub use filter::FilterIndex;
pub use global_unique::{EntityWithTypeTuple, GlobalUniqueIndex};
pub use sort::SortIndex;
pub use unique::UniqueIndex;

use crate::storage::StoragePart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strata_index_concurrency::{LayerMaintainer, TransactionalLayerProducer, TransactionalMap};
use strata_index_core::{
    AttributeKey, AttributeSchema, AttributeValue, EntityIndexKey, Error, Locale, ProducerId,
    Result, SortableAttributeCompoundSchema,
};

/// Kind of attribute sub-index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeIndexType {
    /// Unique index
    Unique,
    /// Filter index
    Filter,
    /// Sort index over a single attribute
    Sort,
    /// Sort index over an attribute compound
    Compound,
}

impl AttributeIndexType {
    /// Stable name used in storage keys
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeIndexType::Unique => "UNIQUE",
            AttributeIndexType::Filter => "FILTER",
            AttributeIndexType::Sort => "SORT",
            AttributeIndexType::Compound => "COMPOUND",
        }
    }
}

/// Identifies one persisted attribute sub-index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeIndexStorageKey {
    /// Entity index owning the sub-index
    pub index_key: EntityIndexKey,
    /// Kind of sub-index
    pub index_type: AttributeIndexType,
    /// Attribute (or compound) covered
    pub attribute: AttributeKey,
}

impl fmt::Display for AttributeIndexStorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.index_key,
            self.index_type.as_str(),
            self.attribute
        )
    }
}

/// Fails unless a localized attribute carries one of the allowed locales
pub fn verify_localized_attribute(
    schema: &AttributeSchema,
    allowed_locales: &BTreeSet<Locale>,
    locale: Option<&Locale>,
) -> Result<()> {
    let locale = locale.ok_or_else(|| {
        Error::schema(format!(
            "Attribute `{}` is localized but the value carries no locale",
            schema.name
        ))
    })?;
    if !allowed_locales.contains(locale) {
        let allowed: Vec<_> = allowed_locales.iter().map(|it| format!("`{}`", it)).collect();
        return Err(Error::schema(format!(
            "Attribute `{}` is in locale `{}` that is not among allowed locales: {}",
            schema.name,
            locale,
            allowed.join(", ")
        )));
    }
    Ok(())
}

/// Lookup key of `schema`, validating the locale of localized attributes
pub fn attribute_key(
    schema: &AttributeSchema,
    allowed_locales: &BTreeSet<Locale>,
    locale: Option<&Locale>,
) -> Result<AttributeKey> {
    if schema.localized {
        verify_localized_attribute(schema, allowed_locales, locale)?;
        Ok(AttributeKey::with_locale(schema.name.as_str(), locale))
    } else {
        Ok(AttributeKey::new(schema.name.as_str()))
    }
}

/// Lookup key of a sortable compound
pub fn compound_key(
    compound: &SortableAttributeCompoundSchema,
    locale: Option<&Locale>,
) -> AttributeKey {
    AttributeKey::with_locale(compound.name.as_str(), locale)
}

fn compound_value(
    compound: &SortableAttributeCompoundSchema,
    values: Vec<AttributeValue>,
) -> Result<AttributeValue> {
    if values.len() != compound.attributes.len() {
        return Err(Error::internal(format!(
            "Compound `{}` consists of {} attributes, but {} values were supplied",
            compound.name,
            compound.attributes.len(),
            values.len()
        )));
    }
    Ok(AttributeValue::Array(values))
}

/// Unique, filter, sort and compound sort indices of one entity index
#[derive(Debug, Clone)]
pub struct AttributeIndex {
    id: ProducerId,
    entity_type: String,
    unique: TransactionalMap<AttributeKey, UniqueIndex>,
    filter: TransactionalMap<AttributeKey, FilterIndex>,
    sort: TransactionalMap<AttributeKey, SortIndex>,
    compound: TransactionalMap<AttributeKey, SortIndex>,
}

impl AttributeIndex {
    /// Create an empty attribute index
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::from_parts(entity_type, Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    /// Rebuild an attribute index from loaded sub-indices
    pub fn from_parts(
        entity_type: impl Into<String>,
        unique: Vec<UniqueIndex>,
        filter: Vec<FilterIndex>,
        sort: Vec<SortIndex>,
        compound: Vec<SortIndex>,
    ) -> Self {
        AttributeIndex {
            id: ProducerId::next(),
            entity_type: entity_type.into(),
            unique: TransactionalMap::from_map(
                unique.into_iter().map(|it| (it.attribute().clone(), it)).collect(),
            ),
            filter: TransactionalMap::from_map(
                filter.into_iter().map(|it| (it.attribute().clone(), it)).collect(),
            ),
            sort: TransactionalMap::from_map(
                sort.into_iter().map(|it| (it.attribute().clone(), it)).collect(),
            ),
            compound: TransactionalMap::from_map(
                compound.into_iter().map(|it| (it.attribute().clone(), it)).collect(),
            ),
        }
    }

    /// Register a unique value of `record_id`
    pub fn insert_unique_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        let key = attribute_key(schema, allowed_locales, locale)?;
        let index = self.unique.compute_if_absent(tx, &key, || {
            UniqueIndex::new(self.entity_type.as_str(), key.clone())
        })?;
        index.register_unique_key(tx, value, record_id)
    }

    /// Release a unique value of `record_id`
    pub fn remove_unique_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        let key = attribute_key(schema, allowed_locales, locale)?;
        let index = existing(&self.unique, tx, &key, "Unique")?;
        index.unregister_unique_key(tx, value, record_id)?;
        if index.is_empty(Some(&*tx)) {
            self.unique.remove(tx, &key)?;
            index.remove_layer(tx);
        }
        Ok(())
    }

    /// Index `record_id` under every element of `value`
    pub fn insert_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        self.add_delta_filter_attribute(
            tx,
            schema,
            allowed_locales,
            locale,
            value.elements(),
            record_id,
        )
    }

    /// Unindex `record_id` from every element of `value`
    pub fn remove_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        self.remove_delta_filter_attribute(
            tx,
            schema,
            allowed_locales,
            locale,
            value.elements(),
            record_id,
        )
    }

    /// Index `record_id` under each of `delta` (part of an array value)
    pub fn add_delta_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        delta: &[AttributeValue],
        record_id: u32,
    ) -> Result<()> {
        let key = attribute_key(schema, allowed_locales, locale)?;
        if delta.is_empty() {
            return Ok(());
        }
        let index = self
            .filter
            .compute_if_absent(tx, &key, || FilterIndex::new(key.clone()))?;
        index.add_record_delta(tx, record_id, delta)
    }

    /// Unindex `record_id` from each of `delta` (part of an array value)
    pub fn remove_delta_filter_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        delta: &[AttributeValue],
        record_id: u32,
    ) -> Result<()> {
        let key = attribute_key(schema, allowed_locales, locale)?;
        if delta.is_empty() {
            return Ok(());
        }
        let index = existing(&self.filter, tx, &key, "Filter")?;
        index.remove_record_delta(tx, record_id, delta)?;
        if index.is_empty(Some(&*tx)) {
            self.filter.remove(tx, &key)?;
            index.remove_layer(tx);
        }
        Ok(())
    }

    /// Register the sortable value of `record_id`
    pub fn insert_sort_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        let key = attribute_key(schema, allowed_locales, locale)?;
        let index = self
            .sort
            .compute_if_absent(tx, &key, || SortIndex::new(key.clone()))?;
        index.add_record(tx, value.clone(), record_id)
    }

    /// Unregister the sortable value of `record_id`
    pub fn remove_sort_attribute(
        &self,
        tx: &mut LayerMaintainer,
        schema: &AttributeSchema,
        allowed_locales: &BTreeSet<Locale>,
        locale: Option<&Locale>,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        let key = attribute_key(schema, allowed_locales, locale)?;
        let index = existing(&self.sort, tx, &key, "Sort")?;
        index.remove_record(tx, value, record_id)?;
        if index.is_empty(Some(&*tx)) {
            self.sort.remove(tx, &key)?;
            index.remove_layer(tx);
        }
        Ok(())
    }

    /// Register the compound tuple of `record_id`
    pub fn insert_sort_attribute_compound(
        &self,
        tx: &mut LayerMaintainer,
        compound: &SortableAttributeCompoundSchema,
        locale: Option<&Locale>,
        values: Vec<AttributeValue>,
        record_id: u32,
    ) -> Result<()> {
        let value = compound_value(compound, values)?;
        let key = compound_key(compound, locale);
        let index = self
            .compound
            .compute_if_absent(tx, &key, || SortIndex::compound(key.clone()))?;
        index.add_record(tx, value, record_id)
    }

    /// Unregister the compound tuple of `record_id`
    pub fn remove_sort_attribute_compound(
        &self,
        tx: &mut LayerMaintainer,
        compound: &SortableAttributeCompoundSchema,
        locale: Option<&Locale>,
        values: Vec<AttributeValue>,
        record_id: u32,
    ) -> Result<()> {
        let value = compound_value(compound, values)?;
        let key = compound_key(compound, locale);
        let index = existing(&self.compound, tx, &key, "Compound sort")?;
        index.remove_record(tx, &value, record_id)?;
        if index.is_empty(Some(&*tx)) {
            self.compound.remove(tx, &key)?;
            index.remove_layer(tx);
        }
        Ok(())
    }

    /// Unique index for `key`
    pub fn get_unique_index(
        &self,
        tx: Option<&LayerMaintainer>,
        key: &AttributeKey,
    ) -> Option<UniqueIndex> {
        self.unique.get(tx, key).cloned()
    }

    /// Filter index for `key`
    pub fn get_filter_index(
        &self,
        tx: Option<&LayerMaintainer>,
        key: &AttributeKey,
    ) -> Option<FilterIndex> {
        self.filter.get(tx, key).cloned()
    }

    /// Sort index for `key`
    pub fn get_sort_index(
        &self,
        tx: Option<&LayerMaintainer>,
        key: &AttributeKey,
    ) -> Option<SortIndex> {
        self.sort.get(tx, key).cloned()
    }

    /// Compound sort index for `key`
    pub fn get_compound_index(
        &self,
        tx: Option<&LayerMaintainer>,
        key: &AttributeKey,
    ) -> Option<SortIndex> {
        self.compound.get(tx, key).cloned()
    }

    /// Filter index by attribute name, preferring the localized variant
    pub fn get_filter_index_by_name(
        &self,
        tx: Option<&LayerMaintainer>,
        attribute_name: &str,
        locale: Option<&Locale>,
    ) -> Option<FilterIndex> {
        locale
            .and_then(|locale| {
                self.get_filter_index(tx, &AttributeKey::localized(attribute_name, locale.clone()))
            })
            .or_else(|| self.get_filter_index(tx, &AttributeKey::new(attribute_name)))
    }

    /// Storage keys of every sub-index, as listed in the entity index part
    pub fn storage_keys(
        &self,
        tx: Option<&LayerMaintainer>,
        index_key: &EntityIndexKey,
    ) -> BTreeSet<AttributeIndexStorageKey> {
        let kinds = [
            (AttributeIndexType::Unique, self.unique.keys(tx).collect::<Vec<_>>()),
            (AttributeIndexType::Filter, self.filter.keys(tx).collect()),
            (AttributeIndexType::Sort, self.sort.keys(tx).collect()),
            (AttributeIndexType::Compound, self.compound.keys(tx).collect()),
        ];
        kinds
            .into_iter()
            .flat_map(|(index_type, keys)| {
                keys.into_iter().map(move |attribute| AttributeIndexStorageKey {
                    index_key: index_key.clone(),
                    index_type,
                    attribute: attribute.clone(),
                })
            })
            .collect()
    }

    /// Whether no sub-index exists
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.unique.is_empty(tx)
            && self.filter.is_empty(tx)
            && self.sort.is_empty(tx)
            && self.compound.is_empty(tx)
    }

    /// Append the parts of every dirty sub-index, ordered by attribute
    pub fn get_modified_storage_parts(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
        sink: &mut Vec<StoragePart>,
    ) {
        for index in sorted_values(&self.unique, tx) {
            sink.extend(index.storage_part(tx, entity_index_pk));
        }
        for index in sorted_values(&self.filter, tx) {
            sink.extend(index.storage_part(tx, entity_index_pk));
        }
        for index in sorted_values(&self.sort, tx) {
            sink.extend(index.storage_part(tx, entity_index_pk));
        }
        for index in sorted_values(&self.compound, tx) {
            sink.extend(index.storage_part(tx, entity_index_pk));
        }
    }

    /// Clear the dirty flag of every sub-index
    pub fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        for index in self.unique.values_for_update(tx) {
            index.reset_dirty(tx)?;
        }
        for index in self.filter.values_for_update(tx) {
            index.reset_dirty(tx)?;
        }
        for index in self.sort.values_for_update(tx) {
            index.reset_dirty(tx)?;
        }
        for index in self.compound.values_for_update(tx) {
            index.reset_dirty(tx)?;
        }
        Ok(())
    }
}

fn existing<V: strata_index_concurrency::TransactionalValue>(
    map: &TransactionalMap<AttributeKey, V>,
    tx: &mut LayerMaintainer,
    key: &AttributeKey,
    kind: &str,
) -> Result<V> {
    map.get_for_update(tx, key)
        .ok_or_else(|| Error::internal(format!("{} index for attribute `{}` not found", kind, key)))
}

fn sorted_values<V: strata_index_concurrency::TransactionalValue>(
    map: &TransactionalMap<AttributeKey, V>,
    tx: Option<&LayerMaintainer>,
) -> Vec<V> {
    let mut entries: Vec<_> = map.iter(tx).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(_, value)| value.clone()).collect()
}

impl TransactionalLayerProducer for AttributeIndex {
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
        Ok(AttributeIndex {
            id: ProducerId::next(),
            entity_type: self.entity_type.clone(),
            unique: maintainer.merge(&self.unique)?,
            filter: maintainer.merge(&self.filter)?,
            sort: maintainer.merge(&self.sort)?,
            compound: maintainer.merge(&self.compound)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.unique.remove_layer(maintainer);
        self.filter.remove_layer(maintainer);
        self.sort.remove_layer(maintainer);
        self.compound.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.unique.is_modified_in(maintainer)
            || self.filter.is_modified_in(maintainer)
            || self.sort.is_modified_in(maintainer)
            || self.compound.is_modified_in(maintainer)
    }
}
