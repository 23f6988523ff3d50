//! Collection-scoped unique attribute index

use crate::formula::Formula;
use crate::storage::{StoragePart, UniqueIndexPart};
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBitmap, TransactionalBoolean, TransactionalLayerProducer,
    TransactionalMap,
};
use strata_index_core::{AttributeKey, AttributeValue, Error, ProducerId, Result};

/// Maps every value of one attribute to the single record owning it
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    id: ProducerId,
    entity_type: String,
    attribute: AttributeKey,
    dirty: TransactionalBoolean,
    values: TransactionalMap<AttributeValue, u32>,
    value_counts: TransactionalMap<u32, u32>,
    records: TransactionalBitmap,
}

impl UniqueIndex {
    /// Create an empty unique index
    pub fn new(entity_type: impl Into<String>, attribute: AttributeKey) -> Self {
        Self::from_entries(entity_type, attribute, std::iter::empty())
    }

    /// Rebuild a unique index from persisted entries
    pub fn from_entries(
        entity_type: impl Into<String>,
        attribute: AttributeKey,
        entries: impl IntoIterator<Item = (AttributeValue, u32)>,
    ) -> Self {
        let values: rustc_hash::FxHashMap<AttributeValue, u32> = entries.into_iter().collect();
        let mut value_counts = rustc_hash::FxHashMap::default();
        for record in values.values() {
            *value_counts.entry(*record).or_insert(0u32) += 1;
        }
        let records = values.values().copied().collect();
        UniqueIndex {
            id: ProducerId::next(),
            entity_type: entity_type.into(),
            attribute,
            dirty: TransactionalBoolean::new(),
            values: TransactionalMap::from_map(values),
            value_counts: TransactionalMap::from_map(value_counts),
            records: TransactionalBitmap::from_bitmap(records),
        }
    }

    /// Attribute this index covers
    pub fn attribute(&self) -> &AttributeKey {
        &self.attribute
    }

    /// Claim `value` (every element of an array) for `record_id`
    ///
    /// All elements are checked before anything is written, so a violation
    /// leaves the index untouched.
    pub fn register_unique_key(
        &self,
        tx: &mut LayerMaintainer,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        for element in value.elements() {
            if let Some(&existing) = self.values.get(Some(&*tx), element) {
                if existing != record_id {
                    return Err(Error::UniqueValueViolation {
                        attribute: self.attribute.to_string(),
                        value: element.clone(),
                        existing_entity_type: self.entity_type.clone(),
                        existing_record_id: existing,
                        new_entity_type: self.entity_type.clone(),
                        new_record_id: record_id,
                    });
                }
            }
        }
        let mut claimed = 0;
        for element in value.elements() {
            if !self.values.contains_key(Some(&*tx), element) {
                self.values.insert(tx, element.clone(), record_id)?;
                claimed += 1;
            }
        }
        if claimed > 0 {
            let owned = self.owned_values(tx, record_id);
            self.value_counts.insert(tx, record_id, owned + claimed)?;
            self.records.add(tx, record_id)?;
        }
        self.dirty.set_true(tx)
    }

    /// Release `value` previously claimed by `record_id`
    pub fn unregister_unique_key(
        &self,
        tx: &mut LayerMaintainer,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        for element in value.elements() {
            let owner = self.values.get(Some(&*tx), element).copied();
            if owner != Some(record_id) {
                return Err(Error::internal(format!(
                    "Unique value {} of `{}` is not registered for record {} (owner: {:?})",
                    element, self.attribute, record_id, owner
                )));
            }
        }
        let mut released = 0;
        for element in value.elements() {
            if self.values.remove(tx, element)?.is_some() {
                released += 1;
            }
        }
        // the record stays while it owns another value, e.g. in a second locale
        let remaining = self.owned_values(tx, record_id).saturating_sub(released);
        if remaining == 0 {
            self.value_counts.remove(tx, &record_id)?;
            self.records.remove(tx, record_id)?;
        } else {
            self.value_counts.insert(tx, record_id, remaining)?;
        }
        self.dirty.set_true(tx)
    }

    fn owned_values(&self, tx: &LayerMaintainer, record_id: u32) -> u32 {
        self.value_counts
            .get(Some(tx), &record_id)
            .copied()
            .unwrap_or(0)
    }

    /// Record owning `value`
    pub fn get_record_id(
        &self,
        tx: Option<&LayerMaintainer>,
        value: &AttributeValue,
    ) -> Option<u32> {
        self.values.get(tx, value).copied()
    }

    /// Every record owning at least one value
    pub fn get_records_formula(&self, tx: Option<&LayerMaintainer>) -> Formula {
        Formula::constant(self.records.snapshot(tx))
    }

    /// Whether no value is registered
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.values.is_empty(tx)
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut entries: Vec<_> = self
            .values
            .iter(tx)
            .map(|(value, record)| (value.clone(), *record))
            .collect();
        entries.sort();
        Some(StoragePart::UniqueIndex(UniqueIndexPart {
            entity_index_pk,
            attribute: self.attribute.clone(),
            entries,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl TransactionalLayerProducer for UniqueIndex {
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
        Ok(UniqueIndex {
            id: ProducerId::next(),
            entity_type: self.entity_type.clone(),
            attribute: self.attribute.clone(),
            dirty: TransactionalBoolean::new(),
            values: maintainer.merge(&self.values)?,
            value_counts: maintainer.merge(&self.value_counts)?,
            records: maintainer.merge(&self.records)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.values.remove_layer(maintainer);
        self.value_counts.remove_layer(maintainer);
        self.records.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer)
            || self.values.is_modified_in(maintainer)
            || self.value_counts.is_modified_in(maintainer)
            || self.records.is_modified_in(maintainer)
    }
}

strata_index_concurrency::producer_transactional_value!(UniqueIndex);

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> UniqueIndex {
        UniqueIndex::new("product", AttributeKey::new("code"))
    }

    #[test]
    fn test_register_and_lookup() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        unique
            .register_unique_key(&mut tx, &AttributeValue::text("A-1"), 7)
            .unwrap();
        assert_eq!(unique.get_record_id(Some(&tx), &AttributeValue::text("A-1")), Some(7));
        assert_eq!(unique.get_record_id(None, &AttributeValue::text("A-1")), None);

        let committed = tx.commit(&unique).unwrap();
        tx.finish().unwrap();
        assert_eq!(committed.get_record_id(None, &AttributeValue::text("A-1")), Some(7));
    }

    #[test]
    fn test_array_collision_leaves_index_untouched() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        unique
            .register_unique_key(&mut tx, &AttributeValue::Int(2), 1)
            .unwrap();

        let array = AttributeValue::Array(vec![AttributeValue::Int(1), AttributeValue::Int(2)]);
        let err = unique.register_unique_key(&mut tx, &array, 5).unwrap_err();
        assert!(matches!(
            err,
            Error::UniqueValueViolation {
                existing_record_id: 1,
                new_record_id: 5,
                ..
            }
        ));
        assert!(err.is_recoverable());
        assert_eq!(unique.get_record_id(Some(&tx), &AttributeValue::Int(1)), None);
    }

    #[test]
    fn test_unregister_requires_owner() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        let value = AttributeValue::text("X");
        unique.register_unique_key(&mut tx, &value, 1).unwrap();

        let err = unique.unregister_unique_key(&mut tx, &value, 2).unwrap_err();
        assert!(matches!(err, Error::InternalConsistency(_)));

        unique.unregister_unique_key(&mut tx, &value, 1).unwrap();
        assert!(unique.is_empty(Some(&tx)));
    }

    #[test]
    fn test_storage_part_only_when_dirty() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        assert!(unique.storage_part(Some(&tx), 1).is_none());
        unique
            .register_unique_key(&mut tx, &AttributeValue::Int(3), 9)
            .unwrap();
        match unique.storage_part(Some(&tx), 1) {
            Some(StoragePart::UniqueIndex(part)) => {
                assert_eq!(part.entries, vec![(AttributeValue::Int(3), 9)]);
            }
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_record_kept_while_it_owns_another_value() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        let old = AttributeValue::text("OLD");
        let new = AttributeValue::text("NEW");
        unique.register_unique_key(&mut tx, &old, 4).unwrap();
        unique.register_unique_key(&mut tx, &new, 4).unwrap();

        unique.unregister_unique_key(&mut tx, &old, 4).unwrap();
        let records: Vec<u32> = unique.get_records_formula(Some(&tx)).compute().iter().collect();
        assert_eq!(records, vec![4]);

        let committed = tx.commit(&unique).unwrap();
        tx.finish().unwrap();
        let records: Vec<u32> = committed.get_records_formula(None).compute().iter().collect();
        assert_eq!(records, vec![4]);

        let mut tx = LayerMaintainer::new(2);
        committed.unregister_unique_key(&mut tx, &new, 4).unwrap();
        assert!(committed.get_records_formula(Some(&tx)).is_empty());
    }

    #[test]
    fn test_reclaiming_owned_value_counts_once() {
        let unique = index();
        let mut tx = LayerMaintainer::new(1);
        let value = AttributeValue::Int(8);
        unique.register_unique_key(&mut tx, &value, 2).unwrap();
        unique.register_unique_key(&mut tx, &value, 2).unwrap();
        unique.unregister_unique_key(&mut tx, &value, 2).unwrap();
        assert!(unique.get_records_formula(Some(&tx)).is_empty());
    }
}
