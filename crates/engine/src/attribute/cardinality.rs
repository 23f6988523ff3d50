//! Per-value contribution counts of a multi-valued attribute

use crate::storage::{AttributeCardinalityPart, StoragePart};
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBoolean, TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{AttributeKey, AttributeValue, Error, ProducerId, Result};

/// Counts how many owning records contributed a value to a record
///
/// A value only enters (or leaves) the filter index of the record when its
/// count crosses zero. Mutators return exactly those elements.
#[derive(Debug, Clone)]
pub struct AttributeCardinalityIndex {
    id: ProducerId,
    attribute: AttributeKey,
    dirty: TransactionalBoolean,
    counts: TransactionalMap<(AttributeValue, u32), u32>,
}

impl AttributeCardinalityIndex {
    /// Create an empty cardinality index
    pub fn new(attribute: AttributeKey) -> Self {
        Self::from_entries(attribute, std::iter::empty())
    }

    /// Rebuild a cardinality index from persisted counts
    pub fn from_entries(
        attribute: AttributeKey,
        entries: impl IntoIterator<Item = (AttributeValue, u32, u32)>,
    ) -> Self {
        let counts = entries
            .into_iter()
            .filter(|(_, _, count)| *count > 0)
            .map(|(value, record, count)| ((value, record), count))
            .collect();
        AttributeCardinalityIndex {
            id: ProducerId::next(),
            attribute,
            dirty: TransactionalBoolean::new(),
            counts: TransactionalMap::from_map(counts),
        }
    }

    /// Attribute this index covers
    pub fn attribute(&self) -> &AttributeKey {
        &self.attribute
    }

    /// Count one more contribution of every element of `value`
    ///
    /// Returns the elements whose count went from zero to one.
    pub fn add_record(
        &self,
        tx: &mut LayerMaintainer,
        record_id: u32,
        value: &AttributeValue,
    ) -> Result<Vec<AttributeValue>> {
        let mut first_seen = Vec::new();
        for element in value.elements() {
            let key = (element.clone(), record_id);
            let count = self.cardinality_of(Some(&*tx), &key);
            self.counts.insert(tx, key, count + 1)?;
            if count == 0 {
                first_seen.push(element.clone());
            }
        }
        self.dirty.set_true(tx)?;
        Ok(first_seen)
    }

    /// Count one contribution less of every element of `value`
    ///
    /// Returns the elements whose count dropped to zero. Fails without
    /// touching anything when an element has no contribution to remove.
    pub fn remove_record(
        &self,
        tx: &mut LayerMaintainer,
        record_id: u32,
        value: &AttributeValue,
    ) -> Result<Vec<AttributeValue>> {
        for element in value.elements() {
            let key = (element.clone(), record_id);
            if self.cardinality_of(Some(&*tx), &key) == 0 {
                return Err(Error::internal(format!(
                    "Value {} of attribute `{}` has no cardinality recorded for record {}",
                    element, self.attribute, record_id
                )));
            }
        }
        let mut last_seen = Vec::new();
        for element in value.elements() {
            let key = (element.clone(), record_id);
            // an element repeated within the array may already be gone
            match self.cardinality_of(Some(&*tx), &key) {
                0 => {}
                1 => {
                    self.counts.remove(tx, &key)?;
                    last_seen.push(element.clone());
                }
                count => self.counts.insert(tx, key, count - 1)?,
            }
        }
        self.dirty.set_true(tx)?;
        Ok(last_seen)
    }

    /// Number of contributions of `value` to `record_id`
    pub fn cardinality(
        &self,
        tx: Option<&LayerMaintainer>,
        value: &AttributeValue,
        record_id: u32,
    ) -> u32 {
        self.cardinality_of(tx, &(value.clone(), record_id))
    }

    /// Whether no contribution is recorded
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.counts.is_empty(tx)
    }

    fn cardinality_of(&self, tx: Option<&LayerMaintainer>, key: &(AttributeValue, u32)) -> u32 {
        self.counts.get(tx, key).copied().unwrap_or(0)
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut counts: Vec<_> = self
            .counts
            .iter(tx)
            .map(|((value, record), count)| (value.clone(), *record, *count))
            .collect();
        counts.sort();
        Some(StoragePart::AttributeCardinality(AttributeCardinalityPart {
            entity_index_pk,
            attribute: self.attribute.clone(),
            counts,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl TransactionalLayerProducer for AttributeCardinalityIndex {
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
        Ok(AttributeCardinalityIndex {
            id: ProducerId::next(),
            attribute: self.attribute.clone(),
            dirty: TransactionalBoolean::new(),
            counts: maintainer.merge(&self.counts)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.counts.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.counts.is_modified_in(maintainer)
    }
}

strata_index_concurrency::producer_transactional_value!(AttributeCardinalityIndex);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transitions_are_forwarded() {
        let index = AttributeCardinalityIndex::new(AttributeKey::new("priority"));
        let mut tx = LayerMaintainer::new(1);
        let five = AttributeValue::Int(5);

        assert_eq!(index.add_record(&mut tx, 7, &five).unwrap(), vec![five.clone()]);
        assert!(index.add_record(&mut tx, 7, &five).unwrap().is_empty());
        assert_eq!(index.cardinality(Some(&tx), &five, 7), 2);

        assert!(index.remove_record(&mut tx, 7, &five).unwrap().is_empty());
        assert_eq!(index.remove_record(&mut tx, 7, &five).unwrap(), vec![five]);
        assert!(index.is_empty(Some(&tx)));
    }

    #[test]
    fn test_array_delta_contains_transitioned_elements_only() {
        let index = AttributeCardinalityIndex::new(AttributeKey::new("tags"));
        let mut tx = LayerMaintainer::new(1);
        let a = AttributeValue::text("a");
        let b = AttributeValue::text("b");
        index.add_record(&mut tx, 1, &a).unwrap();

        let both = AttributeValue::Array(vec![a.clone(), b.clone()]);
        assert_eq!(index.add_record(&mut tx, 1, &both).unwrap(), vec![b.clone()]);
        assert_eq!(index.remove_record(&mut tx, 1, &both).unwrap(), vec![b]);
        assert_eq!(index.cardinality(Some(&tx), &a, 1), 1);
    }

    #[test]
    fn test_remove_without_contribution_fails() {
        let index = AttributeCardinalityIndex::new(AttributeKey::new("tags"));
        let mut tx = LayerMaintainer::new(1);
        let err = index
            .remove_record(&mut tx, 1, &AttributeValue::Int(1))
            .unwrap_err();
        assert!(matches!(err, Error::InternalConsistency(_)));
    }
}
