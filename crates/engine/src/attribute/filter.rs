//! Attribute value to record bitmap index

use crate::formula::Formula;
use crate::storage::{FilterIndexPart, StoragePart};
use roaring::RoaringBitmap;
use std::sync::Arc;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBitmap, TransactionalBoolean, TransactionalLayerProducer,
    TransactionalMap,
};
use strata_index_core::{AttributeKey, AttributeValue, Error, ProducerId, Result};

/// Records grouped by attribute value
///
/// Array values register the record under each element separately.
#[derive(Debug, Clone)]
pub struct FilterIndex {
    id: ProducerId,
    attribute: AttributeKey,
    dirty: TransactionalBoolean,
    buckets: TransactionalMap<AttributeValue, TransactionalBitmap>,
}

impl FilterIndex {
    /// Create an empty filter index
    pub fn new(attribute: AttributeKey) -> Self {
        Self::from_buckets(attribute, std::iter::empty())
    }

    /// Rebuild a filter index from persisted buckets
    pub fn from_buckets(
        attribute: AttributeKey,
        buckets: impl IntoIterator<Item = (AttributeValue, RoaringBitmap)>,
    ) -> Self {
        let buckets = buckets
            .into_iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(value, records)| (value, TransactionalBitmap::from_bitmap(records)))
            .collect();
        FilterIndex {
            id: ProducerId::next(),
            attribute,
            dirty: TransactionalBoolean::new(),
            buckets: TransactionalMap::from_map(buckets),
        }
    }

    /// Attribute this index covers
    pub fn attribute(&self) -> &AttributeKey {
        &self.attribute
    }

    /// Register `record_id` under every element of `value`
    pub fn add_record(
        &self,
        tx: &mut LayerMaintainer,
        record_id: u32,
        value: &AttributeValue,
    ) -> Result<()> {
        self.add_record_delta(tx, record_id, value.elements())
    }

    /// Register `record_id` under each of `elements`
    pub fn add_record_delta(
        &self,
        tx: &mut LayerMaintainer,
        record_id: u32,
        elements: &[AttributeValue],
    ) -> Result<()> {
        for element in elements {
            let bucket = self
                .buckets
                .compute_if_absent(tx, element, TransactionalBitmap::new)?;
            bucket.add(tx, record_id)?;
        }
        if !elements.is_empty() {
            self.dirty.set_true(tx)?;
        }
        Ok(())
    }

    /// Unregister `record_id` from every element of `value`
    pub fn remove_record(
        &self,
        tx: &mut LayerMaintainer,
        record_id: u32,
        value: &AttributeValue,
    ) -> Result<()> {
        self.remove_record_delta(tx, record_id, value.elements())
    }

    /// Unregister `record_id` from each of `elements`
    ///
    /// Buckets that become empty are dropped.
    pub fn remove_record_delta(
        &self,
        tx: &mut LayerMaintainer,
        record_id: u32,
        elements: &[AttributeValue],
    ) -> Result<()> {
        for element in elements {
            let indexed = self
                .buckets
                .get(Some(&*tx), element)
                .map_or(false, |bucket| bucket.contains(Some(&*tx), record_id));
            if !indexed {
                return Err(Error::internal(format!(
                    "Record {} is not indexed under value {} of attribute `{}`",
                    record_id, element, self.attribute
                )));
            }
        }
        for element in elements {
            let Some(bucket) = self.buckets.get_for_update(tx, element) else {
                continue;
            };
            bucket.remove(tx, record_id)?;
            if bucket.is_empty(Some(&*tx)) {
                self.buckets.remove(tx, element)?;
                bucket.remove_layer(tx);
            }
        }
        if !elements.is_empty() {
            self.dirty.set_true(tx)?;
        }
        Ok(())
    }

    /// Records indexed under `value`
    pub fn get_records_formula(
        &self,
        tx: Option<&LayerMaintainer>,
        value: &AttributeValue,
    ) -> Formula {
        match self.buckets.get(tx, value) {
            Some(bucket) => Formula::constant(bucket.snapshot(tx)),
            None => Formula::Empty,
        }
    }

    /// Every record indexed under any value
    pub fn get_all_records(&self, tx: Option<&LayerMaintainer>) -> Arc<RoaringBitmap> {
        let mut all = RoaringBitmap::new();
        for bucket in self.buckets.values(tx) {
            all |= &*bucket.snapshot(tx);
        }
        Arc::new(all)
    }

    /// Distinct indexed values in ascending order
    pub fn values(&self, tx: Option<&LayerMaintainer>) -> Vec<AttributeValue> {
        let mut values: Vec<_> = self.buckets.keys(tx).cloned().collect();
        values.sort();
        values
    }

    /// Whether no record is indexed
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.buckets.is_empty(tx)
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let buckets = self
            .values(tx)
            .into_iter()
            .map(|value| {
                let records = self
                    .buckets
                    .get(tx, &value)
                    .map(|bucket| bucket.to_vec(tx))
                    .unwrap_or_default();
                (value, records)
            })
            .collect();
        Some(StoragePart::FilterIndex(FilterIndexPart {
            entity_index_pk,
            attribute: self.attribute.clone(),
            buckets,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl TransactionalLayerProducer for FilterIndex {
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
        Ok(FilterIndex {
            id: ProducerId::next(),
            attribute: self.attribute.clone(),
            dirty: TransactionalBoolean::new(),
            buckets: maintainer.merge(&self.buckets)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.buckets.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.buckets.is_modified_in(maintainer)
    }
}

strata_index_concurrency::producer_transactional_value!(FilterIndex);

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> AttributeValue {
        AttributeValue::Array(items.iter().map(|it| AttributeValue::text(*it)).collect())
    }

    #[test]
    fn test_array_indexed_per_element() {
        let filter = FilterIndex::new(AttributeKey::new("tags"));
        let mut tx = LayerMaintainer::new(1);
        filter.add_record(&mut tx, 1, &tags(&["red", "blue"])).unwrap();
        filter.add_record(&mut tx, 2, &tags(&["blue"])).unwrap();

        let blue = filter.get_records_formula(Some(&tx), &AttributeValue::text("blue"));
        assert_eq!(blue.compute().iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            filter.values(Some(&tx)),
            vec![AttributeValue::text("blue"), AttributeValue::text("red")]
        );
    }

    #[test]
    fn test_emptied_bucket_is_dropped_and_released() {
        let filter = FilterIndex::new(AttributeKey::new("color"));
        let mut tx = LayerMaintainer::new(1);
        let red = AttributeValue::text("red");
        filter.add_record(&mut tx, 1, &red).unwrap();
        filter.remove_record(&mut tx, 1, &red).unwrap();
        assert!(filter.is_empty(Some(&tx)));

        let committed = tx.commit(&filter).unwrap();
        tx.finish().unwrap();
        assert!(committed.is_empty(None));
    }

    #[test]
    fn test_remove_unknown_record_fails() {
        let filter = FilterIndex::from_buckets(
            AttributeKey::new("color"),
            vec![(AttributeValue::text("red"), [1u32].into_iter().collect::<RoaringBitmap>())],
        );
        let mut tx = LayerMaintainer::new(1);
        let err = filter
            .remove_record(&mut tx, 2, &AttributeValue::text("red"))
            .unwrap_err();
        assert!(matches!(err, Error::InternalConsistency(_)));
        assert_eq!(tx.pending_layers(), 0);
    }

    #[test]
    fn test_delta_removal_keeps_other_elements() {
        let filter = FilterIndex::new(AttributeKey::new("tags"));
        let mut tx = LayerMaintainer::new(1);
        filter.add_record(&mut tx, 3, &tags(&["a", "b"])).unwrap();
        filter
            .remove_record_delta(&mut tx, 3, &[AttributeValue::text("a")])
            .unwrap();
        assert_eq!(filter.values(Some(&tx)), vec![AttributeValue::text("b")]);
        assert_eq!(filter.get_all_records(Some(&tx)).len(), 1);
    }
}
