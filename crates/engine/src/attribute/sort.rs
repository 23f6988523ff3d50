//! Record to sortable value index

use crate::storage::{SortIndexPart, StoragePart};
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBoolean, TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{AttributeKey, AttributeValue, Error, ProducerId, Result};

/// Sortable value of each record for one attribute or compound
///
/// Compound values are stored as [`AttributeValue::Array`] tuples so that
/// the derived ordering sorts them component by component.
#[derive(Debug, Clone)]
pub struct SortIndex {
    id: ProducerId,
    attribute: AttributeKey,
    compound: bool,
    dirty: TransactionalBoolean,
    values: TransactionalMap<u32, AttributeValue>,
}

impl SortIndex {
    /// Create an empty sort index over a single attribute
    pub fn new(attribute: AttributeKey) -> Self {
        Self::from_entries(attribute, false, std::iter::empty())
    }

    /// Create an empty sort index over an attribute compound
    pub fn compound(compound: AttributeKey) -> Self {
        Self::from_entries(compound, true, std::iter::empty())
    }

    /// Rebuild a sort index from persisted entries
    pub fn from_entries(
        attribute: AttributeKey,
        compound: bool,
        entries: impl IntoIterator<Item = (AttributeValue, u32)>,
    ) -> Self {
        let values = entries
            .into_iter()
            .map(|(value, record)| (record, value))
            .collect();
        SortIndex {
            id: ProducerId::next(),
            attribute,
            compound,
            dirty: TransactionalBoolean::new(),
            values: TransactionalMap::from_map(values),
        }
    }

    /// Attribute (or compound) this index covers
    pub fn attribute(&self) -> &AttributeKey {
        &self.attribute
    }

    /// Whether the index sorts by an attribute compound
    pub fn is_compound(&self) -> bool {
        self.compound
    }

    /// Register the sortable value of `record_id`
    pub fn add_record(
        &self,
        tx: &mut LayerMaintainer,
        value: AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        if let Some(existing) = self.values.get(Some(&*tx), &record_id) {
            return Err(Error::internal(format!(
                "Record {} is already sorted by `{}` with value {}",
                record_id, self.attribute, existing
            )));
        }
        self.values.insert(tx, record_id, value)?;
        self.dirty.set_true(tx)
    }

    /// Unregister the sortable value of `record_id`
    pub fn remove_record(
        &self,
        tx: &mut LayerMaintainer,
        value: &AttributeValue,
        record_id: u32,
    ) -> Result<()> {
        if self.values.get(Some(&*tx), &record_id) != Some(value) {
            return Err(Error::internal(format!(
                "Record {} is not sorted by `{}` with value {}",
                record_id, self.attribute, value
            )));
        }
        self.values.remove(tx, &record_id)?;
        self.dirty.set_true(tx)
    }

    /// Value `record_id` is sorted by
    pub fn value_of(&self, tx: Option<&LayerMaintainer>, record_id: u32) -> Option<AttributeValue> {
        self.values.get(tx, &record_id).cloned()
    }

    /// Records ordered by value, ties broken by record id
    pub fn sorted_records(&self, tx: Option<&LayerMaintainer>) -> Vec<u32> {
        self.sorted_entries(tx)
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }

    /// Number of sorted records
    pub fn len(&self, tx: Option<&LayerMaintainer>) -> usize {
        self.values.len(tx)
    }

    /// Whether no record is sorted
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.values.is_empty(tx)
    }

    fn sorted_entries(&self, tx: Option<&LayerMaintainer>) -> Vec<(AttributeValue, u32)> {
        let mut entries: Vec<_> = self
            .values
            .iter(tx)
            .map(|(record, value)| (value.clone(), *record))
            .collect();
        entries.sort();
        entries
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        Some(StoragePart::SortIndex(SortIndexPart {
            entity_index_pk,
            attribute: self.attribute.clone(),
            compound: self.compound,
            entries: self.sorted_entries(tx),
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl TransactionalLayerProducer for SortIndex {
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
        Ok(SortIndex {
            id: ProducerId::next(),
            attribute: self.attribute.clone(),
            compound: self.compound,
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

strata_index_concurrency::producer_transactional_value!(SortIndex);
