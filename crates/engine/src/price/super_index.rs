//! Price records of a global entity index

use super::{PriceEntry, PriceIndexKey, PriceRecord};
use crate::formula::Formula;
use crate::storage::{PriceSuperIndexPart, StoragePart};
use std::collections::BTreeSet;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBitmap, TransactionalBoolean, TransactionalCell,
    TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{Error, ProducerId, Result};

/// Owner of all price records of an entity collection
#[derive(Debug, Clone)]
pub struct PriceSuperIndex {
    id: ProducerId,
    dirty: TransactionalBoolean,
    records: TransactionalMap<u32, PriceRecord>,
    price_ids_by_key: TransactionalMap<PriceIndexKey, TransactionalBitmap>,
    last_internal_id: TransactionalCell<Option<u32>>,
}

impl PriceSuperIndex {
    /// Create an empty price index
    pub fn new() -> Self {
        Self::from_records(None, Vec::new())
    }

    /// Rebuild the index from persisted records
    pub fn from_records(last_internal_id: Option<u32>, records: Vec<PriceRecord>) -> Self {
        let mut by_key: rustc_hash::FxHashMap<PriceIndexKey, roaring::RoaringBitmap> =
            rustc_hash::FxHashMap::default();
        for record in &records {
            by_key
                .entry(record.key.clone())
                .or_default()
                .insert(record.internal_price_id);
        }
        let max_id = records.iter().map(|it| it.internal_price_id).max();
        PriceSuperIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            records: TransactionalMap::from_map(
                records
                    .into_iter()
                    .map(|it| (it.internal_price_id, it))
                    .collect(),
            ),
            price_ids_by_key: TransactionalMap::from_map(
                by_key
                    .into_iter()
                    .map(|(key, ids)| (key, TransactionalBitmap::from_bitmap(ids)))
                    .collect(),
            ),
            last_internal_id: TransactionalCell::new(last_internal_id.max(max_id)),
        }
    }

    /// Store a price, returning its internal id
    pub fn add_price(&self, tx: &mut LayerMaintainer, entry: PriceEntry) -> Result<u32> {
        let last = self.last_internal_id.get(Some(&*tx));
        let internal_price_id = match entry.internal_price_id {
            Some(id) => {
                if self.records.contains_key(Some(&*tx), &id) {
                    return Err(Error::internal(format!(
                        "Internal price id {} is already assigned",
                        id
                    )));
                }
                id
            }
            None => last.map_or(Ok(1), |last| {
                last.checked_add(1)
                    .ok_or_else(|| Error::internal("Internal price id sequence exhausted"))
            })?,
        };
        if last.map_or(true, |last| internal_price_id > last) {
            self.last_internal_id.set(tx, Some(internal_price_id))?;
        }
        let record = PriceRecord {
            internal_price_id,
            price_id: entry.price_id,
            entity_pk: entry.entity_pk,
            key: entry.key,
            price_without_tax: entry.price_without_tax,
            price_with_tax: entry.price_with_tax,
        };
        let ids = self
            .price_ids_by_key
            .compute_if_absent(tx, &record.key, TransactionalBitmap::new)?;
        ids.add(tx, internal_price_id)?;
        self.records.insert(tx, internal_price_id, record)?;
        self.dirty.set_true(tx)?;
        Ok(internal_price_id)
    }

    /// Remove a price by internal id, returning the removed record
    pub fn remove_price(
        &self,
        tx: &mut LayerMaintainer,
        internal_price_id: u32,
    ) -> Result<PriceRecord> {
        let record = self
            .records
            .remove(tx, &internal_price_id)?
            .ok_or_else(|| {
                Error::internal(format!("Price with internal id {} not found", internal_price_id))
            })?;
        if let Some(ids) = self.price_ids_by_key.get_for_update(tx, &record.key) {
            ids.remove(tx, internal_price_id)?;
            if ids.is_empty(Some(&*tx)) {
                self.price_ids_by_key.remove(tx, &record.key)?;
                ids.remove_layer(tx);
            }
        }
        self.dirty.set_true(tx)?;
        Ok(record)
    }

    /// Record for an internal price id
    pub fn get_price_record(
        &self,
        tx: Option<&LayerMaintainer>,
        internal_price_id: u32,
    ) -> Option<PriceRecord> {
        self.records.get(tx, &internal_price_id).cloned()
    }

    /// Internal ids of the prices in `key`
    pub fn prices_for_key(&self, tx: Option<&LayerMaintainer>, key: &PriceIndexKey) -> Formula {
        self.price_ids_by_key
            .get(tx, key)
            .map_or(Formula::Empty, |ids| Formula::constant(ids.snapshot(tx)))
    }

    /// Distinct price list / currency combinations
    pub fn price_index_keys(&self, tx: Option<&LayerMaintainer>) -> BTreeSet<PriceIndexKey> {
        self.price_ids_by_key.keys(tx).cloned().collect()
    }

    /// Highest internal id ever assigned
    pub fn last_assigned_internal_price_id(&self, tx: Option<&LayerMaintainer>) -> Option<u32> {
        self.last_internal_id.get(tx)
    }

    /// Whether no price is stored
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.records.is_empty(tx)
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut records: Vec<PriceRecord> = self.records.values(tx).cloned().collect();
        records.sort_unstable_by_key(|it| it.internal_price_id);
        Some(StoragePart::Prices(PriceSuperIndexPart {
            entity_index_pk,
            records,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl Default for PriceSuperIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for PriceSuperIndex {
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
        Ok(PriceSuperIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            records: maintainer.merge(&self.records)?,
            price_ids_by_key: maintainer.merge(&self.price_ids_by_key)?,
            last_internal_id: maintainer.merge(&self.last_internal_id)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.records.remove_layer(maintainer);
        self.price_ids_by_key.remove_layer(maintainer);
        self.last_internal_id.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer)
            || self.records.is_modified_in(maintainer)
            || self.price_ids_by_key.is_modified_in(maintainer)
            || self.last_internal_id.is_modified_in(maintainer)
    }
}
