//! Price references of a reduced entity index

use super::{PriceIndexKey, PriceSuperIndex};
use crate::storage::{PriceRefIndexPart, StoragePart};
use std::collections::BTreeSet;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBoolean, TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{Error, ProducerId, Result};

/// Internal price ids referenced from a reduced index, with their keys
#[derive(Debug, Clone)]
pub struct PriceRefIndex {
    id: ProducerId,
    dirty: TransactionalBoolean,
    refs: TransactionalMap<u32, PriceIndexKey>,
}

impl PriceRefIndex {
    /// Create an empty reference index
    pub fn new() -> Self {
        PriceRefIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            refs: TransactionalMap::new(),
        }
    }

    /// Rebuild references from persisted internal ids
    pub fn from_internal_ids(
        super_index: &PriceSuperIndex,
        internal_price_ids: &[u32],
    ) -> Result<Self> {
        let mut refs = rustc_hash::FxHashMap::default();
        for id in internal_price_ids {
            let record = super_index.get_price_record(None, *id).ok_or_else(|| {
                Error::internal(format!("Referenced price with internal id {} does not exist", id))
            })?;
            refs.insert(*id, record.key);
        }
        Ok(PriceRefIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            refs: TransactionalMap::from_map(refs),
        })
    }

    /// Reference a price stored in `super_index`
    pub fn add_price_ref(
        &self,
        tx: &mut LayerMaintainer,
        super_index: &PriceSuperIndex,
        internal_price_id: u32,
    ) -> Result<bool> {
        let record = super_index
            .get_price_record(Some(&*tx), internal_price_id)
            .ok_or_else(|| {
                Error::internal(format!(
                    "Price with internal id {} is not present in the global index",
                    internal_price_id
                ))
            })?;
        if self.refs.contains_key(Some(&*tx), &internal_price_id) {
            return Ok(false);
        }
        self.refs.insert(tx, internal_price_id, record.key)?;
        self.dirty.set_true(tx)?;
        Ok(true)
    }

    /// Drop the reference to a price
    pub fn remove_price_ref(&self, tx: &mut LayerMaintainer, internal_price_id: u32) -> Result<()> {
        if self.refs.remove(tx, &internal_price_id)?.is_none() {
            return Err(Error::internal(format!(
                "Price with internal id {} is not referenced",
                internal_price_id
            )));
        }
        self.dirty.set_true(tx)
    }

    /// Referenced internal ids, ascending
    pub fn internal_price_ids(&self, tx: Option<&LayerMaintainer>) -> Vec<u32> {
        let mut ids: Vec<u32> = self.refs.keys(tx).copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Distinct price list / currency combinations referenced
    pub fn price_index_keys(&self, tx: Option<&LayerMaintainer>) -> BTreeSet<PriceIndexKey> {
        self.refs.values(tx).cloned().collect()
    }

    /// Whether no price is referenced
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.refs.is_empty(tx)
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        Some(StoragePart::PriceRefs(PriceRefIndexPart {
            entity_index_pk,
            internal_price_ids: self.internal_price_ids(tx),
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl Default for PriceRefIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for PriceRefIndex {
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
        Ok(PriceRefIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            refs: maintainer.merge(&self.refs)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.refs.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.refs.is_modified_in(maintainer)
    }
}
