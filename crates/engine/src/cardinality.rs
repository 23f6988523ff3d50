//! Reference cardinalities of a referenced entity type index
//!
//! A referenced entity type index lists the primary keys of the reduced
//! indices it aggregates. The same reduced index may be reached through
//! several referenced entities, so every `(index pk, referenced pk)` pair
//! is counted and the index pk stays listed while any pair remains.

use crate::storage::{ReferenceCardinalityPart, StoragePart};
use roaring::RoaringBitmap;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBitmap, TransactionalBoolean, TransactionalLayerProducer,
    TransactionalMap,
};
use strata_index_core::{Error, ProducerId, Result};

/// Pair counts, per-index totals and referenced pk → index pks
#[derive(Debug, Clone)]
pub struct ReferenceTypeCardinalityIndex {
    id: ProducerId,
    dirty: TransactionalBoolean,
    pairs: TransactionalMap<(u32, u32), u32>,
    totals: TransactionalMap<u32, u32>,
    index_pks_by_referenced_pk: TransactionalMap<u32, TransactionalBitmap>,
}

impl ReferenceTypeCardinalityIndex {
    /// Create an empty cardinality index
    pub fn new() -> Self {
        Self::from_pairs(std::iter::empty())
    }

    /// Rebuild from persisted `(index pk, referenced pk, count)` triples
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u32, u32)>) -> Self {
        let mut counts = rustc_hash::FxHashMap::default();
        let mut totals = rustc_hash::FxHashMap::default();
        let mut referenced: rustc_hash::FxHashMap<u32, RoaringBitmap> = Default::default();
        for (index_pk, referenced_pk, count) in pairs.into_iter().filter(|it| it.2 > 0) {
            counts.insert((index_pk, referenced_pk), count);
            *totals.entry(index_pk).or_insert(0) += count;
            referenced.entry(referenced_pk).or_default().insert(index_pk);
        }
        ReferenceTypeCardinalityIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            pairs: TransactionalMap::from_map(counts),
            totals: TransactionalMap::from_map(totals),
            index_pks_by_referenced_pk: TransactionalMap::from_map(
                referenced
                    .into_iter()
                    .map(|(pk, index_pks)| (pk, TransactionalBitmap::from_bitmap(index_pks)))
                    .collect(),
            ),
        }
    }

    /// Count one more occurrence of the pair
    ///
    /// Returns `true` when `index_pk` had no occurrence before.
    pub fn add_record(
        &self,
        tx: &mut LayerMaintainer,
        index_pk: u32,
        referenced_pk: u32,
    ) -> Result<bool> {
        let pair = (index_pk, referenced_pk);
        let count = self.pairs.get(Some(&*tx), &pair).copied().unwrap_or(0);
        let total = self.totals.get(Some(&*tx), &index_pk).copied().unwrap_or(0);
        self.pairs.insert(tx, pair, count + 1)?;
        self.totals.insert(tx, index_pk, total + 1)?;
        if count == 0 {
            let index_pks = self.index_pks_by_referenced_pk.compute_if_absent(
                tx,
                &referenced_pk,
                TransactionalBitmap::new,
            )?;
            index_pks.add(tx, index_pk)?;
        }
        self.dirty.set_true(tx)?;
        Ok(total == 0)
    }

    /// Count one occurrence of the pair less
    ///
    /// Returns `true` when the last occurrence of `index_pk` is gone.
    pub fn remove_record(
        &self,
        tx: &mut LayerMaintainer,
        index_pk: u32,
        referenced_pk: u32,
    ) -> Result<bool> {
        let pair = (index_pk, referenced_pk);
        let count = self.pairs.get(Some(&*tx), &pair).copied().unwrap_or(0);
        if count == 0 {
            return Err(Error::internal(format!(
                "Index {} is not registered for referenced entity {}",
                index_pk, referenced_pk
            )));
        }
        let total = self.totals.get(Some(&*tx), &index_pk).copied().unwrap_or(0);
        if total < count {
            return Err(Error::internal(format!(
                "Total cardinality {} of index {} is lower than pair cardinality {}",
                total, index_pk, count
            )));
        }
        if count == 1 {
            self.pairs.remove(tx, &pair)?;
            let index_pks = self
                .index_pks_by_referenced_pk
                .get_for_update(tx, &referenced_pk);
            if let Some(index_pks) = index_pks {
                index_pks.remove(tx, index_pk)?;
                if index_pks.is_empty(Some(&*tx)) {
                    self.index_pks_by_referenced_pk.remove(tx, &referenced_pk)?;
                    index_pks.remove_layer(tx);
                }
            }
        } else {
            self.pairs.insert(tx, pair, count - 1)?;
        }
        if total == 1 {
            self.totals.remove(tx, &index_pk)?;
        } else {
            self.totals.insert(tx, index_pk, total - 1)?;
        }
        self.dirty.set_true(tx)?;
        Ok(total == 1)
    }

    /// Occurrences of the pair
    pub fn pair_cardinality(
        &self,
        tx: Option<&LayerMaintainer>,
        index_pk: u32,
        referenced_pk: u32,
    ) -> u32 {
        self.pairs
            .get(tx, &(index_pk, referenced_pk))
            .copied()
            .unwrap_or(0)
    }

    /// Occurrences of `index_pk` across all referenced entities
    pub fn cardinality(&self, tx: Option<&LayerMaintainer>, index_pk: u32) -> u32 {
        self.totals.get(tx, &index_pk).copied().unwrap_or(0)
    }

    /// Referenced entities reached through any of `index_pks`
    pub fn referenced_primary_keys_for_index_pks(
        &self,
        tx: Option<&LayerMaintainer>,
        index_pks: &RoaringBitmap,
    ) -> RoaringBitmap {
        self.index_pks_by_referenced_pk
            .iter(tx)
            .filter(|(_, indices)| !indices.snapshot(tx).is_disjoint(index_pks))
            .map(|(referenced_pk, _)| *referenced_pk)
            .collect()
    }

    /// Whether nothing is counted
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.pairs.is_empty(tx)
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut pairs: Vec<_> = self
            .pairs
            .iter(tx)
            .map(|((index_pk, referenced_pk), count)| (*index_pk, *referenced_pk, *count))
            .collect();
        pairs.sort_unstable();
        Some(StoragePart::ReferenceCardinality(ReferenceCardinalityPart {
            entity_index_pk,
            pairs,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl Default for ReferenceTypeCardinalityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for ReferenceTypeCardinalityIndex {
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
        Ok(ReferenceTypeCardinalityIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            pairs: maintainer.merge(&self.pairs)?,
            totals: maintainer.merge(&self.totals)?,
            index_pks_by_referenced_pk: maintainer.merge(&self.index_pks_by_referenced_pk)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.pairs.remove_layer(maintainer);
        self.totals.remove_layer(maintainer);
        self.index_pks_by_referenced_pk.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer)
            || self.pairs.is_modified_in(maintainer)
            || self.totals.is_modified_in(maintainer)
            || self.index_pks_by_referenced_pk.is_modified_in(maintainer)
    }
}
