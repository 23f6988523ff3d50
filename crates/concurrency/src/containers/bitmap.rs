//! Transactional bitmap of primary keys
//!
//! The committed base is an immutable `RoaringBitmap` behind an `Arc`. A
//! transaction records two disjoint delta sets:
//! - `inserted`: ids absent from the base that the transaction added
//! - `removed`: ids present in the base that the transaction removed
//!
//! Merge applies removed-then-inserted to a copy of the base. A bitmap the
//! transaction did not change keeps sharing its base.

use crate::maintainer::LayerMaintainer;
use crate::producer::TransactionalLayerProducer;
use roaring::RoaringBitmap;
use std::sync::Arc;
use strata_index_core::{ProducerId, Result};

/// Layer of a [`TransactionalBitmap`]
#[derive(Debug, Clone, Default)]
pub struct BitmapChanges {
    inserted: RoaringBitmap,
    removed: RoaringBitmap,
}

impl BitmapChanges {
    /// Whether the layer records no net change
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    fn apply(&self, base: &RoaringBitmap) -> RoaringBitmap {
        let mut result = base - &self.removed;
        result |= &self.inserted;
        result
    }
}

/// Compressed set of primary keys with transactional add/remove
#[derive(Debug, Clone)]
pub struct TransactionalBitmap {
    id: ProducerId,
    base: Arc<RoaringBitmap>,
}

impl TransactionalBitmap {
    /// Create an empty bitmap
    pub fn new() -> Self {
        Self::from_bitmap(RoaringBitmap::new())
    }

    /// Wrap an existing bitmap (e.g. one loaded from storage)
    pub fn from_bitmap(bitmap: RoaringBitmap) -> Self {
        Self::from_arc(Arc::new(bitmap))
    }

    /// Wrap a shared bitmap
    pub fn from_arc(base: Arc<RoaringBitmap>) -> Self {
        TransactionalBitmap {
            id: ProducerId::next(),
            base,
        }
    }

    /// Add `id`; returns `false` when it was already present
    pub fn add(&self, tx: &mut LayerMaintainer, id: u32) -> Result<bool> {
        if self.contains(Some(&*tx), id) {
            return Ok(false);
        }
        let layer = tx.layer_mut(self)?;
        if !layer.removed.remove(id) {
            layer.inserted.insert(id);
        }
        Ok(true)
    }

    /// Remove `id`; returns `false` when it was absent
    pub fn remove(&self, tx: &mut LayerMaintainer, id: u32) -> Result<bool> {
        if !self.contains(Some(&*tx), id) {
            return Ok(false);
        }
        let layer = tx.layer_mut(self)?;
        if !layer.inserted.remove(id) {
            layer.removed.insert(id);
        }
        Ok(true)
    }

    /// Whether `id` is present
    pub fn contains(&self, tx: Option<&LayerMaintainer>, id: u32) -> bool {
        match self.layer(tx) {
            Some(layer) if layer.inserted.contains(id) => true,
            Some(layer) if layer.removed.contains(id) => false,
            _ => self.base.contains(id),
        }
    }

    /// Number of ids present
    pub fn len(&self, tx: Option<&LayerMaintainer>) -> u64 {
        match self.layer(tx) {
            Some(layer) => self.base.len() - layer.removed.len() + layer.inserted.len(),
            None => self.base.len(),
        }
    }

    /// Whether no id is present
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.len(tx) == 0
    }

    /// Immutable view of the ids, sharing the base when nothing changed
    pub fn snapshot(&self, tx: Option<&LayerMaintainer>) -> Arc<RoaringBitmap> {
        match self.layer(tx) {
            Some(layer) if !layer.is_empty() => Arc::new(layer.apply(&self.base)),
            _ => Arc::clone(&self.base),
        }
    }

    /// Ids in ascending order
    pub fn to_vec(&self, tx: Option<&LayerMaintainer>) -> Vec<u32> {
        self.snapshot(tx).iter().collect()
    }

    fn layer<'a>(&self, tx: Option<&'a LayerMaintainer>) -> Option<&'a BitmapChanges> {
        tx.and_then(|tx| tx.layer(self))
    }
}

impl Default for TransactionalBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for TransactionalBitmap {
    type Layer = BitmapChanges;

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) -> BitmapChanges {
        BitmapChanges::default()
    }

    fn merge_committed(
        &self,
        layer: Option<BitmapChanges>,
        _maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        match layer {
            Some(changes) if !changes.is_empty() => {
                Ok(TransactionalBitmap::from_bitmap(changes.apply(&self.base)))
            }
            _ => Ok(self.clone()),
        }
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        maintainer.remove_layer_if_exists(self.id);
    }
}

crate::producer_transactional_value!(TransactionalBitmap);
