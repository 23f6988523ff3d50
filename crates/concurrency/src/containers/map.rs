//! Transactional hash map
//!
//! The committed map is shared behind an `Arc`; a transaction keeps the
//! entries it inserted or replaced and the keys it removed. Values may be
//! producers themselves (bitmaps, nested maps, sub-indices): mutating such
//! a value writes to the value's own layer, and merging the map merges the
//! value too.
//!
//! ## Layer invariants
//!
//! - `removed` only holds keys present in the base
//! - `removed` and `inserted` are disjoint

use crate::maintainer::LayerMaintainer;
use crate::producer::{TransactionalLayerProducer, TransactionalValue};
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::Hash;
use std::sync::Arc;
use strata_index_core::{ProducerId, Result};

/// Layer of a [`TransactionalMap`]
#[derive(Debug, Clone)]
pub struct MapChanges<K, V> {
    inserted: FxHashMap<K, V>,
    removed: FxHashSet<K>,
}

impl<K, V> Default for MapChanges<K, V> {
    fn default() -> Self {
        MapChanges {
            inserted: FxHashMap::default(),
            removed: FxHashSet::default(),
        }
    }
}

impl<K, V> MapChanges<K, V> {
    /// Whether the layer records no structural change
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Hash map with transactional insert/remove and recursive value merge
#[derive(Debug)]
pub struct TransactionalMap<K, V> {
    id: ProducerId,
    base: Arc<FxHashMap<K, V>>,
}

impl<K, V> Clone for TransactionalMap<K, V> {
    fn clone(&self) -> Self {
        TransactionalMap {
            id: self.id,
            base: Arc::clone(&self.base),
        }
    }
}

impl<K, V> TransactionalMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: TransactionalValue,
{
    /// Create an empty map
    pub fn new() -> Self {
        Self::from_map(FxHashMap::default())
    }

    /// Wrap existing entries
    pub fn from_map(entries: FxHashMap<K, V>) -> Self {
        TransactionalMap {
            id: ProducerId::next(),
            base: Arc::new(entries),
        }
    }

    /// Value stored under `key`
    pub fn get<'a>(&'a self, tx: Option<&'a LayerMaintainer>, key: &K) -> Option<&'a V> {
        match self.layer(tx) {
            Some(layer) if layer.removed.contains(key) => None,
            Some(layer) => layer.inserted.get(key).or_else(|| self.base.get(key)),
            None => self.base.get(key),
        }
    }

    /// Value under `key`, fetched for a write through its own layer
    pub fn get_for_update(&self, tx: &mut LayerMaintainer, key: &K) -> Option<V> {
        let value = self.get(Some(&*tx), key).cloned();
        if value.is_some() {
            tx.mark_touched(self.id);
        }
        value
    }

    /// All values visible to `tx`, fetched for writes through their own layers
    pub fn values_for_update(&self, tx: &mut LayerMaintainer) -> Vec<V> {
        let values: Vec<V> = self.values(Some(&*tx)).cloned().collect();
        if !values.is_empty() {
            tx.mark_touched(self.id);
        }
        values
    }

    /// Whether `key` is present
    pub fn contains_key(&self, tx: Option<&LayerMaintainer>, key: &K) -> bool {
        self.get(tx, key).is_some()
    }

    /// Entries visible to `tx`, in no particular order
    pub fn iter<'a>(
        &'a self,
        tx: Option<&'a LayerMaintainer>,
    ) -> impl Iterator<Item = (&'a K, &'a V)> + 'a {
        let layer = self.layer(tx);
        let base = self.base.iter().filter(move |(key, _)| match layer {
            Some(layer) => !layer.removed.contains(*key) && !layer.inserted.contains_key(*key),
            None => true,
        });
        base.chain(layer.into_iter().flat_map(|layer| layer.inserted.iter()))
    }

    /// Keys visible to `tx`
    pub fn keys<'a>(&'a self, tx: Option<&'a LayerMaintainer>) -> impl Iterator<Item = &'a K> + 'a {
        self.iter(tx).map(|(key, _)| key)
    }

    /// Values visible to `tx`
    pub fn values<'a>(
        &'a self,
        tx: Option<&'a LayerMaintainer>,
    ) -> impl Iterator<Item = &'a V> + 'a {
        self.iter(tx).map(|(_, value)| value)
    }

    /// Number of entries
    pub fn len(&self, tx: Option<&LayerMaintainer>) -> usize {
        match self.layer(tx) {
            Some(layer) => {
                let added = layer
                    .inserted
                    .keys()
                    .filter(|key| !self.base.contains_key(*key))
                    .count();
                self.base.len() - layer.removed.len() + added
            }
            None => self.base.len(),
        }
    }

    /// Whether the map has no entries
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.len(tx) == 0
    }

    /// Insert or replace the value under `key`
    pub fn insert(&self, tx: &mut LayerMaintainer, key: K, value: V) -> Result<()> {
        let layer = tx.layer_mut(self)?;
        layer.removed.remove(&key);
        layer.inserted.insert(key, value);
        Ok(())
    }

    /// Remove `key`, returning the value it held
    ///
    /// The returned value still carries its pending layer (if any); the
    /// caller decides whether to discard it.
    pub fn remove(&self, tx: &mut LayerMaintainer, key: &K) -> Result<Option<V>> {
        let existing = self.get(Some(&*tx), key).cloned();
        if existing.is_none() {
            return Ok(None);
        }
        let in_base = self.base.contains_key(key);
        let layer = tx.layer_mut(self)?;
        layer.inserted.remove(key);
        if in_base {
            layer.removed.insert(key.clone());
        }
        Ok(existing)
    }

    /// Value under `key`, created by `factory` when absent
    ///
    /// `factory` is invoked at most once.
    pub fn compute_if_absent<F>(&self, tx: &mut LayerMaintainer, key: &K, factory: F) -> Result<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(existing) = self.get_for_update(tx, key) {
            return Ok(existing);
        }
        let value = factory();
        self.insert(tx, key.clone(), value.clone())?;
        tx.mark_touched(self.id);
        Ok(value)
    }

    fn layer<'a>(&self, tx: Option<&'a LayerMaintainer>) -> Option<&'a MapChanges<K, V>> {
        tx.and_then(|tx| tx.layer(self))
    }
}

impl<K, V> Default for TransactionalMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: TransactionalValue,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TransactionalLayerProducer for TransactionalMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: TransactionalValue,
{
    type Layer = MapChanges<K, V>;

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) -> MapChanges<K, V> {
        MapChanges::default()
    }

    fn merge_committed(
        &self,
        layer: Option<MapChanges<K, V>>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        let structural = layer.as_ref().map_or(false, |changes| !changes.is_empty());
        if !structural && !maintainer.is_touched(self.id) {
            return Ok(self.clone());
        }
        let changes = layer.unwrap_or_default();

        // Inserted values first: a replaced base value sharing a producer id
        // with its replacement must not lose the layer before it is merged.
        let mut merged = FxHashMap::default();
        for (key, value) in changes.inserted {
            let value = value.merge_value(maintainer)?;
            merged.insert(key, value);
        }
        for (key, value) in self.base.iter() {
            if changes.removed.contains(key) || merged.contains_key(key) {
                value.discard_value(maintainer);
            } else {
                merged.insert(key.clone(), value.merge_value(maintainer)?);
            }
        }
        Ok(TransactionalMap::from_map(merged))
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        if let Ok(Some(changes)) = maintainer.take_layer(self) {
            for value in changes.inserted.values() {
                value.discard_value(maintainer);
            }
        }
        if maintainer.is_touched(self.id) {
            for value in self.base.values() {
                value.discard_value(maintainer);
            }
            maintainer.clear_touched(self.id);
        }
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        maintainer.has_layer(self.id) || maintainer.is_touched(self.id)
    }
}

impl<K, V> TransactionalValue for TransactionalMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: TransactionalValue,
{
    fn merge_value(&self, maintainer: &mut LayerMaintainer) -> Result<Self> {
        maintainer.merge(self)
    }

    fn discard_value(&self, maintainer: &mut LayerMaintainer) {
        self.remove_layer(maintainer)
    }

    fn is_value_modified(&self, maintainer: &LayerMaintainer) -> bool {
        self.is_modified_in(maintainer)
    }
}
