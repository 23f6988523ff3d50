//! Registry of the entity indices of one collection
//!
//! The registry publishes committed generations. Readers clone an `Arc` out
//! of the registry and keep using that generation for as long as they
//! like; the lock is only held while `Arc`s are looked up or swapped.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. prepare(tx) on every registry the transaction wrote to
//!    - collect the modified storage parts of every touched index
//!    - evict touched indices that became empty (their layers are released)
//!    - merge the remaining touched indices into new generations
//! 2. commit(catalog) for the catalog index, when it was written to
//! 3. finish() the transaction once (unmerged layer check)
//! 4. publish(tx, prepared) on every registry: swap the new generations in
//!    under the write lock
//! ```
//!
//! [`EntityIndexRegistry::commit`] runs the whole sequence for a transaction
//! that wrote to this registry alone.

use crate::entity::EntityIndex;
use crate::storage::StoragePart;
use crate::Index;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use strata_index_concurrency::{LayerMaintainer, TransactionStatus, TransactionalLayerProducer};
use strata_index_core::{EntityIndexKey, EntityIndexType, Error, IndexConfig, Result};
use tracing::{debug, info};

/// Result of a registry commit
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Parts to hand to the persistence layer, in index key order
    pub parts: Vec<StoragePart>,
    /// Keys of the indices that got a new generation
    pub published: Vec<EntityIndexKey>,
    /// Keys of the indices dropped because they became empty
    pub evicted: Vec<EntityIndexKey>,
}

/// Generations merged by a transaction, not yet visible to readers
#[derive(Debug)]
#[must_use = "prepared generations are only visible once published"]
pub struct PreparedCommit {
    txn_id: u64,
    outcome: CommitOutcome,
    generations: Vec<(EntityIndexKey, Arc<EntityIndex>)>,
}

impl PreparedCommit {
    /// What publishing will do
    pub fn outcome(&self) -> &CommitOutcome {
        &self.outcome
    }
}

/// Entity indices of one entity collection
#[derive(Debug)]
pub struct EntityIndexRegistry {
    entity_type: String,
    config: IndexConfig,
    committed: RwLock<BTreeMap<EntityIndexKey, Arc<EntityIndex>>>,
    staged: Mutex<BTreeMap<EntityIndexKey, Arc<EntityIndex>>>,
    next_primary_key: AtomicU32,
}

impl EntityIndexRegistry {
    /// Empty registry with default configuration
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::with_config(entity_type, IndexConfig::default())
    }

    /// Empty registry
    pub fn with_config(entity_type: impl Into<String>, config: IndexConfig) -> Self {
        EntityIndexRegistry {
            entity_type: entity_type.into(),
            config,
            committed: RwLock::new(BTreeMap::new()),
            staged: Mutex::new(BTreeMap::new()),
            next_primary_key: AtomicU32::new(1),
        }
    }

    /// Registry seeded with restored indices
    pub fn restore(
        entity_type: impl Into<String>,
        config: IndexConfig,
        indexes: Vec<EntityIndex>,
    ) -> Self {
        let registry = Self::with_config(entity_type, config);
        let last = indexes.iter().map(EntityIndex::primary_key).max().unwrap_or(0);
        registry.next_primary_key.store(last + 1, Ordering::SeqCst);
        *registry.committed.write() = indexes
            .into_iter()
            .map(|index| (index.index_key().clone(), Arc::new(index)))
            .collect();
        registry
    }

    /// Entity type the registry serves
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Committed generation of the index under `key`
    pub fn get(&self, key: &EntityIndexKey) -> Option<Arc<EntityIndex>> {
        self.committed.read().get(key).cloned()
    }

    /// Keys of every committed index
    pub fn keys(&self) -> Vec<EntityIndexKey> {
        self.committed.read().keys().cloned().collect()
    }

    /// Index under `key` for the writing transaction, staging a new one when
    /// none exists yet
    ///
    /// Staged indices become visible to readers on [`commit`](Self::commit).
    pub fn get_or_create(&self, key: &EntityIndexKey) -> Result<Arc<EntityIndex>> {
        if let Some(index) = self.get(key) {
            return Ok(index);
        }
        let mut staged = self.staged.lock();
        if let Some(index) = staged.get(key) {
            return Ok(Arc::clone(index));
        }
        let primary_key = self.next_primary_key.fetch_add(1, Ordering::SeqCst);
        let index = Arc::new(self.create(primary_key, key)?);
        debug!(
            entity_type = %self.entity_type,
            index_key = %key,
            primary_key,
            "Staged new entity index"
        );
        staged.insert(key.clone(), Arc::clone(&index));
        Ok(index)
    }

    fn create(&self, primary_key: u32, key: &EntityIndexKey) -> Result<EntityIndex> {
        match key.index_type {
            EntityIndexType::Global => Ok(EntityIndex::global(
                primary_key,
                self.entity_type.as_str(),
                key.scope,
            )),
            EntityIndexType::ReferencedEntityType => {
                let reference_name = key.reference_name().ok_or_else(|| {
                    Error::internal(format!("Index key `{}` names no reference", key))
                })?;
                Ok(EntityIndex::referenced_type(
                    primary_key,
                    self.entity_type.as_str(),
                    key.scope,
                    reference_name,
                ))
            }
            EntityIndexType::ReferencedEntity | EntityIndexType::ReferencedHierarchyNode => {
                EntityIndex::reduced(primary_key, self.entity_type.as_str(), key.clone())
            }
        }
    }

    /// Merge every index touched by `tx` and publish the new generations
    ///
    /// Finishes `tx`, so the transaction must not have written to any other
    /// root. On failure the transaction is rolled back and nothing is
    /// published.
    pub fn commit(&self, tx: &mut LayerMaintainer) -> Result<CommitOutcome> {
        let prepared = self.prepare(tx)?;
        tx.finish()?;
        self.publish(tx, prepared)
    }

    /// Merge every index touched by `tx` without finishing the transaction
    ///
    /// The generations stay invisible until [`publish`](Self::publish). On
    /// failure the transaction is rolled back.
    pub fn prepare(&self, tx: &mut LayerMaintainer) -> Result<PreparedCommit> {
        tx.ensure_active()?;
        let staged = std::mem::take(&mut *self.staged.lock());
        let mut touched: BTreeMap<EntityIndexKey, Arc<EntityIndex>> = self
            .committed
            .read()
            .iter()
            .filter(|(_, index)| index.is_modified_in(&*tx))
            .map(|(key, index)| (key.clone(), Arc::clone(index)))
            .collect();
        touched.extend(staged);

        match self.merge_touched(tx, touched) {
            Ok((outcome, generations)) => Ok(PreparedCommit {
                txn_id: tx.txn_id(),
                outcome,
                generations,
            }),
            Err(err) => {
                if tx.is_active() {
                    tx.rollback(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Make prepared generations visible once `tx` has finished
    pub fn publish(&self, tx: &LayerMaintainer, prepared: PreparedCommit) -> Result<CommitOutcome> {
        if prepared.txn_id != tx.txn_id() {
            return Err(Error::InvalidState(format!(
                "generations prepared by transaction {} cannot be published by transaction {}",
                prepared.txn_id,
                tx.txn_id()
            )));
        }
        if *tx.status() != TransactionStatus::Committed {
            return Err(Error::InvalidState(format!(
                "transaction {} is {:?}, expected Committed",
                tx.txn_id(),
                tx.status()
            )));
        }
        let PreparedCommit {
            outcome,
            generations,
            ..
        } = prepared;
        let mut committed = self.committed.write();
        for key in &outcome.evicted {
            committed.remove(key);
        }
        committed.extend(generations);
        info!(
            entity_type = %self.entity_type,
            txn_id = tx.txn_id(),
            published = outcome.published.len(),
            evicted = outcome.evicted.len(),
            parts = outcome.parts.len(),
            "Committed entity indices"
        );
        Ok(outcome)
    }

    #[allow(clippy::type_complexity)]
    fn merge_touched(
        &self,
        tx: &mut LayerMaintainer,
        touched: BTreeMap<EntityIndexKey, Arc<EntityIndex>>,
    ) -> Result<(CommitOutcome, Vec<(EntityIndexKey, Arc<EntityIndex>)>)> {
        let mut outcome = CommitOutcome::default();
        let mut generations = Vec::with_capacity(touched.len());
        for (key, index) in touched {
            if self.config.evict_empty_indexes && index.is_empty(Some(&*tx)) {
                index.remove_layer(tx);
                debug!(
                    entity_type = %self.entity_type,
                    index_key = %key,
                    "Evicting empty entity index"
                );
                outcome.evicted.push(key);
                continue;
            }
            if !index.is_modified_in(tx) {
                continue;
            }
            index.get_modified_storage_parts(Some(&*tx), &mut outcome.parts);
            let merged = tx.commit(&*index)?;
            outcome.published.push(key.clone());
            generations.push((key, Arc::new(merged)));
        }
        Ok((outcome, generations))
    }

    /// Drop a committed index that holds no data
    pub fn remove_empty(&self, key: &EntityIndexKey) -> Result<Arc<EntityIndex>> {
        let mut committed = self.committed.write();
        match committed.get(key) {
            Some(index) if index.is_empty(None) => {}
            Some(_) => {
                return Err(Error::internal(format!(
                    "Entity index `{}` of `{}` is not empty and cannot be removed",
                    key, self.entity_type
                )))
            }
            None => {
                return Err(Error::internal(format!(
                    "Entity index `{}` of `{}` does not exist",
                    key, self.entity_type
                )))
            }
        }
        committed
            .remove(key)
            .ok_or_else(|| Error::internal("Entity index vanished while being removed"))
    }

    /// Discard the writes of `tx` and every staged index
    pub fn rollback(&self, tx: &mut LayerMaintainer, reason: impl Into<String>) {
        let discarded = std::mem::take(&mut *self.staged.lock()).len();
        debug!(
            entity_type = %self.entity_type,
            txn_id = tx.txn_id(),
            staged = discarded,
            "Rolling back entity indices"
        );
        tx.rollback(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::Scope;

    #[test]
    fn test_staged_index_publishes_on_commit() {
        let registry = EntityIndexRegistry::new("product");
        let key = EntityIndexKey::global(Scope::Live);
        let mut tx = LayerMaintainer::new(1);

        let index = registry.get_or_create(&key).unwrap();
        index.insert_primary_key_if_missing(&mut tx, 1).unwrap();
        assert!(registry.get(&key).is_none());
        assert!(Arc::ptr_eq(&index, &registry.get_or_create(&key).unwrap()));

        let outcome = registry.commit(&mut tx).unwrap();
        assert_eq!(outcome.published, vec![key.clone()]);
        assert_eq!(outcome.parts.len(), 1);
        let committed = registry.get(&key).unwrap();
        assert_eq!(committed.version(), 2);
        assert!(committed.is_primary_key_known(None, 1));
    }

    #[test]
    fn test_emptied_index_is_evicted() {
        let registry = EntityIndexRegistry::new("product");
        let key = EntityIndexKey::global(Scope::Live);
        let mut tx = LayerMaintainer::new(1);
        registry
            .get_or_create(&key)
            .unwrap()
            .insert_primary_key_if_missing(&mut tx, 1)
            .unwrap();
        registry.commit(&mut tx).unwrap();

        let mut tx = LayerMaintainer::new(2);
        registry
            .get(&key)
            .unwrap()
            .remove_primary_key(&mut tx, 1)
            .unwrap();
        let outcome = registry.commit(&mut tx).unwrap();
        assert_eq!(outcome.evicted, vec![key.clone()]);
        assert!(registry.get(&key).is_none());
    }

    #[test]
    fn test_remove_empty_rejects_populated_index() {
        let registry = EntityIndexRegistry::with_config(
            "product",
            IndexConfig {
                evict_empty_indexes: false,
                ..IndexConfig::default()
            },
        );
        let key = EntityIndexKey::global(Scope::Live);
        let mut tx = LayerMaintainer::new(1);
        registry
            .get_or_create(&key)
            .unwrap()
            .insert_primary_key_if_missing(&mut tx, 1)
            .unwrap();
        registry.commit(&mut tx).unwrap();
        assert!(matches!(
            registry.remove_empty(&key),
            Err(Error::InternalConsistency(_))
        ));

        let mut tx = LayerMaintainer::new(2);
        registry.get(&key).unwrap().remove_primary_key(&mut tx, 1).unwrap();
        let outcome = registry.commit(&mut tx).unwrap();
        assert!(outcome.evicted.is_empty());
        assert!(registry.remove_empty(&key).is_ok());
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_rollback_discards_staged_indices() {
        let registry = EntityIndexRegistry::new("product");
        let key = EntityIndexKey::referenced_entity_type(Scope::Live, "brand");
        let mut tx = LayerMaintainer::new(1);
        registry
            .get_or_create(&key)
            .unwrap()
            .insert_primary_key_for_reference(&mut tx, 4, 9)
            .unwrap();
        registry.rollback(&mut tx, "client abort");
        assert!(!tx.is_active());

        let mut tx = LayerMaintainer::new(2);
        let outcome = registry.commit(&mut tx).unwrap();
        assert!(outcome.published.is_empty());
        assert!(registry.get(&key).is_none());
    }

    #[test]
    fn test_prepared_generations_invisible_until_published() {
        let registry = EntityIndexRegistry::new("product");
        let key = EntityIndexKey::global(Scope::Live);
        let mut tx = LayerMaintainer::new(1);
        registry
            .get_or_create(&key)
            .unwrap()
            .insert_primary_key_if_missing(&mut tx, 3)
            .unwrap();

        let prepared = registry.prepare(&mut tx).unwrap();
        assert_eq!(prepared.outcome().published, vec![key.clone()]);
        assert!(tx.is_active());
        assert!(registry.get(&key).is_none());

        let err = registry.publish(&tx, prepared).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(registry.get(&key).is_none());
    }

    #[test]
    fn test_publish_rejects_foreign_transaction() {
        let registry = EntityIndexRegistry::new("product");
        let key = EntityIndexKey::global(Scope::Live);
        let mut tx = LayerMaintainer::new(1);
        registry
            .get_or_create(&key)
            .unwrap()
            .insert_primary_key_if_missing(&mut tx, 3)
            .unwrap();
        let prepared = registry.prepare(&mut tx).unwrap();

        let mut other = LayerMaintainer::new(2);
        other.finish().unwrap();
        assert!(registry.publish(&other, prepared).is_err());
        assert!(registry.get(&key).is_none());
    }
}
