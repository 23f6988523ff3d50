//! Transaction-scoped layer registry
//!
//! A [`LayerMaintainer`] belongs to exactly one write transaction. It maps
//! producer identity to the layer that producer accumulated, creating the
//! layer on the first write and handing it back on every later one.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. commit(root) for every root producer touched by the transaction
//!    - the root merges embedded producers first (leaves before composites)
//!    - every merge consumes the producer's layer
//! 2. finish() - verifies no layer was left behind, marks Committed
//! ```
//!
//! Rollback discards every layer without merging; nothing becomes visible.
//!
//! Maps holding producer values are marked *touched* when a value is handed
//! out for writing, so checking whether a map changed never scans its values.

use crate::producer::TransactionalLayerProducer;
use rustc_hash::{FxHashMap, FxHashSet};
use std::any::Any;
use strata_index_core::{Error, IndexConfig, ProducerId, Result};

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Committed` (all layers merged)
/// - `Active` → `Aborted` (rollback or failed commit)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is accepting writes
    Active,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// Registry of the layers written by one transaction
pub struct LayerMaintainer {
    txn_id: u64,
    status: TransactionStatus,
    config: IndexConfig,
    layers: FxHashMap<ProducerId, Box<dyn Any + Send>>,
    touched: FxHashSet<ProducerId>,
}

impl LayerMaintainer {
    /// Create a maintainer for a new transaction with default configuration
    pub fn new(txn_id: u64) -> Self {
        Self::with_config(txn_id, IndexConfig::default())
    }

    /// Create a maintainer for a new transaction
    pub fn with_config(txn_id: u64, config: IndexConfig) -> Self {
        LayerMaintainer {
            txn_id,
            status: TransactionStatus::Active,
            config,
            layers: FxHashMap::default(),
            touched: FxHashSet::default(),
        }
    }

    /// Transaction id
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Whether the transaction still accepts writes
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Fail unless the transaction is active
    pub fn ensure_active(&self) -> Result<()> {
        match &self.status {
            TransactionStatus::Active => Ok(()),
            other => Err(Error::InvalidState(format!(
                "transaction {} is {:?}, expected Active",
                self.txn_id, other
            ))),
        }
    }

    /// Number of layers not yet merged or removed
    pub fn pending_layers(&self) -> usize {
        self.layers.len()
    }

    /// Whether a layer is registered for the producer id
    pub fn has_layer(&self, id: ProducerId) -> bool {
        self.layers.contains_key(&id)
    }

    /// Record that a value embedded in producer `id` was handed out for writing
    pub fn mark_touched(&mut self, id: ProducerId) {
        self.touched.insert(id);
    }

    /// Whether producer `id` was marked by [`mark_touched`](Self::mark_touched)
    pub fn is_touched(&self, id: ProducerId) -> bool {
        self.touched.contains(&id)
    }

    /// Forget the touched mark of producer `id`
    pub fn clear_touched(&mut self, id: ProducerId) {
        self.touched.remove(&id);
    }

    /// Layer of `producer`, if it was written to in this transaction
    pub fn layer<P: TransactionalLayerProducer>(&self, producer: &P) -> Option<&P::Layer> {
        self.layers
            .get(&producer.id())
            .and_then(|layer| layer.downcast_ref::<P::Layer>())
    }

    /// Layer of `producer`, created on first use
    pub fn layer_mut<P: TransactionalLayerProducer>(
        &mut self,
        producer: &P,
    ) -> Result<&mut P::Layer> {
        self.ensure_active()?;
        let id = producer.id();
        self.layers
            .entry(id)
            .or_insert_with(|| Box::new(producer.create_layer()))
            .downcast_mut::<P::Layer>()
            .ok_or_else(|| {
                Error::internal(format!(
                    "layer registered for producer {} has an unexpected type",
                    id
                ))
            })
    }

    /// Remove and return the layer of `producer`
    pub fn take_layer<P: TransactionalLayerProducer>(
        &mut self,
        producer: &P,
    ) -> Result<Option<P::Layer>> {
        let id = producer.id();
        match self.layers.remove(&id) {
            None => Ok(None),
            Some(layer) => layer
                .downcast::<P::Layer>()
                .map(|layer| Some(*layer))
                .map_err(|_| {
                    Error::internal(format!(
                        "layer registered for producer {} has an unexpected type",
                        id
                    ))
                }),
        }
    }

    /// Discard the layer registered for `id`, returning whether one existed
    pub fn remove_layer_if_exists(&mut self, id: ProducerId) -> bool {
        self.layers.remove(&id).is_some()
    }

    /// Merge `producer` with its layer into a new instance
    ///
    /// Used by composites to merge the producers they embed.
    pub fn merge<P: TransactionalLayerProducer>(&mut self, producer: &P) -> Result<P> {
        let layer = self.take_layer(producer)?;
        let merged = producer.merge_committed(layer, self)?;
        self.touched.remove(&producer.id());
        Ok(merged)
    }

    /// Merge a root producer touched by this transaction
    pub fn commit<P: TransactionalLayerProducer>(&mut self, root: &P) -> Result<P> {
        self.ensure_active()?;
        self.merge(root)
    }

    /// Complete the commit once all roots are merged
    ///
    /// A layer still registered at this point belongs to a producer that was
    /// detached without releasing its layer.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.touched.clear();
        if !self.layers.is_empty() {
            let leftover = self.layers.len();
            self.layers.clear();
            if self.config.strict_layer_cleanup {
                self.status = TransactionStatus::Aborted {
                    reason: format!("{} unmerged layer(s)", leftover),
                };
                return Err(Error::internal(format!(
                    "transaction {} left {} unmerged layer(s) behind",
                    self.txn_id, leftover
                )));
            }
            tracing::warn!(
                txn_id = self.txn_id,
                leftover,
                "Dropping unmerged transactional layers"
            );
        }
        self.status = TransactionStatus::Committed;
        tracing::debug!(txn_id = self.txn_id, "Transaction committed");
        Ok(())
    }

    /// Discard all layers; nothing written by the transaction becomes visible
    pub fn rollback(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(
            txn_id = self.txn_id,
            discarded = self.layers.len(),
            reason = %reason,
            "Transaction rolled back"
        );
        self.layers.clear();
        self.touched.clear();
        self.status = TransactionStatus::Aborted { reason };
    }
}

impl std::fmt::Debug for LayerMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerMaintainer")
            .field("txn_id", &self.txn_id)
            .field("status", &self.status)
            .field("pending_layers", &self.layers.len())
            .field("touched", &self.touched.len())
            .finish()
    }
}
