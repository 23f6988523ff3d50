//! Transactional boolean used as a dirty marker

use crate::maintainer::LayerMaintainer;
use crate::producer::TransactionalLayerProducer;
use strata_index_core::{ProducerId, Result};

/// Layer of a [`TransactionalBoolean`]: the value the transaction set
#[derive(Debug, Clone, Copy)]
pub struct BooleanChanges {
    value: bool,
}

/// Boolean flag with transactional set/reset
#[derive(Debug, Clone)]
pub struct TransactionalBoolean {
    id: ProducerId,
    value: bool,
}

impl TransactionalBoolean {
    /// Create a flag set to `false`
    pub fn new() -> Self {
        Self::with_value(false)
    }

    /// Create a flag with an initial value
    pub fn with_value(value: bool) -> Self {
        TransactionalBoolean {
            id: ProducerId::next(),
            value,
        }
    }

    /// Value as seen by `tx` (or the committed value without a transaction)
    pub fn is_true(&self, tx: Option<&LayerMaintainer>) -> bool {
        tx.and_then(|tx| tx.layer(self))
            .map_or(self.value, |layer| layer.value)
    }

    /// Set the flag to `true`
    pub fn set_true(&self, tx: &mut LayerMaintainer) -> Result<()> {
        if !self.is_true(Some(&*tx)) {
            tx.layer_mut(self)?.value = true;
        }
        Ok(())
    }

    /// Set the flag back to `false` once its holder has flushed
    pub fn reset(&self, tx: &mut LayerMaintainer) -> Result<()> {
        if self.is_true(Some(&*tx)) {
            tx.layer_mut(self)?.value = false;
        }
        Ok(())
    }
}

impl Default for TransactionalBoolean {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for TransactionalBoolean {
    type Layer = BooleanChanges;

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) -> BooleanChanges {
        BooleanChanges { value: self.value }
    }

    fn merge_committed(
        &self,
        layer: Option<BooleanChanges>,
        _maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        match layer {
            Some(changes) if changes.value != self.value => {
                Ok(TransactionalBoolean::with_value(changes.value))
            }
            _ => Ok(self.clone()),
        }
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        maintainer.remove_layer_if_exists(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_true_visible_only_inside_transaction() {
        let flag = TransactionalBoolean::new();
        let mut tx = LayerMaintainer::new(1);
        flag.set_true(&mut tx).unwrap();

        assert!(flag.is_true(Some(&tx)));
        assert!(!flag.is_true(None));

        let committed = tx.commit(&flag).unwrap();
        assert!(committed.is_true(None));
        assert!(!flag.is_true(None));
    }

    #[test]
    fn test_reset_after_set() {
        let flag = TransactionalBoolean::with_value(true);
        let mut tx = LayerMaintainer::new(1);
        flag.reset(&mut tx).unwrap();
        assert!(!flag.is_true(Some(&tx)));

        let committed = tx.commit(&flag).unwrap();
        assert!(!committed.is_true(None));
    }

    #[test]
    fn test_no_op_does_not_create_layer() {
        let flag = TransactionalBoolean::new();
        let mut tx = LayerMaintainer::new(1);
        flag.reset(&mut tx).unwrap();
        assert_eq!(tx.pending_layers(), 0);

        let committed = tx.commit(&flag).unwrap();
        assert_eq!(committed.id(), flag.id());
    }
}
