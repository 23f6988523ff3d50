//! Transactional single-value cell

use crate::maintainer::LayerMaintainer;
use crate::producer::{TransactionalLayerProducer, TransactionalValue};
use strata_index_core::{ProducerId, Result};

/// Layer of a [`TransactionalCell`]: the value written by the transaction
#[derive(Debug, Clone)]
pub struct CellChanges<T> {
    value: T,
}

/// Single value replaced as a whole within a transaction
#[derive(Debug, Clone)]
pub struct TransactionalCell<T> {
    id: ProducerId,
    value: T,
}

impl<T> TransactionalCell<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Create a cell holding `value`
    pub fn new(value: T) -> Self {
        TransactionalCell {
            id: ProducerId::next(),
            value,
        }
    }

    /// Value as seen by `tx`
    pub fn get(&self, tx: Option<&LayerMaintainer>) -> T {
        tx.and_then(|tx| tx.layer(self))
            .map_or_else(|| self.value.clone(), |layer| layer.value.clone())
    }

    /// Replace the value
    pub fn set(&self, tx: &mut LayerMaintainer, value: T) -> Result<()> {
        if self.get(Some(&*tx)) != value {
            tx.layer_mut(self)?.value = value;
        }
        Ok(())
    }
}

impl<T> TransactionalLayerProducer for TransactionalCell<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    type Layer = CellChanges<T>;

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) -> CellChanges<T> {
        CellChanges {
            value: self.value.clone(),
        }
    }

    fn merge_committed(
        &self,
        layer: Option<CellChanges<T>>,
        _maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        match layer {
            Some(changes) if changes.value != self.value => {
                Ok(TransactionalCell::new(changes.value))
            }
            _ => Ok(self.clone()),
        }
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        maintainer.remove_layer_if_exists(self.id);
    }
}

impl<T> TransactionalValue for TransactionalCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
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
