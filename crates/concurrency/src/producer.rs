//! Transactional layer producer contract
//!
//! Any structure that wants snapshot isolation implements
//! [`TransactionalLayerProducer`]. The structure itself is immutable once
//! published; a write transaction records deltas in a *layer* kept by the
//! [`LayerMaintainer`] under the producer's id. At commit the producer folds
//! its layer into a brand-new instance, leaving the old one untouched for
//! readers still holding it.
//!
//! Composite producers (indices embedding containers) never register a
//! layer of their own: their `merge_committed` merges every embedded
//! producer through the maintainer and assembles the new generation.

use crate::maintainer::LayerMaintainer;
use strata_index_core::{AttributeKey, AttributeValue, Locale, ProducerId, Result};

/// Structure that accumulates transactional deltas and merges them at commit
pub trait TransactionalLayerProducer: Sized {
    /// Delta collection recorded during a transaction
    type Layer: Send + 'static;

    /// Identity used to find the layer of this producer
    fn id(&self) -> ProducerId;

    /// Create a fresh, empty layer
    fn create_layer(&self) -> Self::Layer;

    /// Produce the post-commit instance without touching `self`
    ///
    /// `layer` is the delta this producer accumulated, absent when the
    /// producer itself was not written to. Embedded producers are merged
    /// through `maintainer`.
    fn merge_committed(
        &self,
        layer: Option<Self::Layer>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self>;

    /// Discard the layer of this producer and of everything it embeds
    fn remove_layer(&self, maintainer: &mut LayerMaintainer);

    /// Whether this producer or anything it embeds has a pending layer
    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        maintainer.has_layer(self.id())
    }
}

/// Value stored in a [`TransactionalMap`](crate::TransactionalMap)
///
/// Plain values are copied verbatim into the new generation; values that
/// are producers themselves are merged recursively through the maintainer.
pub trait TransactionalValue: Clone + Send + Sync + 'static {
    /// The value as it should appear in the committed generation
    fn merge_value(&self, maintainer: &mut LayerMaintainer) -> Result<Self>;

    /// Release any layer the value holds
    fn discard_value(&self, maintainer: &mut LayerMaintainer);

    /// Whether the value has pending changes
    fn is_value_modified(&self, maintainer: &LayerMaintainer) -> bool;
}

/// Implement [`TransactionalValue`] for types copied verbatim on commit
#[macro_export]
macro_rules! plain_transactional_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::TransactionalValue for $ty {
                fn merge_value(
                    &self,
                    _maintainer: &mut $crate::LayerMaintainer,
                ) -> ::strata_index_core::Result<Self> {
                    Ok(self.clone())
                }

                fn discard_value(&self, _maintainer: &mut $crate::LayerMaintainer) {}

                fn is_value_modified(&self, _maintainer: &$crate::LayerMaintainer) -> bool {
                    false
                }
            }
        )*
    };
}

/// Implement [`TransactionalValue`] for producers merged through the maintainer
#[macro_export]
macro_rules! producer_transactional_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::TransactionalValue for $ty {
                fn merge_value(
                    &self,
                    maintainer: &mut $crate::LayerMaintainer,
                ) -> ::strata_index_core::Result<Self> {
                    maintainer.merge(self)
                }

                fn discard_value(&self, maintainer: &mut $crate::LayerMaintainer) {
                    $crate::TransactionalLayerProducer::remove_layer(self, maintainer)
                }

                fn is_value_modified(&self, maintainer: &$crate::LayerMaintainer) -> bool {
                    $crate::TransactionalLayerProducer::is_modified_in(self, maintainer)
                }
            }
        )*
    };
}

plain_transactional_value!(
    bool,
    u32,
    u64,
    i32,
    i64,
    String,
    Option<u32>,
    Locale,
    AttributeKey,
    AttributeValue,
    Vec<AttributeValue>,
);
