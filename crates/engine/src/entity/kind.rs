//! Variant-specific state of an entity index

use crate::attribute::AttributeCardinalityIndex;
use crate::cardinality::ReferenceTypeCardinalityIndex;
use crate::price::{PriceIndexKey, PriceRefIndex, PriceSuperIndex};
use crate::storage::StoragePart;
use std::collections::BTreeSet;
use strata_index_concurrency::{LayerMaintainer, TransactionalLayerProducer, TransactionalMap};
use strata_index_core::{AttributeKey, Result};

/// What distinguishes the three entity index flavours
#[derive(Debug, Clone)]
pub enum EntityIndexKind {
    /// Full index of an entity collection; owns the price records
    Global {
        /// Price records
        prices: PriceSuperIndex,
    },
    /// Partial index of the entities related through a reference or a
    /// hierarchy node; prices are referenced from the global index
    Reduced {
        /// References to prices of the global index
        prices: PriceRefIndex,
    },
    /// Aggregate over the reduced indices of one reference; lists reduced
    /// index primary keys instead of entity primary keys
    ReferencedType {
        /// Occurrences of reduced index pks per referenced entity
        cardinality: ReferenceTypeCardinalityIndex,
        /// Contribution counts of filterable reference attributes
        attribute_cardinalities: TransactionalMap<AttributeKey, AttributeCardinalityIndex>,
    },
}

impl EntityIndexKind {
    /// Empty global state
    pub fn global() -> Self {
        EntityIndexKind::Global {
            prices: PriceSuperIndex::new(),
        }
    }

    /// Empty reduced state
    pub fn reduced() -> Self {
        EntityIndexKind::Reduced {
            prices: PriceRefIndex::new(),
        }
    }

    /// Empty referenced entity type state
    pub fn referenced_type() -> Self {
        EntityIndexKind::ReferencedType {
            cardinality: ReferenceTypeCardinalityIndex::new(),
            attribute_cardinalities: TransactionalMap::new(),
        }
    }

    /// Short name used in logs and messages
    pub fn name(&self) -> &'static str {
        match self {
            EntityIndexKind::Global { .. } => "global",
            EntityIndexKind::Reduced { .. } => "reduced",
            EntityIndexKind::ReferencedType { .. } => "referenced type",
        }
    }

    pub(crate) fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        match self {
            EntityIndexKind::Global { prices } => prices.is_empty(tx),
            EntityIndexKind::Reduced { prices } => prices.is_empty(tx),
            EntityIndexKind::ReferencedType {
                cardinality,
                attribute_cardinalities,
            } => cardinality.is_empty(tx) && attribute_cardinalities.is_empty(tx),
        }
    }

    pub(crate) fn price_index_keys(&self, tx: Option<&LayerMaintainer>) -> BTreeSet<PriceIndexKey> {
        match self {
            EntityIndexKind::Global { prices } => prices.price_index_keys(tx),
            EntityIndexKind::Reduced { prices } => prices.price_index_keys(tx),
            EntityIndexKind::ReferencedType { .. } => BTreeSet::new(),
        }
    }

    pub(crate) fn internal_price_id_sequence(&self, tx: Option<&LayerMaintainer>) -> Option<u32> {
        match self {
            EntityIndexKind::Global { prices } => prices.last_assigned_internal_price_id(tx),
            _ => None,
        }
    }

    pub(crate) fn get_modified_storage_parts(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
        sink: &mut Vec<StoragePart>,
    ) {
        match self {
            EntityIndexKind::Global { prices } => {
                sink.extend(prices.storage_part(tx, entity_index_pk))
            }
            EntityIndexKind::Reduced { prices } => {
                sink.extend(prices.storage_part(tx, entity_index_pk))
            }
            EntityIndexKind::ReferencedType {
                cardinality,
                attribute_cardinalities,
            } => {
                sink.extend(cardinality.storage_part(tx, entity_index_pk));
                let mut indices: Vec<_> = attribute_cardinalities.iter(tx).collect();
                indices.sort_by(|a, b| a.0.cmp(b.0));
                for (_, index) in indices {
                    sink.extend(index.storage_part(tx, entity_index_pk));
                }
            }
        }
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        match self {
            EntityIndexKind::Global { prices } => prices.reset_dirty(tx),
            EntityIndexKind::Reduced { prices } => prices.reset_dirty(tx),
            EntityIndexKind::ReferencedType {
                cardinality,
                attribute_cardinalities,
            } => {
                cardinality.reset_dirty(tx)?;
                for index in attribute_cardinalities.values_for_update(tx) {
                    index.reset_dirty(tx)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn merge(&self, maintainer: &mut LayerMaintainer) -> Result<Self> {
        Ok(match self {
            EntityIndexKind::Global { prices } => EntityIndexKind::Global {
                prices: maintainer.merge(prices)?,
            },
            EntityIndexKind::Reduced { prices } => EntityIndexKind::Reduced {
                prices: maintainer.merge(prices)?,
            },
            EntityIndexKind::ReferencedType {
                cardinality,
                attribute_cardinalities,
            } => EntityIndexKind::ReferencedType {
                cardinality: maintainer.merge(cardinality)?,
                attribute_cardinalities: maintainer.merge(attribute_cardinalities)?,
            },
        })
    }

    pub(crate) fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        match self {
            EntityIndexKind::Global { prices } => prices.remove_layer(maintainer),
            EntityIndexKind::Reduced { prices } => prices.remove_layer(maintainer),
            EntityIndexKind::ReferencedType {
                cardinality,
                attribute_cardinalities,
            } => {
                cardinality.remove_layer(maintainer);
                attribute_cardinalities.remove_layer(maintainer);
            }
        }
    }

    pub(crate) fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        match self {
            EntityIndexKind::Global { prices } => prices.is_modified_in(maintainer),
            EntityIndexKind::Reduced { prices } => prices.is_modified_in(maintainer),
            EntityIndexKind::ReferencedType {
                cardinality,
                attribute_cardinalities,
            } => {
                cardinality.is_modified_in(maintainer)
                    || attribute_cardinalities.is_modified_in(maintainer)
            }
        }
    }
}
