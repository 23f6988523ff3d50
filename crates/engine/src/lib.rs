//! Entity and catalog indices for the strata index engine
//!
//! This crate builds the index structures on top of the transactional
//! containers of `strata-index-concurrency`:
//! - [`EntityIndex`]: global, reduced and referenced type indices of an
//!   entity collection
//! - [`CatalogIndex`]: catalog-wide unique attribute enforcement
//! - Sub-indices: attributes, hierarchy, facets, prices and cardinalities
//! - [`EntityIndexRegistry`]: publication of committed generations
//!
//! Every index is a [`TransactionalLayerProducer`]. Writes go through a
//! [`LayerMaintainer`] and become visible as a new generation on commit;
//! earlier generations stay valid for the readers holding them.
//!
//! [`TransactionalLayerProducer`]: strata_index_concurrency::TransactionalLayerProducer
//! [`LayerMaintainer`]: strata_index_concurrency::LayerMaintainer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachment;
pub mod attribute;
pub mod cardinality;
pub mod catalog;
pub mod entity;
pub mod facet;
pub mod formula;
pub mod hierarchy;
pub mod index;
pub mod price;
pub mod registry;
pub mod storage;

pub use attachment::{CatalogAttachment, CatalogRef, CatalogState};
pub use attribute::{
    AttributeCardinalityIndex, AttributeIndex, AttributeIndexStorageKey, AttributeIndexType,
    EntityWithTypeTuple, FilterIndex, GlobalUniqueIndex, SortIndex, UniqueIndex,
};
pub use cardinality::ReferenceTypeCardinalityIndex;
pub use catalog::CatalogIndex;
pub use entity::{EntityIndex, EntityIndexHandle, EntityIndexKind};
pub use facet::{FacetIndex, FacetReferenceIndex};
pub use formula::Formula;
pub use hierarchy::HierarchyIndex;
pub use index::Index;
pub use price::{PriceEntry, PriceIndexKey, PriceRecord, PriceRefIndex, PriceSuperIndex};
pub use registry::{CommitOutcome, EntityIndexRegistry, PreparedCommit};
pub use storage::StoragePart;
