//! Strata Index - Transactional in-memory entity indexing engine
//!
//! Strata Index keeps the indices of an entity catalog in memory and updates
//! them through copy-on-write transactions. Readers work on immutable
//! generations; a writer records its changes in per-transaction layers and
//! publishes a new generation on commit.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_index::{EntityIndexKey, EntityIndexRegistry, LayerMaintainer, Scope};
//!
//! let registry = EntityIndexRegistry::new("product");
//! let key = EntityIndexKey::global(Scope::Live);
//!
//! let mut tx = LayerMaintainer::new(1);
//! registry.get_or_create(&key)?.insert_primary_key_if_missing(&mut tx, 42)?;
//! let outcome = registry.commit(&mut tx)?;
//! // hand `outcome.parts` to the persistence layer
//! ```
//!
//! # Architecture
//!
//! - `strata-index-core`: keys, values, schema contract, errors, config
//! - `strata-index-concurrency`: layer maintainer and transactional containers
//! - `strata-index-engine`: entity, catalog and sub-indices, registry

pub use strata_index_concurrency::{
    LayerMaintainer, TransactionStatus, TransactionalBitmap, TransactionalBoolean,
    TransactionalCell, TransactionalLayerProducer, TransactionalMap,
};
pub use strata_index_core::*;
pub use strata_index_engine::*;
