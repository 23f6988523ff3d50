//! Core types for the Strata indexing engine
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy
//! - ProducerId / sequence: Globally unique instance identifiers
//! - Scope, Locale, AttributeValue: Value types
//! - CatalogIndexKey, EntityIndexKey, ReferenceKey, RepresentativeReferenceKey,
//!   AttributeKey: Index key model
//! - EntitySchema and friends: Read-only schema contracts
//! - IndexConfig: Engine tunables

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod keys;
pub mod schema;
pub mod sequence;
pub mod types;

pub use config::IndexConfig;
pub use error::{ensure, Error, Result};
pub use keys::{
    AttributeKey, CatalogIndexKey, EntityIndexKey, EntityIndexType, IndexDiscriminator,
    ReferenceKey, RepresentativeReferenceKey,
};
pub use schema::{
    AttributeSchema, AttributeUniquenessType, EntitySchema, EvolutionMode,
    GlobalAttributeUniquenessType, ReferenceIndexType, ReferenceSchema,
    SortableAttributeCompoundSchema,
};
pub use sequence::ProducerId;
pub use types::{AttributeValue, Locale, Scope};
