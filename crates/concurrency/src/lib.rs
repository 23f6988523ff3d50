//! Transactional layer machinery for the index engine
//!
//! This crate implements copy-on-write snapshot isolation with:
//! - [`TransactionalLayerProducer`]: contract for structures that record
//!   per-transaction deltas and merge them into a new generation
//! - [`LayerMaintainer`]: the per-transaction registry of those deltas
//! - Containers: [`TransactionalBitmap`], [`TransactionalMap`],
//!   [`TransactionalBoolean`], [`TransactionalCell`]
//!
//! A committed structure is never mutated. Readers that hold it keep seeing
//! the same data no matter how many transactions commit afterwards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod containers;
pub mod maintainer;
pub mod producer;

pub use containers::{
    BitmapChanges, BooleanChanges, CellChanges, MapChanges, TransactionalBitmap,
    TransactionalBoolean, TransactionalCell, TransactionalMap,
};
pub use maintainer::{LayerMaintainer, TransactionStatus};
pub use producer::{TransactionalLayerProducer, TransactionalValue};
