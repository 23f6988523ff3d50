//! Price indices
//!
//! The global entity index owns every price record in a [`PriceSuperIndex`]
//! and assigns each an internal price id. Reduced indices hold a
//! [`PriceRefIndex`] that only references those records by internal id.

mod ref_index;
mod super_index;

pub use ref_index::PriceRefIndex;
pub use super_index::PriceSuperIndex;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Price list and currency a price belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceIndexKey {
    /// Price list name
    pub price_list: String,
    /// ISO currency code
    pub currency: String,
}

impl PriceIndexKey {
    /// Create a key
    pub fn new(price_list: impl Into<String>, currency: impl Into<String>) -> Self {
        PriceIndexKey {
            price_list: price_list.into(),
            currency: currency.into(),
        }
    }
}

impl fmt::Display for PriceIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.price_list, self.currency)
    }
}

/// Price as stored in the super index
///
/// Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Id assigned by the super index
    pub internal_price_id: u32,
    /// Id of the price within its entity
    pub price_id: u32,
    /// Entity owning the price
    pub entity_pk: u32,
    /// Price list and currency
    pub key: PriceIndexKey,
    /// Amount without tax
    pub price_without_tax: i64,
    /// Amount with tax
    pub price_with_tax: i64,
}

strata_index_concurrency::plain_transactional_value!(PriceRecord, PriceIndexKey);

/// Price submitted for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceEntry {
    /// Internal id to reuse (when re-indexing a known price)
    pub internal_price_id: Option<u32>,
    /// Id of the price within its entity
    pub price_id: u32,
    /// Entity owning the price
    pub entity_pk: u32,
    /// Price list and currency
    pub key: PriceIndexKey,
    /// Amount without tax
    pub price_without_tax: i64,
    /// Amount with tax
    pub price_with_tax: i64,
}

impl PriceEntry {
    /// Entry for a new price; the super index assigns the internal id
    pub fn new(
        entity_pk: u32,
        price_id: u32,
        key: PriceIndexKey,
        without_tax: i64,
        with_tax: i64,
    ) -> Self {
        PriceEntry {
            internal_price_id: None,
            price_id,
            entity_pk,
            key,
            price_without_tax: without_tax,
            price_with_tax: with_tax,
        }
    }

    /// Reuse a previously assigned internal id
    pub fn with_internal_id(mut self, internal_price_id: u32) -> Self {
        self.internal_price_id = Some(internal_price_id);
        self
    }
}
