//! Price operations of entity indices

use super::{EntityIndex, EntityIndexKind};
use crate::formula::Formula;
use crate::price::{PriceEntry, PriceIndexKey, PriceRecord};
use std::collections::BTreeSet;
use strata_index_concurrency::LayerMaintainer;
use strata_index_core::{EntitySchema, Error, Result};

impl EntityIndex {
    fn unsupported_prices(&self, operation: &str) -> Error {
        Error::internal(format!(
            "{} index `{}` does not support `{}`",
            self.kind.name(),
            self.index_key,
            operation
        ))
    }

    /// Store a price in the global index, returning its internal id
    pub fn add_price(&self, tx: &mut LayerMaintainer, entry: PriceEntry) -> Result<u32> {
        match &self.kind {
            EntityIndexKind::Global { prices } => prices.add_price(tx, entry),
            _ => Err(self.unsupported_prices("add_price")),
        }
    }

    /// Remove a price from the global index
    pub fn remove_price(
        &self,
        tx: &mut LayerMaintainer,
        internal_price_id: u32,
    ) -> Result<PriceRecord> {
        match &self.kind {
            EntityIndexKind::Global { prices } => prices.remove_price(tx, internal_price_id),
            _ => Err(self.unsupported_prices("remove_price")),
        }
    }

    /// Reference a price of `global` from a reduced index
    ///
    /// Only reduced indices of partitioning references hold prices.
    pub fn add_price_ref(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        global: &EntityIndex,
        internal_price_id: u32,
    ) -> Result<bool> {
        let EntityIndexKind::Reduced { prices } = &self.kind else {
            return Err(self.unsupported_prices("add_price_ref"));
        };
        self.assert_price_partitioning(schema)?;
        let EntityIndexKind::Global { prices: super_index } = &global.kind else {
            return Err(Error::internal(format!(
                "Prices can only be referenced from a global index, not `{}`",
                global.index_key
            )));
        };
        prices.add_price_ref(tx, super_index, internal_price_id)
    }

    /// Drop a price reference from a reduced index
    pub fn remove_price_ref(
        &self,
        tx: &mut LayerMaintainer,
        schema: &EntitySchema,
        internal_price_id: u32,
    ) -> Result<()> {
        let EntityIndexKind::Reduced { prices } = &self.kind else {
            return Err(self.unsupported_prices("remove_price_ref"));
        };
        self.assert_price_partitioning(schema)?;
        prices.remove_price_ref(tx, internal_price_id)
    }

    fn assert_price_partitioning(&self, schema: &EntitySchema) -> Result<()> {
        let Some(reference_name) = self.index_key.reference_name() else {
            return Ok(());
        };
        if schema.reference_or_err(reference_name)?.is_partitioning() {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "Reduced index `{}` of non-partitioning reference `{}` cannot hold prices",
                self.index_key, reference_name
            )))
        }
    }

    /// Stored price record for an internal id
    pub fn get_price_record(
        &self,
        tx: Option<&LayerMaintainer>,
        internal_price_id: u32,
    ) -> Option<PriceRecord> {
        match &self.kind {
            EntityIndexKind::Global { prices } => prices.get_price_record(tx, internal_price_id),
            _ => None,
        }
    }

    /// Internal ids of the prices stored under `key`
    pub fn get_prices_formula(&self, tx: Option<&LayerMaintainer>, key: &PriceIndexKey) -> Formula {
        match &self.kind {
            EntityIndexKind::Global { prices } => prices.prices_for_key(tx, key),
            _ => Formula::Empty,
        }
    }

    /// Internal ids referenced by a reduced index
    pub fn get_referenced_internal_price_ids(&self, tx: Option<&LayerMaintainer>) -> Vec<u32> {
        match &self.kind {
            EntityIndexKind::Reduced { prices } => prices.internal_price_ids(tx),
            _ => Vec::new(),
        }
    }

    /// Distinct price list and currency combinations
    pub fn get_price_index_keys(&self, tx: Option<&LayerMaintainer>) -> BTreeSet<PriceIndexKey> {
        self.kind.price_index_keys(tx)
    }

    /// Last internal price id handed out by the global index
    pub fn get_internal_price_id_sequence(&self, tx: Option<&LayerMaintainer>) -> Option<u32> {
        self.kind.internal_price_id_sequence(tx)
    }
}
