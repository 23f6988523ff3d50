//! Reference aware primary key operations of referenced type indices

use super::{EntityIndex, EntityIndexKind};
use crate::cardinality::ReferenceTypeCardinalityIndex;
use roaring::RoaringBitmap;
use strata_index_concurrency::LayerMaintainer;
use strata_index_core::{Error, Result};

impl EntityIndex {
    fn reference_cardinalities(&self) -> Result<&ReferenceTypeCardinalityIndex> {
        match &self.kind {
            EntityIndexKind::ReferencedType { cardinality, .. } => Ok(cardinality),
            _ => Err(Error::internal(format!(
                "{} index `{}` does not track reference cardinalities",
                self.kind.name(),
                self.index_key
            ))),
        }
    }

    /// Count reduced index `index_pk` as referencing `referenced_pk`
    ///
    /// The index pk enters the primary keys when its count leaves zero.
    pub fn insert_primary_key_for_reference(
        &self,
        tx: &mut LayerMaintainer,
        index_pk: u32,
        referenced_pk: u32,
    ) -> Result<bool> {
        let cardinality = self.reference_cardinalities()?;
        if cardinality.add_record(tx, index_pk, referenced_pk)? {
            self.add_primary_key(tx, index_pk)
        } else {
            Ok(false)
        }
    }

    /// Uncount reduced index `index_pk` as referencing `referenced_pk`
    ///
    /// The index pk leaves the primary keys when its count drops to zero.
    pub fn remove_primary_key_for_reference(
        &self,
        tx: &mut LayerMaintainer,
        index_pk: u32,
        referenced_pk: u32,
    ) -> Result<bool> {
        let cardinality = self.reference_cardinalities()?;
        if cardinality.remove_record(tx, index_pk, referenced_pk)? {
            self.drop_primary_key(tx, index_pk)
        } else {
            Ok(false)
        }
    }

    /// Referenced entity pks behind a set of reduced index pks
    pub fn get_referenced_primary_keys_for_index_pks(
        &self,
        tx: Option<&LayerMaintainer>,
        index_pks: &RoaringBitmap,
    ) -> Result<RoaringBitmap> {
        Ok(self
            .reference_cardinalities()?
            .referenced_primary_keys_for_index_pks(tx, index_pks))
    }

    /// Number of references counted for reduced index `index_pk`
    pub fn reference_cardinality(&self, tx: Option<&LayerMaintainer>, index_pk: u32) -> u32 {
        self.reference_cardinalities()
            .map_or(0, |cardinality| cardinality.cardinality(tx, index_pk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::Scope;

    #[test]
    fn test_primary_key_follows_cardinality_transitions() {
        let index = EntityIndex::referenced_type(3, "product", Scope::Live, "brand");
        let mut tx = LayerMaintainer::new(1);

        assert!(index.insert_primary_key_for_reference(&mut tx, 20, 1).unwrap());
        assert!(!index.insert_primary_key_for_reference(&mut tx, 20, 2).unwrap());
        assert_eq!(index.reference_cardinality(Some(&tx), 20), 2);
        assert!(index.is_primary_key_known(Some(&tx), 20));

        let referenced = index
            .get_referenced_primary_keys_for_index_pks(Some(&tx), &[20u32].into_iter().collect())
            .unwrap();
        assert_eq!(referenced.iter().collect::<Vec<_>>(), vec![1, 2]);

        assert!(!index.remove_primary_key_for_reference(&mut tx, 20, 1).unwrap());
        assert!(index.remove_primary_key_for_reference(&mut tx, 20, 2).unwrap());
        assert!(!index.is_primary_key_known(Some(&tx), 20));
        assert!(index.is_empty(Some(&tx)));
    }

    #[test]
    fn test_single_argument_forms_fail_fast() {
        let index = EntityIndex::referenced_type(3, "product", Scope::Live, "brand");
        let mut tx = LayerMaintainer::new(1);
        assert!(matches!(
            index.insert_primary_key_if_missing(&mut tx, 1),
            Err(Error::InternalConsistency(_))
        ));
        assert!(matches!(
            index.remove_primary_key(&mut tx, 1),
            Err(Error::InternalConsistency(_))
        ));
        assert_eq!(tx.pending_layers(), 0);
    }

    #[test]
    fn test_reference_operations_need_referenced_type() {
        let index = EntityIndex::global(1, "product", Scope::Live);
        let mut tx = LayerMaintainer::new(1);
        assert!(index.insert_primary_key_for_reference(&mut tx, 1, 1).is_err());
        assert_eq!(index.reference_cardinality(None, 1), 0);
    }
}
