//! Facet index: entities grouped by the entities they reference

use crate::formula::Formula;
use crate::storage::{FacetIndexPart, StoragePart};
use roaring::RoaringBitmap;
use std::collections::BTreeSet;
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBitmap, TransactionalBoolean, TransactionalLayerProducer,
    TransactionalMap,
};
use strata_index_core::{Error, ProducerId, Result};

/// Facets of a single reference: facet primary key → entity bitmap
#[derive(Debug, Clone)]
pub struct FacetReferenceIndex {
    id: ProducerId,
    reference_name: String,
    dirty: TransactionalBoolean,
    facets: TransactionalMap<u32, TransactionalBitmap>,
}

impl FacetReferenceIndex {
    fn new(reference_name: impl Into<String>) -> Self {
        Self::from_facets(reference_name, std::iter::empty())
    }

    /// Rebuild the facets of `reference_name` from persisted groups
    pub fn from_facets(
        reference_name: impl Into<String>,
        facets: impl IntoIterator<Item = (u32, RoaringBitmap)>,
    ) -> Self {
        FacetReferenceIndex {
            id: ProducerId::next(),
            reference_name: reference_name.into(),
            dirty: TransactionalBoolean::new(),
            facets: TransactionalMap::from_map(
                facets
                    .into_iter()
                    .filter(|(_, entities)| !entities.is_empty())
                    .map(|(facet, entities)| (facet, TransactionalBitmap::from_bitmap(entities)))
                    .collect(),
            ),
        }
    }

    /// Reference the facets come from
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut facets: Vec<_> = self
            .facets
            .iter(tx)
            .map(|(facet, entities)| (*facet, entities.to_vec(tx)))
            .collect();
        facets.sort_unstable_by_key(|(facet, _)| *facet);
        Some(StoragePart::Facet(FacetIndexPart {
            entity_index_pk,
            reference_name: self.reference_name.clone(),
            facets,
        }))
    }
}

impl TransactionalLayerProducer for FacetReferenceIndex {
    type Layer = ();

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) {}

    fn merge_committed(
        &self,
        _layer: Option<()>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        if !self.is_modified_in(maintainer) {
            return Ok(self.clone());
        }
        self.dirty.remove_layer(maintainer);
        Ok(FacetReferenceIndex {
            id: ProducerId::next(),
            reference_name: self.reference_name.clone(),
            dirty: TransactionalBoolean::new(),
            facets: maintainer.merge(&self.facets)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.facets.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.facets.is_modified_in(maintainer)
    }
}

strata_index_concurrency::producer_transactional_value!(FacetReferenceIndex);

/// Entities grouped by reference name and referenced (facet) primary key
#[derive(Debug, Clone)]
pub struct FacetIndex {
    id: ProducerId,
    references: TransactionalMap<String, FacetReferenceIndex>,
}

impl FacetIndex {
    /// Create an empty facet index
    pub fn new() -> Self {
        Self::from_references(Vec::new())
    }

    /// Rebuild a facet index from loaded per-reference indices
    pub fn from_references(references: Vec<FacetReferenceIndex>) -> Self {
        FacetIndex {
            id: ProducerId::next(),
            references: TransactionalMap::from_map(
                references
                    .into_iter()
                    .map(|it| (it.reference_name.clone(), it))
                    .collect(),
            ),
        }
    }

    /// Register `entity_pk` as referencing facet `facet_pk` through `reference_name`
    pub fn add_facet(
        &self,
        tx: &mut LayerMaintainer,
        reference_name: &str,
        facet_pk: u32,
        entity_pk: u32,
    ) -> Result<bool> {
        let reference_name = reference_name.to_string();
        let reference = self.references.compute_if_absent(tx, &reference_name, || {
            FacetReferenceIndex::new(reference_name.as_str())
        })?;
        let facet = reference
            .facets
            .compute_if_absent(tx, &facet_pk, TransactionalBitmap::new)?;
        let added = facet.add(tx, entity_pk)?;
        if added {
            reference.dirty.set_true(tx)?;
        }
        Ok(added)
    }

    /// Unregister `entity_pk` from facet `facet_pk`
    ///
    /// Emptied facets and references are dropped.
    pub fn remove_facet(
        &self,
        tx: &mut LayerMaintainer,
        reference_name: &str,
        facet_pk: u32,
        entity_pk: u32,
    ) -> Result<()> {
        let reference_name = reference_name.to_string();
        let not_indexed = || {
            Error::internal(format!(
                "Entity {} is not indexed under facet `{}: {}`",
                entity_pk, reference_name, facet_pk
            ))
        };
        let reference = self
            .references
            .get_for_update(tx, &reference_name)
            .ok_or_else(not_indexed)?;
        let facet = reference
            .facets
            .get_for_update(tx, &facet_pk)
            .ok_or_else(not_indexed)?;
        if !facet.remove(tx, entity_pk)? {
            return Err(not_indexed());
        }
        reference.dirty.set_true(tx)?;
        if facet.is_empty(Some(&*tx)) {
            reference.facets.remove(tx, &facet_pk)?;
            facet.remove_layer(tx);
        }
        if reference.facets.is_empty(Some(&*tx)) {
            self.references.remove(tx, &reference_name)?;
            reference.remove_layer(tx);
        }
        Ok(())
    }

    /// Entities referencing facet `facet_pk` through `reference_name`
    pub fn facet_records(
        &self,
        tx: Option<&LayerMaintainer>,
        reference_name: &str,
        facet_pk: u32,
    ) -> Formula {
        self.references
            .get(tx, &reference_name.to_string())
            .and_then(|reference| reference.facets.get(tx, &facet_pk))
            .map_or(Formula::Empty, |facet| Formula::constant(facet.snapshot(tx)))
    }

    /// Facet primary keys present for `reference_name`, ascending
    pub fn facets_of(&self, tx: Option<&LayerMaintainer>, reference_name: &str) -> Vec<u32> {
        let mut facets: Vec<u32> = self
            .references
            .get(tx, &reference_name.to_string())
            .map(|reference| reference.facets.keys(tx).copied().collect())
            .unwrap_or_default();
        facets.sort_unstable();
        facets
    }

    /// Reference names with at least one facet
    pub fn referenced_entities(&self, tx: Option<&LayerMaintainer>) -> BTreeSet<String> {
        self.references.keys(tx).cloned().collect()
    }

    /// Whether no facet is indexed
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.references.is_empty(tx)
    }

    pub(crate) fn get_modified_storage_parts(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
        sink: &mut Vec<StoragePart>,
    ) {
        for name in self.referenced_entities(tx) {
            if let Some(reference) = self.references.get(tx, &name) {
                sink.extend(reference.storage_part(tx, entity_index_pk));
            }
        }
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        for reference in self.references.values_for_update(tx) {
            reference.dirty.reset(tx)?;
        }
        Ok(())
    }
}

impl Default for FacetIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for FacetIndex {
    type Layer = ();

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) {}

    fn merge_committed(
        &self,
        _layer: Option<()>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        if !self.is_modified_in(maintainer) {
            return Ok(self.clone());
        }
        Ok(FacetIndex {
            id: ProducerId::next(),
            references: maintainer.merge(&self.references)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.references.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.references.is_modified_in(maintainer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query_facets() {
        let facets = FacetIndex::new();
        let mut tx = LayerMaintainer::new(1);
        assert!(facets.add_facet(&mut tx, "brand", 7, 100).unwrap());
        assert!(!facets.add_facet(&mut tx, "brand", 7, 100).unwrap());
        facets.add_facet(&mut tx, "brand", 7, 101).unwrap();
        facets.add_facet(&mut tx, "brand", 2, 101).unwrap();
        facets.add_facet(&mut tx, "category", 1, 100).unwrap();

        let records: Vec<u32> = facets
            .facet_records(Some(&tx), "brand", 7)
            .compute()
            .iter()
            .collect();
        assert_eq!(records, vec![100, 101]);
        assert_eq!(facets.facets_of(Some(&tx), "brand"), vec![2, 7]);
        assert_eq!(
            facets.referenced_entities(Some(&tx)).into_iter().collect::<Vec<_>>(),
            vec!["brand".to_string(), "category".to_string()]
        );
        assert!(facets.facet_records(None, "brand", 7).is_empty());
    }

    #[test]
    fn test_removing_last_facet_drops_reference() {
        let facets = FacetIndex::new();
        let mut tx = LayerMaintainer::new(1);
        facets.add_facet(&mut tx, "brand", 7, 100).unwrap();
        facets.remove_facet(&mut tx, "brand", 7, 100).unwrap();
        assert!(facets.is_empty(Some(&tx)));
        assert!(facets.remove_facet(&mut tx, "brand", 7, 100).is_err());

        let committed = tx.commit(&facets).unwrap();
        tx.finish().unwrap();
        assert!(committed.is_empty(None));
    }

    #[test]
    fn test_one_part_per_dirty_reference() {
        let facets = FacetIndex::new();
        let mut tx = LayerMaintainer::new(1);
        facets.add_facet(&mut tx, "brand", 7, 100).unwrap();
        facets.add_facet(&mut tx, "category", 3, 100).unwrap();
        let committed = tx.commit(&facets).unwrap();
        tx.finish().unwrap();

        let mut tx = LayerMaintainer::new(2);
        committed.add_facet(&mut tx, "category", 4, 100).unwrap();
        let mut parts = Vec::new();
        committed.get_modified_storage_parts(Some(&tx), 1, &mut parts);
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            StoragePart::Facet(part) => {
                assert_eq!(part.reference_name, "category");
                assert_eq!(part.facets, vec![(3, vec![100]), (4, vec![100])]);
            }
            other => panic!("unexpected part {:?}", other),
        }
    }
}
