//! Storage parts
//!
//! Every index hands the persistence layer a list of [`StoragePart`]s
//! describing what changed since the last flush. Parts are plain data;
//! encoding uses MessagePack.

use crate::attribute::{AttributeIndexStorageKey, EntityWithTypeTuple};
use crate::price::{PriceIndexKey, PriceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strata_index_core::{
    AttributeKey, AttributeValue, CatalogIndexKey, EntityIndexKey, Error, Locale, Result,
};

/// Header of an entity index: everything except sub-index contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityIndexPart {
    /// Stable primary key of the index
    pub primary_key: u32,
    /// Version the part describes
    pub version: u64,
    /// Key of the index
    pub index_key: EntityIndexKey,
    /// Indexed entity primary keys
    pub entity_ids: Vec<u32>,
    /// Entity primary keys per locale
    pub entity_ids_by_locale: BTreeMap<Locale, Vec<u32>>,
    /// Attribute sub-indices present
    pub attribute_index_keys: BTreeSet<AttributeIndexStorageKey>,
    /// Last internal price id assigned (global indices only)
    pub internal_price_id_sequence: Option<u32>,
    /// Price list / currency combinations present
    pub price_index_keys: BTreeSet<PriceIndexKey>,
    /// Whether a hierarchy index part exists
    pub has_hierarchy: bool,
    /// Reference names a facet index part exists for
    pub facet_referenced_entities: BTreeSet<String>,
}

/// Contents of a unique index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Attribute covered
    pub attribute: AttributeKey,
    /// Value to record, ordered by value
    pub entries: Vec<(AttributeValue, u32)>,
}

/// Contents of a filter index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Attribute covered
    pub attribute: AttributeKey,
    /// Value to ascending record ids, ordered by value
    pub buckets: Vec<(AttributeValue, Vec<u32>)>,
}

/// Contents of a sort index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Attribute or compound covered
    pub attribute: AttributeKey,
    /// Whether the values are compound tuples
    pub compound: bool,
    /// Values in sort order
    pub entries: Vec<(AttributeValue, u32)>,
}

/// Contents of an attribute cardinality index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCardinalityPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Attribute covered
    pub attribute: AttributeKey,
    /// `(value, record, count)` triples
    pub counts: Vec<(AttributeValue, u32, u32)>,
}

/// Contents of a catalog-wide unique index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalUniqueIndexPart {
    /// Owning catalog index
    pub catalog_key: CatalogIndexKey,
    /// Attribute covered
    pub attribute: AttributeKey,
    /// Value to owning entity, ordered by value
    pub entries: Vec<(AttributeValue, EntityWithTypeTuple)>,
}

/// Contents of a hierarchy index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Node and its parent, ordered by node
    pub nodes: Vec<(u32, Option<u32>)>,
}

/// Contents of the facet index of one reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Reference the facets come from
    pub reference_name: String,
    /// Facet primary key to entity primary keys
    pub facets: Vec<(u32, Vec<u32>)>,
}

/// Price records owned by a global index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSuperIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Records ordered by internal price id
    pub records: Vec<PriceRecord>,
}

/// Price references of a reduced index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRefIndexPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// Referenced internal price ids, ascending
    pub internal_price_ids: Vec<u32>,
}

/// Counts of a referenced entity type index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCardinalityPart {
    /// Owning entity index
    pub entity_index_pk: u32,
    /// `(index pk, referenced pk, count)` triples
    pub pairs: Vec<(u32, u32, u32)>,
}

/// Header of a catalog index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndexPart {
    /// Key of the index
    pub key: CatalogIndexKey,
    /// Version the part describes
    pub version: u64,
    /// Attributes a global unique index part exists for
    pub unique_attribute_keys: BTreeSet<AttributeKey>,
}

/// Unit of persistence emitted by indices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoragePart {
    /// Entity index header
    EntityIndex(EntityIndexPart),
    /// Unique index
    UniqueIndex(UniqueIndexPart),
    /// Filter index
    FilterIndex(FilterIndexPart),
    /// Sort index
    SortIndex(SortIndexPart),
    /// Attribute cardinality index
    AttributeCardinality(AttributeCardinalityPart),
    /// Hierarchy index
    Hierarchy(HierarchyIndexPart),
    /// Facet index of one reference
    Facet(FacetIndexPart),
    /// Price records
    Prices(PriceSuperIndexPart),
    /// Price references
    PriceRefs(PriceRefIndexPart),
    /// Reference cardinalities
    ReferenceCardinality(ReferenceCardinalityPart),
    /// Catalog index header
    CatalogIndex(CatalogIndexPart),
    /// Global unique index
    GlobalUniqueIndex(GlobalUniqueIndexPart),
}

impl StoragePart {
    /// Short name of the part kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StoragePart::EntityIndex(_) => "entity_index",
            StoragePart::UniqueIndex(_) => "unique_index",
            StoragePart::FilterIndex(_) => "filter_index",
            StoragePart::SortIndex(_) => "sort_index",
            StoragePart::AttributeCardinality(_) => "attribute_cardinality",
            StoragePart::Hierarchy(_) => "hierarchy",
            StoragePart::Facet(_) => "facet",
            StoragePart::Prices(_) => "prices",
            StoragePart::PriceRefs(_) => "price_refs",
            StoragePart::ReferenceCardinality(_) => "reference_cardinality",
            StoragePart::CatalogIndex(_) => "catalog_index",
            StoragePart::GlobalUniqueIndex(_) => "global_unique_index",
        }
    }

    /// Primary key of the entity index the part belongs to
    ///
    /// `None` for catalog level parts.
    pub fn entity_index_pk(&self) -> Option<u32> {
        match self {
            StoragePart::EntityIndex(part) => Some(part.primary_key),
            StoragePart::UniqueIndex(part) => Some(part.entity_index_pk),
            StoragePart::FilterIndex(part) => Some(part.entity_index_pk),
            StoragePart::SortIndex(part) => Some(part.entity_index_pk),
            StoragePart::AttributeCardinality(part) => Some(part.entity_index_pk),
            StoragePart::Hierarchy(part) => Some(part.entity_index_pk),
            StoragePart::Facet(part) => Some(part.entity_index_pk),
            StoragePart::Prices(part) => Some(part.entity_index_pk),
            StoragePart::PriceRefs(part) => Some(part.entity_index_pk),
            StoragePart::ReferenceCardinality(part) => Some(part.entity_index_pk),
            StoragePart::CatalogIndex(_) | StoragePart::GlobalUniqueIndex(_) => None,
        }
    }

    /// Encode as MessagePack
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode from MessagePack
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index_core::Scope;

    #[test]
    fn test_entity_index_part_survives_encoding() {
        let part = StoragePart::EntityIndex(EntityIndexPart {
            primary_key: 3,
            version: 2,
            index_key: EntityIndexKey::referenced_entity_type(Scope::Archived, "brand"),
            entity_ids: vec![1, 5],
            entity_ids_by_locale: [(Locale::new("en-US"), vec![5])].into_iter().collect(),
            attribute_index_keys: BTreeSet::new(),
            internal_price_id_sequence: None,
            price_index_keys: BTreeSet::new(),
            has_hierarchy: false,
            facet_referenced_entities: ["brand".to_string()].into_iter().collect(),
        });
        let bytes = part.to_bytes().unwrap();
        assert_eq!(StoragePart::from_bytes(&bytes).unwrap(), part);
        assert_eq!(part.kind(), "entity_index");
        assert_eq!(part.entity_index_pk(), Some(3));
    }

    #[test]
    fn test_garbage_fails_with_serialization_error() {
        let err = StoragePart::from_bytes(&[0xc1, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
