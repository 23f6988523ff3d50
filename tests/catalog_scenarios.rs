//! End-to-end scenarios through the public facade
//!
//! One product catalog with a global index, a reduced index per brand and
//! the referenced type index over those reduced indices, plus catalog-wide
//! unique URLs shared with categories.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_index::{
    AttributeSchema, AttributeValue, CatalogIndex, EntityIndexHandle, EntityIndexKey,
    EntityIndexRegistry, EntitySchema, Error, GlobalAttributeUniquenessType, LayerMaintainer,
    Locale, PriceEntry, PriceIndexKey, ReferenceIndexType, ReferenceKey, ReferenceSchema, Scope,
};

fn product_schema() -> EntitySchema {
    EntitySchema::new("product")
        .with_locale(Locale::new("en"))
        .with_attribute(AttributeSchema::new("color").filterable())
        .with_reference(ReferenceSchema::new(
            "brand",
            "brand",
            ReferenceIndexType::ForFilteringAndPartitioning,
        ))
}

#[test]
fn test_product_with_brand_is_indexed_in_all_indices() {
    let schema = product_schema();
    let registry = EntityIndexRegistry::new("product");
    let global_key = EntityIndexKey::global(Scope::Live);
    let brand_key = EntityIndexKey::referenced_entity(Scope::Live, ReferenceKey::new("brand", 7));
    let type_key = EntityIndexKey::referenced_entity_type(Scope::Live, "brand");
    let color = schema.attribute("color").cloned().unwrap();
    let mut tx = LayerMaintainer::new(1);

    let global = registry.get_or_create(&global_key).unwrap();
    let brand = registry.get_or_create(&brand_key).unwrap();
    let brands = registry.get_or_create(&type_key).unwrap();

    for index in [&global, &brand] {
        index.insert_primary_key_if_missing(&mut tx, 100).unwrap();
        index
            .insert_filter_attribute(
                &mut tx,
                &schema,
                &color,
                None,
                &AttributeValue::text("red"),
                100,
            )
            .unwrap();
    }
    brands
        .insert_primary_key_for_reference(&mut tx, brand.primary_key(), 7)
        .unwrap();
    let price_id = global
        .add_price(&mut tx, PriceEntry::new(100, 1, PriceIndexKey::new("basic", "EUR"), 90, 109))
        .unwrap();
    brand.add_price_ref(&mut tx, &schema, &global, price_id).unwrap();

    let outcome = registry.commit(&mut tx).unwrap();
    assert_eq!(outcome.published.len(), 3);
    assert!(outcome.evicted.is_empty());
    assert!(outcome.parts.iter().any(|part| part.kind() == "prices"));
    assert!(outcome.parts.iter().any(|part| part.kind() == "price_refs"));
    assert!(outcome
        .parts
        .iter()
        .any(|part| part.kind() == "reference_cardinality"));

    let brands = registry.get(&type_key).unwrap();
    let brand = registry.get(&brand_key).unwrap();
    let referenced = brands
        .get_referenced_primary_keys_for_index_pks(
            None,
            &[brand.primary_key()].into_iter().collect(),
        )
        .unwrap();
    assert_eq!(referenced.iter().collect::<Vec<_>>(), vec![7]);
    assert_eq!(brand.get_referenced_internal_price_ids(None), vec![price_id]);
}

#[test]
fn test_urls_are_unique_across_collections() {
    let catalog = CatalogIndex::new(Scope::Live);
    let url = AttributeSchema::new("url")
        .unique_globally(GlobalAttributeUniquenessType::UniqueWithinCatalog);
    let locales = BTreeSet::new();
    let home = AttributeValue::text("/home");
    let mut tx = LayerMaintainer::new(1);

    catalog
        .insert_unique_attribute(&mut tx, &product_schema(), &url, &locales, None, &home, 1)
        .unwrap();
    let err = catalog
        .insert_unique_attribute(
            &mut tx,
            &EntitySchema::new("category"),
            &url,
            &locales,
            None,
            &home,
            1,
        )
        .unwrap_err();
    match err {
        Error::UniqueValueViolation {
            existing_entity_type,
            new_entity_type,
            ..
        } => {
            assert_eq!(existing_entity_type, "product");
            assert_eq!(new_entity_type, "category");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_handles_distinguish_loaded_and_placeholder_indices() {
    let registry = EntityIndexRegistry::new("product");
    let key = EntityIndexKey::global(Scope::Live);
    let mut tx = LayerMaintainer::new(1);
    registry
        .get_or_create(&key)
        .unwrap()
        .insert_primary_key_if_missing(&mut tx, 3)
        .unwrap();
    registry.commit(&mut tx).unwrap();

    let loaded = EntityIndexHandle::from(registry.get(&key).unwrap());
    let placeholder = EntityIndexHandle::PlaceholderGlobal {
        entity_type: "brand".to_string(),
        key: key.clone(),
        superset: Arc::new([3u32].into_iter().collect()),
    };
    assert_eq!(
        loaded.get_all_primary_keys().unwrap(),
        placeholder.get_all_primary_keys().unwrap()
    );
    assert!(loaded.loaded().is_ok());
    assert!(matches!(
        placeholder.loaded(),
        Err(Error::EntityNotManaged { .. })
    ));
}
