//! Entity index lifecycle tests
//!
//! Covers the behaviour an indexing pipeline relies on:
//!
//! 1. **Primary keys and locales** - registration and the superset invariant
//! 2. **Generations** - readers keep their generation, versions follow dirt
//! 3. **Unique attributes** - round trips free values for other records
//! 4. **Shared transactions** - one transaction over several registries and
//!    the catalog index
//! 5. **Rollback** - committed generations stay untouched

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_index_concurrency::{LayerMaintainer, TransactionStatus};
use strata_index_core::{
    AttributeKey, AttributeSchema, AttributeUniquenessType, AttributeValue, EntityIndexKey,
    EntitySchema, Error, GlobalAttributeUniquenessType, Locale, Scope,
};
use strata_index_engine::{CatalogIndex, EntityIndex, EntityIndexRegistry, Index, StoragePart};

fn product_schema() -> EntitySchema {
    EntitySchema::new("product")
        .with_locale(Locale::new("en-US"))
        .with_locale(Locale::new("cs-CZ"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn code() -> AttributeSchema {
    AttributeSchema::new("code").unique(AttributeUniquenessType::UniqueWithinCollection)
}

// ============================================================================
// Primary keys and locales
// ============================================================================

#[test]
fn test_product_scenario_ends_empty() {
    let index = EntityIndex::global(1, "product", Scope::Live);
    let mut tx = LayerMaintainer::new(1);
    let en = Locale::new("en-US");

    assert!(index.insert_primary_key_if_missing(&mut tx, 42).unwrap());
    assert!(index
        .upsert_language(&mut tx, &en, 42, &product_schema())
        .unwrap());
    assert_eq!(
        index.get_all_primary_keys(Some(&tx)).iter().collect::<Vec<_>>(),
        vec![42]
    );
    assert!(index.remove_primary_key(&mut tx, 42).unwrap());
    assert!(index.is_empty(Some(&tx)));
}

#[test]
fn test_locale_bitmaps_stay_within_primary_keys() {
    let index = EntityIndex::global(1, "product", Scope::Live);
    let schema = product_schema();
    let mut tx = LayerMaintainer::new(1);

    for pk in 1..=10 {
        index.insert_primary_key_if_missing(&mut tx, pk).unwrap();
        let locale = if pk % 2 == 0 { "en-US" } else { "cs-CZ" };
        index
            .upsert_language(&mut tx, &Locale::new(locale), pk, &schema)
            .unwrap();
    }
    assert!(index
        .upsert_language(&mut tx, &Locale::new("en-US"), 11, &schema)
        .is_err());

    let committed = tx.commit(&index).unwrap();
    tx.finish().unwrap();
    let all = committed.get_all_primary_keys(None);
    for locale in committed.languages(None) {
        let records = committed.get_records_with_language_formula(None, &locale).compute();
        assert!(records.is_subset(&all), "locale {} escaped", locale);
    }
}

// ============================================================================
// Generations
// ============================================================================

#[test]
fn test_reader_keeps_its_generation() {
    init_tracing();
    let registry = EntityIndexRegistry::new("product");
    let key = EntityIndexKey::global(Scope::Live);

    let mut tx = LayerMaintainer::new(1);
    registry
        .get_or_create(&key)
        .unwrap()
        .insert_primary_key_if_missing(&mut tx, 1)
        .unwrap();
    registry.commit(&mut tx).unwrap();

    let reader = registry.get(&key).unwrap();
    let reader_keys = reader.get_all_primary_keys(None);

    let mut tx = LayerMaintainer::new(2);
    let writer = registry.get(&key).unwrap();
    writer.insert_primary_key_if_missing(&mut tx, 2).unwrap();
    writer.remove_primary_key(&mut tx, 1).unwrap();
    registry.commit(&mut tx).unwrap();

    assert_eq!(reader.get_all_primary_keys(None).iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(reader_keys.iter().collect::<Vec<_>>(), vec![1]);
    let latest = registry.get(&key).unwrap();
    assert_eq!(latest.get_all_primary_keys(None).iter().collect::<Vec<_>>(), vec![2]);
    assert_eq!(latest.version(), reader.version() + 1);
    assert!(!Arc::ptr_eq(&latest, &reader));
}

#[test]
fn test_parts_are_flushed_once() {
    let index = EntityIndex::global(1, "product", Scope::Live);
    let schema = product_schema();
    let mut tx = LayerMaintainer::new(1);
    index.insert_primary_key_if_missing(&mut tx, 1).unwrap();
    index
        .insert_unique_attribute(&mut tx, &schema, &code(), None, &AttributeValue::text("A"), 1)
        .unwrap();

    let mut parts = Vec::new();
    index.get_modified_storage_parts(Some(&tx), &mut parts);
    let kinds: Vec<_> = parts.iter().map(StoragePart::kind).collect();
    assert_eq!(kinds, vec!["entity_index", "unique_index"]);
    for part in &parts {
        let bytes = part.to_bytes().unwrap();
        assert_eq!(&StoragePart::from_bytes(&bytes).unwrap(), part);
    }

    index.reset_dirty(&mut tx).unwrap();
    let mut after_flush = Vec::new();
    index.get_modified_storage_parts(Some(&tx), &mut after_flush);
    let kinds: Vec<_> = after_flush.iter().map(StoragePart::kind).collect();
    // the header still differs from the captured attribute keys
    assert_eq!(kinds, vec!["entity_index"]);

    let committed = tx.commit(&index).unwrap();
    tx.finish().unwrap();
    assert_eq!(committed.version(), 1);
}

// ============================================================================
// Unique attributes
// ============================================================================

#[test]
fn test_unique_round_trip_frees_value() {
    let index = EntityIndex::global(1, "product", Scope::Live);
    let schema = product_schema();
    let value = AttributeValue::text("A-1");
    let mut tx = LayerMaintainer::new(1);

    index
        .insert_unique_attribute(&mut tx, &schema, &code(), None, &value, 1)
        .unwrap();
    let err = index
        .insert_unique_attribute(&mut tx, &schema, &code(), None, &value, 2)
        .unwrap_err();
    assert!(matches!(err, Error::UniqueValueViolation { .. }));

    index
        .remove_unique_attribute(&mut tx, &schema, &code(), None, &value, 1)
        .unwrap();
    assert!(index
        .attribute_index()
        .get_unique_index(Some(&tx), &AttributeKey::new("code"))
        .is_none());
    index
        .insert_unique_attribute(&mut tx, &schema, &code(), None, &value, 2)
        .unwrap();
}

// ============================================================================
// Shared transactions
// ============================================================================

fn url() -> AttributeSchema {
    AttributeSchema::new("url").unique_globally(GlobalAttributeUniquenessType::UniqueWithinCatalog)
}

#[test]
fn test_one_transaction_spans_two_registries_and_catalog() {
    init_tracing();
    let products = EntityIndexRegistry::new("product");
    let brands = EntityIndexRegistry::new("brand");
    let catalog = CatalogIndex::new(Scope::Live);
    let product_schema = product_schema();
    let brand_schema = EntitySchema::new("brand");
    let key = EntityIndexKey::global(Scope::Live);
    let no_locales = BTreeSet::new();
    let product_url = AttributeValue::text("/product/1");
    let brand_url = AttributeValue::text("/brand/9");
    let mut tx = LayerMaintainer::new(1);

    let product = products.get_or_create(&key).unwrap();
    product.insert_primary_key_if_missing(&mut tx, 1).unwrap();
    product
        .insert_unique_attribute(
            &mut tx,
            &product_schema,
            &code(),
            None,
            &AttributeValue::text("P-1"),
            1,
        )
        .unwrap();
    catalog
        .insert_unique_attribute(
            &mut tx,
            &product_schema,
            &url(),
            &no_locales,
            None,
            &product_url,
            1,
        )
        .unwrap();
    let brand = brands.get_or_create(&key).unwrap();
    brand.insert_primary_key_if_missing(&mut tx, 9).unwrap();
    catalog
        .insert_unique_attribute(&mut tx, &brand_schema, &url(), &no_locales, None, &brand_url, 9)
        .unwrap();

    let prepared_products = products.prepare(&mut tx).unwrap();
    let prepared_brands = brands.prepare(&mut tx).unwrap();
    let next_catalog = tx.commit(&catalog).unwrap();
    assert_eq!(tx.pending_layers(), 0);
    tx.finish().unwrap();
    assert_eq!(tx.status(), &TransactionStatus::Committed);

    let products_outcome = products.publish(&tx, prepared_products).unwrap();
    let brands_outcome = brands.publish(&tx, prepared_brands).unwrap();
    assert_eq!(products_outcome.published, vec![key.clone()]);
    assert_eq!(brands_outcome.published, vec![key.clone()]);

    let product = products.get(&key).unwrap();
    assert!(product.is_primary_key_known(None, 1));
    assert!(product
        .attribute_index()
        .get_unique_index(None, &AttributeKey::new("code"))
        .is_some());
    assert!(brands.get(&key).unwrap().is_primary_key_known(None, 9));

    let owner = next_catalog
        .get_entity_reference_by_unique_value(None, "url", None, &brand_url)
        .unwrap();
    assert_eq!((owner.entity_type.as_str(), owner.record_id), ("brand", 9));
    let owner = next_catalog
        .get_entity_reference_by_unique_value(None, "url", None, &product_url)
        .unwrap();
    assert_eq!((owner.entity_type.as_str(), owner.record_id), ("product", 1));
    assert!(catalog.is_empty(None));
}

#[test]
fn test_untouched_registry_prepares_nothing() {
    let products = EntityIndexRegistry::new("product");
    let brands = EntityIndexRegistry::new("brand");
    let key = EntityIndexKey::global(Scope::Live);

    let mut tx = LayerMaintainer::new(1);
    products
        .get_or_create(&key)
        .unwrap()
        .insert_primary_key_if_missing(&mut tx, 1)
        .unwrap();
    brands
        .get_or_create(&key)
        .unwrap()
        .insert_primary_key_if_missing(&mut tx, 2)
        .unwrap();
    let prepared_products = products.prepare(&mut tx).unwrap();
    let prepared_brands = brands.prepare(&mut tx).unwrap();
    tx.finish().unwrap();
    products.publish(&tx, prepared_products).unwrap();
    brands.publish(&tx, prepared_brands).unwrap();
    let brand_generation = brands.get(&key).unwrap();

    let mut tx = LayerMaintainer::new(2);
    products
        .get(&key)
        .unwrap()
        .insert_primary_key_if_missing(&mut tx, 3)
        .unwrap();
    let prepared_products = products.prepare(&mut tx).unwrap();
    let prepared_brands = brands.prepare(&mut tx).unwrap();
    assert!(prepared_brands.outcome().published.is_empty());
    tx.finish().unwrap();
    products.publish(&tx, prepared_products).unwrap();
    brands.publish(&tx, prepared_brands).unwrap();

    assert!(Arc::ptr_eq(&brand_generation, &brands.get(&key).unwrap()));
    assert!(products.get(&key).unwrap().is_primary_key_known(None, 3));
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn test_rollback_leaves_generation_unchanged() {
    init_tracing();
    let registry = EntityIndexRegistry::new("product");
    let key = EntityIndexKey::global(Scope::Live);
    let mut tx = LayerMaintainer::new(1);
    registry
        .get_or_create(&key)
        .unwrap()
        .insert_primary_key_if_missing(&mut tx, 5)
        .unwrap();
    registry.commit(&mut tx).unwrap();
    let before = registry.get(&key).unwrap();

    let mut tx = LayerMaintainer::new(2);
    before.remove_primary_key(&mut tx, 5).unwrap();
    before.add_node(&mut tx, 1, None).unwrap();
    registry.rollback(&mut tx, "abandoned");
    assert_eq!(tx.pending_layers(), 0);

    let after = registry.get(&key).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(after.is_primary_key_known(None, 5));
    assert!(after.hierarchy_index().is_empty(None));
}
