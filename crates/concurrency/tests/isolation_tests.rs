//! Snapshot isolation tests for the transactional containers
//!
//! These tests exercise the containers the way the index engine does:
//!
//! 1. **Model equivalence** - random add/remove sequences match a `BTreeSet`
//! 2. **Reader isolation** - published generations never change under readers
//! 3. **Rollback** - discarded transactions leave no trace

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Barrier};
use std::thread;

use strata_index_concurrency::{
    LayerMaintainer, TransactionStatus, TransactionalBitmap, TransactionalLayerProducer,
    TransactionalMap,
};

#[derive(Debug, Clone)]
enum Op {
    Add(u32),
    Remove(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..64).prop_map(Op::Add),
        (0u32..64).prop_map(Op::Remove),
    ]
}

// ============================================================================
// Model equivalence
// ============================================================================

proptest! {
    #[test]
    fn bitmap_matches_set_model(
        initial in proptest::collection::btree_set(0u32..64, 0..16),
        ops in proptest::collection::vec(op_strategy(), 0..64),
    ) {
        let bitmap = TransactionalBitmap::from_bitmap(initial.iter().copied().collect());
        let mut model = initial.clone();
        let mut tx = LayerMaintainer::new(1);

        for op in ops {
            match op {
                Op::Add(id) => {
                    prop_assert_eq!(bitmap.add(&mut tx, id).unwrap(), model.insert(id));
                }
                Op::Remove(id) => {
                    prop_assert_eq!(bitmap.remove(&mut tx, id).unwrap(), model.remove(&id));
                }
            }
        }
        prop_assert_eq!(bitmap.len(Some(&tx)), model.len() as u64);

        let committed = tx.commit(&bitmap).unwrap();
        tx.finish().unwrap();
        prop_assert_eq!(committed.to_vec(None), model.into_iter().collect::<Vec<_>>());
        prop_assert_eq!(bitmap.to_vec(None), initial.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn map_matches_btreemap_model(
        ops in proptest::collection::vec((0u32..16, proptest::option::of(any::<i64>())), 0..48),
    ) {
        let map: TransactionalMap<u32, i64> = TransactionalMap::new();
        let mut model = BTreeMap::new();
        let mut tx = LayerMaintainer::new(1);

        for (key, value) in ops {
            match value {
                Some(value) => {
                    map.insert(&mut tx, key, value).unwrap();
                    model.insert(key, value);
                }
                None => {
                    prop_assert_eq!(map.remove(&mut tx, &key).unwrap(), model.remove(&key));
                }
            }
        }
        prop_assert_eq!(map.len(Some(&tx)), model.len());

        let committed = tx.commit(&map).unwrap();
        tx.finish().unwrap();
        let actual: BTreeMap<u32, i64> = committed.iter(None).map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(actual, model);
    }
}

// ============================================================================
// Reader isolation
// ============================================================================

#[test]
fn test_readers_keep_their_generation_across_commits() {
    let generation0 = TransactionalBitmap::from_bitmap((0..100).collect());
    let barrier = Arc::new(Barrier::new(5));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let view = generation0.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..1_000 {
                    assert_eq!(view.len(None), 100);
                    assert!(view.contains(None, 50));
                }
            })
        })
        .collect();

    barrier.wait();
    let mut current = generation0.clone();
    for txn_id in 0..50 {
        let mut tx = LayerMaintainer::new(txn_id);
        current.remove(&mut tx, 50).unwrap();
        current.add(&mut tx, 1_000 + txn_id as u32).unwrap();
        current = tx.commit(&current).unwrap();
        tx.finish().unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(!current.contains(None, 50));
    assert_eq!(generation0.len(None), 100);
}

#[test]
fn test_nested_map_commit_shares_untouched_buckets() {
    let mut outer: TransactionalMap<String, TransactionalMap<u32, TransactionalBitmap>> =
        TransactionalMap::new();
    let mut tx = LayerMaintainer::new(1);
    for name in ["brand", "category"] {
        let inner = outer
            .compute_if_absent(&mut tx, &name.to_string(), TransactionalMap::new)
            .unwrap();
        let bucket = inner
            .compute_if_absent(&mut tx, &1, TransactionalBitmap::new)
            .unwrap();
        bucket.add(&mut tx, 10).unwrap();
    }
    outer = tx.commit(&outer).unwrap();
    tx.finish().unwrap();

    let mut tx = LayerMaintainer::new(2);
    let brand = outer.get(None, &"brand".to_string()).cloned().unwrap();
    brand.get(None, &1).cloned().unwrap().add(&mut tx, 11).unwrap();
    let next = tx.commit(&outer).unwrap();
    tx.finish().unwrap();

    let old_category = outer.get(None, &"category".to_string()).unwrap();
    let new_category = next.get(None, &"category".to_string()).unwrap();
    assert_eq!(old_category.id(), new_category.id());

    let new_brand = next.get(None, &"brand".to_string()).unwrap();
    assert_eq!(new_brand.get(None, &1).unwrap().to_vec(None), vec![10, 11]);
    assert_eq!(brand.get(None, &1).unwrap().to_vec(None), vec![10]);
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn test_rollback_leaves_no_trace() {
    let ids = TransactionalBitmap::from_bitmap([1u32, 2].into_iter().collect());
    let mut tx = LayerMaintainer::new(9);
    ids.add(&mut tx, 3).unwrap();
    ids.remove(&mut tx, 1).unwrap();
    tx.rollback("caller aborted");

    assert!(matches!(tx.status(), TransactionStatus::Aborted { .. }));
    assert_eq!(tx.pending_layers(), 0);
    assert_eq!(ids.to_vec(None), vec![1, 2]);
    assert!(ids.add(&mut tx, 4).is_err());

    let expected: BTreeSet<u32> = [1, 2].into_iter().collect();
    assert_eq!(ids.to_vec(Some(&tx)), expected.into_iter().collect::<Vec<_>>());
}

#[test]
fn test_lenient_finish_drops_leftover_layers() {
    let _ = tracing_subscriber::fmt::try_init();
    let ids = TransactionalBitmap::new();
    let mut tx = LayerMaintainer::with_config(3, strata_index_core::IndexConfig::lenient());
    ids.add(&mut tx, 1).unwrap();

    tx.finish().unwrap();
    assert!(matches!(tx.status(), TransactionStatus::Committed));
    assert!(ids.is_empty(None));
}
