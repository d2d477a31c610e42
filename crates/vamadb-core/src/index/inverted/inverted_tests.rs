use std::ops::Bound;

use roaring::RoaringTreemap;

use super::{
    InvertedArrayChange, InvertedArrayIndex, InvertedChange, InvertedIndex, InvertedState,
};
use crate::storage::{Bucket, Store};

fn with_state(f: impl FnOnce(&InvertedState, &Bucket)) {
    let store = Store::memory();
    store
        .write(|bm| {
            let bucket = bm.get("index/integer/prop")?;
            let state = InvertedState::new();
            f(&state, &bucket);
            Ok(())
        })
        .unwrap();
}

fn insert<T: super::SortableValue>(index: &InvertedIndex<'_, T>, id: u64, value: T) {
    index
        .update(InvertedChange {
            id,
            previous: None,
            current: Some(value),
        })
        .unwrap();
}

fn ids(set: &RoaringTreemap) -> Vec<u64> {
    set.iter().collect()
}

/// Spec scenario: integers `{0↦1, 1↦1, 2↦2, 3↦2, 4↦2, 5↦3, 6↦4, 7↦4, 8↦4}`.
fn seeded_integers<'a>(state: &'a InvertedState, bucket: &Bucket) -> InvertedIndex<'a, i64> {
    let index: InvertedIndex<'_, i64> = InvertedIndex::new(state, bucket.clone(), true);
    for (id, value) in [
        (0u64, 1i64),
        (1, 1),
        (2, 2),
        (3, 2),
        (4, 2),
        (5, 3),
        (6, 4),
        (7, 4),
        (8, 4),
    ] {
        insert(&index, id, value);
    }
    index
}

#[test]
fn test_integer_range_operators() {
    with_state(|state, bucket| {
        let index = seeded_integers(state, bucket);

        let greater = index.range(Bound::Excluded(2), Bound::Unbounded).unwrap();
        assert_eq!(ids(&greater), vec![5, 6, 7, 8]);

        let in_range = index.range(Bound::Included(1), Bound::Included(3)).unwrap();
        assert_eq!(ids(&in_range), vec![0, 1, 2, 3, 4, 5]);

        let not_two = index.not_equals(2).unwrap();
        assert_eq!(ids(&not_two), vec![0, 1, 5, 6, 7, 8]);

        let less_or_equal = index.range(Bound::Unbounded, Bound::Included(2)).unwrap();
        assert_eq!(ids(&less_or_equal), vec![0, 1, 2, 3, 4]);
    });
}

#[test]
fn test_range_operators_after_flush() {
    with_state(|state, bucket| {
        let index = seeded_integers(state, bucket);
        index.flush().unwrap();

        // A fresh state answers from the bucket alone.
        let fresh = InvertedState::new();
        let index: InvertedIndex<'_, i64> = InvertedIndex::new(&fresh, bucket.clone(), true);
        let greater = index.range(Bound::Excluded(2), Bound::Unbounded).unwrap();
        assert_eq!(ids(&greater), vec![5, 6, 7, 8]);
    });
}

#[test]
fn test_negative_integers_in_ranges() {
    with_state(|state, bucket| {
        let index: InvertedIndex<'_, i64> = InvertedIndex::new(state, bucket.clone(), true);
        for (id, value) in [(0u64, -10i64), (1, -1), (2, 0), (3, 7)] {
            insert(&index, id, value);
        }
        let below_zero = index.range(Bound::Unbounded, Bound::Excluded(0)).unwrap();
        assert_eq!(ids(&below_zero), vec![0, 1]);
        let from_minus_one = index.range(Bound::Included(-1), Bound::Unbounded).unwrap();
        assert_eq!(ids(&from_minus_one), vec![1, 2, 3]);
    });
}

#[test]
fn test_update_moves_id_between_sets() {
    with_state(|state, bucket| {
        let index: InvertedIndex<'_, i64> = InvertedIndex::new(state, bucket.clone(), true);
        insert(&index, 9, 5);
        index
            .update(InvertedChange {
                id: 9,
                previous: Some(5),
                current: Some(6),
            })
            .unwrap();
        assert!(index.equals(5).unwrap().is_empty());
        assert_eq!(ids(&index.equals(6).unwrap()), vec![9]);
    });
}

#[test]
fn test_delete_then_flush_removes_empty_set_key() {
    with_state(|state, bucket| {
        let index: InvertedIndex<'_, i64> = InvertedIndex::new(state, bucket.clone(), true);
        insert(&index, 9, 5);
        index.flush().unwrap();
        let key = super::SortableValue::to_sortable(&5i64);
        assert!(bucket.get(&key).unwrap().is_some());

        index
            .update(InvertedChange {
                id: 9,
                previous: Some(5),
                current: None,
            })
            .unwrap();
        index.flush().unwrap();
        assert!(bucket.get(&key).unwrap().is_none());
    });
}

#[test]
fn test_string_starts_with_and_case_folding() {
    with_state(|state, bucket| {
        let index: InvertedIndex<'_, String> = InvertedIndex::new(state, bucket.clone(), false);
        insert(&index, 1, "Apple".to_string());
        insert(&index, 2, "apricot".to_string());
        insert(&index, 3, "Banana".to_string());

        // Case-insensitive: both the stored values and the query fold.
        let matches = index.starts_with("AP".to_string()).unwrap();
        assert_eq!(ids(&matches), vec![1, 2]);

        let equals = index.equals("APPLE".to_string()).unwrap();
        assert_eq!(ids(&equals), vec![1]);
    });
}

#[test]
fn test_string_case_sensitive_distinguishes() {
    with_state(|state, bucket| {
        let index: InvertedIndex<'_, String> = InvertedIndex::new(state, bucket.clone(), true);
        insert(&index, 1, "Apple".to_string());
        insert(&index, 2, "apple".to_string());
        assert_eq!(ids(&index.equals("Apple".to_string()).unwrap()), vec![1]);
        assert_eq!(ids(&index.equals("apple".to_string()).unwrap()), vec![2]);
    });
}

#[test]
fn test_array_symmetric_difference() {
    with_state(|state, bucket| {
        let index: InvertedArrayIndex<'_, String> =
            InvertedArrayIndex::new(state, bucket.clone(), true);
        index
            .update(InvertedArrayChange {
                id: 1,
                previous: Vec::new(),
                current: vec!["red".to_string(), "green".to_string()],
            })
            .unwrap();
        index
            .update(InvertedArrayChange {
                id: 2,
                previous: Vec::new(),
                current: vec!["green".to_string(), "blue".to_string()],
            })
            .unwrap();

        assert_eq!(
            ids(&index.contains_any(vec!["red".into(), "blue".into()]).unwrap()),
            vec![1, 2]
        );
        assert_eq!(
            ids(&index.contains_all(vec!["green".into(), "blue".into()]).unwrap()),
            vec![2]
        );

        // Update: id 1 drops "red", keeps "green", gains "blue".
        index
            .update(InvertedArrayChange {
                id: 1,
                previous: vec!["red".to_string(), "green".to_string()],
                current: vec!["green".to_string(), "blue".to_string()],
            })
            .unwrap();
        assert!(index.contains_any(vec!["red".into()]).unwrap().is_empty());
        assert_eq!(
            ids(&index.contains_all(vec!["green".into(), "blue".into()]).unwrap()),
            vec![1, 2]
        );
    });
}

#[test]
fn test_float_range_scan() {
    with_state(|state, bucket| {
        let index: InvertedIndex<'_, f64> = InvertedIndex::new(state, bucket.clone(), true);
        for (id, value) in [(0u64, -1.5f64), (1, 0.0), (2, 0.25), (3, 3.5)] {
            insert(&index, id, value);
        }
        let positive = index.range(Bound::Excluded(0.0), Bound::Unbounded).unwrap();
        assert_eq!(ids(&positive), vec![2, 3]);
        let upto_quarter = index
            .range(Bound::Unbounded, Bound::Included(0.25))
            .unwrap();
        assert_eq!(ids(&upto_quarter), vec![0, 1, 2]);
    });
}
