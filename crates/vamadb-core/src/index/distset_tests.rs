use super::distset::{DistFn, DistSet, DistSetElem};

/// Distance closure over a fixed table: distance of id `n` is `table[n]`.
fn table_dist(table: &[f32]) -> DistFn<'_> {
    Box::new(move |id| Ok(table[usize::try_from(id).unwrap()]))
}

#[test]
fn test_add_skips_duplicates() {
    let table = [0.0, 3.0, 1.0, 2.0];
    let mut set = DistSet::new(10, table_dist(&table), Some(100));
    set.add(&[1, 2, 1, 3, 2]).unwrap();
    assert_eq!(set.len(), 3);
}

#[test]
fn test_add_with_limit_keeps_closest_sorted() {
    let table = [0.0, 5.0, 1.0, 4.0, 2.0, 3.0];
    let mut set = DistSet::new(3, table_dist(&table), Some(100));
    set.add_with_limit(&[1, 2, 3, 4, 5]).unwrap();

    let distances: Vec<f32> = set.items().iter().map(|e| e.distance).collect();
    assert_eq!(distances, vec![1.0, 2.0, 3.0]);

    // A far element is rejected outright.
    set.add_with_limit(&[1]).unwrap(); // already seen, also ignored
    assert_eq!(set.len(), 3);
}

#[test]
fn test_equal_distances_keep_insertion_order() {
    let table = [0.0, 1.0, 1.0, 1.0];
    let mut set = DistSet::new(10, table_dist(&table), Some(100));
    set.add_with_limit(&[1, 2, 3]).unwrap();
    let ids: Vec<u64> = set.items().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_sort_merges_unsorted_tail() {
    let table = [0.0, 4.0, 2.0, 3.0, 1.0];
    let mut set = DistSet::new(10, table_dist(&table), Some(100));
    set.add(&[1, 2]).unwrap();
    set.sort();
    set.add(&[3, 4]).unwrap();
    set.sort();
    let distances: Vec<f32> = set.items().iter().map(|e| e.distance).collect();
    assert_eq!(distances, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_first_unvisited_scans_window() {
    let table = [0.0, 1.0, 2.0, 3.0];
    let mut set = DistSet::new(10, table_dist(&table), Some(100));
    set.add_with_limit(&[1, 2, 3]).unwrap();

    let idx = set.first_unvisited(2).unwrap();
    assert_eq!(idx, 0);
    let elem = set.mark_visited(idx);
    assert_eq!(elem.id, 1);
    assert!(elem.visited);

    assert_eq!(set.first_unvisited(2), Some(1));
    set.mark_visited(1);
    // Only the window's first two positions are considered.
    assert_eq!(set.first_unvisited(2), None);
    assert_eq!(set.first_unvisited(3), Some(2));
}

#[test]
fn test_hash_fallback_beyond_largest_class() {
    let mut set = DistSet::new(4, Box::new(|id| Ok(id as f32)), Some(50_000_000));
    set.add_with_limit(&[40_000_000, 45_000_000]).unwrap();
    assert_eq!(set.len(), 2);
}

#[test]
fn test_bitmap_grows_past_hint() {
    // Hint selects the smallest class; an id beyond it must still be
    // deduplicated, not panic.
    let mut set = DistSet::new(4, Box::new(|id| Ok(id as f32)), Some(1_000));
    set.add(&[500_000, 500_000]).unwrap();
    assert_eq!(set.len(), 1);
}

#[test]
fn test_without_distances_collects_elems() {
    let mut set = DistSet::without_distances(10);
    set.add_already_unique(DistSetElem::new(5, 2.0));
    set.add_already_unique(DistSetElem::new(6, 1.0));
    set.sort();
    let ids: Vec<u64> = set.items().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![6, 5]);
    set.release();
}

#[test]
fn test_add_elem_with_limit_evicts_worst() {
    let mut set = DistSet::without_distances(2);
    set.add_elem_with_limit(DistSetElem::new(1, 3.0));
    set.add_elem_with_limit(DistSetElem::new(2, 1.0));
    set.add_elem_with_limit(DistSetElem::new(3, 2.0));
    let ids: Vec<u64> = set.items().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![2, 3]);
}
