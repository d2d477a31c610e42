use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringTreemap;
use rustc_hash::FxHashSet;

use super::{VamanaIndex, VamanaState, START_NODE_ID};
use crate::cancel::CancelToken;
use crate::distance::DistanceMetric;
use crate::schema::VamanaParams;
use crate::storage::{Bucket, Store};

fn params() -> VamanaParams {
    VamanaParams {
        vector_size: 2,
        distance_metric: DistanceMetric::Euclidean,
        search_size: 75,
        degree_bound: 64,
        alpha: 1.2,
        quantizer: None,
    }
}

fn with_index(f: impl FnOnce(&VamanaIndex<'_>)) {
    let store = Store::memory();
    store
        .write(|bm| {
            let bucket = bm.get("index/vectorVamana/v")?;
            let state = VamanaState::open(&params(), &bucket)?;
            let index = VamanaIndex::new(&state, bucket, params(), CancelToken::new());
            f(&index);
            Ok(())
        })
        .unwrap();
}

fn random_points(count: usize, first_id: u64, seed: u64) -> Vec<(u64, Vec<f32>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            (
                first_id + i as u64,
                vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)],
            )
        })
        .collect()
}

fn all_edges(index: &VamanaIndex<'_>) -> Vec<(u64, Vec<u64>)> {
    let mut nodes = Vec::new();
    index
        .state
        .nodes
        .for_each(&index.bucket, |id, edges| {
            nodes.push((id, edges.to_vec()));
            Ok(true)
        })
        .unwrap();
    nodes
}

fn assert_reachable(index: &VamanaIndex<'_>) {
    let nodes = all_edges(index);
    let adjacency: std::collections::HashMap<u64, Vec<u64>> = nodes.iter().cloned().collect();
    let mut seen = FxHashSet::default();
    let mut frontier = vec![START_NODE_ID];
    seen.insert(START_NODE_ID);
    while let Some(id) = frontier.pop() {
        for &edge in adjacency.get(&id).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(edge) {
                frontier.push(edge);
            }
        }
    }
    for (id, _) in &nodes {
        assert!(seen.contains(id), "node {id} unreachable from start node");
    }
}

#[test]
fn test_insert_creates_start_node() {
    with_index(|index| {
        index.insert(vec![(2, vec![0.5, 0.5])]).unwrap();
        assert!(index
            .state
            .nodes
            .get(START_NODE_ID, &index.bucket)
            .unwrap()
            .is_some());
        let start_vec = index
            .state
            .vectors
            .get_required(START_NODE_ID, &index.bucket)
            .unwrap();
        let crate::vectorstore::VectorData::Plain(v) = &start_vec.data else {
            panic!("start vector must be raw floats");
        };
        let norm: f32 = v.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    });
}

#[test]
fn test_reserved_ids_rejected() {
    with_index(|index| {
        assert!(index.insert(vec![(0, vec![0.0, 0.0])]).is_err());
        assert!(index.insert(vec![(1, vec![0.0, 0.0])]).is_err());
        let mut del = RoaringTreemap::new();
        del.insert(START_NODE_ID);
        assert!(index.delete(&del).is_err());
    });
}

#[test]
fn test_insert_and_recall_200_points() {
    with_index(|index| {
        let points = random_points(200, 2, 42);
        index.insert(points.clone()).unwrap();

        for (id, vector) in &points {
            let results = index.search(vector, 10, None).unwrap();
            assert_eq!(results.len(), 10);
            assert_eq!(results[0].0, *id, "query for id {id} missed itself");
            assert!(results[0].1.abs() < 1e-6);
        }
    });
}

#[test]
fn test_degree_bound_holds_after_insert() {
    with_index(|index| {
        index.insert(random_points(300, 2, 7)).unwrap();
        for (id, edges) in all_edges(index) {
            assert!(
                edges.len() <= params().degree_bound,
                "node {id} has {} edges",
                edges.len()
            );
        }
    });
}

#[test]
fn test_reachability_after_insert() {
    with_index(|index| {
        index.insert(random_points(150, 2, 13)).unwrap();
        assert_reachable(index);
    });
}

#[test]
fn test_delete_repairs_graph() {
    with_index(|index| {
        let points = random_points(100, 2, 99);
        index.insert(points.clone()).unwrap();

        let delete_set: RoaringTreemap = (2..=51).collect();

        // Every node with an edge into the delete set must be classified
        // for pruning.
        let (to_prune, _) = index.edge_scan(&delete_set).unwrap();
        let expected: Vec<u64> = all_edges(index)
            .into_iter()
            .filter(|(id, edges)| {
                !delete_set.contains(*id) && edges.iter().any(|e| delete_set.contains(*e))
            })
            .map(|(id, _)| id)
            .collect();
        for id in expected {
            assert!(to_prune.contains(&id), "node {id} missing from to_prune");
        }

        index.delete(&delete_set).unwrap();

        // No surviving node references a deleted id.
        for (id, edges) in all_edges(index) {
            assert!(!delete_set.contains(id));
            for edge in edges {
                assert!(
                    !delete_set.contains(edge),
                    "node {id} still points at deleted {edge}"
                );
            }
        }
        assert_reachable(index);

        // Surviving points still rank themselves first.
        for (id, vector) in points.iter().filter(|(id, _)| !delete_set.contains(*id)) {
            let results = index.search(vector, 10, None).unwrap();
            assert_eq!(results[0].0, *id, "survivor {id} lost after deletion");
        }
    });
}

#[test]
fn test_update_moves_point() {
    with_index(|index| {
        index.insert(random_points(50, 2, 3)).unwrap();
        index.update(vec![(10, vec![0.0, 0.0])]).unwrap();

        let results = index.search(&[0.0, 0.0], 5, None).unwrap();
        assert_eq!(results[0].0, 10);
        assert!(results[0].1.abs() < 1e-6);
        assert_reachable(index);
    });
}

#[test]
fn test_filtered_search_stays_inside_filter() {
    with_index(|index| {
        index.insert(random_points(100, 2, 21)).unwrap();
        let filter: RoaringTreemap = (2..=20).collect();

        let results = index.search(&[0.5, 0.5], 10, Some(&filter)).unwrap();
        assert!(!results.is_empty());
        for (id, _) in &results {
            assert!(filter.contains(*id), "result {id} outside filter");
        }
    });
}

#[test]
fn test_search_on_empty_index() {
    with_index(|index| {
        let results = index.search(&[0.1, 0.2], 5, None).unwrap();
        assert!(results.is_empty());
    });
}

#[test]
fn test_flush_and_reload_preserves_graph() {
    let store = Store::memory();
    let build = |bucket: &Bucket| -> crate::error::Result<Vec<(u64, Vec<f32>)>> {
        let state = VamanaState::open(&params(), bucket)?;
        let index = VamanaIndex::new(&state, bucket.clone(), params(), CancelToken::new());
        let points = random_points(80, 2, 5);
        index.insert(points.clone())?;
        index.flush()?;
        Ok(points)
    };
    let points = store
        .write(|bm| build(&bm.get("index/vectorVamana/v")?))
        .unwrap();

    // Fresh state over the same bucket sees the flushed graph.
    store
        .read(|bm| {
            let bucket = bm.get("index/vectorVamana/v")?;
            let state = VamanaState::open(&params(), &bucket)?;
            let index = VamanaIndex::new(&state, bucket, params(), CancelToken::new());
            for (id, vector) in points.iter().take(10) {
                let results = index.search(vector, 5, None)?;
                assert_eq!(results[0].0, *id);
            }
            assert!(index.state.nodes.max_node_id() >= 81);
            Ok(())
        })
        .unwrap();
}
