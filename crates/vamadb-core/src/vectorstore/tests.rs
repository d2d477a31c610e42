use super::{parse_vector_key, vector_key, VectorData, VectorStoreState};
use crate::distance::DistanceMetric;
use crate::schema::QuantizerParams;
use crate::storage::{Bucket, Store};

fn with_bucket(f: impl FnOnce(&Bucket)) {
    let store = Store::memory();
    store
        .write(|bm| {
            f(&bm.get("vectors")?);
            Ok(())
        })
        .unwrap();
}

fn plain_store(bucket: &Bucket, size: usize) -> VectorStoreState {
    VectorStoreState::open(size, DistanceMetric::Euclidean, None, bucket).unwrap()
}

#[test]
fn test_vector_key_round_trip() {
    let key = vector_key(42);
    assert_eq!(key[0], b'n');
    assert_eq!(key[9], b'v');
    assert_eq!(parse_vector_key(&key), Some(42));
    assert_eq!(parse_vector_key(b"n-bad"), None);
}

#[test]
fn test_set_get_flush_reload() {
    with_bucket(|bucket| {
        let store = plain_store(bucket, 2);
        store.set(2, vec![0.5, 1.5]).unwrap();
        store.flush(bucket).unwrap();

        let fresh = plain_store(bucket, 2);
        let entry = fresh.get_required(2, bucket).unwrap();
        assert_eq!(entry.data, VectorData::Plain(vec![0.5, 1.5]));
    });
}

#[test]
fn test_set_rejects_wrong_dimension() {
    with_bucket(|bucket| {
        let store = plain_store(bucket, 2);
        assert!(store.set(2, vec![1.0, 2.0, 3.0]).is_err());
    });
}

#[test]
fn test_distance_from_float_and_point() {
    with_bucket(|bucket| {
        let store = plain_store(bucket, 2);
        store.set(2, vec![0.0, 0.0]).unwrap();
        store.set(3, vec![3.0, 4.0]).unwrap();

        let from_query = store.distance_from_float(&[0.0, 0.0], bucket).unwrap();
        assert!((from_query(3).unwrap() - 25.0).abs() < 1e-6);

        let from_point = store.distance_from_point(2, bucket).unwrap();
        assert!((from_point(3).unwrap() - 25.0).abs() < 1e-6);
        assert!(from_point(2).unwrap().abs() < 1e-6);
    });
}

#[test]
fn test_delete_then_count() {
    with_bucket(|bucket| {
        let store = plain_store(bucket, 2);
        store.set(2, vec![1.0, 1.0]).unwrap();
        store.set(3, vec![2.0, 2.0]).unwrap();
        store.flush(bucket).unwrap();

        store.delete(2);
        assert_eq!(store.count(bucket).unwrap(), 1);
        assert!(store.get(2, bucket).unwrap().is_none());

        store.flush(bucket).unwrap();
        assert_eq!(bucket.get(&vector_key(2)).unwrap(), None);
    });
}

#[test]
fn test_for_each_merges_cache_and_bucket() {
    with_bucket(|bucket| {
        let store = plain_store(bucket, 1);
        store.set(2, vec![1.0]).unwrap();
        store.flush(bucket).unwrap();
        store.set(3, vec![2.0]).unwrap(); // unflushed, cache only

        let mut ids = Vec::new();
        store
            .for_each(bucket, |id, _| {
                ids.push(id);
                Ok(true)
            })
            .unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);
    });
}

#[test]
fn test_binary_quantizer_trains_at_threshold() {
    with_bucket(|bucket| {
        let params = QuantizerParams::Binary {
            threshold: None,
            train_after: 4,
            distance_metric: DistanceMetric::Hamming,
        };
        let store =
            VectorStoreState::open(2, DistanceMetric::Euclidean, Some(&params), bucket).unwrap();

        store.set(2, vec![1.0, -1.0]).unwrap();
        store.set(3, vec![1.0, 1.0]).unwrap();
        store.fit(bucket).unwrap();
        // Below threshold: still raw floats.
        assert!(matches!(
            store.get_required(2, bucket).unwrap().data,
            VectorData::Plain(_)
        ));

        store.set(4, vec![-1.0, 1.0]).unwrap();
        store.set(5, vec![-1.0, -1.0]).unwrap();
        store.fit(bucket).unwrap();
        assert!(matches!(
            store.get_required(2, bucket).unwrap().data,
            VectorData::Binary(_)
        ));

        // Distances are now bit distances.
        let dist = store.distance_from_float(&[1.0, -1.0], bucket).unwrap();
        assert!(dist(2).unwrap().abs() < f32::EPSILON);
        assert!((dist(5).unwrap() - 1.0).abs() < f32::EPSILON);

        // Trained state survives flush and reopen.
        store.flush(bucket).unwrap();
        let fresh =
            VectorStoreState::open(2, DistanceMetric::Euclidean, Some(&params), bucket).unwrap();
        assert!(matches!(
            fresh.get_required(2, bucket).unwrap().data,
            VectorData::Binary(_)
        ));
    });
}

#[test]
fn test_product_quantizer_encodes_after_training() {
    with_bucket(|bucket| {
        let params = QuantizerParams::Product {
            num_centroids: 2,
            num_subvectors: 2,
            train_after: 4,
        };
        let store =
            VectorStoreState::open(4, DistanceMetric::Euclidean, Some(&params), bucket).unwrap();

        store.set(2, vec![0.0, 0.0, 1.0, 1.0]).unwrap();
        store.set(3, vec![0.1, 0.1, 0.9, 0.9]).unwrap();
        store.set(4, vec![1.0, 1.0, 0.0, 0.0]).unwrap();
        store.set(5, vec![0.9, 0.9, 0.1, 0.1]).unwrap();
        store.fit(bucket).unwrap();

        let entry = store.get_required(2, bucket).unwrap();
        let VectorData::Product(codes) = &entry.data else {
            panic!("expected product codes");
        };
        assert_eq!(codes.len(), 2);

        // Nearest stored point to a query close to (0,0,1,1) is id 2 or 3.
        let dist = store
            .distance_from_float(&[0.05, 0.05, 0.95, 0.95], bucket)
            .unwrap();
        let near = dist(2).unwrap();
        let far = dist(4).unwrap();
        assert!(near < far);
    });
}
