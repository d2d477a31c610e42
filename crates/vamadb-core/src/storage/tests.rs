use std::ops::Bound;

use tempfile::tempdir;

use super::Store;
use crate::error::Result;

fn fill(store: &Store) -> Result<()> {
    store.write(|bm| {
        let bucket = bm.get("testing")?;
        bucket.put(b"alpha", b"1")?;
        bucket.put(b"beta", b"2")?;
        bucket.put(b"gamma", b"3")?;
        Ok(())
    })
}

fn each_backend(test: impl Fn(Store)) {
    test(Store::memory());
    let dir = tempdir().unwrap();
    test(Store::open(dir.path().join("store")).unwrap());
}

#[test]
fn test_put_get_delete() {
    each_backend(|store| {
        fill(&store).unwrap();
        store
            .write(|bm| {
                let bucket = bm.get("testing")?;
                assert_eq!(bucket.get(b"alpha")?, Some(b"1".to_vec()));
                bucket.delete(b"alpha")?;
                assert_eq!(bucket.get(b"alpha")?, None);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn test_missing_bucket_reads_empty() {
    each_backend(|store| {
        store
            .read(|bm| {
                let bucket = bm.get("nothing-here")?;
                assert_eq!(bucket.get(b"alpha")?, None);
                let mut visited = 0;
                bucket.for_each(|_, _| {
                    visited += 1;
                    Ok(true)
                })?;
                assert_eq!(visited, 0);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn test_write_rejected_in_read_scope() {
    each_backend(|store| {
        fill(&store).unwrap();
        let result = store.read(|bm| {
            let bucket = bm.get("testing")?;
            bucket.put(b"delta", b"4")
        });
        assert!(result.is_err());
    });
}

#[test]
fn test_for_each_ordered_and_stoppable() {
    each_backend(|store| {
        fill(&store).unwrap();
        store
            .read(|bm| {
                let bucket = bm.get("testing")?;
                let mut keys = Vec::new();
                bucket.for_each(|k, _| {
                    keys.push(k.to_vec());
                    Ok(keys.len() < 2)
                })?;
                assert_eq!(keys, vec![b"alpha".to_vec(), b"beta".to_vec()]);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn test_prefix_and_range_scan() {
    each_backend(|store| {
        store
            .write(|bm| {
                let bucket = bm.get("scan")?;
                for key in ["a1", "a2", "b1", "b2", "c1"] {
                    bucket.put(key.as_bytes(), b"x")?;
                }
                let mut prefixed = Vec::new();
                bucket.prefix_scan(b"a", |k, _| {
                    prefixed.push(k.to_vec());
                    Ok(true)
                })?;
                assert_eq!(prefixed, vec![b"a1".to_vec(), b"a2".to_vec()]);

                let mut ranged = Vec::new();
                bucket.range_scan(
                    Bound::Excluded(b"a2".to_vec()),
                    Bound::Included(b"b2".to_vec()),
                    |k, _| {
                        ranged.push(k.to_vec());
                        Ok(true)
                    },
                )?;
                assert_eq!(ranged, vec![b"b1".to_vec(), b"b2".to_vec()]);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn test_disk_backup_reopens_to_same_state() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("primary")).unwrap();
    fill(&store).unwrap();

    let backup_path = dir.path().join("backup");
    store.backup_to_file(&backup_path).unwrap();
    store.close().unwrap();

    let restored = Store::open(&backup_path).unwrap();
    restored
        .read(|bm| {
            let bucket = bm.get("testing")?;
            assert_eq!(bucket.get(b"beta")?, Some(b"2".to_vec()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_disk_store_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store");
    {
        let store = Store::open(&path).unwrap();
        fill(&store).unwrap();
        store.close().unwrap();
    }
    let store = Store::open(&path).unwrap();
    store
        .read(|bm| {
            let bucket = bm.get("testing")?;
            assert_eq!(bucket.get(b"gamma")?, Some(b"3".to_vec()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_memory_backup_unsupported() {
    let store = Store::memory();
    assert!(store.backup_to_file("/tmp/nope").is_err());
}

#[test]
fn test_size_in_bytes_nonzero_after_write() {
    let store = Store::memory();
    fill(&store).unwrap();
    assert!(store.size_in_bytes().unwrap() > 0);
}
