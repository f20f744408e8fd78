//! End-to-end store scenarios against temp-file backed devices.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use vcstore::{FormatError, StoreError, StoreOptions, VectorClusterStore};

fn open(path: &std::path::Path, dim: u32, clusters: u32) -> VectorClusterStore {
    VectorClusterStore::open(path, "kmeans", dim, clusters, StoreOptions::default()).unwrap()
}

#[test]
fn small_cosine_search() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("dev.bin"), 4, 2);

    store.store_vector(1, &[1.0, 0.0, 0.0, 0.0], b"a").unwrap();
    store.store_vector(2, &[0.0, 1.0, 0.0, 0.0], b"b").unwrap();
    store
        .store_vector(3, &[0.99, 0.01, 0.0, 0.0], b"c")
        .unwrap();

    let hits = store.find_similar_vectors(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0, 1);
    assert!((hits[0].1 - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].0, 3);
    assert!((hits[1].1 - 0.99995).abs() < 1e-4);
}

#[test]
fn reopen_roundtrip_with_dim_override() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dev.bin");

    let mut rng = StdRng::seed_from_u64(0xB0);
    let mut inserted: Vec<Vec<f32>> = Vec::new();

    {
        let store = open(&path, 8, 4);
        for id in 1..=100u32 {
            let mut v: Vec<f32> = (0..8).map(|_| rng.gen::<f32>() - 0.5).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in &mut v {
                *x /= norm;
            }
            store
                .store_vector(id, &v, format!("m{}", id).as_bytes())
                .unwrap();
            inserted.push(v);
        }
    }

    // The bogus dimension argument loses to the on-disk header.
    let store = open(&path, 3, 4);
    assert_eq!(store.vector_count(), 100);

    let got = store.retrieve_vector(57).unwrap();
    assert_eq!(got, inserted[56]);
    assert_eq!(store.get_vector_metadata(57), b"m57");
}

#[test]
fn dimension_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("dev.bin"), 16, 4);

    let result = store.store_vector(1, &[0.5; 15], b"");
    assert!(matches!(
        result,
        Err(StoreError::DimensionMismatch {
            expected: 16,
            actual: 15
        })
    ));
    assert_eq!(store.vector_count(), 0);
}

#[test]
fn delete_and_reinsert_preserves_search() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("dev.bin"), 4, 2);

    for id in 1..=10u32 {
        let angle = id as f32 * 0.3;
        store
            .store_vector(id, &[angle.cos(), angle.sin(), 0.0, 0.0], b"v")
            .unwrap();
    }

    store.delete_vector(5).unwrap();
    assert!(matches!(
        store.retrieve_vector(5),
        Err(StoreError::VectorNotFound(5))
    ));

    let replacement = [0.0, 0.0, 1.0, 0.0];
    store.store_vector(5, &replacement, b"new").unwrap();

    let hits = store.find_similar_vectors(&replacement, 1).unwrap();
    assert_eq!(hits[0].0, 5);
    assert!((hits[0].1 - 1.0).abs() < 1e-6);
}

#[test]
fn maintenance_settles_separated_clusters() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("dev.bin"), 4, 3);

    let centers = [
        [10.0f32, 0.0, 0.0, 0.0],
        [0.0, 10.0, 0.0, 0.0],
        [0.0, 0.0, 10.0, 0.0],
    ];
    let mut rng = StdRng::seed_from_u64(0xE5);
    let mut id = 0u32;
    for center in &centers {
        for _ in 0..10 {
            id += 1;
            let v: Vec<f32> = center
                .iter()
                .map(|c| c + (rng.gen::<f32>() - 0.5) * 0.2)
                .collect();
            store.store_vector(id, &v, b"").unwrap();
        }
    }

    store.perform_maintenance().unwrap();

    let stats = store.stats();
    let mut sizes: Vec<u32> = stats.cluster_distribution.values().copied().collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![10, 10, 10]);

    // A second pass has nothing left to move.
    store.perform_maintenance().unwrap();
    let again = store.stats();
    assert_eq!(again.cluster_distribution, stats.cluster_distribution);
}

#[test]
fn corrupt_header_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dev.bin");

    {
        let store = open(&path, 4, 2);
        store.store_vector(1, &[1.0, 0.0, 0.0, 0.0], b"x").unwrap();
    }

    // Clobber the first signature byte.
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(b"X").unwrap();
    }

    let result = VectorClusterStore::open(&path, "kmeans", 4, 2, StoreOptions::default());
    assert!(matches!(
        result,
        Err(StoreError::Format(FormatError::InvalidSignature))
    ));
}

#[test]
fn invariants_hold_after_mixed_workload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dev.bin");
    let store = open(&path, 4, 3);

    for id in 1..=20u32 {
        let angle = id as f32 * 0.7;
        store
            .store_vector(id, &[angle.cos(), angle.sin(), 0.1, -0.1], b"m")
            .unwrap();
    }
    for id in [3u32, 7, 11] {
        store.delete_vector(id).unwrap();
    }
    store.perform_maintenance().unwrap();

    let stats = store.stats();
    assert_eq!(stats.vector_count, 17);
    assert_eq!(stats.next_id, 21);
    let total: u32 = stats.cluster_distribution.values().sum();
    assert_eq!(total, 17);

    // Strategy and map agree on every cluster's population.
    for (&cluster_id, &count) in &stats.cluster_distribution {
        let cluster = store.cluster_stats(cluster_id).unwrap();
        assert_eq!(cluster.vector_count, count);
    }

    // Everything still retrievable after a reopen.
    drop(store);
    let store = open(&path, 4, 3);
    for id in 1..=20u32 {
        match id {
            3 | 7 | 11 => assert!(store.retrieve_vector(id).is_err()),
            _ => {
                let v = store.retrieve_vector(id).unwrap();
                let angle = id as f32 * 0.7;
                assert_eq!(v, vec![angle.cos(), angle.sin(), 0.1, -0.1]);
            }
        }
    }
}
