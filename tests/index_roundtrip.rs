//! Round-trips through the serialized strategy blob and the auxiliary
//! index files.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use vcstore::{ClusteringStrategy, KMeansStrategy, StoreOptions, VectorClusterStore};

fn sample_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

#[test]
fn strategy_blob_roundtrip() {
    let mut strategy = KMeansStrategy::with_seed(11);
    strategy.initialize(16, 4);

    let vectors = sample_vectors(50, 16, 0x51);
    for (i, v) in vectors.iter().enumerate() {
        strategy.add_vector(v, i as u32);
    }
    strategy.rebalance();

    let blob = strategy.serialize();
    let mut restored = KMeansStrategy::with_seed(99);
    restored.deserialize(&blob).unwrap();

    // Ids, per-vector data, and assignments restore exactly.
    for (i, v) in vectors.iter().enumerate() {
        let id = i as u32;
        assert_eq!(restored.vector(id), Some(v.as_slice()));
        assert_eq!(restored.cluster_of(id), strategy.cluster_of(id));
    }

    // Centroids restore within one quantization step per component.
    for cluster_id in 0..4u32 {
        let original = strategy.centroid(cluster_id).unwrap();
        let back = restored.centroid(cluster_id).unwrap();
        let scale = original
            .iter()
            .fold(0.0f32, |acc, &v| acc.max(v.abs()))
            .max(1e-10)
            / i16::MAX as f32;
        for (a, b) in original.iter().zip(back.iter()) {
            assert!(
                (a - b).abs() <= scale,
                "cluster {} centroid drifted: {} vs {}",
                cluster_id,
                a,
                b
            );
        }
    }

}

#[test]
fn save_index_restores_onto_blank_device() {
    let dir = tempdir().unwrap();
    let index_path = dir.path().join("store.idx");

    let vectors = sample_vectors(40, 8, 0x52);
    let queries = sample_vectors(5, 8, 0x53);

    let original_hits: Vec<Vec<(u32, f32)>>;
    {
        let store = VectorClusterStore::open(
            dir.path().join("dev-a.bin"),
            "kmeans",
            8,
            4,
            StoreOptions::default(),
        )
        .unwrap();

        for (i, v) in vectors.iter().enumerate() {
            store
                .store_vector(i as u32 + 1, v, format!("meta-{}", i).as_bytes())
                .unwrap();
        }

        original_hits = queries
            .iter()
            .map(|q| store.find_similar_vectors(q, 10).unwrap())
            .collect();

        store.save_index(&index_path).unwrap();
    }
    assert!(index_path.exists());
    assert!(dir.path().join("store.idx.vmap").exists());

    // A brand-new device, then the index files replayed onto it.
    let store = VectorClusterStore::open(
        dir.path().join("dev-b.bin"),
        "kmeans",
        8,
        4,
        StoreOptions::default(),
    )
    .unwrap();
    store.load_index(&index_path).unwrap();

    assert_eq!(store.vector_count(), 40);
    for (i, v) in vectors.iter().enumerate() {
        let id = i as u32 + 1;
        assert_eq!(&store.retrieve_vector(id).unwrap(), v);
        assert_eq!(
            store.get_vector_metadata(id),
            format!("meta-{}", i).as_bytes()
        );
    }

    // Same candidates in the same order for every query.
    for (q, expected) in queries.iter().zip(original_hits.iter()) {
        let hits = store.find_similar_vectors(q, 10).unwrap();
        let expected_ids: Vec<u32> = expected.iter().map(|h| h.0).collect();
        let got_ids: Vec<u32> = hits.iter().map(|h| h.0).collect();
        assert_eq!(got_ids, expected_ids);
        for (a, b) in expected.iter().zip(hits.iter()) {
            assert!((a.1 - b.1).abs() < 1e-5);
        }
    }
}

#[test]
fn loaded_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let index_path = dir.path().join("store.idx");
    let device_path = dir.path().join("dev.bin");

    {
        let store = VectorClusterStore::open(
            dir.path().join("dev-src.bin"),
            "kmeans",
            4,
            2,
            StoreOptions::default(),
        )
        .unwrap();
        store.store_vector(7, &[0.1, 0.2, 0.3, 0.4], b"seven").unwrap();
        store.store_vector(8, &[0.4, 0.3, 0.2, 0.1], b"eight").unwrap();
        store.save_index(&index_path).unwrap();
    }

    {
        let store =
            VectorClusterStore::open(&device_path, "kmeans", 4, 2, StoreOptions::default())
                .unwrap();
        store.load_index(&index_path).unwrap();
    }

    // load_index persisted everything to the device, so a plain reopen
    // sees the restored store.
    let store =
        VectorClusterStore::open(&device_path, "kmeans", 4, 2, StoreOptions::default()).unwrap();
    assert_eq!(store.vector_count(), 2);
    assert_eq!(store.retrieve_vector(7).unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
    assert_eq!(store.get_vector_metadata(8), b"eight");
    assert_eq!(store.stats().next_id, 9);
}
