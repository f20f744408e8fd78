//! K-means clustering strategy
//!
//! Maintains centroids, per-cluster member sets, and an in-RAM copy of
//! every vector it has been fed. The copy doubles memory for the hot set
//! but lets [`KMeansStrategy::rebalance`] run one Lloyd iteration without
//! touching the device, and lets maintenance rewrite moved vectors
//! straight from RAM.
//!
//! All id-keyed state lives in `BTreeMap`/`BTreeSet`, so iteration is
//! id-ascending: smallest-id tie-breaks fall out of plain strict-less-than
//! comparisons, and serialization is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::simd::l2_distance_squared;
use crate::strategy::{ClusterInfo, ClusteringStrategy, Cursor, StrategyError};

pub struct KMeansStrategy {
    vector_dim: u32,
    max_clusters: u32,
    centroids: BTreeMap<u32, Vec<f32>>,
    members: BTreeMap<u32, BTreeSet<u32>>,
    vector_to_cluster: BTreeMap<u32, u32>,
    vectors: BTreeMap<u32, Vec<f32>>,
    cluster_info: BTreeMap<u32, ClusterInfo>,
    seeded: bool,
    rng: StdRng,
}

impl KMeansStrategy {
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().gen())
    }

    /// Deterministic construction for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            vector_dim: 0,
            max_clusters: 0,
            centroids: BTreeMap::new(),
            members: BTreeMap::new(),
            vector_to_cluster: BTreeMap::new(),
            vectors: BTreeMap::new(),
            cluster_info: BTreeMap::new(),
            seeded: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pick initial centroids: shuffled existing vectors first, uniform
    /// random values in [-1, 1] for any cluster left over.
    fn seed_centroids(&mut self) {
        let mut ids: Vec<u32> = self.vectors.keys().copied().collect();
        ids.shuffle(&mut self.rng);

        for cluster_id in 0..self.max_clusters {
            let centroid = match ids.get(cluster_id as usize) {
                Some(&vector_id) => self.vectors[&vector_id].clone(),
                None => (0..self.vector_dim)
                    .map(|_| self.rng.gen_range(-1.0f32..=1.0))
                    .collect(),
            };
            self.centroids.insert(cluster_id, centroid);
        }

        self.seeded = true;
        debug!(
            from_vectors = ids.len().min(self.max_clusters as usize),
            max_clusters = self.max_clusters,
            "seeded centroids"
        );
    }

    /// Centroid with minimum Euclidean distance; ascending-id iteration
    /// plus strict `<` breaks ties toward the smallest cluster id.
    fn closest_centroid(&self, vector: &[f32]) -> u32 {
        let mut closest = 0;
        let mut best = f32::MAX;
        for (&cluster_id, centroid) in &self.centroids {
            let dist = l2_distance_squared(vector, centroid);
            if dist < best {
                best = dist;
                closest = cluster_id;
            }
        }
        closest
    }

    /// Recompute a cluster's centroid as the mean of its members and sync
    /// the cluster-info record. An empty cluster keeps its last centroid.
    fn update_centroid(&mut self, cluster_id: u32) {
        let dim = self.vector_dim;
        let members = match self.members.get(&cluster_id) {
            Some(m) => m,
            None => return,
        };

        let info = self
            .cluster_info
            .entry(cluster_id)
            .or_insert_with(|| ClusterInfo::empty(cluster_id, dim));
        info.vector_count = members.len() as u32;

        if members.is_empty() {
            return;
        }

        let mut mean = vec![0.0f32; self.vector_dim as usize];
        for vector_id in members {
            for (acc, &v) in mean.iter_mut().zip(self.vectors[vector_id].iter()) {
                *acc += v;
            }
        }
        let count = members.len() as f32;
        for acc in &mut mean {
            *acc /= count;
        }

        info.centroid = mean.clone();
        self.centroids.insert(cluster_id, mean);
    }
}

impl Default for KMeansStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusteringStrategy for KMeansStrategy {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn initialize(&mut self, vector_dim: u32, max_clusters: u32) {
        self.vector_dim = vector_dim;
        self.max_clusters = max_clusters;
        self.centroids.clear();
        self.members.clear();
        self.vector_to_cluster.clear();
        self.vectors.clear();
        self.cluster_info.clear();
        self.seeded = false;

        for cluster_id in 0..max_clusters {
            self.centroids
                .insert(cluster_id, vec![0.0; vector_dim as usize]);
            self.members.insert(cluster_id, BTreeSet::new());
            self.cluster_info
                .insert(cluster_id, ClusterInfo::empty(cluster_id, vector_dim));
        }
    }

    fn assign_to_cluster(&mut self, vector: &[f32]) -> u32 {
        if !self.seeded {
            self.seed_centroids();
        }
        self.closest_centroid(vector)
    }

    fn add_vector(&mut self, vector: &[f32], vector_id: u32) -> u32 {
        // Re-inserting an id must not leave it behind in its old cluster.
        if self.vector_to_cluster.contains_key(&vector_id) {
            self.remove_vector(vector_id);
        }
        self.vectors.insert(vector_id, vector.to_vec());

        let cluster_id = self.assign_to_cluster(vector);
        self.vector_to_cluster.insert(vector_id, cluster_id);
        self.members.entry(cluster_id).or_default().insert(vector_id);
        self.update_centroid(cluster_id);

        cluster_id
    }

    fn remove_vector(&mut self, vector_id: u32) -> bool {
        let cluster_id = match self.vector_to_cluster.remove(&vector_id) {
            Some(c) => c,
            None => return false,
        };

        if let Some(members) = self.members.get_mut(&cluster_id) {
            members.remove(&vector_id);
        }
        self.vectors.remove(&vector_id);
        self.update_centroid(cluster_id);

        true
    }

    fn find_closest_clusters(&self, query: &[f32], n: usize) -> Vec<u32> {
        let mut distances: Vec<(u32, f32)> = self
            .centroids
            .iter()
            .map(|(&cluster_id, centroid)| (cluster_id, l2_distance_squared(query, centroid)))
            .collect();

        distances.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        distances.into_iter().take(n).map(|(id, _)| id).collect()
    }

    fn cluster_of(&self, vector_id: u32) -> Option<u32> {
        self.vector_to_cluster.get(&vector_id).copied()
    }

    fn vector(&self, vector_id: u32) -> Option<&[f32]> {
        self.vectors.get(&vector_id).map(|v| v.as_slice())
    }

    fn centroid(&self, cluster_id: u32) -> Option<&[f32]> {
        self.centroids.get(&cluster_id).map(|c| c.as_slice())
    }

    fn cluster_size(&self, cluster_id: u32) -> u32 {
        self.members
            .get(&cluster_id)
            .map(|m| m.len() as u32)
            .unwrap_or(0)
    }

    fn rebalance(&mut self) -> bool {
        let mut moves: Vec<(u32, u32, u32)> = Vec::new();
        for (&vector_id, vector) in &self.vectors {
            let new_cluster = self.closest_centroid(vector);
            let old_cluster = self.vector_to_cluster[&vector_id];
            if new_cluster != old_cluster {
                moves.push((vector_id, old_cluster, new_cluster));
            }
        }

        if moves.is_empty() {
            return false;
        }

        for &(vector_id, old_cluster, new_cluster) in &moves {
            if let Some(members) = self.members.get_mut(&old_cluster) {
                members.remove(&vector_id);
            }
            self.members.entry(new_cluster).or_default().insert(vector_id);
            self.vector_to_cluster.insert(vector_id, new_cluster);
        }

        let cluster_ids: Vec<u32> = self.centroids.keys().copied().collect();
        for cluster_id in cluster_ids {
            self.update_centroid(cluster_id);
        }

        debug!(moved = moves.len(), "rebalance moved assignments");
        true
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.vector_dim.to_le_bytes());
        buf.extend_from_slice(&self.max_clusters.to_le_bytes());

        buf.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());
        for (&vector_id, vector) in &self.vectors {
            buf.extend_from_slice(&vector_id.to_le_bytes());
            buf.extend_from_slice(&self.vector_to_cluster[&vector_id].to_le_bytes());
            for &v in vector {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        buf.extend_from_slice(&(self.cluster_info.len() as u32).to_le_bytes());
        for (&cluster_id, info) in &self.cluster_info {
            // cluster_info centroids can lag behind seeding; the live
            // centroid map is authoritative.
            let mut info = info.clone();
            if let Some(centroid) = self.centroids.get(&cluster_id) {
                info.centroid = centroid.clone();
            }
            let blob = info.serialize();

            buf.extend_from_slice(&cluster_id.to_le_bytes());
            buf.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            buf.extend_from_slice(&blob);
        }

        buf
    }

    fn deserialize(&mut self, data: &[u8]) -> Result<(), StrategyError> {
        let mut cur = Cursor::new(data);

        let vector_dim = cur.u32()?;
        let max_clusters = cur.u32()?;
        self.initialize(vector_dim, max_clusters);

        let num_vectors = cur.u32()?;
        for _ in 0..num_vectors {
            let vector_id = cur.u32()?;
            let cluster_id = cur.u32()?;

            let raw = cur.bytes(vector_dim as usize * 4)?;
            let vector: Vec<f32> = raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect();

            self.vectors.insert(vector_id, vector);
            self.vector_to_cluster.insert(vector_id, cluster_id);
            self.members.entry(cluster_id).or_default().insert(vector_id);
            self.centroids
                .entry(cluster_id)
                .or_insert_with(|| vec![0.0; vector_dim as usize]);
        }

        let num_clusters = cur.u32()?;
        for _ in 0..num_clusters {
            let cluster_id = cur.u32()?;
            let info_size = cur.u32()? as usize;
            let info = ClusterInfo::deserialize(cur.bytes(info_size)?)?;

            if info.centroid.len() != vector_dim as usize {
                return Err(StrategyError::Corrupt(format!(
                    "cluster {} centroid has dimension {}, expected {}",
                    cluster_id,
                    info.centroid.len(),
                    vector_dim
                )));
            }

            self.centroids.insert(cluster_id, info.centroid.clone());
            self.members.entry(cluster_id).or_default();
            self.cluster_info.insert(cluster_id, info);
        }

        // Non-empty clusters get exact centroids recomputed from the
        // restored vectors; empty ones keep the dequantized value.
        let cluster_ids: Vec<u32> = self.centroids.keys().copied().collect();
        for cluster_id in cluster_ids {
            self.update_centroid(cluster_id);
        }

        self.seeded = !self.vectors.is_empty();
        debug!(
            vectors = self.vectors.len(),
            clusters = self.cluster_info.len(),
            trailing = cur.remaining(),
            "deserialized kmeans state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(dim: u32, clusters: u32) -> KMeansStrategy {
        let mut s = KMeansStrategy::with_seed(42);
        s.initialize(dim, clusters);
        s
    }

    #[test]
    fn test_initialize_creates_empty_clusters() {
        let s = strategy(4, 3);
        for c in 0..3 {
            assert_eq!(s.centroid(c), Some([0.0f32; 4].as_slice()));
            assert_eq!(s.cluster_size(c), 0);
        }
        assert_eq!(s.centroid(3), None);
    }

    #[test]
    fn test_first_add_seeds_from_vector() {
        let mut s = strategy(2, 2);
        let c = s.add_vector(&[1.0, 0.0], 10);
        // The inserted vector is in the seed pool, so one centroid equals
        // it and assignment lands there.
        assert_eq!(s.centroid(c), Some([1.0f32, 0.0].as_slice()));
        assert_eq!(s.cluster_of(10), Some(c));
        assert_eq!(s.cluster_size(c), 1);
    }

    #[test]
    fn test_centroid_is_member_mean() {
        let mut s = strategy(2, 1);
        s.add_vector(&[1.0, 0.0], 1);
        s.add_vector(&[3.0, 2.0], 2);

        let centroid = s.centroid(0).unwrap();
        assert!((centroid[0] - 2.0).abs() < 1e-6);
        assert!((centroid[1] - 1.0).abs() < 1e-6);
        assert_eq!(s.cluster_size(0), 2);
    }

    #[test]
    fn test_remove_updates_centroid() {
        let mut s = strategy(2, 1);
        s.add_vector(&[1.0, 0.0], 1);
        s.add_vector(&[3.0, 2.0], 2);

        assert!(s.remove_vector(2));
        assert_eq!(s.centroid(0), Some([1.0f32, 0.0].as_slice()));
        assert_eq!(s.cluster_size(0), 1);
        assert_eq!(s.cluster_of(2), None);
        assert_eq!(s.vector(2), None);
    }

    #[test]
    fn test_remove_unknown_id() {
        let mut s = strategy(2, 1);
        assert!(!s.remove_vector(99));
    }

    #[test]
    fn test_empty_cluster_keeps_centroid() {
        let mut s = strategy(2, 1);
        s.add_vector(&[5.0, -1.0], 1);
        assert!(s.remove_vector(1));
        // Frozen at the last non-empty mean, not zeroed.
        assert_eq!(s.centroid(0), Some([5.0f32, -1.0].as_slice()));
        assert_eq!(s.cluster_size(0), 0);
    }

    #[test]
    fn test_find_closest_clusters_order_and_ties() {
        let mut s = strategy(1, 3);
        s.centroids.insert(0, vec![10.0]);
        s.centroids.insert(1, vec![1.0]);
        s.centroids.insert(2, vec![10.0]);
        s.seeded = true;

        let order = s.find_closest_clusters(&[0.0], 3);
        // Cluster 1 closest; 0 and 2 tie at distance 10, smaller id first.
        assert_eq!(order, vec![1, 0, 2]);

        assert_eq!(s.find_closest_clusters(&[0.0], 2), vec![1, 0]);
        assert_eq!(s.find_closest_clusters(&[0.0], 10).len(), 3);
    }

    #[test]
    fn test_rebalance_separates_clusters() {
        let mut s = strategy(2, 2);
        // Force both centroids somewhere useless, then hand-assign all
        // vectors to cluster 0.
        for (i, v) in [[0.0, 0.1], [0.1, 0.0], [9.9, 10.0], [10.0, 9.9]]
            .iter()
            .enumerate()
        {
            s.vectors.insert(i as u32, v.to_vec());
            s.vector_to_cluster.insert(i as u32, 0);
            s.members.get_mut(&0).unwrap().insert(i as u32);
        }
        s.centroids.insert(0, vec![0.0, 0.0]);
        s.centroids.insert(1, vec![10.0, 10.0]);
        s.seeded = true;

        assert!(s.rebalance());
        assert_eq!(s.cluster_size(0), 2);
        assert_eq!(s.cluster_size(1), 2);
        assert_eq!(s.cluster_of(2), Some(1));
        assert_eq!(s.cluster_of(3), Some(1));

        // Second pass finds nothing to move.
        assert!(!s.rebalance());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut s = strategy(3, 2);
        s.add_vector(&[1.0, 0.0, 0.0], 1);
        s.add_vector(&[0.0, 1.0, 0.0], 2);
        s.add_vector(&[0.9, 0.1, 0.0], 3);

        let blob = s.serialize();

        let mut restored = KMeansStrategy::with_seed(7);
        restored.deserialize(&blob).unwrap();

        // Assignments and vector data restore exactly.
        for id in [1u32, 2, 3] {
            assert_eq!(restored.cluster_of(id), s.cluster_of(id));
            assert_eq!(restored.vector(id), s.vector(id));
        }

        // Non-empty centroids are recomputed from exact vectors.
        for c in 0..2 {
            if s.cluster_size(c) > 0 {
                let a = s.centroid(c).unwrap();
                let b = restored.centroid(c).unwrap();
                for (x, y) in a.iter().zip(b.iter()) {
                    assert!((x - y).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_deserialize_truncated() {
        let mut s = strategy(3, 2);
        s.add_vector(&[1.0, 2.0, 3.0], 1);
        let blob = s.serialize();

        let mut restored = KMeansStrategy::with_seed(7);
        let result = restored.deserialize(&blob[..blob.len() - 5]);
        assert!(matches!(result, Err(StrategyError::Corrupt(_))));
    }

    #[test]
    fn test_serialize_empty_store() {
        let s = strategy(4, 2);
        let blob = s.serialize();

        let mut restored = KMeansStrategy::with_seed(9);
        restored.deserialize(&blob).unwrap();
        assert_eq!(restored.cluster_size(0), 0);
        assert_eq!(restored.centroid(0), Some([0.0f32; 4].as_slice()));
        // A fresh deserialized empty model still seeds on first insert.
        assert!(!restored.seeded);
    }
}
