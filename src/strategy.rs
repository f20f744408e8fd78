//! Clustering strategy seam
//!
//! The store talks to its index through [`ClusteringStrategy`]; K-means is
//! the only shipped implementation, but the on-device header records the
//! strategy name so the factory can grow.
//!
//! [`ClusterInfo`] is the per-cluster record embedded in the serialized
//! strategy blob. Its centroid is stored quantized to `i16` with a single
//! f32 scale, which cuts the blob roughly in half for high-dimensional
//! stores at a precision cost below one quantization step per component.

use thiserror::Error;
use tracing::warn;

use crate::kmeans::KMeansStrategy;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Corrupt strategy blob: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-cluster bookkeeping carried in the serialized strategy state.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub cluster_id: u32,
    pub centroid: Vec<f32>,
    /// Reserved for a future layout that groups a cluster's vectors
    /// physically; always 0 today.
    pub start_offset: u64,
    pub vector_count: u32,
    pub capacity: u32,
}

/// Default per-cluster capacity hint.
pub const DEFAULT_CLUSTER_CAPACITY: u32 = 1000;

/// Values below this are treated as a zero centroid when picking the
/// quantization scale.
const SCALE_EPSILON: f32 = 1e-10;

impl ClusterInfo {
    /// Empty cluster with a zero centroid of length `dim`.
    pub fn empty(cluster_id: u32, dim: u32) -> Self {
        Self {
            cluster_id,
            centroid: vec![0.0; dim as usize],
            start_offset: 0,
            vector_count: 0,
            capacity: DEFAULT_CLUSTER_CAPACITY,
        }
    }

    /// Serialize with the centroid quantized to `i16` + scale.
    ///
    /// Layout (little-endian): `cluster_id:u32`, `vector_count:u32`,
    /// `capacity:u32`, `start_offset:u64`, `centroid_dim:u32`,
    /// `scale:f32`, `centroid_dim × i16`.
    pub fn serialize(&self) -> Vec<u8> {
        let dim = self.centroid.len();
        let mut buf = Vec::with_capacity(4 * 4 + 8 + 4 + dim * 2);

        buf.extend_from_slice(&self.cluster_id.to_le_bytes());
        buf.extend_from_slice(&self.vector_count.to_le_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.start_offset.to_le_bytes());
        buf.extend_from_slice(&(dim as u32).to_le_bytes());

        let max_abs = self
            .centroid
            .iter()
            .fold(0.0f32, |acc, &v| acc.max(v.abs()));
        let scale = if max_abs < SCALE_EPSILON {
            1.0
        } else {
            max_abs / i16::MAX as f32
        };
        buf.extend_from_slice(&scale.to_le_bytes());

        for &v in &self.centroid {
            let q = (v / scale).round() as i16;
            buf.extend_from_slice(&q.to_le_bytes());
        }

        buf
    }

    /// Inverse of [`ClusterInfo::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self, StrategyError> {
        let mut cur = Cursor::new(data);

        let cluster_id = cur.u32()?;
        let vector_count = cur.u32()?;
        let capacity = cur.u32()?;
        let start_offset = cur.u64()?;
        let centroid_dim = cur.u32()? as usize;
        let scale = cur.f32()?;

        let mut centroid = Vec::with_capacity(centroid_dim);
        for _ in 0..centroid_dim {
            centroid.push(cur.i16()? as f32 * scale);
        }

        Ok(Self {
            cluster_id,
            centroid,
            start_offset,
            vector_count,
            capacity,
        })
    }
}

/// Little-endian reader over a strategy blob with bounds checks.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StrategyError> {
        if self.remaining() < n {
            return Err(StrategyError::Corrupt(format!(
                "blob truncated at byte {}: need {} more, have {}",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u32(&mut self) -> Result<u32, StrategyError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64, StrategyError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn f32(&mut self) -> Result<f32, StrategyError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn i16(&mut self) -> Result<i16, StrategyError> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], StrategyError> {
        self.take(n)
    }
}

/// Index maintained alongside the persisted vectors.
///
/// Implementations own an in-memory copy of every vector they are fed;
/// that copy is what rebalancing reassigns and what maintenance rewrites
/// to the device.
pub trait ClusteringStrategy: Send {
    /// Name recorded in the store header.
    fn name(&self) -> &'static str;

    /// Reset to `max_clusters` empty clusters of dimension `vector_dim`.
    fn initialize(&mut self, vector_dim: u32, max_clusters: u32);

    /// Cluster whose centroid is closest (L2) to `vector`. Seeds the
    /// centroids on the first call after initialization.
    fn assign_to_cluster(&mut self, vector: &[f32]) -> u32;

    /// Record `vector` under `vector_id` and fold it into its cluster's
    /// centroid.
    fn add_vector(&mut self, vector: &[f32], vector_id: u32) -> u32;

    /// Forget `vector_id`. Returns false when the id is unknown.
    fn remove_vector(&mut self, vector_id: u32) -> bool;

    /// Ids of the `n` clusters with centroids closest to `query`,
    /// ascending by distance, ties broken by smaller id.
    fn find_closest_clusters(&self, query: &[f32], n: usize) -> Vec<u32>;

    /// Current cluster of `vector_id`, if known.
    fn cluster_of(&self, vector_id: u32) -> Option<u32>;

    /// The strategy's own copy of a vector.
    fn vector(&self, vector_id: u32) -> Option<&[f32]>;

    /// Current centroid of a cluster.
    fn centroid(&self, cluster_id: u32) -> Option<&[f32]>;

    /// Number of member vectors in a cluster.
    fn cluster_size(&self, cluster_id: u32) -> u32;

    /// One Lloyd iteration over all stored vectors. Returns true when at
    /// least one assignment moved.
    fn rebalance(&mut self) -> bool;

    /// Full model state as a little-endian byte blob.
    fn serialize(&self) -> Vec<u8>;

    /// Restore state from a [`ClusteringStrategy::serialize`] blob.
    fn deserialize(&mut self, data: &[u8]) -> Result<(), StrategyError>;
}

/// Build a strategy by header name. Unknown names fall back to K-means.
pub fn create_strategy(name: &str) -> Box<dyn ClusteringStrategy> {
    match name {
        "kmeans" => Box::new(KMeansStrategy::new()),
        other => {
            warn!(strategy = other, "unknown clustering strategy, using kmeans");
            Box::new(KMeansStrategy::new())
        }
    }
}
