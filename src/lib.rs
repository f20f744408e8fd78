//! vcstore – Embedded clustered vector store over raw block devices
//!
//! Persists fixed-dimension f32 vectors on a block device (or a regular
//! file opened raw-block style) and answers approximate nearest-neighbor
//! queries through a K-means clustering index.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    VectorClusterStore                       │
//! │   insert · get · delete · top-k search · maintenance        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     KMeans strategy          │     Vector map + header      │
//! │  centroids · rebalance       │  id → (cluster, offset, md)  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │               BlockDevice (aligned block I/O)               │
//! │        O_DIRECT read-modify-write · buffered fallback       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vcstore::{StoreOptions, VectorClusterStore};
//!
//! let store = VectorClusterStore::open(
//!     "/tmp/vectors.vcs",
//!     "kmeans",
//!     4,
//!     8,
//!     StoreOptions::default(),
//! )?;
//!
//! store.store_vector(1, &[1.0, 0.0, 0.0, 0.0], b"first")?;
//! let hits = store.find_similar_vectors(&[1.0, 0.0, 0.0, 0.0], 5)?;
//! assert_eq!(hits[0].0, 1);
//! # Ok::<(), vcstore::StoreError>(())
//! ```
//!
//! Deletion never reclaims device space, and a store must only ever be
//! opened by one process at a time.

pub mod device;
pub mod format;
pub mod kmeans;
pub mod simd;
pub mod store;
pub mod strategy;

pub use device::{BlockDevice, DeviceError, DeviceOptions};
pub use format::{FormatError, StoreHeader};
pub use kmeans::KMeansStrategy;
pub use simd::{cosine_similarity, dot_product, l2_distance, l2_distance_squared};
pub use store::{
    ClusterStats, StoreError, StoreOptions, StoreStats, VectorClusterStore, VectorEntry,
};
pub use strategy::{create_strategy, ClusterInfo, ClusteringStrategy, StrategyError};
