//! On-device layout and the 512-byte store header
//!
//! # Device layout
//!
//! ```text
//! Offset            Size     Contents
//! ──────────────────────────────────────────────────────
//! 0                 512      StoreHeader
//! 512               50 MiB   Cluster map: u32 length + strategy blob
//! 512 + 50 MiB      10 MiB   Vector map: u32 count + packed entries
//! 512 + 60 MiB      …        Vector data, block-aligned raw f32 LE
//! ```
//!
//! # Header (little-endian, exactly 512 bytes)
//!
//! ```text
//! Offset   Size    Field
//! ──────────────────────────────────
//! 0x00     8       Signature "VCSTORE1"
//! 0x08     4       version (1)
//! 0x0C     4       vector_dim
//! 0x10     4       max_clusters
//! 0x14     4       vector_count
//! 0x18     4       next_id
//! 0x1C     8       cluster_map_offset
//! 0x24     8       vector_map_offset
//! 0x2C     8       data_offset
//! 0x34     32      strategy_name, NUL-padded
//! 0x54     432     reserved, zeroed
//! ```

use thiserror::Error;

/// Signature identifying a store device: "VCSTORE1"
pub const SIGNATURE: [u8; 8] = *b"VCSTORE1";

/// Current on-device format version.
pub const FORMAT_VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 512;

/// Fixed region plan: cluster map directly after the header.
pub const CLUSTER_MAP_OFFSET: u64 = HEADER_SIZE as u64;

/// Cluster-map region size. The strategy blob carries a full copy of
/// every vector, so this region is by far the largest metadata span.
pub const CLUSTER_MAP_REGION: u64 = 50 * 1024 * 1024;

/// Vector-map region size.
pub const VECTOR_MAP_REGION: u64 = 10 * 1024 * 1024;

/// Vector-map region start.
pub const VECTOR_MAP_OFFSET: u64 = CLUSTER_MAP_OFFSET + CLUSTER_MAP_REGION;

/// Vector-data region start.
pub const DATA_OFFSET: u64 = VECTOR_MAP_OFFSET + VECTOR_MAP_REGION;

/// Hard cap on the number of live vectors in one store.
pub const MAX_VECTORS: u32 = 1_000_000;

/// Hard cap on per-vector metadata bytes.
pub const MAX_METADATA_SIZE: u32 = 10_240;

const STRATEGY_NAME_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid store signature: expected VCSTORE1")]
    InvalidSignature,

    #[error("Unsupported store version: {0}")]
    UnsupportedVersion(u32),

    #[error("Corrupt store metadata: {0}")]
    Corrupt(String),
}

/// Parsed store header.
#[derive(Debug, Clone)]
pub struct StoreHeader {
    pub version: u32,
    pub vector_dim: u32,
    pub max_clusters: u32,
    pub vector_count: u32,
    pub next_id: u32,
    pub cluster_map_offset: u64,
    pub vector_map_offset: u64,
    pub data_offset: u64,
    pub strategy_name: String,
}

impl StoreHeader {
    /// Header for a freshly initialized store with the fixed region plan.
    pub fn new(vector_dim: u32, max_clusters: u32, strategy_name: &str) -> Self {
        Self {
            version: FORMAT_VERSION,
            vector_dim,
            max_clusters,
            vector_count: 0,
            next_id: 0,
            cluster_map_offset: CLUSTER_MAP_OFFSET,
            vector_map_offset: VECTOR_MAP_OFFSET,
            data_offset: DATA_OFFSET,
            strategy_name: strategy_name.to_string(),
        }
    }

    /// Parse a header from the first 512 bytes of the device.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Corrupt(format!(
                "header buffer too small: {} < {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        if bytes[0..8] != SIGNATURE {
            return Err(FormatError::InvalidSignature);
        }

        let version = read_u32(bytes, 0x08);
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let name_bytes = &bytes[0x34..0x34 + STRATEGY_NAME_LEN];
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(STRATEGY_NAME_LEN);
        let strategy_name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        Ok(Self {
            version,
            vector_dim: read_u32(bytes, 0x0C),
            max_clusters: read_u32(bytes, 0x10),
            vector_count: read_u32(bytes, 0x14),
            next_id: read_u32(bytes, 0x18),
            cluster_map_offset: read_u64(bytes, 0x1C),
            vector_map_offset: read_u64(bytes, 0x24),
            data_offset: read_u64(bytes, 0x2C),
            strategy_name,
        })
    }

    /// Serialize to exactly 512 bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&SIGNATURE);
        buf[0x08..0x0C].copy_from_slice(&self.version.to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&self.vector_dim.to_le_bytes());
        buf[0x10..0x14].copy_from_slice(&self.max_clusters.to_le_bytes());
        buf[0x14..0x18].copy_from_slice(&self.vector_count.to_le_bytes());
        buf[0x18..0x1C].copy_from_slice(&self.next_id.to_le_bytes());
        buf[0x1C..0x24].copy_from_slice(&self.cluster_map_offset.to_le_bytes());
        buf[0x24..0x2C].copy_from_slice(&self.vector_map_offset.to_le_bytes());
        buf[0x2C..0x34].copy_from_slice(&self.data_offset.to_le_bytes());

        let name = self.strategy_name.as_bytes();
        let n = name.len().min(STRATEGY_NAME_LEN - 1);
        buf[0x34..0x34 + n].copy_from_slice(&name[..n]);
        // strategy_name tail and reserved bytes stay zero
        buf
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}
