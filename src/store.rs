//! Clustered vector store over one block device
//!
//! [`VectorClusterStore`] owns the device handle, the clustering strategy,
//! and the authoritative vector-id map, all behind a single mutex: every
//! operation is fully serialized (single in-process writer). Each mutation
//! rewrites header, then vector map, then cluster map; there is no journal,
//! so a crash mid-sequence can leave the device inconsistent and a reopen
//! will surface it as a signature or corruption error.
//!
//! Vector data lives in a monotonic, block-aligned append region. Deleting
//! a vector frees no device space; the allocation cursor only moves
//! forward.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::{BlockDevice, DeviceError, DeviceOptions};
use crate::format::{
    FormatError, StoreHeader, CLUSTER_MAP_OFFSET, DATA_OFFSET, HEADER_SIZE, MAX_METADATA_SIZE,
    MAX_VECTORS, VECTOR_MAP_OFFSET,
};
use crate::simd::cosine_similarity;
use crate::strategy::{create_strategy, ClusteringStrategy, Cursor, StrategyError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector {0} not found")]
    VectorNotFound(u32),

    #[error("Dimension mismatch: got {actual}, expected {expected}")]
    DimensionMismatch { expected: u32, actual: usize },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

/// Tunables for opening a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Request O_DIRECT on the device. Falls back to buffered I/O when the
    /// OS refuses; [`VectorClusterStore::is_direct_io`] reports the mode
    /// actually in effect.
    pub direct_io: bool,
    /// Open the device read-only; mutating operations will fail.
    pub read_only: bool,
    /// How many candidate clusters a similarity search scans.
    pub search_breadth: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            direct_io: false,
            read_only: false,
            search_breadth: 3,
        }
    }
}

/// One live vector's bookkeeping record.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub vector_id: u32,
    pub cluster_id: u32,
    /// Byte offset of the raw f32 array in the data region.
    pub offset: u64,
    pub metadata: Vec<u8>,
}

/// Snapshot of store-wide state for diagnostics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub device_size: u64,
    pub block_size: u32,
    pub direct_io: bool,
    pub vector_dim: u32,
    pub vector_count: usize,
    pub next_id: u32,
    pub strategy_name: String,
    /// Live member count per cluster, ascending by cluster id.
    pub cluster_distribution: BTreeMap<u32, u32>,
}

/// Snapshot of one cluster for diagnostics.
#[derive(Debug, Clone)]
pub struct ClusterStats {
    pub cluster_id: u32,
    pub centroid: Vec<f32>,
    pub vector_count: u32,
    /// Up to the first 10 member ids.
    pub sample_members: Vec<u32>,
}

struct StoreState {
    device: BlockDevice,
    strategy: Box<dyn ClusteringStrategy>,
    vector_map: BTreeMap<u32, VectorEntry>,
    vector_dim: u32,
    max_clusters: u32,
    next_id: u32,
    /// Monotonic data-region allocation cursor, block-aligned.
    alloc_cursor: u64,
    search_breadth: usize,
}

/// Embedded vector store with a clustering index.
pub struct VectorClusterStore {
    state: Mutex<StoreState>,
}

impl VectorClusterStore {
    /// Open or create a store on `device_path`.
    ///
    /// When the device already carries a valid store, its header is
    /// authoritative: the on-disk dimension, cluster count, and strategy
    /// override the arguments. A blank device is formatted with a fresh
    /// header and empty maps.
    pub fn open<P: AsRef<Path>>(
        device_path: P,
        strategy_name: &str,
        vector_dim: u32,
        max_clusters: u32,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let device = BlockDevice::open(
            device_path.as_ref(),
            &DeviceOptions {
                read_only: options.read_only,
                direct: options.direct_io,
            },
        )?;

        let mut header_buf = vec![0u8; HEADER_SIZE];
        device.read(&mut header_buf, 0)?;

        let mut state = match StoreHeader::from_bytes(&header_buf) {
            Ok(header) => {
                info!(
                    vector_dim = header.vector_dim,
                    vector_count = header.vector_count,
                    strategy = %header.strategy_name,
                    "loading existing store"
                );
                if header.vector_dim != vector_dim {
                    warn!(
                        requested = vector_dim,
                        on_disk = header.vector_dim,
                        "dimension argument overridden by store header"
                    );
                }

                let mut strategy = create_strategy(&header.strategy_name);
                strategy.initialize(header.vector_dim, header.max_clusters);

                let mut state = StoreState {
                    device,
                    strategy,
                    vector_map: BTreeMap::new(),
                    vector_dim: header.vector_dim,
                    max_clusters: header.max_clusters,
                    next_id: header.next_id,
                    alloc_cursor: DATA_OFFSET,
                    search_breadth: options.search_breadth,
                };
                state.read_cluster_map()?;
                state.read_vector_map()?;
                state.reset_alloc_cursor();
                state
            }
            // A freshly extended device reads back as zeros; anything else
            // with a bad signature is a foreign or damaged store.
            Err(FormatError::InvalidSignature)
                if !options.read_only && header_buf.iter().all(|&b| b == 0) =>
            {
                info!(vector_dim, max_clusters, "formatting new store");
                let mut strategy = create_strategy(strategy_name);
                strategy.initialize(vector_dim, max_clusters);

                let mut state = StoreState {
                    device,
                    strategy,
                    vector_map: BTreeMap::new(),
                    vector_dim,
                    max_clusters,
                    next_id: 0,
                    alloc_cursor: DATA_OFFSET,
                    search_breadth: options.search_breadth,
                };
                state.write_header()?;
                state.write_vector_map()?;
                state.write_cluster_map()?;
                state
            }
            Err(err) => return Err(err.into()),
        };

        state.search_breadth = state.search_breadth.max(1);
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Store `vector` under `vector_id` with opaque `metadata`.
    ///
    /// Rejects wrong-dimension vectors, oversized metadata, and stores
    /// already at the vector cap. The data write happens before any
    /// in-memory bookkeeping, so a failed write leaves the store as it
    /// was.
    pub fn store_vector(
        &self,
        vector_id: u32,
        vector: &[f32],
        metadata: &[u8],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();

        if vector.len() != state.vector_dim as usize {
            return Err(StoreError::DimensionMismatch {
                expected: state.vector_dim,
                actual: vector.len(),
            });
        }
        if metadata.len() > MAX_METADATA_SIZE as usize {
            return Err(StoreError::CapacityExceeded(format!(
                "metadata is {} bytes, limit {}",
                metadata.len(),
                MAX_METADATA_SIZE
            )));
        }
        if !state.vector_map.contains_key(&vector_id)
            && state.vector_map.len() as u32 >= MAX_VECTORS
        {
            return Err(StoreError::CapacityExceeded(format!(
                "store holds {} vectors, limit {}",
                state.vector_map.len(),
                MAX_VECTORS
            )));
        }

        let offset = state.allocate_vector_space()?;
        state.write_vector(offset, vector)?;

        let cluster_id = state.strategy.add_vector(vector, vector_id);
        state.vector_map.insert(
            vector_id,
            VectorEntry {
                vector_id,
                cluster_id,
                offset,
                metadata: metadata.to_vec(),
            },
        );
        if vector_id >= state.next_id {
            state.next_id = vector_id + 1;
        }

        state.persist()?;
        debug!(vector_id, cluster_id, offset, "stored vector");
        Ok(())
    }

    /// Read a vector back from the device.
    pub fn retrieve_vector(&self, vector_id: u32) -> Result<Vec<f32>, StoreError> {
        let state = self.state.lock();
        let entry = state
            .vector_map
            .get(&vector_id)
            .ok_or(StoreError::VectorNotFound(vector_id))?;
        state.read_vector(entry.offset)
    }

    /// Metadata stored with a vector; empty when the id is unknown or the
    /// vector carries none.
    pub fn get_vector_metadata(&self, vector_id: u32) -> Vec<u8> {
        let state = self.state.lock();
        state
            .vector_map
            .get(&vector_id)
            .map(|e| e.metadata.clone())
            .unwrap_or_default()
    }

    /// Top-`k` ids by cosine similarity to `query`.
    ///
    /// Scans the `search_breadth` clusters whose centroids sit closest to
    /// the query, reads each member vector from the device, and ranks by
    /// similarity descending with ties broken by smaller id.
    pub fn find_similar_vectors(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(u32, f32)>, StoreError> {
        let state = self.state.lock();

        if query.len() != state.vector_dim as usize {
            return Err(StoreError::DimensionMismatch {
                expected: state.vector_dim,
                actual: query.len(),
            });
        }

        let candidate_clusters = state
            .strategy
            .find_closest_clusters(query, state.search_breadth);

        let mut candidates: Vec<(u32, f32)> = Vec::new();
        for entry in state.vector_map.values() {
            if !candidate_clusters.contains(&entry.cluster_id) {
                continue;
            }
            let vector = state.read_vector(entry.offset)?;
            candidates.push((entry.vector_id, cosine_similarity(query, &vector)));
        }

        debug!(
            scanned = candidates.len(),
            clusters = candidate_clusters.len(),
            "similarity search"
        );

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Remove a vector from the index and the map.
    ///
    /// The data-region bytes stay allocated; only the bookkeeping goes.
    pub fn delete_vector(&self, vector_id: u32) -> Result<(), StoreError> {
        let mut state = self.state.lock();

        if !state.vector_map.contains_key(&vector_id) {
            return Err(StoreError::VectorNotFound(vector_id));
        }

        state.strategy.remove_vector(vector_id);
        state.vector_map.remove(&vector_id);
        state.persist()?;

        debug!(vector_id, "deleted vector");
        Ok(())
    }

    /// Rebalance the clustering index and rewrite any vector whose
    /// assignment moved to a fresh data-region slot.
    pub fn perform_maintenance(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        info!("maintenance started");

        if !state.strategy.rebalance() {
            debug!("clusters already balanced");
            return Ok(());
        }

        let ids: Vec<u32> = state.vector_map.keys().copied().collect();
        let mut moved = 0usize;
        for vector_id in ids {
            let (old_cluster, _old_offset) = {
                let entry = &state.vector_map[&vector_id];
                (entry.cluster_id, entry.offset)
            };
            let new_cluster = match state.strategy.cluster_of(vector_id) {
                Some(c) => c,
                None => continue,
            };
            if new_cluster == old_cluster {
                continue;
            }

            // The strategy's in-RAM copy is authoritative for rewrites.
            let vector = match state.strategy.vector(vector_id) {
                Some(v) => v.to_vec(),
                None => continue,
            };
            let new_offset = state.allocate_vector_space()?;
            state.write_vector(new_offset, &vector)?;

            let entry = state.vector_map.get_mut(&vector_id).unwrap();
            entry.cluster_id = new_cluster;
            entry.offset = new_offset;
            moved += 1;
            debug!(vector_id, old_cluster, new_cluster, "vector moved");
        }

        state.persist()?;
        info!(moved, "maintenance finished");
        Ok(())
    }

    /// Write the strategy blob to `path` and the vector map to
    /// `path.vmap`, each through a temp file renamed into place.
    pub fn save_index<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let state = self.state.lock();
        let path = path.as_ref();

        write_atomically(path, &state.strategy.serialize())?;
        write_atomically(&vmap_path(path), &state.serialize_vector_map_entries())?;

        info!(path = %path.display(), vectors = state.vector_map.len(), "index saved");
        Ok(())
    }

    /// Restore the strategy and vector map from [`Self::save_index`]
    /// files, then persist the restored state to the device.
    ///
    /// The data region is rebuilt from the strategy's vector copies at the
    /// recorded offsets, so loading onto a blank device reconstructs a
    /// fully queryable store.
    pub fn load_index<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let path = path.as_ref();

        let blob = read_file(path)?;
        state.strategy.deserialize(&blob)?;

        let vmap_blob = read_file(&vmap_path(path))?;
        let entries = parse_vector_map_entries(&vmap_blob)?;

        state.vector_map.clear();
        for entry in entries {
            if entry.vector_id >= state.next_id {
                state.next_id = entry.vector_id + 1;
            }
            state.vector_map.insert(entry.vector_id, entry);
        }

        for entry in state.vector_map.values() {
            if let Some(vector) = state.strategy.vector(entry.vector_id) {
                let buf: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
                state.device.write(&buf, entry.offset)?;
            }
        }

        state.reset_alloc_cursor();
        state.persist()?;

        info!(path = %path.display(), vectors = state.vector_map.len(), "index loaded");
        Ok(())
    }

    /// Number of live vectors.
    pub fn vector_count(&self) -> usize {
        self.state.lock().vector_map.len()
    }

    /// Whether the device descriptor ended up in O_DIRECT mode.
    pub fn is_direct_io(&self) -> bool {
        self.state.lock().device.is_direct()
    }

    /// Store-wide snapshot for diagnostics and logging sinks.
    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();

        let mut cluster_distribution: BTreeMap<u32, u32> = BTreeMap::new();
        for entry in state.vector_map.values() {
            *cluster_distribution.entry(entry.cluster_id).or_insert(0) += 1;
        }

        StoreStats {
            device_size: state.device.size(),
            block_size: state.device.block_size(),
            direct_io: state.device.is_direct(),
            vector_dim: state.vector_dim,
            vector_count: state.vector_map.len(),
            next_id: state.next_id,
            strategy_name: state.strategy.name().to_string(),
            cluster_distribution,
        }
    }

    /// Per-cluster snapshot, `None` for unknown ids.
    pub fn cluster_stats(&self, cluster_id: u32) -> Option<ClusterStats> {
        let state = self.state.lock();
        let centroid = state.strategy.centroid(cluster_id)?.to_vec();

        let sample_members: Vec<u32> = state
            .vector_map
            .values()
            .filter(|e| e.cluster_id == cluster_id)
            .map(|e| e.vector_id)
            .take(10)
            .collect();

        Some(ClusterStats {
            cluster_id,
            centroid,
            vector_count: state.strategy.cluster_size(cluster_id),
            sample_members,
        })
    }
}

impl StoreState {
    /// Claim the next block-aligned data-region slot.
    fn allocate_vector_space(&mut self) -> Result<u64, StoreError> {
        let block = self.device.block_size() as u64;
        let offset = self.alloc_cursor.div_ceil(block) * block;
        let end = offset + self.vector_dim as u64 * 4;

        if end > self.device.size() {
            return Err(StoreError::CapacityExceeded(format!(
                "data region exhausted: need [{}, {}), device is {} bytes",
                offset,
                end,
                self.device.size()
            )));
        }

        self.alloc_cursor = end;
        Ok(offset)
    }

    /// Recompute the cursor from live entries so reopened stores append
    /// after existing data instead of overwriting it.
    fn reset_alloc_cursor(&mut self) {
        let vector_bytes = self.vector_dim as u64 * 4;
        self.alloc_cursor = self
            .vector_map
            .values()
            .map(|e| e.offset + vector_bytes)
            .max()
            .unwrap_or(DATA_OFFSET)
            .max(DATA_OFFSET);
    }

    fn write_vector(&self, offset: u64, vector: &[f32]) -> Result<(), StoreError> {
        let mut buf = Vec::with_capacity(vector.len() * 4);
        for &v in vector {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        self.device.write(&buf, offset)?;
        Ok(())
    }

    fn read_vector(&self, offset: u64) -> Result<Vec<f32>, StoreError> {
        let mut buf = vec![0u8; self.vector_dim as usize * 4];
        self.device.read(&mut buf, offset)?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    /// Rewrite all persistent metadata: header, then vector map, then
    /// cluster map. No fsync between steps; a failure leaves the device
    /// at the last completed step.
    fn persist(&mut self) -> Result<(), StoreError> {
        self.write_header()?;
        self.write_vector_map()?;
        self.write_cluster_map()?;
        Ok(())
    }

    fn write_header(&self) -> Result<(), StoreError> {
        let header = StoreHeader {
            version: crate::format::FORMAT_VERSION,
            vector_dim: self.vector_dim,
            max_clusters: self.max_clusters,
            vector_count: self.vector_map.len() as u32,
            next_id: self.next_id,
            cluster_map_offset: CLUSTER_MAP_OFFSET,
            vector_map_offset: VECTOR_MAP_OFFSET,
            data_offset: DATA_OFFSET,
            strategy_name: self.strategy.name().to_string(),
        };
        self.device.write(&header.to_bytes(), 0)?;
        Ok(())
    }

    fn write_cluster_map(&self) -> Result<(), StoreError> {
        let blob = self.strategy.serialize();
        let region = VECTOR_MAP_OFFSET - CLUSTER_MAP_OFFSET;

        if blob.len() as u64 + 4 > region {
            return Err(StoreError::CapacityExceeded(format!(
                "cluster map is {} bytes, region holds {}",
                blob.len() + 4,
                region
            )));
        }

        let mut buf = Vec::with_capacity(4 + blob.len());
        buf.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        buf.extend_from_slice(&blob);
        self.device.write(&buf, CLUSTER_MAP_OFFSET)?;

        debug!(bytes = blob.len(), "wrote cluster map");
        Ok(())
    }

    fn read_cluster_map(&mut self) -> Result<(), StoreError> {
        let mut len_buf = [0u8; 4];
        self.device.read(&mut len_buf, CLUSTER_MAP_OFFSET)?;
        let len = u32::from_le_bytes(len_buf) as u64;

        if len == 0 {
            debug!("cluster map empty");
            return Ok(());
        }
        if len > VECTOR_MAP_OFFSET - CLUSTER_MAP_OFFSET - 4 {
            return Err(FormatError::Corrupt(format!(
                "cluster map length {} exceeds region",
                len
            ))
            .into());
        }

        let mut blob = vec![0u8; len as usize];
        self.device.read(&mut blob, CLUSTER_MAP_OFFSET + 4)?;
        self.strategy.deserialize(&blob)?;

        debug!(bytes = len, "read cluster map");
        Ok(())
    }

    /// Count-prefixed packed entries, the shared payload of the device's
    /// vector-map region and the auxiliary `.vmap` file.
    fn serialize_vector_map_entries(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.vector_map.len() as u32).to_le_bytes());
        for entry in self.vector_map.values() {
            buf.extend_from_slice(&entry.vector_id.to_le_bytes());
            buf.extend_from_slice(&entry.cluster_id.to_le_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&(entry.metadata.len() as u32).to_le_bytes());
            buf.extend_from_slice(&entry.metadata);
        }
        buf
    }

    fn write_vector_map(&self) -> Result<(), StoreError> {
        let buf = self.serialize_vector_map_entries();
        let region = DATA_OFFSET - VECTOR_MAP_OFFSET;

        if buf.len() as u64 > region {
            return Err(StoreError::CapacityExceeded(format!(
                "vector map is {} bytes, region holds {}",
                buf.len(),
                region
            )));
        }

        self.device.write(&buf, VECTOR_MAP_OFFSET)?;
        debug!(vectors = self.vector_map.len(), "wrote vector map");
        Ok(())
    }

    fn read_vector_map(&mut self) -> Result<(), StoreError> {
        let mut count_buf = [0u8; 4];
        self.device.read(&mut count_buf, VECTOR_MAP_OFFSET)?;
        let count = u32::from_le_bytes(count_buf);

        if count > MAX_VECTORS {
            return Err(FormatError::Corrupt(format!(
                "vector count {} exceeds limit {}",
                count, MAX_VECTORS
            ))
            .into());
        }

        // Entries are variable length (metadata), so read the whole
        // region's worth of used bytes in one pass: upper bound is the
        // region size, but reading entry by entry through ABIO would be
        // one syscall per field. Read a generous slab instead.
        let region = (DATA_OFFSET - VECTOR_MAP_OFFSET) as usize;
        let fixed = 4 + 4 + 8 + 4;
        let upper = (count as usize)
            .saturating_mul(fixed + MAX_METADATA_SIZE as usize)
            .saturating_add(4)
            .min(region);
        let mut slab = vec![0u8; upper];
        self.device.read(&mut slab, VECTOR_MAP_OFFSET)?;

        let mut cur = Cursor::new(&slab);
        cur.u32()?; // count, already parsed

        self.vector_map.clear();
        for _ in 0..count {
            let entry = parse_one_entry(&mut cur)?;
            if entry.vector_id >= self.next_id {
                self.next_id = entry.vector_id + 1;
            }
            self.vector_map.insert(entry.vector_id, entry);
        }

        debug!(vectors = count, "read vector map");
        Ok(())
    }
}

/// Parse one packed entry: id, cluster, offset, metadata length, metadata.
fn parse_one_entry(cur: &mut Cursor<'_>) -> Result<VectorEntry, StoreError> {
    let vector_id = cur.u32()?;
    let cluster_id = cur.u32()?;
    let offset = cur.u64()?;
    let metadata_size = cur.u32()?;

    if metadata_size > MAX_METADATA_SIZE {
        return Err(FormatError::Corrupt(format!(
            "metadata size {} for vector {} exceeds limit {}",
            metadata_size, vector_id, MAX_METADATA_SIZE
        ))
        .into());
    }
    if offset < DATA_OFFSET {
        return Err(FormatError::Corrupt(format!(
            "vector {} offset {} lies before the data region",
            vector_id, offset
        ))
        .into());
    }

    let metadata = cur.bytes(metadata_size as usize)?.to_vec();
    Ok(VectorEntry {
        vector_id,
        cluster_id,
        offset,
        metadata,
    })
}

/// Parse a `.vmap` auxiliary file. The id is written once per entry and
/// read once, serving as both the map key and the entry field.
fn parse_vector_map_entries(data: &[u8]) -> Result<Vec<VectorEntry>, StoreError> {
    let mut cur = Cursor::new(data);
    let count = cur.u32()?;

    if count > MAX_VECTORS {
        return Err(FormatError::Corrupt(format!(
            "vector count {} exceeds limit {}",
            count, MAX_VECTORS
        ))
        .into());
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(parse_one_entry(&mut cur)?);
    }
    Ok(entries)
}

fn vmap_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".vmap");
    PathBuf::from(os)
}

/// Write `data` to a sibling temp file and rename it over `path`.
fn write_atomically(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(data)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    fs::File::open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}
