//! The chunk store: persists chunks and retrieves them by hash (§4.1).

mod loader;
mod segment_file;
mod writer;

pub use loader::{ChunkLoader, RemoteFetch};
pub use segment_file::SegmentFileStore;
pub use writer::ChunkWriter;

use std::collections::HashMap;

use ustore_primitives::{ChunkType, Hash, UResult};

use crate::chunk::Chunk;

/// Per-type chunk counts and byte totals, plus segment occupancy —
/// `StoreInfo::Print()` in the original sources.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct StoreInfo {
    pub num_chunks: u64,
    pub num_bytes: u64,
    pub chunks_by_type: HashMap<String, u64>,
    pub bytes_by_type: HashMap<String, u64>,
    pub num_segments_total: u64,
    pub num_segments_major: u64,
    pub num_segments_minor: u64,
    pub num_segments_free: u64,
}

impl std::fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "chunks: {} ({} bytes)", self.num_chunks, self.num_bytes)?;
        let mut kinds: Vec<_> = self.chunks_by_type.keys().collect();
        kinds.sort();
        for kind in kinds {
            writeln!(
                f,
                "  {kind}: {} chunks, {} bytes",
                self.chunks_by_type.get(kind).unwrap_or(&0),
                self.bytes_by_type.get(kind).unwrap_or(&0)
            )?;
        }
        writeln!(
            f,
            "segments: {} total ({} major, {} minor, {} free)",
            self.num_segments_total,
            self.num_segments_major,
            self.num_segments_minor,
            self.num_segments_free
        )
    }
}

impl StoreInfo {
    pub fn record(&mut self, chunk_type: ChunkType, num_bytes: u64) {
        self.num_chunks += 1;
        self.num_bytes += num_bytes;
        let key: &'static str = chunk_type.into();
        *self.chunks_by_type.entry(key.to_string()).or_insert(0) += 1;
        *self.bytes_by_type.entry(key.to_string()).or_insert(0) += num_bytes;
    }
}

/// Persist chunks and retrieve them by hash. `put` is idempotent: two puts
/// of the same hash must be indistinguishable from one.
pub trait ChunkStore: Send + Sync {
    fn put(&self, chunk: &Chunk) -> UResult<bool>;
    fn get(&self, hash: &Hash) -> UResult<Option<Chunk>>;
    fn exists(&self, hash: &Hash) -> UResult<bool>;
    fn info(&self) -> UResult<StoreInfo>;
    /// Force a durability barrier: everything accepted by `put` before this
    /// call returns is fsync'd before it returns.
    fn sync(&self) -> UResult<()>;
}
