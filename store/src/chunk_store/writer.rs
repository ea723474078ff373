//! The chunk writer the node builder persists freshly-chunked entries
//! through (§2's data-flow paragraph: "each new chunk is written through
//! the chunk writer into the chunk store").

use std::sync::Arc;

use ustore_primitives::{Hash, UResult};

use crate::chunk::Chunk;
use crate::chunk_store::ChunkLoader;

/// A thin handle over a [`ChunkLoader`] offering only the write path, so
/// the node builder's dependency surface makes clear it never reads
/// through a writer — it reads existing chunks through the loader handed
/// to the cursor, and only writes the new chunks it produces.
#[derive(Clone)]
pub struct ChunkWriter {
    loader: Arc<ChunkLoader>,
}

impl ChunkWriter {
    pub fn new(loader: Arc<ChunkLoader>) -> Self {
        ChunkWriter { loader }
    }

    /// Write `chunk`, returning its hash. Idempotent: writing the same
    /// bytes twice is indistinguishable from writing them once.
    pub fn write(&self, chunk: &Chunk) -> UResult<Hash> {
        self.loader.put(chunk)?;
        Ok(chunk.hash())
    }

    pub fn loader(&self) -> &Arc<ChunkLoader> {
        &self.loader
    }
}
