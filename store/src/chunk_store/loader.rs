//! Shared, cache-fronted access to chunks, local or remote (§4.10, §9
//! "shared chunk loaders between objects").
//!
//! A `ChunkLoader` is reference-counted and meant to be held by every
//! object facade that reads from the same store — callers clone the
//! `Arc` rather than opening a second handle onto the chunk store.

use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::OnceCell;
use ustore_primitives::{Hash, UResult};

use crate::chunk::Chunk;
use crate::chunk_store::ChunkStore;

/// Fetches a chunk this node does not own from the node that does. Kept
/// as a trait so `store/` does not need a hard dependency on the network
/// transport in `partition.rs` — the partitioner's fetch client implements
/// this for `ChunkLoader` to call.
pub trait RemoteFetch: Send + Sync {
    /// `None` if the hash owner is this node itself (no fetch needed).
    fn owner_node(&self, hash: &Hash) -> Option<usize>;
    fn fetch(&self, hash: &Hash, owner_node: usize) -> UResult<Option<Chunk>>;
}

const DEFAULT_CACHE_CAPACITY: usize = 4096;

pub struct ChunkLoader {
    store: Arc<dyn ChunkStore>,
    cache: Mutex<LruCache<Hash, Chunk>>,
    remote: OnceCell<Arc<dyn RemoteFetch>>,
}

impl ChunkLoader {
    pub fn new(store: Arc<dyn ChunkStore>) -> Arc<Self> {
        Self::with_capacity(store, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn ChunkStore>, capacity: usize) -> Arc<Self> {
        Arc::new(ChunkLoader {
            store,
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            remote: OnceCell::new(),
        })
    }

    /// Wire in the cross-node fetch client. Idempotent-once: a loader is
    /// given at most one remote, set once at construction time by the
    /// engine that owns the partitioner.
    pub fn set_remote(&self, remote: Arc<dyn RemoteFetch>) {
        let _ = self.remote.set(remote);
    }

    pub fn get(&self, hash: &Hash) -> UResult<Option<Chunk>> {
        if hash.is_null() {
            return Ok(None);
        }
        if let Some(chunk) = self.cache.lock().unwrap().get(hash).cloned() {
            return Ok(Some(chunk));
        }
        if let Some(chunk) = self.store.get(hash)? {
            self.cache.lock().unwrap().put(*hash, chunk.clone());
            return Ok(Some(chunk));
        }
        if let Some(remote) = self.remote.get() {
            if let Some(owner) = remote.owner_node(hash) {
                if let Some(chunk) = remote.fetch(hash, owner)? {
                    self.cache.lock().unwrap().put(*hash, chunk.clone());
                    return Ok(Some(chunk));
                }
            }
        }
        Ok(None)
    }

    pub fn put(&self, chunk: &Chunk) -> UResult<bool> {
        let accepted = self.store.put(chunk)?;
        self.cache.lock().unwrap().put(chunk.hash(), chunk.clone());
        Ok(accepted)
    }

    pub fn exists(&self, hash: &Hash) -> UResult<bool> {
        if hash.is_null() {
            return Ok(false);
        }
        if self.cache.lock().unwrap().contains(hash) {
            return Ok(true);
        }
        self.store.exists(hash)
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }
}
