use ustore_primitives::{ChunkType, OrderedKey, UResult};

use crate::chunk::Chunk;
use crate::chunker;
use crate::segment::{Entry, Segment};

/// A parsed leaf node: blob, list, map, or set. String is a single-chunk
/// scalar value and does not go through `LeafNode` (see `chunker::{encode,
/// decode}_string`, used directly by the string facade).
#[derive(Clone, Debug)]
pub struct LeafNode {
    chunk: Chunk,
    segment: Segment,
}

impl LeafNode {
    pub fn load(chunk: Chunk) -> UResult<LeafNode> {
        let segment = chunker::decode_leaf(&chunk)?;
        Ok(LeafNode { chunk, segment })
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk.chunk_type()
    }

    pub fn num_entries(&self) -> usize {
        self.segment.num_entries()
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn key(&self, i: usize, base_index: u64) -> OrderedKey {
        match self.segment.entry(i) {
            Entry::Byte(_) | Entry::ListValue(_) => OrderedKey::Index(base_index + i as u64),
            Entry::MapEntry { key, .. } | Entry::SetEntry { key } => {
                OrderedKey::Bytes(key.clone())
            }
            Entry::Child { .. } => unreachable!("leaf segment cannot contain Child entries"),
        }
    }

    /// Raw element bytes: the byte itself for blob, the value for list
    /// and map, the key for set (set has no separate value).
    pub fn entry_data(&self, i: usize) -> &[u8] {
        match self.segment.entry(i) {
            Entry::Byte(b) => std::slice::from_ref(b),
            Entry::ListValue(v) => v,
            Entry::MapEntry { value, .. } => value,
            Entry::SetEntry { key } => key,
            Entry::Child { .. } => unreachable!("leaf segment cannot contain Child entries"),
        }
    }

    /// Find the smallest local entry index whose key is `>= key` (used by
    /// `NodeCursor::by_key` once it reaches a leaf). Returns
    /// `num_entries()` if every entry's key is smaller.
    pub fn lower_bound(&self, key: &OrderedKey) -> usize {
        let mut lo = 0usize;
        let mut hi = self.num_entries();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let mid_key = match self.segment.entry(mid) {
                Entry::MapEntry { key: k, .. } | Entry::SetEntry { key: k } => {
                    OrderedKey::Bytes(k.clone())
                }
                _ => unreachable!("lower_bound is only meaningful on key-addressed leaves"),
            };
            if &mid_key < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}
