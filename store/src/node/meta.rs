use ustore_primitives::{Hash, OrderedKey, UError, UResult};

use crate::chunk::Chunk;
use crate::chunker;
use crate::segment::{Entry, Segment};

/// A parsed internal (Meta) node: an ordered list of child references.
#[derive(Clone, Debug)]
pub struct MetaNode {
    chunk: Chunk,
    segment: Segment,
    index_addressed: bool,
}

impl MetaNode {
    pub fn load(chunk: Chunk, index_addressed: bool) -> UResult<MetaNode> {
        let segment = chunker::decode_meta(&chunk, index_addressed)?;
        Ok(MetaNode { chunk, segment, index_addressed })
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn num_entries(&self) -> usize {
        self.segment.num_entries()
    }

    pub fn index_addressed(&self) -> bool {
        self.index_addressed
    }

    pub fn key(&self, i: usize) -> OrderedKey {
        match self.segment.entry(i) {
            Entry::Child { ordered_key, .. } => ordered_key.clone(),
            _ => unreachable!("meta segment can only contain Child entries"),
        }
    }

    pub fn child_hash(&self, i: usize) -> Hash {
        match self.segment.entry(i) {
            Entry::Child { child_hash, .. } => *child_hash,
            _ => unreachable!("meta segment can only contain Child entries"),
        }
    }

    pub fn child_num_elements_rooted(&self, i: usize) -> u64 {
        match self.segment.entry(i) {
            Entry::Child { num_elements_rooted, .. } => *num_elements_rooted,
            _ => unreachable!("meta segment can only contain Child entries"),
        }
    }

    pub fn child_num_leaves(&self, i: usize) -> u32 {
        match self.segment.entry(i) {
            Entry::Child { num_leaves, .. } => *num_leaves,
            _ => unreachable!("meta segment can only contain Child entries"),
        }
    }

    /// Total number of elements rooted at this node.
    pub fn num_elements_rooted(&self) -> u64 {
        (0..self.num_entries()).map(|i| self.child_num_elements_rooted(i)).sum()
    }

    /// Locate the child covering global element index `elem_idx`, given
    /// `base_index` — the global index of this node's first element.
    /// Returns `(child_index, local_elem_idx_within_child)`.
    pub fn child_hash_by_index(&self, elem_idx: u64, base_index: u64) -> UResult<(usize, u64)> {
        assert!(self.index_addressed, "child_hash_by_index on a key-addressed meta node");
        let mut cursor = base_index;
        for i in 0..self.num_entries() {
            let width = self.child_num_elements_rooted(i);
            if elem_idx < cursor + width {
                return Ok((i, elem_idx - cursor));
            }
            cursor += width;
        }
        Err(UError::InvalidRange { pos: elem_idx, len: cursor })
    }

    /// Locate the child that would contain `key` — the first child whose
    /// ordered key is `>= key`, or the last child if `key` exceeds every
    /// child's maximum (matching "descends via `child_hash_by_key`").
    pub fn child_hash_by_key(&self, key: &OrderedKey) -> usize {
        let mut lo = 0usize;
        let mut hi = self.num_entries();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if &self.key(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.min(self.num_entries().saturating_sub(1))
    }
}
