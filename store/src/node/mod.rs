//! Node readers over a decoded chunk (§4.5).
//!
//! A [`SeqNode`] is a read-only, parsed view of one chunk: either a leaf
//! (blob/string/list/map/set) or a meta (internal) node. `SeqNode` is a
//! tagged variant with dispatched methods rather than a trait object — no
//! inheritance is needed, and every variant already owns its parsed
//! [`Segment`] (§9 design note "runtime polymorphism among node/chunker
//! kinds").

mod leaf;
mod meta;

pub use leaf::LeafNode;
pub use meta::MetaNode;

use ustore_primitives::{ChunkType, Hash, OrderedKey, UResult};

use crate::chunk::Chunk;

#[derive(Clone, Debug)]
pub enum SeqNode {
    Leaf(LeafNode),
    Meta(MetaNode),
}

impl SeqNode {
    /// Parse `chunk` as a node of `object_kind` (the kind of the object
    /// this chunk belongs to — needed to disambiguate a Meta chunk's
    /// index-vs-byte key flavor, which isn't recoverable from the chunk's
    /// own tag).
    pub fn load(chunk: Chunk, object_kind: ChunkType) -> UResult<SeqNode> {
        if chunk.chunk_type() == ChunkType::Meta {
            Ok(SeqNode::Meta(MetaNode::load(chunk, object_kind.is_index_addressed())?))
        } else {
            Ok(SeqNode::Leaf(LeafNode::load(chunk)?))
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SeqNode::Leaf(_))
    }

    pub fn num_entries(&self) -> usize {
        match self {
            SeqNode::Leaf(l) => l.num_entries(),
            SeqNode::Meta(m) => m.num_entries(),
        }
    }

    /// Number of elements in the subtree rooted here (equals
    /// `num_entries()` on a leaf).
    pub fn num_elements(&self) -> u64 {
        match self {
            SeqNode::Leaf(l) => l.num_entries() as u64,
            SeqNode::Meta(m) => m.num_elements_rooted(),
        }
    }

    /// The ordered key of the `i`-th entry. `base_index` is the global
    /// index of entry 0 of this node and is only consulted for
    /// index-addressed leaf nodes (meta entries already carry an absolute
    /// index).
    pub fn key(&self, i: usize, base_index: u64) -> OrderedKey {
        match self {
            SeqNode::Leaf(l) => l.key(i, base_index),
            SeqNode::Meta(m) => m.key(i),
        }
    }

    pub fn entry_data(&self, i: usize) -> &[u8] {
        match self {
            SeqNode::Leaf(l) => l.entry_data(i),
            SeqNode::Meta(_) => panic!("entry_data() is not defined on a meta node"),
        }
    }

    pub fn entry_len(&self, i: usize) -> usize {
        self.entry_data(i).len()
    }

    pub fn hash(&self) -> Hash {
        match self {
            SeqNode::Leaf(l) => l.chunk().hash(),
            SeqNode::Meta(m) => m.chunk().hash(),
        }
    }

    pub fn as_meta(&self) -> Option<&MetaNode> {
        match self {
            SeqNode::Meta(m) => Some(m),
            SeqNode::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            SeqNode::Leaf(l) => Some(l),
            SeqNode::Meta(_) => None,
        }
    }
}
