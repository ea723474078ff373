//! Positional iterator into a prolly tree, one frame per level (§4.6).
//!
//! Modeled as a `Vec` of frames indexed by level (§9 design note: "cyclic
//! ownership between cursor and its parent cursor" — a parent pointer is
//! just `frames[level + 1]`, so no reference cycle is ever constructed).

use std::sync::Arc;

use ustore_primitives::{ChunkType, Hash, OrderedKey, UError, UResult};

use crate::chunk_store::ChunkLoader;
use crate::node::SeqNode;

struct Frame {
    node: SeqNode,
    /// Current entry index. `-1` is the `isBegin` sentinel, `num_entries`
    /// is the `isEnd` sentinel.
    idx: i64,
    /// Global index of this frame's entry 0. Only meaningful for
    /// index-addressed objects (blob, list); ignored for key-addressed
    /// ones, whose meta entries already carry an absolute key.
    base_index: u64,
}

/// A stack of frames pointing at one leaf entry of a prolly tree.
pub struct NodeCursor {
    loader: Arc<ChunkLoader>,
    object_kind: ChunkType,
    frames: Vec<Frame>,
}

impl NodeCursor {
    fn load_node(loader: &ChunkLoader, hash: &Hash, object_kind: ChunkType) -> UResult<SeqNode> {
        let chunk = loader.get(hash)?.ok_or(UError::ChunkNotExists(*hash))?;
        SeqNode::load(chunk, object_kind)
    }

    /// Descend from `root_hash` to the leaf entry holding global element
    /// index `elem_idx` (index-addressed objects only).
    pub fn by_index(
        loader: Arc<ChunkLoader>,
        root_hash: &Hash,
        object_kind: ChunkType,
        elem_idx: u64,
    ) -> UResult<NodeCursor> {
        assert!(object_kind.is_index_addressed(), "by_index on a key-addressed object kind");
        let mut frames = Vec::new();
        let mut hash = *root_hash;
        let mut base_index = 0u64;
        loop {
            let node = Self::load_node(&loader, &hash, object_kind)?;
            match &node {
                SeqNode::Meta(meta) => {
                    let (child_idx, local_elem_idx) =
                        meta.child_hash_by_index(elem_idx, base_index)?;
                    let child_base = elem_idx - local_elem_idx;
                    let child_hash = meta.child_hash(child_idx);
                    frames.push(Frame { node, idx: child_idx as i64, base_index });
                    base_index = child_base;
                    hash = child_hash;
                }
                SeqNode::Leaf(leaf) => {
                    let local_idx = (elem_idx - base_index) as i64;
                    let idx = local_idx.min(leaf.num_entries() as i64);
                    frames.push(Frame { node, idx, base_index });
                    break;
                }
            }
        }
        Ok(NodeCursor { loader, object_kind, frames })
    }

    /// Descend from `root_hash` to the smallest entry whose key is `>=
    /// key` (key-addressed objects only); lands on the end sentinel of
    /// the last leaf if no such entry exists.
    pub fn by_key(
        loader: Arc<ChunkLoader>,
        root_hash: &Hash,
        object_kind: ChunkType,
        key: &OrderedKey,
    ) -> UResult<NodeCursor> {
        assert!(!object_kind.is_index_addressed(), "by_key on an index-addressed object kind");
        let mut frames = Vec::new();
        let mut hash = *root_hash;
        loop {
            let node = Self::load_node(&loader, &hash, object_kind)?;
            match &node {
                SeqNode::Meta(meta) => {
                    let child_idx = meta.child_hash_by_key(key);
                    let child_hash = meta.child_hash(child_idx);
                    frames.push(Frame { node, idx: child_idx as i64, base_index: 0 });
                    hash = child_hash;
                }
                SeqNode::Leaf(leaf) => {
                    let idx = leaf.lower_bound(key) as i64;
                    frames.push(Frame { node, idx, base_index: 0 });
                    break;
                }
            }
        }
        Ok(NodeCursor { loader, object_kind, frames })
    }

    fn leaf_frame(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn is_end(&self) -> bool {
        let f = self.leaf_frame();
        f.idx >= f.node.num_entries() as i64
    }

    pub fn is_begin(&self) -> bool {
        self.leaf_frame().idx < 0
    }

    /// The local leaf entry index, valid when neither `is_end` nor
    /// `is_begin`.
    pub fn leaf_index(&self) -> usize {
        self.leaf_frame().idx as usize
    }

    pub fn leaf_node(&self) -> &SeqNode {
        &self.leaf_frame().node
    }

    pub fn key(&self) -> OrderedKey {
        let f = self.leaf_frame();
        f.node.key(f.idx.clamp(0, f.node.num_entries() as i64) as usize, f.base_index)
    }

    pub fn entry_data(&self) -> &[u8] {
        self.leaf_frame().node.entry_data(self.leaf_index())
    }

    /// Global element index this cursor points at (index-addressed only).
    pub fn global_index(&self) -> u64 {
        let f = self.leaf_frame();
        f.base_index + f.idx.max(0) as u64
    }

    /// Step to the next entry. If at the end of the current leaf and
    /// `cross_boundary` is set, climbs to the parent frame, advances it,
    /// and reloads a fresh leaf at position 0. Returns whether a chunk
    /// boundary was crossed.
    pub fn advance(&mut self, cross_boundary: bool) -> UResult<bool> {
        let leaf_num_entries = self.leaf_frame().node.num_entries() as i64;
        if self.leaf_frame().idx + 1 < leaf_num_entries {
            self.frames[0].idx += 1;
            return Ok(false);
        }
        if !cross_boundary {
            self.frames[0].idx = leaf_num_entries;
            return Ok(false);
        }
        self.advance_level(1)?;
        Ok(true)
    }

    fn advance_level(&mut self, level: usize) -> UResult<()> {
        if level >= self.frames.len() {
            // Exhausted the root: leave every frame at its end sentinel.
            for f in &mut self.frames {
                f.idx = f.node.num_entries() as i64;
            }
            return Ok(());
        }
        let num_entries = self.frames[level].node.num_entries() as i64;
        if self.frames[level].idx + 1 < num_entries {
            self.frames[level].idx += 1;
        } else {
            self.advance_level(level + 1)?;
            if self.frames[level + 1..].iter().all(|f| f.idx >= f.node.num_entries() as i64) {
                // Parent chain also exhausted; nothing below to reload.
                self.frames[level].idx = num_entries;
                return Ok(());
            }
            self.frames[level].idx = 0;
        }
        self.reload_below(level)
    }

    /// After `frames[level].idx` changed to point at a new child, reload
    /// that child (and everything below it down to the leaf).
    fn reload_below(&mut self, level: usize) -> UResult<()> {
        let meta = self.frames[level]
            .node
            .as_meta()
            .expect("reload_below called on a non-meta frame");
        let idx = self.frames[level].idx as usize;
        let child_hash = meta.child_hash(idx);
        let child_base_index = if self.object_kind.is_index_addressed() {
            (0..idx).map(|i| meta.child_num_elements_rooted(i)).sum::<u64>()
                + self.frames[level].base_index
        } else {
            0
        };
        let child = Self::load_node(&self.loader, &child_hash, self.object_kind)?;
        if level == 1 {
            self.frames[0] = Frame { node: child, idx: 0, base_index: child_base_index };
        } else {
            self.frames[level - 1] = Frame { node: child, idx: 0, base_index: child_base_index };
            self.reload_below(level - 1)?;
        }
        Ok(())
    }

    /// Symmetric to [`advance`](Self::advance).
    pub fn retreat(&mut self, cross_boundary: bool) -> UResult<bool> {
        if self.leaf_frame().idx - 1 >= 0 {
            self.frames[0].idx -= 1;
            return Ok(false);
        }
        if !cross_boundary {
            self.frames[0].idx = -1;
            return Ok(false);
        }
        self.retreat_level(1)?;
        Ok(true)
    }

    fn retreat_level(&mut self, level: usize) -> UResult<()> {
        if level >= self.frames.len() {
            for f in &mut self.frames {
                f.idx = -1;
            }
            return Ok(());
        }
        if self.frames[level].idx - 1 >= 0 {
            self.frames[level].idx -= 1;
        } else {
            self.retreat_level(level + 1)?;
            if self.frames[level + 1..].iter().all(|f| f.idx < 0) {
                self.frames[level].idx = -1;
                return Ok(());
            }
            self.frames[level].idx = self.frames[level].node.num_entries() as i64 - 1;
        }
        self.reload_below_last(level)
    }

    fn reload_below_last(&mut self, level: usize) -> UResult<()> {
        let meta = self.frames[level]
            .node
            .as_meta()
            .expect("reload_below_last called on a non-meta frame");
        let idx = self.frames[level].idx as usize;
        let child_hash = meta.child_hash(idx);
        let child_base_index = if self.object_kind.is_index_addressed() {
            (0..idx).map(|i| meta.child_num_elements_rooted(i)).sum::<u64>()
                + self.frames[level].base_index
        } else {
            0
        };
        let child = Self::load_node(&self.loader, &child_hash, self.object_kind)?;
        let last_idx = child.num_entries() as i64 - 1;
        if level == 1 {
            self.frames[0] = Frame { node: child, idx: last_idx, base_index: child_base_index };
        } else {
            self.frames[level - 1] =
                Frame { node: child, idx: last_idx, base_index: child_base_index };
            self.reload_below_last(level - 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use crate::chunk_store::{ChunkLoader, ChunkWriter, SegmentFileStore};
    use crate::segment::Entry;
    use tempfile::tempdir;

    fn fresh_builder(kind: ChunkType) -> (NodeBuilder, Arc<ChunkLoader>) {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("test.dat"), 4).unwrap();
        std::mem::forget(dir);
        let loader = ChunkLoader::new(Arc::new(store));
        let writer = ChunkWriter::new(loader.clone());
        (NodeBuilder::new(loader.clone(), writer, kind), loader)
    }

    /// Enough list entries to push the rolling hasher across several
    /// chunk boundaries (target chunk size ~4 KiB, §4.3) with overwhelming
    /// probability, so a cursor built over the result actually has more
    /// than one leaf frame to cross between.
    const BIG_LIST_LEN: u32 = 8000;

    fn big_list_root(builder: &NodeBuilder) -> Hash {
        let entries: Vec<Entry> = (0..BIG_LIST_LEN)
            .map(|i| Entry::ListValue(format!("value-{i:05}").into_bytes()))
            .collect();
        builder.build_from_entries(entries).unwrap()
    }

    #[test]
    fn by_index_lands_on_the_requested_element() {
        let (builder, loader) = fresh_builder(ChunkType::List);
        let root = big_list_root(&builder);
        let cursor = NodeCursor::by_index(loader, &root, ChunkType::List, 2500).unwrap();
        assert!(!cursor.is_end());
        assert_eq!(cursor.entry_data(), format!("value-{:05}", 2500).as_bytes());
        assert_eq!(cursor.global_index(), 2500);
    }

    #[test]
    fn advance_crosses_a_chunk_boundary() {
        let (builder, loader) = fresh_builder(ChunkType::List);
        let root = big_list_root(&builder);
        let mut cursor = NodeCursor::by_index(loader, &root, ChunkType::List, 0).unwrap();
        let start_hash = cursor.leaf_node().hash();
        let mut crossed_once = false;
        for i in 1..BIG_LIST_LEN as u64 {
            let crossed = cursor.advance(true).unwrap();
            assert!(!cursor.is_end());
            assert_eq!(cursor.global_index(), i);
            if crossed {
                crossed_once = true;
                assert_ne!(cursor.leaf_node().hash(), start_hash);
            }
        }
        assert!(crossed_once, "{BIG_LIST_LEN} list entries must span more than one leaf chunk");
        assert!(cursor.advance(true).unwrap());
        assert!(cursor.is_end());
    }

    #[test]
    fn advance_past_the_last_entry_reaches_is_end() {
        let (builder, loader) = fresh_builder(ChunkType::List);
        let root = builder
            .build_from_entries(vec![Entry::ListValue(b"a".to_vec()), Entry::ListValue(b"b".to_vec())])
            .unwrap();
        let mut cursor = NodeCursor::by_index(loader, &root, ChunkType::List, 1).unwrap();
        assert!(!cursor.is_end());
        cursor.advance(true).unwrap();
        assert!(cursor.is_end());
        // Advancing further past the end stays at the end sentinel.
        cursor.advance(true).unwrap();
        assert!(cursor.is_end());
    }

    #[test]
    fn retreat_crosses_a_chunk_boundary_back_to_the_first_entry() {
        let (builder, loader) = fresh_builder(ChunkType::List);
        let root = big_list_root(&builder);
        let last = (BIG_LIST_LEN - 1) as u64;
        let mut cursor = NodeCursor::by_index(loader, &root, ChunkType::List, last).unwrap();
        let mut crossed_once = false;
        for i in (0..last).rev() {
            let crossed = cursor.retreat(true).unwrap();
            assert!(!cursor.is_begin());
            assert_eq!(cursor.global_index(), i);
            if crossed {
                crossed_once = true;
            }
        }
        assert!(crossed_once, "{BIG_LIST_LEN} list entries must span more than one leaf chunk");
        assert!(!cursor.is_begin());
        assert!(cursor.retreat(true).unwrap());
        assert!(cursor.is_begin());
    }

    #[test]
    fn by_key_lands_on_an_exact_match_for_a_map() {
        let (builder, loader) = fresh_builder(ChunkType::Map);
        let entries: Vec<Entry> = (0..50u32)
            .map(|i| Entry::MapEntry {
                key: format!("k{i:03}").into_bytes(),
                value: format!("v{i}").into_bytes(),
            })
            .collect();
        let root = builder.build_from_entries(entries).unwrap();
        let target = OrderedKey::Bytes(b"k025".to_vec());
        let cursor = NodeCursor::by_key(loader, &root, ChunkType::Map, &target).unwrap();
        assert!(!cursor.is_end());
        assert_eq!(cursor.key(), target);
        assert_eq!(cursor.entry_data(), b"v25");
    }

    #[test]
    fn by_key_past_every_entry_is_end() {
        let (builder, loader) = fresh_builder(ChunkType::Set);
        let entries: Vec<Entry> =
            (0..10u32).map(|i| Entry::SetEntry { key: format!("k{i}").into_bytes() }).collect();
        let root = builder.build_from_entries(entries).unwrap();
        let target = OrderedKey::Bytes(b"zzz".to_vec());
        let cursor = NodeCursor::by_key(loader, &root, ChunkType::Set, &target).unwrap();
        assert!(cursor.is_end());
    }
}
