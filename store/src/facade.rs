//! The five object facades (§4.11): `Blob`, `UString`, `List`, `Map`, `Set`.
//!
//! Every facade is a thin, immutable handle — a root [`Hash`] plus the
//! shared [`NodeBuilder`] for its kind. Every mutator is pure: it returns
//! a *new* facade value over a new root hash rather than mutating in
//! place, mirroring how `UCell`s chain immutable versions rather than
//! how an in-place collection would. Construction does not pick an
//! `object_kind` on the caller's behalf — the caller hands in a
//! `NodeBuilder` already bound to the right [`ChunkType`] (typically one
//! builder per kind, shared across every value of that kind backed by
//! the same chunk store).

use std::sync::Arc;

use ustore_primitives::{ChunkType, Hash, OrderedKey, UError, UResult};

use crate::builder::{NodeBuilder, SplicePos};
use crate::compare::{self, IndexRange};
use crate::cursor::NodeCursor;
use crate::segment::Entry;

fn locate_key(entries: &[Entry], key: &[u8]) -> (usize, bool) {
    let target = OrderedKey::Bytes(key.to_vec());
    let pos = entries.partition_point(|e| e.ordered_key().as_ref().unwrap() < &target);
    let exact = entries
        .get(pos)
        .map(|e| e.ordered_key().as_ref() == Some(&target))
        .unwrap_or(false);
    (pos, exact)
}

/// An ordered byte sequence, spliced by absolute index.
#[derive(Clone)]
pub struct Blob {
    builder: Arc<NodeBuilder>,
    root: Hash,
}

impl Blob {
    pub fn create(builder: Arc<NodeBuilder>) -> UResult<Self> {
        let root = builder.empty()?;
        Ok(Blob { builder, root })
    }

    pub fn open(builder: Arc<NodeBuilder>, root: Hash) -> Self {
        Blob { builder, root }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn size(&self) -> UResult<u64> {
        Ok(self.builder.flatten(self.root)?.len() as u64)
    }

    pub fn read(&self, start: u64, len: u64) -> UResult<Vec<u8>> {
        let entries = self.builder.flatten(self.root)?;
        let start = (start as usize).min(entries.len());
        let end = (start + len as usize).min(entries.len());
        Ok(entries[start..end]
            .iter()
            .map(|e| match e {
                Entry::Byte(b) => *b,
                _ => unreachable!("blob entries are always Byte"),
            })
            .collect())
    }

    pub fn splice(&self, pos: u64, del: u64, data: &[u8]) -> UResult<Blob> {
        let entries = data.iter().map(|b| Entry::Byte(*b)).collect();
        let root = self.builder.splice(self.root, SplicePos::Index(pos), del, entries)?;
        Ok(Blob { builder: self.builder.clone(), root })
    }

    pub fn insert(&self, pos: u64, data: &[u8]) -> UResult<Blob> {
        self.splice(pos, 0, data)
    }

    pub fn delete(&self, pos: u64, len: u64) -> UResult<Blob> {
        self.splice(pos, len, &[])
    }

    pub fn append(&self, data: &[u8]) -> UResult<Blob> {
        let len = self.size()?;
        self.splice(len, 0, data)
    }

    pub fn diff(&self, other: &Blob) -> UResult<Vec<IndexRange>> {
        compare::diff(&self.builder, self.root, other.root)
    }

    pub fn intersect(&self, other: &Blob) -> UResult<Vec<IndexRange>> {
        compare::intersect(&self.builder, self.root, other.root)
    }

    pub fn merge(&self, base: &Blob, other: &Blob) -> UResult<Option<Blob>> {
        Ok(compare::merge(&self.builder, base.root, self.root, other.root)?
            .map(|root| Blob { builder: self.builder.clone(), root }))
    }
}

/// A byte sequence tagged `ChunkType::String` on disk (§3.2): a single
/// scalar chunk, not a prolly tree — `chunker::{encode,decode}_string`
/// handle it directly (see `node/leaf.rs`'s doc comment). Splicing and
/// three-way merge are implemented here by decoding the whole value,
/// editing it in memory, and re-encoding one new chunk; `diff`/`merge`
/// reuse the same index-range-alignment building blocks `compare.rs`
/// uses for `Blob`/`List`, just without going through `NodeBuilder`
/// (there is no tree to flatten — the decoded bytes already are the
/// flat view).
#[derive(Clone)]
pub struct UString {
    loader: Arc<crate::chunk_store::ChunkLoader>,
    writer: crate::chunk_store::ChunkWriter,
    root: Hash,
}

impl UString {
    pub fn create(
        loader: Arc<crate::chunk_store::ChunkLoader>,
        writer: crate::chunk_store::ChunkWriter,
    ) -> UResult<Self> {
        let chunk = crate::chunker::encode_string(b"");
        writer.write(&chunk)?;
        Ok(UString { loader, writer, root: chunk.hash() })
    }

    pub fn open(
        loader: Arc<crate::chunk_store::ChunkLoader>,
        writer: crate::chunk_store::ChunkWriter,
        root: Hash,
    ) -> Self {
        UString { loader, writer, root }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    fn decode(&self) -> UResult<Vec<u8>> {
        if self.root.is_null() {
            return Ok(Vec::new());
        }
        let chunk = self
            .loader
            .get(&self.root)?
            .ok_or(ustore_primitives::UError::ChunkNotExists(self.root))?;
        crate::chunker::decode_string(&chunk)
    }

    fn encode_and_write(&self, bytes: &[u8]) -> UResult<UString> {
        let chunk = crate::chunker::encode_string(bytes);
        self.writer.write(&chunk)?;
        Ok(UString { loader: self.loader.clone(), writer: self.writer.clone(), root: chunk.hash() })
    }

    pub fn len(&self) -> UResult<u64> {
        Ok(self.decode()?.len() as u64)
    }

    pub fn is_empty(&self) -> UResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn data(&self, start: u64, len: u64) -> UResult<Vec<u8>> {
        let bytes = self.decode()?;
        let start = (start as usize).min(bytes.len());
        let end = (start + len as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    pub fn splice(&self, pos: u64, del: u64, data: &[u8]) -> UResult<UString> {
        let mut bytes = self.decode()?;
        let start = (pos as usize).min(bytes.len());
        let del = (del as usize).min(bytes.len() - start);
        bytes.splice(start..start + del, data.iter().copied());
        self.encode_and_write(&bytes)
    }

    pub fn append(&self, data: &[u8]) -> UResult<UString> {
        let len = self.len()?;
        self.splice(len, 0, data)
    }

    pub fn diff(&self, other: &UString) -> UResult<Vec<IndexRange>> {
        let l: Vec<Entry> = self.decode()?.into_iter().map(Entry::Byte).collect();
        let r: Vec<Entry> = other.decode()?.into_iter().map(Entry::Byte).collect();
        Ok(compare::diff_ranges(&l, &r))
    }

    pub fn intersect(&self, other: &UString) -> UResult<Vec<IndexRange>> {
        let diffs = self.diff(other)?;
        let len = self.len()?;
        Ok(compare::complement(&diffs, len))
    }

    pub fn merge(&self, base: &UString, other: &UString) -> UResult<Option<UString>> {
        if self.root == other.root {
            return Ok(Some(self.clone()));
        }
        if self.root == base.root {
            return Ok(Some(other.clone()));
        }
        if other.root == base.root {
            return Ok(Some(self.clone()));
        }

        let base_bytes: Vec<Entry> = base.decode()?.into_iter().map(Entry::Byte).collect();
        let l_bytes: Vec<Entry> = self.decode()?.into_iter().map(Entry::Byte).collect();
        let r_bytes: Vec<Entry> = other.decode()?.into_iter().map(Entry::Byte).collect();

        let l_edits = compare::align(&base_bytes, &l_bytes);
        let r_edits = compare::align(&base_bytes, &r_bytes);
        if compare::edits_conflict(&l_edits, &r_edits) {
            return Ok(None);
        }

        let mut merged = Vec::new();
        let mut i = 0usize;
        while i < base_bytes.len() {
            for e in l_edits.iter().chain(r_edits.iter()).filter(|e| e.base_start == i && e.base_len == 0) {
                merged.extend(e.replacement.clone());
            }
            if let Some(e) = l_edits.iter().find(|e| e.base_start == i && e.base_len > 0) {
                merged.extend(e.replacement.clone());
                i += e.base_len;
                continue;
            }
            if let Some(e) = r_edits.iter().find(|e| e.base_start == i && e.base_len > 0) {
                merged.extend(e.replacement.clone());
                i += e.base_len;
                continue;
            }
            merged.push(base_bytes[i].clone());
            i += 1;
        }
        for e in l_edits.iter().chain(r_edits.iter()) {
            if e.base_start == base_bytes.len() && e.base_len == 0 {
                merged.extend(e.replacement.clone());
            }
        }

        let bytes: Vec<u8> = merged
            .into_iter()
            .map(|e| match e {
                Entry::Byte(b) => b,
                _ => unreachable!("string merge only ever builds Byte entries"),
            })
            .collect();
        Ok(Some(self.encode_and_write(&bytes)?))
    }
}

/// An ordered sequence of opaque values, spliced by absolute index.
#[derive(Clone)]
pub struct List {
    builder: Arc<NodeBuilder>,
    root: Hash,
}

impl List {
    pub fn create(builder: Arc<NodeBuilder>) -> UResult<Self> {
        let root = builder.empty()?;
        Ok(List { builder, root })
    }

    pub fn open(builder: Arc<NodeBuilder>, root: Hash) -> Self {
        List { builder, root }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn len(&self) -> UResult<u64> {
        Ok(self.builder.flatten(self.root)?.len() as u64)
    }

    pub fn is_empty(&self) -> UResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Point lookup by index, without flattening the whole list (§4.6): a
    /// [`NodeCursor`] descends straight to the owning leaf.
    pub fn get(&self, index: u64) -> UResult<Option<Vec<u8>>> {
        if self.root.is_null() {
            return Ok(None);
        }
        match NodeCursor::by_index(self.builder.loader(), &self.root, ChunkType::List, index) {
            Ok(cursor) => {
                if cursor.is_end() {
                    return Ok(None);
                }
                Ok(Some(cursor.entry_data().to_vec()))
            }
            Err(UError::InvalidRange { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn scan(&self) -> UResult<Vec<Vec<u8>>> {
        let entries = self.builder.flatten(self.root)?;
        Ok(entries
            .into_iter()
            .map(|e| match e {
                Entry::ListValue(v) => v,
                _ => unreachable!("list entries are always ListValue"),
            })
            .collect())
    }

    pub fn splice(&self, pos: u64, del: u64, values: &[Vec<u8>]) -> UResult<List> {
        let entries = values.iter().map(|v| Entry::ListValue(v.clone())).collect();
        let root = self.builder.splice(self.root, SplicePos::Index(pos), del, entries)?;
        Ok(List { builder: self.builder.clone(), root })
    }

    pub fn insert(&self, pos: u64, values: &[Vec<u8>]) -> UResult<List> {
        self.splice(pos, 0, values)
    }

    pub fn delete(&self, pos: u64, len: u64) -> UResult<List> {
        self.splice(pos, len, &[])
    }

    pub fn append(&self, values: &[Vec<u8>]) -> UResult<List> {
        let len = self.len()?;
        self.splice(len, 0, values)
    }

    pub fn diff(&self, other: &List) -> UResult<Vec<IndexRange>> {
        compare::diff(&self.builder, self.root, other.root)
    }

    pub fn intersect(&self, other: &List) -> UResult<Vec<IndexRange>> {
        compare::intersect(&self.builder, self.root, other.root)
    }

    pub fn merge(&self, base: &List, other: &List) -> UResult<Option<List>> {
        Ok(compare::merge(&self.builder, base.root, self.root, other.root)?
            .map(|root| List { builder: self.builder.clone(), root }))
    }
}

/// An ordered key-value map, spliced by ordered key.
#[derive(Clone)]
pub struct Map {
    builder: Arc<NodeBuilder>,
    root: Hash,
}

impl Map {
    pub fn create(builder: Arc<NodeBuilder>) -> UResult<Self> {
        let root = builder.empty()?;
        Ok(Map { builder, root })
    }

    pub fn open(builder: Arc<NodeBuilder>, root: Hash) -> Self {
        Map { builder, root }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    /// Point lookup by key, without flattening the whole map (§4.6): a
    /// [`NodeCursor`] descends straight to the owning leaf via
    /// `child_hash_by_key`.
    pub fn get(&self, key: &[u8]) -> UResult<Option<Vec<u8>>> {
        if self.root.is_null() {
            return Ok(None);
        }
        let target = OrderedKey::Bytes(key.to_vec());
        let cursor = NodeCursor::by_key(self.builder.loader(), &self.root, ChunkType::Map, &target)?;
        if cursor.is_end() || cursor.key() != target {
            return Ok(None);
        }
        Ok(Some(cursor.entry_data().to_vec()))
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> UResult<Map> {
        let entries = self.builder.flatten(self.root)?;
        let (pos, exact) = locate_key(&entries, key);
        let del = if exact { 1 } else { 0 };
        let new_entry = Entry::MapEntry { key: key.to_vec(), value: value.to_vec() };
        let root = self.builder.splice(
            self.root,
            SplicePos::Key(OrderedKey::Bytes(key.to_vec())),
            del,
            vec![new_entry],
        )?;
        let _ = pos;
        Ok(Map { builder: self.builder.clone(), root })
    }

    pub fn remove(&self, key: &[u8]) -> UResult<Map> {
        let entries = self.builder.flatten(self.root)?;
        let (_, exact) = locate_key(&entries, key);
        if !exact {
            return Ok(self.clone());
        }
        let root = self.builder.splice(
            self.root,
            SplicePos::Key(OrderedKey::Bytes(key.to_vec())),
            1,
            Vec::new(),
        )?;
        Ok(Map { builder: self.builder.clone(), root })
    }

    pub fn scan(&self) -> UResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.builder.flatten(self.root)?;
        Ok(entries
            .into_iter()
            .map(|e| match e {
                Entry::MapEntry { key, value } => (key, value),
                _ => unreachable!("map entries are always MapEntry"),
            })
            .collect())
    }

    pub fn dually_diff(
        &self,
        other: &Map,
    ) -> UResult<Vec<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>)>> {
        let raw = compare::dually_diff(&self.builder, self.root, other.root)?;
        Ok(raw
            .into_iter()
            .map(|(k, l, r)| (k, l.map(entry_value), r.map(entry_value)))
            .collect())
    }

    pub fn merge(&self, base: &Map, other: &Map) -> UResult<Option<Map>> {
        Ok(compare::merge(&self.builder, base.root, self.root, other.root)?
            .map(|root| Map { builder: self.builder.clone(), root }))
    }
}

fn entry_value(e: Entry) -> Vec<u8> {
    match e {
        Entry::MapEntry { value, .. } => value,
        Entry::SetEntry { key } => key,
        _ => unreachable!("dually_diff only ever sees key-addressed entries"),
    }
}

/// An ordered set of opaque keys, spliced by ordered key.
#[derive(Clone)]
pub struct Set {
    builder: Arc<NodeBuilder>,
    root: Hash,
}

impl Set {
    pub fn create(builder: Arc<NodeBuilder>) -> UResult<Self> {
        let root = builder.empty()?;
        Ok(Set { builder, root })
    }

    pub fn open(builder: Arc<NodeBuilder>, root: Hash) -> Self {
        Set { builder, root }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    /// Membership test by key, without flattening the whole set (§4.6): a
    /// [`NodeCursor`] descends straight to the owning leaf via
    /// `child_hash_by_key`.
    pub fn contains(&self, key: &[u8]) -> UResult<bool> {
        if self.root.is_null() {
            return Ok(false);
        }
        let target = OrderedKey::Bytes(key.to_vec());
        let cursor = NodeCursor::by_key(self.builder.loader(), &self.root, ChunkType::Set, &target)?;
        Ok(!cursor.is_end() && cursor.key() == target)
    }

    pub fn insert(&self, key: &[u8]) -> UResult<Set> {
        let entries = self.builder.flatten(self.root)?;
        let (_, exact) = locate_key(&entries, key);
        if exact {
            return Ok(self.clone());
        }
        let root = self.builder.splice(
            self.root,
            SplicePos::Key(OrderedKey::Bytes(key.to_vec())),
            0,
            vec![Entry::SetEntry { key: key.to_vec() }],
        )?;
        Ok(Set { builder: self.builder.clone(), root })
    }

    pub fn remove(&self, key: &[u8]) -> UResult<Set> {
        let entries = self.builder.flatten(self.root)?;
        let (_, exact) = locate_key(&entries, key);
        if !exact {
            return Ok(self.clone());
        }
        let root = self.builder.splice(
            self.root,
            SplicePos::Key(OrderedKey::Bytes(key.to_vec())),
            1,
            Vec::new(),
        )?;
        Ok(Set { builder: self.builder.clone(), root })
    }

    pub fn scan(&self) -> UResult<Vec<Vec<u8>>> {
        let entries = self.builder.flatten(self.root)?;
        Ok(entries
            .into_iter()
            .map(|e| match e {
                Entry::SetEntry { key } => key,
                _ => unreachable!("set entries are always SetEntry"),
            })
            .collect())
    }

    pub fn dually_diff(&self, other: &Set) -> UResult<Vec<(Vec<u8>, bool, bool)>> {
        let raw = compare::dually_diff(&self.builder, self.root, other.root)?;
        Ok(raw.into_iter().map(|(k, l, r)| (k, l.is_some(), r.is_some())).collect())
    }

    pub fn merge(&self, base: &Set, other: &Set) -> UResult<Option<Set>> {
        Ok(compare::merge(&self.builder, base.root, self.root, other.root)?
            .map(|root| Set { builder: self.builder.clone(), root }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::{ChunkLoader, ChunkWriter, SegmentFileStore};
    use ustore_primitives::ChunkType;
    use tempfile::tempdir;

    fn fresh_loader_writer() -> (Arc<ChunkLoader>, ChunkWriter) {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("test.dat"), 4).unwrap();
        std::mem::forget(dir);
        let loader = ChunkLoader::new(Arc::new(store));
        let writer = ChunkWriter::new(loader.clone());
        (loader, writer)
    }

    fn fresh_builder(kind: ChunkType) -> Arc<NodeBuilder> {
        let (loader, writer) = fresh_loader_writer();
        Arc::new(NodeBuilder::new(loader, writer, kind))
    }

    #[test]
    fn blob_append_and_read_round_trip() {
        let b = Blob::create(fresh_builder(ChunkType::Blob)).unwrap();
        let b = b.append(b"hello ").unwrap();
        let b = b.append(b"world").unwrap();
        assert_eq!(b.read(0, b.size().unwrap()).unwrap(), b"hello world");
    }

    #[test]
    fn list_insert_get_and_delete() {
        let l = List::create(fresh_builder(ChunkType::List)).unwrap();
        let l = l.append(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).unwrap();
        assert_eq!(l.get(1).unwrap(), Some(b"b".to_vec()));
        let l = l.delete(1, 1).unwrap();
        assert_eq!(l.scan().unwrap(), vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn list_get_out_of_range_is_none() {
        let l = List::create(fresh_builder(ChunkType::List)).unwrap();
        let l = l.append(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(l.get(2).unwrap(), None);
        assert_eq!(l.get(100).unwrap(), None);
        let empty = List::create(fresh_builder(ChunkType::List)).unwrap();
        assert_eq!(empty.get(0).unwrap(), None);
    }

    #[test]
    fn map_set_get_remove() {
        let m = Map::create(fresh_builder(ChunkType::Map)).unwrap();
        let m = m.set(b"a", b"1").unwrap();
        let m = m.set(b"b", b"2").unwrap();
        assert_eq!(m.get(b"a").unwrap(), Some(b"1".to_vec()));
        let m = m.set(b"a", b"updated").unwrap();
        assert_eq!(m.get(b"a").unwrap(), Some(b"updated".to_vec()));
        let m = m.remove(b"b").unwrap();
        assert_eq!(m.get(b"b").unwrap(), None);
        assert_eq!(m.scan().unwrap(), vec![(b"a".to_vec(), b"updated".to_vec())]);
    }

    #[test]
    fn set_insert_contains_remove() {
        let s = Set::create(fresh_builder(ChunkType::Set)).unwrap();
        let s = s.insert(b"x").unwrap();
        let s = s.insert(b"y").unwrap();
        assert!(s.contains(b"x").unwrap());
        let s = s.remove(b"x").unwrap();
        assert!(!s.contains(b"x").unwrap());
        assert_eq!(s.scan().unwrap(), vec![b"y".to_vec()]);
    }

    #[test]
    fn ustring_splice_and_merge() {
        let (loader, writer) = fresh_loader_writer();
        let base = UString::create(loader.clone(), writer.clone()).unwrap();
        let base = base.append(b"hello world").unwrap();

        let (loader2, writer2) = (loader.clone(), writer.clone());
        let l = UString::open(loader2, writer2, base.root()).splice(0, 5, b"howdy").unwrap();
        let r = UString::open(loader, writer, base.root())
            .splice(6, 5, b"there")
            .unwrap();

        let merged = l.merge(&base, &r).unwrap().expect("non-conflicting merge");
        assert_eq!(merged.data(0, merged.len().unwrap()).unwrap(), b"howdy there");
    }

    #[test]
    fn map_merge_via_facade() {
        let builder = fresh_builder(ChunkType::Map);
        let base = Map::create(builder.clone()).unwrap().set(b"k", b"v0").unwrap();
        let l = Map::open(builder.clone(), base.root()).set(b"k2", b"v2").unwrap();
        let r = Map::open(builder, base.root()).set(b"k3", b"v3").unwrap();
        let merged = l.merge(&base, &r).unwrap().expect("non-conflicting merge");
        assert_eq!(merged.get(b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(merged.get(b"k3").unwrap(), Some(b"v3".to_vec()));
    }
}
