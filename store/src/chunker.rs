//! Kind-specific serialization between [`Segment`]s and [`Chunk`]s (§4.4).
//!
//! One function pair (`encode_*`/`decode_*`) per leaf kind, plus the meta
//! chunker used at every internal level. This is where the hand-written
//! little-endian byte layouts of §3.2 live — deliberately not routed
//! through `borsh`, since the wire-compatible layout (entry sizes that
//! include their own four-byte prefix, trailing ordered-key bytes with no
//! length prefix for index-addressed meta entries) isn't what a derived
//! `borsh` encoding of `Vec<u8>`/`String` would produce.

use ustore_primitives::{ChunkType, Hash, OrderedKey, UError, UResult};

use crate::chunk::Chunk;
use crate::segment::{Entry, Segment};

fn invalid(chunk: &Chunk) -> UError {
    UError::TypeMismatch { expected: chunk.chunk_type(), actual: ChunkType::Invalid }
}

/// Encode a blob leaf: the payload is the raw concatenated bytes.
pub fn encode_blob(segment: &Segment) -> Chunk {
    let mut payload = Vec::with_capacity(segment.num_entries());
    for e in segment.entries() {
        match e {
            Entry::Byte(b) => payload.push(*b),
            _ => panic!("encode_blob given a non-Byte entry"),
        }
    }
    Chunk::new(ChunkType::Blob, &payload)
}

pub fn decode_blob(chunk: &Chunk) -> UResult<Segment> {
    if chunk.chunk_type() != ChunkType::Blob {
        return Err(invalid(chunk));
    }
    Ok(Segment::from_entries(chunk.payload().iter().map(|b| Entry::Byte(*b)).collect()))
}

/// Encode a string value (§3.2: `u32 len | len bytes`). Strings are a
/// single chunk, not spliced through the node builder, so they bypass
/// `Segment` entirely.
pub fn encode_string(bytes: &[u8]) -> Chunk {
    let mut payload = Vec::with_capacity(4 + bytes.len());
    payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(bytes);
    Chunk::new(ChunkType::String, &payload)
}

pub fn decode_string(chunk: &Chunk) -> UResult<Vec<u8>> {
    if chunk.chunk_type() != ChunkType::String {
        return Err(invalid(chunk));
    }
    let payload = chunk.payload();
    if payload.len() < 4 {
        return Err(invalid(chunk));
    }
    let len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let rest = &payload[4..];
    if rest.len() != len {
        return Err(invalid(chunk));
    }
    Ok(rest.to_vec())
}

/// Encode a list leaf: `u32 n | entry_i = u32 entry_size_incl_prefix | value`.
pub fn encode_list(segment: &Segment) -> Chunk {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(segment.num_entries() as u32).to_le_bytes());
    for e in segment.entries() {
        let value = match e {
            Entry::ListValue(v) => v,
            _ => panic!("encode_list given a non-ListValue entry"),
        };
        let entry_size = 4 + value.len();
        payload.extend_from_slice(&(entry_size as u32).to_le_bytes());
        payload.extend_from_slice(value);
    }
    Chunk::new(ChunkType::List, &payload)
}

pub fn decode_list(chunk: &Chunk) -> UResult<Segment> {
    if chunk.chunk_type() != ChunkType::List {
        return Err(invalid(chunk));
    }
    let payload = chunk.payload();
    let n = read_u32(payload, 0).ok_or_else(|| invalid(chunk))? as usize;
    let mut pos = 4;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let entry_size = read_u32(payload, pos).ok_or_else(|| invalid(chunk))? as usize;
        if entry_size < 4 || pos + entry_size > payload.len() {
            return Err(invalid(chunk));
        }
        let value = payload[pos + 4..pos + entry_size].to_vec();
        entries.push(Entry::ListValue(value));
        pos += entry_size;
    }
    Ok(Segment::from_entries(entries))
}

/// Encode a map leaf: `u32 n | entry_i = u32 total_size | u32 key_size |
/// key | value`, entries in strict ascending key order.
pub fn encode_map(segment: &Segment) -> Chunk {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(segment.num_entries() as u32).to_le_bytes());
    for e in segment.entries() {
        let (key, value) = match e {
            Entry::MapEntry { key, value } => (key, value),
            _ => panic!("encode_map given a non-MapEntry entry"),
        };
        let total_size = 4 + 4 + key.len() + value.len();
        payload.extend_from_slice(&(total_size as u32).to_le_bytes());
        payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(value);
    }
    Chunk::new(ChunkType::Map, &payload)
}

pub fn decode_map(chunk: &Chunk) -> UResult<Segment> {
    if chunk.chunk_type() != ChunkType::Map {
        return Err(invalid(chunk));
    }
    let payload = chunk.payload();
    let n = read_u32(payload, 0).ok_or_else(|| invalid(chunk))? as usize;
    let mut pos = 4;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let total_size = read_u32(payload, pos).ok_or_else(|| invalid(chunk))? as usize;
        let key_size = read_u32(payload, pos + 4).ok_or_else(|| invalid(chunk))? as usize;
        if total_size < 8 + key_size || pos + total_size > payload.len() {
            return Err(invalid(chunk));
        }
        let key = payload[pos + 8..pos + 8 + key_size].to_vec();
        let value = payload[pos + 8 + key_size..pos + total_size].to_vec();
        entries.push(Entry::MapEntry { key, value });
        pos += total_size;
    }
    Ok(Segment::from_entries(entries))
}

/// Encode a set leaf: `u32 n | entry_i = u32 total_size | key`, entries in
/// strict ascending order.
pub fn encode_set(segment: &Segment) -> Chunk {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(segment.num_entries() as u32).to_le_bytes());
    for e in segment.entries() {
        let key = match e {
            Entry::SetEntry { key } => key,
            _ => panic!("encode_set given a non-SetEntry entry"),
        };
        let total_size = 4 + key.len();
        payload.extend_from_slice(&(total_size as u32).to_le_bytes());
        payload.extend_from_slice(key);
    }
    Chunk::new(ChunkType::Set, &payload)
}

pub fn decode_set(chunk: &Chunk) -> UResult<Segment> {
    if chunk.chunk_type() != ChunkType::Set {
        return Err(invalid(chunk));
    }
    let payload = chunk.payload();
    let n = read_u32(payload, 0).ok_or_else(|| invalid(chunk))? as usize;
    let mut pos = 4;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let total_size = read_u32(payload, pos).ok_or_else(|| invalid(chunk))? as usize;
        if total_size < 4 || pos + total_size > payload.len() {
            return Err(invalid(chunk));
        }
        let key = payload[pos + 4..pos + total_size].to_vec();
        entries.push(Entry::SetEntry { key });
        pos += total_size;
    }
    Ok(Segment::from_entries(entries))
}

/// Encode a meta (internal) node. Each meta_entry is:
/// `u32 num_bytes | u32 num_leaves | u64 num_elements_rooted | 20-byte
/// child_hash | ordered_key`, where `ordered_key` is a fixed 8-byte
/// big-endian index for index-addressed trees, or `u32 key_len | key_bytes`
/// for key-addressed trees (the per-entry length spec.md leaves implicit
/// for the variable-width byte-key case — documented in DESIGN.md).
pub fn encode_meta(segment: &Segment) -> Chunk {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(segment.num_entries() as u32).to_le_bytes());
    for e in segment.entries() {
        payload.extend_from_slice(&encode_meta_entry(e));
    }
    Chunk::new(ChunkType::Meta, &payload)
}

/// Byte layout of a single meta entry, per §3.2: `u32 num_bytes | u32
/// num_leaves | u64 num_elements_rooted | 20-byte child_hash |
/// ordered_key`. Factored out of [`encode_meta`] so the node builder's
/// rolling hasher (§4.3) can feed the same canonical bytes for boundary
/// detection at internal levels that [`encode_meta`] writes to disk.
pub fn encode_meta_entry(e: &Entry) -> Vec<u8> {
    let (child_hash, num_bytes, num_leaves, num_elements_rooted, ordered_key) = match e {
        Entry::Child { child_hash, num_bytes, num_leaves, num_elements_rooted, ordered_key } => {
            (child_hash, num_bytes, num_leaves, num_elements_rooted, ordered_key)
        }
        _ => panic!("encode_meta_entry given a non-Child entry"),
    };
    let mut out = Vec::with_capacity(36 + 4);
    out.extend_from_slice(&num_bytes.to_le_bytes());
    out.extend_from_slice(&num_leaves.to_le_bytes());
    out.extend_from_slice(&num_elements_rooted.to_le_bytes());
    out.extend_from_slice(child_hash.as_bytes());
    match ordered_key {
        OrderedKey::Index(idx) => out.extend_from_slice(&idx.to_be_bytes()),
        OrderedKey::Bytes(key) => {
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key);
        }
    }
    out
}

/// Canonical bytes of one leaf entry, fed through the rolling hasher
/// (§4.3) to decide chunk boundaries at the leaf level. Not necessarily
/// identical to the on-disk encoding (e.g. a list value carries no length
/// prefix here, since the hasher only needs deterministic, content-derived
/// bytes, not a self-delimiting record).
pub fn leaf_entry_rolling_bytes(e: &Entry) -> Vec<u8> {
    match e {
        Entry::Byte(b) => vec![*b],
        Entry::ListValue(v) => v.clone(),
        Entry::MapEntry { key, value } => {
            let mut out = Vec::with_capacity(key.len() + value.len());
            out.extend_from_slice(key);
            out.extend_from_slice(value);
            out
        }
        Entry::SetEntry { key } => key.clone(),
        Entry::Child { .. } => panic!("leaf_entry_rolling_bytes given a Child entry"),
    }
}

/// `index_addressed` must be known from context (the object kind being
/// read) since the meta payload alone cannot disambiguate an 8-byte index
/// key from an equally-sized 8-byte-prefixed byte key without it.
pub fn decode_meta(chunk: &Chunk, index_addressed: bool) -> UResult<Segment> {
    if chunk.chunk_type() != ChunkType::Meta {
        return Err(invalid(chunk));
    }
    let payload = chunk.payload();
    let n = read_u32(payload, 0).ok_or_else(|| invalid(chunk))? as usize;
    let mut pos = 4;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        if pos + 4 + 4 + 8 + 20 > payload.len() {
            return Err(invalid(chunk));
        }
        let num_bytes = read_u32(payload, pos).ok_or_else(|| invalid(chunk))?;
        let num_leaves = read_u32(payload, pos + 4).ok_or_else(|| invalid(chunk))?;
        let num_elements_rooted = read_u64(payload, pos + 8).ok_or_else(|| invalid(chunk))?;
        let child_hash = Hash::try_from(&payload[pos + 16..pos + 36])
            .map_err(|e| UError::InvalidHash(e.to_string()))?;
        pos += 36;
        let ordered_key = if index_addressed {
            let idx = read_u64_be(payload, pos).ok_or_else(|| invalid(chunk))?;
            pos += 8;
            OrderedKey::Index(idx)
        } else {
            let key_len = read_u32(payload, pos).ok_or_else(|| invalid(chunk))? as usize;
            pos += 4;
            if pos + key_len > payload.len() {
                return Err(invalid(chunk));
            }
            let key = payload[pos..pos + key_len].to_vec();
            pos += key_len;
            OrderedKey::Bytes(key)
        };
        entries.push(Entry::Child {
            child_hash,
            num_bytes,
            num_leaves,
            num_elements_rooted,
            ordered_key,
        });
    }
    Ok(Segment::from_entries(entries))
}

/// Build the meta-entry a parent sub-builder should append once a child
/// chunk has been written (§4.7 step 5).
pub fn child_entry(
    child_chunk: &Chunk,
    num_leaves: u32,
    num_elements_rooted: u64,
    ordered_key: OrderedKey,
) -> Entry {
    Entry::Child {
        child_hash: child_chunk.hash(),
        num_bytes: child_chunk.len() as u32,
        num_leaves,
        num_elements_rooted,
        ordered_key,
    }
}

/// Encode any leaf segment for `kind`, dispatching on chunk type.
pub fn encode_leaf(kind: ChunkType, segment: &Segment) -> Chunk {
    match kind {
        ChunkType::Blob => encode_blob(segment),
        ChunkType::List => encode_list(segment),
        ChunkType::Map => encode_map(segment),
        ChunkType::Set => encode_set(segment),
        other => panic!("encode_leaf called with non-leaf kind {other:?}"),
    }
}

pub fn decode_leaf(chunk: &Chunk) -> UResult<Segment> {
    match chunk.chunk_type() {
        ChunkType::Blob => decode_blob(chunk),
        ChunkType::List => decode_list(chunk),
        ChunkType::Map => decode_map(chunk),
        ChunkType::Set => decode_set(chunk),
        _ => Err(invalid(chunk)),
    }
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8).map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

fn read_u64_be(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8).map(|s| u64::from_be_bytes(s.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_round_trips() {
        let mut seg = Segment::new();
        seg.append_for_chunk(Entry::ListValue(b"alpha".to_vec()));
        seg.append_for_chunk(Entry::ListValue(b"beta".to_vec()));
        let chunk = encode_list(&seg);
        let back = decode_list(&chunk).unwrap();
        assert_eq!(back.num_entries(), 2);
        assert_eq!(back.entry(1), &Entry::ListValue(b"beta".to_vec()));
    }

    #[test]
    fn map_round_trips_in_key_order() {
        let mut seg = Segment::new();
        seg.append_for_chunk(Entry::MapEntry { key: b"a".to_vec(), value: b"1".to_vec() });
        seg.append_for_chunk(Entry::MapEntry { key: b"b".to_vec(), value: b"2".to_vec() });
        let chunk = encode_map(&seg);
        let back = decode_map(&chunk).unwrap();
        assert_eq!(
            back.entry(0),
            &Entry::MapEntry { key: b"a".to_vec(), value: b"1".to_vec() }
        );
    }

    #[test]
    fn meta_round_trips_index_addressed() {
        let mut seg = Segment::new();
        seg.append_for_chunk(child_entry(
            &encode_blob(&Segment::from_entries(vec![Entry::Byte(b'x')])),
            1,
            1,
            OrderedKey::Index(0),
        ));
        let chunk = encode_meta(&seg);
        let back = decode_meta(&chunk, true).unwrap();
        assert_eq!(back.num_entries(), 1);
        match back.entry(0) {
            Entry::Child { ordered_key, num_elements_rooted, .. } => {
                assert_eq!(*ordered_key, OrderedKey::Index(0));
                assert_eq!(*num_elements_rooted, 1);
            }
            _ => panic!("expected Child entry"),
        }
    }

    #[test]
    fn meta_round_trips_key_addressed() {
        let mut seg = Segment::new();
        seg.append_for_chunk(child_entry(
            &encode_set(&Segment::from_entries(vec![Entry::SetEntry { key: b"zzz".to_vec() }])),
            1,
            1,
            OrderedKey::Bytes(b"zzz".to_vec()),
        ));
        let chunk = encode_meta(&seg);
        let back = decode_meta(&chunk, false).unwrap();
        match back.entry(0) {
            Entry::Child { ordered_key, .. } => {
                assert_eq!(*ordered_key, OrderedKey::Bytes(b"zzz".to_vec()));
            }
            _ => panic!("expected Child entry"),
        }
    }

    #[test]
    fn blob_round_trips() {
        let seg = Segment::from_entries(b"hello".iter().map(|b| Entry::Byte(*b)).collect());
        let chunk = encode_blob(&seg);
        let back = decode_blob(&chunk).unwrap();
        assert_eq!(back.num_entries(), 5);
    }

    #[test]
    fn string_round_trips() {
        let chunk = encode_string(b"a string value");
        assert_eq!(decode_string(&chunk).unwrap(), b"a string value");
    }
}
