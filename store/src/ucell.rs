//! UCell: the commit-like version record (§3.5, §4.9).
//!
//! Payload layout: `type (u8) | merged (u8) | data_root_hash (20) |
//! prev_hash_1 (20) | [prev_hash_2 (20) if merged] | u32 key_len |
//! key_bytes`. A UCell is itself persisted as a `Cell`-tagged [`Chunk`],
//! so its hash doubles as the version identifier everywhere in the
//! engine (branch heads, `Get(key, version)`, `prev_hash` chains).

use ustore_primitives::{ChunkType, Hash, UError, UResult};

use crate::chunk::Chunk;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UCell {
    pub object_kind: ChunkType,
    pub data_root_hash: Hash,
    pub prev1: Hash,
    pub prev2: Option<Hash>,
    pub key: Vec<u8>,
}

impl UCell {
    pub fn is_merge(&self) -> bool {
        self.prev2.is_some()
    }

    /// Encode per §3.5 and wrap it as a `Cell` chunk. Does not write it
    /// through a [`crate::chunk_store::ChunkWriter`] — callers decide
    /// when to persist (the versioning layer always does, immediately).
    pub fn to_chunk(&self) -> Chunk {
        let mut payload = Vec::with_capacity(2 + 20 + 20 + 20 + 4 + self.key.len());
        payload.push(self.object_kind.tag());
        payload.push(self.is_merge() as u8);
        payload.extend_from_slice(self.data_root_hash.as_bytes());
        payload.extend_from_slice(self.prev1.as_bytes());
        if let Some(prev2) = self.prev2 {
            payload.extend_from_slice(prev2.as_bytes());
        }
        payload.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.key);
        Chunk::new(ChunkType::Cell, &payload)
    }

    pub fn hash(&self) -> Hash {
        self.to_chunk().hash()
    }

    pub fn decode(chunk: &Chunk) -> UResult<UCell> {
        if chunk.chunk_type() != ChunkType::Cell {
            return Err(UError::TypeMismatch {
                expected: ChunkType::Cell,
                actual: chunk.chunk_type(),
            });
        }
        let p = chunk.payload();
        if p.len() < 2 + 20 + 20 {
            return Err(UError::InvalidCommandArgument("truncated UCell payload".to_string()));
        }
        let object_kind = ChunkType::from_tag(p[0]);
        let merged = p[1] != 0;
        let data_root_hash =
            Hash::try_from(&p[2..22]).map_err(|e| UError::InvalidHash(e.to_string()))?;
        let prev1 = Hash::try_from(&p[22..42]).map_err(|e| UError::InvalidHash(e.to_string()))?;
        let mut pos = 42;
        let prev2 = if merged {
            if p.len() < pos + 20 {
                return Err(UError::InvalidCommandArgument("truncated merged UCell".to_string()));
            }
            let h = Hash::try_from(&p[pos..pos + 20]).map_err(|e| UError::InvalidHash(e.to_string()))?;
            pos += 20;
            Some(h)
        } else {
            None
        };
        if p.len() < pos + 4 {
            return Err(UError::InvalidCommandArgument("truncated UCell key length".to_string()));
        }
        let key_len = u32::from_le_bytes(p[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if p.len() != pos + key_len {
            return Err(UError::InvalidCommandArgument("truncated UCell key".to_string()));
        }
        let key = p[pos..pos + key_len].to_vec();
        Ok(UCell { object_kind, data_root_hash, prev1, prev2, key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_non_merge_cell() {
        let cell = UCell {
            object_kind: ChunkType::Map,
            data_root_hash: Hash::compute(b"root"),
            prev1: Hash::NULL,
            prev2: None,
            key: b"my-key".to_vec(),
        };
        let chunk = cell.to_chunk();
        let back = UCell::decode(&chunk).unwrap();
        assert_eq!(cell, back);
        assert!(!back.is_merge());
    }

    #[test]
    fn round_trips_a_merge_cell() {
        let cell = UCell {
            object_kind: ChunkType::List,
            data_root_hash: Hash::compute(b"root2"),
            prev1: Hash::compute(b"p1"),
            prev2: Some(Hash::compute(b"p2")),
            key: b"k".to_vec(),
        };
        let chunk = cell.to_chunk();
        let back = UCell::decode(&chunk).unwrap();
        assert_eq!(cell, back);
        assert!(back.is_merge());
    }

    #[test]
    fn wrong_chunk_type_is_rejected() {
        let bogus = Chunk::new(ChunkType::Blob, b"not a cell");
        assert!(UCell::decode(&bogus).is_err());
    }
}
