use std::fmt;
use std::str::FromStr;

/// Number of bytes in a UStore content hash.
pub const HASH_BYTE_LEN: usize = 20;
/// Length of the base32 encoding of a [`Hash`] (no padding: 20 bytes is a
/// multiple of 5 bits' worth of base32 digits).
pub const HASH_BASE32_LEN: usize = 32;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A 160-bit content hash: the address of a [`crate::ChunkType`]-tagged
/// chunk, computed over the chunk's full byte sequence (header included).
///
/// Two chunks with equal payload bytes have equal hashes (ported from
/// `include/hash/hash.h` / `src/hash/hash.cc`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_BYTE_LEN]);

impl Hash {
    /// The distinguished all-zero hash, marking "no prior version" or "no
    /// child" in a `UCell`/`MetaEntry`.
    pub const NULL: Hash = Hash([0u8; HASH_BYTE_LEN]);

    /// Wrap an existing 20-byte digest (e.g. one read back off disk).
    pub const fn from_bytes(bytes: [u8; HASH_BYTE_LEN]) -> Self {
        Hash(bytes)
    }

    /// Compute the content hash of `data`.
    pub fn compute(data: &[u8]) -> Self {
        use sha1::{Digest, Sha1};
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; HASH_BYTE_LEN];
        bytes.copy_from_slice(&digest);
        Hash(bytes)
    }

    pub const fn is_null(&self) -> bool {
        let mut i = 0;
        while i < HASH_BYTE_LEN {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    pub const fn as_bytes(&self) -> &[u8; HASH_BYTE_LEN] {
        &self.0
    }

    /// Decode a 32-character base32 string (no padding) into a hash. The
    /// alphabet and 5-bytes-at-a-time big-endian packing match
    /// `Hash::FromBase32` in `original_source/src/hash/hash.cc` exactly —
    /// this is not an independent RFC4648 encoder, it is the same
    /// bit-packing ported byte for byte.
    pub fn from_base32(s: &str) -> Result<Self, HashParseError> {
        let s = s.as_bytes();
        if s.len() != HASH_BASE32_LEN {
            return Err(HashParseError::WrongLength(s.len()));
        }
        let mut out = [0u8; HASH_BYTE_LEN];
        let mut dest = 0usize;
        for chunk in s.chunks(8) {
            let mut tmp: u64 = 0;
            for &c in chunk {
                let digit = BASE32_ALPHABET
                    .iter()
                    .position(|&a| a == c.to_ascii_uppercase())
                    .ok_or(HashParseError::InvalidChar(c as char))? as u64;
                tmp = (tmp << 5) | digit;
            }
            for j in 0..5 {
                out[dest + 4 - j] = (tmp & 0xff) as u8;
                tmp >>= 8;
            }
            dest += 5;
        }
        Ok(Hash(out))
    }

    /// Encode as a 32-character base32 string, no padding — the
    /// counterpart of `from_base32`, ported from `Hash::ToBase32` the
    /// same way (see `from_base32`'s doc comment).
    pub fn to_base32(&self) -> String {
        let mut out = String::with_capacity(HASH_BASE32_LEN);
        for chunk in self.0.chunks(5) {
            let mut tmp: u64 = 0;
            for &b in chunk {
                tmp = (tmp << 8) | b as u64;
            }
            for j in 0..8 {
                let shift = 5 * (7 - j);
                out.push(BASE32_ALPHABET[((tmp >> shift) & 0x1f) as usize] as char);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HashParseError {
    #[error("expected a 32-character base32 hash, got {0} characters")]
    WrongLength(usize),
    #[error("invalid base32 character '{0}'")]
    InvalidChar(char),
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_base32())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl FromStr for Hash {
    type Err = HashParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_base32(s)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_BYTE_LEN]> for Hash {
    fn from(bytes: [u8; HASH_BYTE_LEN]) -> Self {
        Hash(bytes)
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = HashParseError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != HASH_BYTE_LEN {
            return Err(HashParseError::WrongLength(bytes.len()));
        }
        let mut out = [0u8; HASH_BYTE_LEN];
        out.copy_from_slice(bytes);
        Ok(Hash(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_hash_is_all_zero_and_detected() {
        assert!(Hash::NULL.is_null());
        assert_eq!(Hash::NULL.as_bytes(), &[0u8; HASH_BYTE_LEN]);
    }

    #[test]
    fn compute_is_deterministic() {
        let a = Hash::compute(b"The quick brown fox jumps over the lazy dog");
        let b = Hash::compute(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(a, b);
        assert_ne!(a, Hash::compute(b"some other bytes"));
    }

    #[test]
    fn base32_matches_the_original_bit_packing() {
        // All-zero hash: every 5-bit group is 0, which is 'A' in
        // `BASE32_ALPHABET` — the same fixed point `Hash::ToBase32`
        // produces for `Hash::kNull`.
        assert_eq!(Hash::NULL.to_base32(), "A".repeat(HASH_BASE32_LEN));

        // First 5 bytes all 0xff (40 one-bits, eight 5-bit groups of
        // 0b11111 = 31 = '7'), the rest zero.
        let mut bytes = [0u8; HASH_BYTE_LEN];
        bytes[0..5].copy_from_slice(&[0xff; 5]);
        let h = Hash::from_bytes(bytes);
        assert_eq!(h.to_base32(), format!("{}{}", "7".repeat(8), "A".repeat(24)));
        assert_eq!(Hash::from_base32(&h.to_base32()).unwrap(), h);
    }

    #[test]
    fn base32_round_trips() {
        let h = Hash::compute(b"round trip me");
        let encoded = h.to_base32();
        assert_eq!(encoded.len(), HASH_BASE32_LEN);
        let decoded = Hash::from_base32(&encoded).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn ordering_is_lexicographic_over_bytes() {
        let a = Hash::from_bytes([0u8; 20]);
        let mut b = [0u8; 20];
        b[19] = 1;
        let b = Hash::from_bytes(b);
        assert!(a < b);
    }
}
