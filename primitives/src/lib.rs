//! Base types shared across the UStore storage engine.
//!
//! This crate carries no I/O and no storage logic: it defines the
//! content hash, the ordered-key abstraction that underlies every
//! prolly-tree comparison, the chunk type tag, and the flat error
//! taxonomy that every fallible call in the engine returns.

mod chunk_type;
mod error;
mod hash;
mod ordered_key;

pub use chunk_type::ChunkType;
pub use error::{ErrorCode, UError, UResult};
pub use hash::{Hash, HASH_BYTE_LEN};
pub use ordered_key::OrderedKey;
