use crate::Hash;

/// The flat error taxonomy every fallible engine call returns through.
///
/// This mirrors the wire-level `stat` code exactly (the `Response` payload
/// on the wire carries one of these as a `u32`), which is why it is a
/// bare, payload-free enum separate from [`UError`] (which carries the
/// context needed for a useful `Display`/log message locally, but erases
/// to one of these codes before it crosses the network).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr, enum_map::Enum,
)]
pub enum ErrorCode {
    Ok,
    InvalidCommandArgument,
    UnknownCommand,
    InvalidRange,
    BranchExists,
    BranchNotExists,
    KeyExists,
    KeyNotExists,
    InvalidHash,
    ChunkNotExists,
    FailedCreateChunk,
    TypeMismatch,
    IoFault,
    StoreInfoUnavailable,
}

/// The engine-internal error type. Every fallible call in `ustore-store`
/// and `ustore` returns `Result<T, UError>`; the network layer erases this
/// down to an [`ErrorCode`] before sending a response (see `ustore::wire`).
#[derive(Debug, thiserror::Error)]
pub enum UError {
    #[error("invalid command argument: {0}")]
    InvalidCommandArgument(String),

    #[error("no handler for this request type")]
    UnknownCommand,

    #[error("splice position {pos} exceeds length {len}")]
    InvalidRange { pos: u64, len: u64 },

    #[error("branch {branch:?} already exists for key {key:?}")]
    BranchExists { key: Vec<u8>, branch: Vec<u8> },

    #[error("branch {branch:?} does not exist for key {key:?}")]
    BranchNotExists { key: Vec<u8>, branch: Vec<u8> },

    #[error("key {key:?} already exists")]
    KeyExists { key: Vec<u8> },

    #[error("key {key:?} does not exist")]
    KeyNotExists { key: Vec<u8> },

    #[error("malformed hash on the wire: {0}")]
    InvalidHash(String),

    #[error("chunk {0} not found")]
    ChunkNotExists(Hash),

    #[error("chunk store refused to create chunk {0}")]
    FailedCreateChunk(Hash),

    #[error("UCell type mismatch: expected root of kind {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: crate::ChunkType,
        actual: crate::ChunkType,
    },

    #[error("I/O fault: {0}")]
    IoFault(#[from] std::io::Error),

    #[error("store introspection (StoreInfo) is not enabled in this build")]
    StoreInfoUnavailable,
}

impl UError {
    /// Erase to the wire-level [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            UError::InvalidCommandArgument(_) => ErrorCode::InvalidCommandArgument,
            UError::UnknownCommand => ErrorCode::UnknownCommand,
            UError::InvalidRange { .. } => ErrorCode::InvalidRange,
            UError::BranchExists { .. } => ErrorCode::BranchExists,
            UError::BranchNotExists { .. } => ErrorCode::BranchNotExists,
            UError::KeyExists { .. } => ErrorCode::KeyExists,
            UError::KeyNotExists { .. } => ErrorCode::KeyNotExists,
            UError::InvalidHash(_) => ErrorCode::InvalidHash,
            UError::ChunkNotExists(_) => ErrorCode::ChunkNotExists,
            UError::FailedCreateChunk(_) => ErrorCode::FailedCreateChunk,
            UError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            UError::IoFault(_) => ErrorCode::IoFault,
            UError::StoreInfoUnavailable => ErrorCode::StoreInfoUnavailable,
        }
    }
}

pub type UResult<T> = Result<T, UError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_is_exhaustive_by_construction() {
        let err = UError::ChunkNotExists(Hash::NULL);
        assert_eq!(err.code(), ErrorCode::ChunkNotExists);
    }
}
