/// The tag byte stored in every chunk header (`include/types/type.h` ->
/// `Type`/`ChunkType` in the original sources).
///
/// `Null` marks the absence of a chunk (used by callers that need an
/// `Option<ChunkType>`-like sentinel over the wire); `Invalid` is what a
/// reader produces when the payload doesn't match the declared tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr, enum_map::Enum,
)]
#[repr(u8)]
pub enum ChunkType {
    Blob = 0,
    String = 1,
    Meta = 2,
    Map = 3,
    List = 4,
    Set = 5,
    Cell = 6,
    Null = 7,
    Invalid = 8,
}

impl ChunkType {
    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            0 => ChunkType::Blob,
            1 => ChunkType::String,
            2 => ChunkType::Meta,
            3 => ChunkType::Map,
            4 => ChunkType::List,
            5 => ChunkType::Set,
            6 => ChunkType::Cell,
            7 => ChunkType::Null,
            _ => ChunkType::Invalid,
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this chunk kind is a leaf kind (as opposed to `Meta`, the
    /// only internal-node kind, or the non-tree kinds `Cell`/`Null`/
    /// `Invalid`).
    pub const fn is_leaf_kind(self) -> bool {
        matches!(
            self,
            ChunkType::Blob | ChunkType::String | ChunkType::Map | ChunkType::List | ChunkType::Set
        )
    }

    /// Whether elements of this kind are addressed by integer index
    /// (`true`: blob, list) or by byte key (`false`: map, set). Meaning is
    /// undefined for non-leaf kinds.
    pub const fn is_index_addressed(self) -> bool {
        matches!(self, ChunkType::Blob | ChunkType::List)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips() {
        for ty in [
            ChunkType::Blob,
            ChunkType::String,
            ChunkType::Meta,
            ChunkType::Map,
            ChunkType::List,
            ChunkType::Set,
            ChunkType::Cell,
        ] {
            assert_eq!(ChunkType::from_tag(ty.tag()), ty);
        }
    }

    #[test]
    fn unknown_tag_is_invalid() {
        assert_eq!(ChunkType::from_tag(200), ChunkType::Invalid);
    }
}
