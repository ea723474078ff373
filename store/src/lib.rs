//! `ustore-store`: the content-addressed chunk layer, the prolly-tree data
//! model, the node builder (splice engine), the structural comparator/
//! differ/merger, and the versioning layer (UCell, head-version table,
//! partitioner). See `spec.md` §4 and `SPEC_FULL.md` §0 for how these
//! modules divide responsibility.

pub mod builder;
pub mod chunk;
pub mod chunk_store;
pub mod chunker;
pub mod compare;
pub mod cursor;
pub mod facade;
pub mod head_table;
pub mod metrics;
pub mod node;
pub mod partition;
pub mod rolling_hash;
pub mod segment;
pub mod ucell;

pub use builder::NodeBuilder;
pub use chunk::Chunk;
pub use chunk_store::{ChunkLoader, ChunkStore, ChunkWriter, SegmentFileStore, StoreInfo};
pub use cursor::NodeCursor;
pub use head_table::HeadVersionTable;
pub use node::{LeafNode, MetaNode, SeqNode};
pub use partition::Partitioner;
pub use ucell::UCell;
