//! The `ustore` crate: config loading, the wire protocol, and the
//! `Database` facade that wires the chunk store, head-version table, and
//! partitioner together behind the operations `ustored` serves.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod wire;

pub use config::Config;
pub use engine::{Database, PrevRef, VersionedCell};
