//! `inspect`: open a node's segment file and print its `StoreInfo`
//! (§4.1's `info()` contract) — chunk counts and byte totals per kind,
//! plus segment-list occupancy. The operator-facing analogue of the
//! teacher's `adjust_database.rs`: a single focused read against one
//! store, not a whole-node startup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ustore_store::chunk_store::{ChunkStore, SegmentFileStore};

#[derive(clap::Args)]
pub(crate) struct InspectCommand {
    /// Path to the segment file (`ustore_<port>.dat`).
    #[clap(long)]
    path: PathBuf,
    /// Number of segments the file was opened with originally — must
    /// match, since the file's size is `META + N * SEG`.
    #[clap(long)]
    num_segments: u64,
    /// Print the raw `StoreInfo` as JSON instead of the human-readable
    /// table.
    #[clap(long)]
    json: bool,
}

impl InspectCommand {
    pub(crate) fn run(&self) -> Result<()> {
        let store = SegmentFileStore::open(&self.path, self.num_segments)
            .with_context(|| format!("opening segment file {}", self.path.display()))?;
        let info = store.info().context("reading store info")?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            print!("{info}");
        }
        Ok(())
    }
}
