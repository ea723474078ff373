//! The four invariants (`spec.md` §8) that are cheap enough to re-check
//! against a live data directory from the outside, without re-deriving
//! the whole engine's test suite: P1 (content addressing), P3 (object
//! round-trip), P9 (partitioner stability), P10 (crash recovery).

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ustore_primitives::{ChunkType, Hash};
use ustore_store::chunk::Chunk;
use ustore_store::chunk_store::{ChunkLoader, ChunkStore, ChunkWriter, SegmentFileStore};
use ustore_store::facade::List;
use ustore_store::partition::Partitioner;
use ustore_store::NodeBuilder;

/// P1: `store.put(c); store.get(c.hash()) == c` for a handful of chunks
/// spanning every leaf kind.
pub fn check_content_addressing(data_dir: &Path, num_segments: u64) -> Result<()> {
    let path = data_dir.join("validator_p1.dat");
    let store = SegmentFileStore::open(&path, num_segments)
        .with_context(|| format!("opening scratch segment file at {}", path.display()))?;

    let samples = [
        Chunk::new(ChunkType::Blob, b"the quick brown fox"),
        Chunk::new(ChunkType::String, b"a scalar value"),
        Chunk::new(ChunkType::Blob, b""),
    ];
    for chunk in &samples {
        store.put(chunk)?;
        let back = store
            .get(&chunk.hash())
            .with_context(|| format!("fetching chunk {}", chunk.hash()))?
            .ok_or_else(|| anyhow::anyhow!("chunk {} vanished after put", chunk.hash()))?;
        if back.as_bytes() != chunk.as_bytes() {
            bail!("chunk {} round-tripped to different bytes", chunk.hash());
        }
    }
    store.sync()?;
    let _ = std::fs::remove_file(&path);
    Ok(())
}

/// P3: `load(build(values)) == values` for a list built through the node
/// builder. Exercises the splice engine and node readers together.
pub fn check_round_trip(data_dir: &Path, num_segments: u64) -> Result<()> {
    let path = data_dir.join("validator_p3.dat");
    let store = Arc::new(SegmentFileStore::open(&path, num_segments)?);
    let loader = ChunkLoader::new(store);
    let writer = ChunkWriter::new(loader.clone());
    let builder = Arc::new(NodeBuilder::new(loader, writer, ChunkType::List));

    let values: Vec<Vec<u8>> =
        (0..500u32).map(|i| format!("entry-{i}").into_bytes()).collect();
    let list = List::create(builder)?;
    let list = list.splice(0, 0, &values)?;
    let scanned = list.scan()?;
    if scanned != values {
        bail!(
            "list round-trip mismatch: built {} values, read back {}",
            values.len(),
            scanned.len()
        );
    }
    let _ = std::fs::remove_file(&path);
    Ok(())
}

/// P9: every node in `hosts` must agree on the owner of any given hash —
/// `Partitioner::owner_of` depends only on the hash and the host list,
/// never on which node is asking.
pub fn check_partitioner_stability(hosts: &[String]) -> Result<()> {
    if hosts.len() < 2 {
        bail!("need at least two hosts to exercise partitioner stability; got {}", hosts.len());
    }
    let partitioners: Vec<_> = (0..hosts.len())
        .map(|i| Partitioner::new(hosts.to_vec(), i))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for i in 0..200u32 {
        let hash = Hash::compute(format!("validator-probe-{i}").as_bytes());
        let owner = partitioners[0].owner_of(&hash);
        for p in &partitioners[1..] {
            if p.owner_of(&hash) != owner {
                bail!("hosts disagree on the owner of {hash}");
            }
        }
    }
    Ok(())
}

/// P10: chunks written and synced before a simulated crash (dropping the
/// store without a clean shutdown) remain loadable by hash after the
/// segment file is reopened.
pub fn check_recovery(data_dir: &Path, num_segments: u64) -> Result<()> {
    let path = data_dir.join("validator_p10.dat");
    let written: Vec<Hash> = {
        let store = SegmentFileStore::open(&path, num_segments)?;
        let mut hashes = Vec::new();
        for i in 0..256u32 {
            let chunk = Chunk::new(ChunkType::Blob, format!("recoverable-{i}").as_bytes());
            store.put(&chunk)?;
            hashes.push(chunk.hash());
        }
        store.sync()?;
        hashes
        // `store` is dropped here without any explicit close, simulating
        // the process being killed right after the observed `sync`.
    };

    let reopened = SegmentFileStore::open(&path, num_segments)?;
    for hash in &written {
        if reopened.get(hash)?.is_none() {
            bail!("chunk {hash} written before sync did not survive recovery");
        }
    }
    let _ = std::fs::remove_file(&path);
    Ok(())
}
