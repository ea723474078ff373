//! The on-disk log-structured segment file (§4.1, §6.1).
//!
//! `data_dir/ustore_<port>.dat`, fixed size `META + N·SEG`. `META`
//! (4096 B) is five little-endian u64 offsets: `free_head`, `major_head`,
//! `current_major`, `minor_head`, `current_minor`. Each segment is
//! `(prev: u64, next: u64)` followed by appended `hash(20) | chunk_bytes`
//! records, with the last 20 bytes of the segment mirroring the hash of
//! its first record (a seal). The major list receives live writes; minor
//! is reserved for GC-copied survivors (§1's Non-goals excludes full GC,
//! so nothing currently populates it — the list still exists so `StoreInfo`
//! and recovery have somewhere correct to report zero).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ustore_primitives::{ChunkType, Hash, UError, UResult};

use crate::chunk::Chunk;
use crate::chunk_store::{ChunkStore, StoreInfo};
use crate::metrics;

pub const META_SIZE: u64 = 4096;
pub const SEG_SIZE: u64 = 4 * 1024 * 1024;
pub const SEG_HEADER_LEN: u64 = 16;
pub const SEAL_LEN: u64 = 20;
pub const RECORDS_AREA_LEN: u64 = SEG_SIZE - SEG_HEADER_LEN - SEAL_LEN;
pub const NULL_OFFSET: u64 = u64::MAX;

pub const MAX_PENDING_SYNC_CHUNKS: usize = 1024;
pub const MAX_SYNC_TIMEOUT: Duration = Duration::from_secs(3);

struct MetaBlock {
    free_head: u64,
    major_head: u64,
    current_major: u64,
    minor_head: u64,
    current_minor: u64,
}

impl MetaBlock {
    fn empty(num_segments: u64) -> Self {
        // Segment offsets are relative to the start of the segment area,
        // i.e. segment i lives at META_SIZE + i * SEG_SIZE. On a fresh
        // file every segment starts out on the free list, threaded in
        // order.
        let free_head = if num_segments == 0 { NULL_OFFSET } else { META_SIZE };
        MetaBlock {
            free_head,
            major_head: NULL_OFFSET,
            current_major: NULL_OFFSET,
            minor_head: NULL_OFFSET,
            current_minor: NULL_OFFSET,
        }
    }

    fn decode(buf: &[u8; META_SIZE as usize]) -> Self {
        let read = |at: usize| u64::from_le_bytes(buf[at..at + 8].try_into().unwrap());
        MetaBlock {
            free_head: read(0),
            major_head: read(8),
            current_major: read(16),
            minor_head: read(24),
            current_minor: read(32),
        }
    }

    fn encode(&self) -> [u8; META_SIZE as usize] {
        let mut buf = [0u8; META_SIZE as usize];
        buf[0..8].copy_from_slice(&self.free_head.to_le_bytes());
        buf[8..16].copy_from_slice(&self.major_head.to_le_bytes());
        buf[16..24].copy_from_slice(&self.current_major.to_le_bytes());
        buf[24..32].copy_from_slice(&self.minor_head.to_le_bytes());
        buf[32..40].copy_from_slice(&self.current_minor.to_le_bytes());
        buf
    }
}

struct Index {
    // hash -> (segment base offset, offset of the record within the file)
    entries: HashMap<Hash, (u64, u64)>,
}

struct Inner {
    file: File,
    num_segments: u64,
    meta: MetaBlock,
    index: Index,
    pending_since_sync: usize,
    last_sync: Instant,
    info: StoreInfo,
}

/// Log-structured chunk store backed by a single fixed-size file.
pub struct SegmentFileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl SegmentFileStore {
    pub fn open(path: impl AsRef<Path>, num_segments: u64) -> UResult<Self> {
        let path = path.as_ref().to_path_buf();
        let expected_len = META_SIZE + num_segments * SEG_SIZE;
        let existed = path.exists();
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        if !existed {
            file.set_len(expected_len)?;
            let meta = MetaBlock::empty(num_segments);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&meta.encode())?;
            link_free_segments(&mut file, num_segments)?;
            file.sync_all()?;
        } else {
            let actual_len = file.metadata()?.len();
            if actual_len != expected_len {
                return Err(UError::InvalidCommandArgument(format!(
                    "segment file {} has size {actual_len}, expected {expected_len} for {num_segments} segments",
                    path.display()
                )));
            }
        }

        let mut meta_buf = [0u8; META_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut meta_buf)?;
        let meta = MetaBlock::decode(&meta_buf);

        let (index, info) = recover(&mut file, &meta)?;

        Ok(SegmentFileStore {
            path,
            inner: Mutex::new(Inner {
                file,
                num_segments,
                meta,
                index: Index { entries: index },
                pending_since_sync: 0,
                last_sync: Instant::now(),
                info,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every hash currently indexed (i.e. live, reachable by `get`). Used
    /// by `tools/database`'s compaction command to enumerate the survivor
    /// set when rewriting into a fresh segment file (§1's "sealed-segment
    /// reclamation" is the only GC in scope).
    pub fn all_hashes(&self) -> Vec<Hash> {
        self.inner.lock().unwrap().index.entries.keys().copied().collect()
    }

    fn maybe_sync(&self, inner: &mut Inner) -> UResult<()> {
        if inner.pending_since_sync >= MAX_PENDING_SYNC_CHUNKS
            || inner.last_sync.elapsed() >= MAX_SYNC_TIMEOUT
        {
            self.sync_locked(inner)?;
        }
        Ok(())
    }

    fn sync_locked(&self, inner: &mut Inner) -> UResult<()> {
        let start = Instant::now();
        inner.file.sync_data()?;
        inner.pending_since_sync = 0;
        inner.last_sync = Instant::now();
        metrics::PENDING_SYNC_CHUNKS.set(0);
        metrics::SYNC_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Allocate a fresh active major segment, unlinking it from the free
    /// list. Writes the new meta block.
    fn roll_major(&self, inner: &mut Inner) -> UResult<u64> {
        if inner.meta.free_head == NULL_OFFSET {
            return Err(UError::IoFault(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "segment file exhausted: no free segments remain",
            )));
        }
        let new_seg = inner.meta.free_head;
        let next_free = read_segment_header(&mut inner.file, new_seg)?.1;
        inner.meta.free_head = next_free;

        // Link the new segment to the head of the major list.
        write_segment_header(&mut inner.file, new_seg, NULL_OFFSET, inner.meta.major_head)?;
        if inner.meta.major_head != NULL_OFFSET {
            let (prev, next) = read_segment_header(&mut inner.file, inner.meta.major_head)?;
            let _ = prev;
            write_segment_header(&mut inner.file, inner.meta.major_head, new_seg, next)?;
        }
        inner.meta.major_head = new_seg;
        inner.meta.current_major = new_seg;

        write_meta(&mut inner.file, &inner.meta)?;
        inner.file.sync_data()?;
        metrics::SEGMENTS_ROLLED.inc();
        tracing::debug!(target: "ustore_store", segment = new_seg, "rolled to a new active major segment");
        Ok(new_seg)
    }

    fn current_major_write_offset(&self, inner: &mut Inner) -> UResult<(u64, u64)> {
        if inner.meta.current_major == NULL_OFFSET {
            let seg = self.roll_major(inner)?;
            return Ok((seg, seg + SEG_HEADER_LEN));
        }
        let seg = inner.meta.current_major;
        let write_pos = segment_write_cursor(&mut inner.file, seg)?;
        Ok((seg, write_pos))
    }
}

impl ChunkStore for SegmentFileStore {
    fn put(&self, chunk: &Chunk) -> UResult<bool> {
        let hash = chunk.hash();
        let mut inner = self.inner.lock().unwrap();
        if inner.index.entries.contains_key(&hash) {
            return Ok(true);
        }

        let record_len = 20 + chunk.len() as u64;
        if record_len > RECORDS_AREA_LEN {
            return Err(UError::FailedCreateChunk(hash));
        }

        let (mut seg, mut write_pos) = self.current_major_write_offset(&mut inner)?;
        let seg_end = seg + SEG_HEADER_LEN + RECORDS_AREA_LEN;
        if write_pos + record_len > seg_end {
            seal_segment(&mut inner.file, seg, write_pos)?;
            seg = self.roll_major(&mut inner)?;
            write_pos = seg + SEG_HEADER_LEN;
        }

        inner.file.seek(SeekFrom::Start(write_pos))?;
        inner.file.write_all(hash.as_bytes())?;
        inner.file.write_all(chunk.as_bytes())?;

        inner.index.entries.insert(hash, (seg, write_pos));
        inner.info.record(chunk.chunk_type(), chunk.len() as u64);
        inner.pending_since_sync += 1;
        metrics::CHUNKS_WRITTEN.with_label_values(&[chunk_type_label(chunk.chunk_type())]).inc();
        metrics::CHUNK_BYTES_WRITTEN.inc_by(chunk.len() as u64);
        metrics::PENDING_SYNC_CHUNKS.set(inner.pending_since_sync as i64);

        self.maybe_sync(&mut inner)?;
        Ok(true)
    }

    fn get(&self, hash: &Hash) -> UResult<Option<Chunk>> {
        let inner = self.inner.lock().unwrap();
        let Some(&(_, record_offset)) = inner.index.entries.get(hash) else {
            return Ok(None);
        };
        let mut file = inner.file.try_clone()?;
        file.seek(SeekFrom::Start(record_offset + 20))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let num_bytes = u32::from_le_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; num_bytes];
        file.seek(SeekFrom::Start(record_offset + 20))?;
        file.read_exact(&mut bytes)?;
        Ok(Chunk::from_bytes(bytes))
    }

    fn exists(&self, hash: &Hash) -> UResult<bool> {
        Ok(self.inner.lock().unwrap().index.entries.contains_key(hash))
    }

    fn info(&self) -> UResult<StoreInfo> {
        let inner = self.inner.lock().unwrap();
        let mut info = inner.info.clone();
        info.num_segments_total = inner.num_segments;
        info.num_segments_free = count_list(&inner, inner.meta.free_head)?;
        info.num_segments_major = count_list(&inner, inner.meta.major_head)?;
        info.num_segments_minor = count_list(&inner, inner.meta.minor_head)?;
        Ok(info)
    }

    fn sync(&self) -> UResult<()> {
        let mut inner = self.inner.lock().unwrap();
        self.sync_locked(&mut inner)
    }
}

fn count_list(inner: &Inner, mut head: u64) -> UResult<u64> {
    let mut file = inner.file.try_clone()?;
    let mut n = 0u64;
    let mut guard = 0u64;
    while head != NULL_OFFSET {
        n += 1;
        guard += 1;
        if guard > inner.num_segments + 1 {
            break; // defensive: a corrupt list must not hang introspection.
        }
        let (_, next) = read_segment_header(&mut file, head)?;
        head = next;
    }
    Ok(n)
}

fn chunk_type_label(ty: ChunkType) -> &'static str {
    ty.into()
}

fn link_free_segments(file: &mut File, num_segments: u64) -> UResult<()> {
    for i in 0..num_segments {
        let seg = META_SIZE + i * SEG_SIZE;
        let next = if i + 1 < num_segments { META_SIZE + (i + 1) * SEG_SIZE } else { NULL_OFFSET };
        write_segment_header(file, seg, NULL_OFFSET, next)?;
    }
    Ok(())
}

fn write_meta(file: &mut File, meta: &MetaBlock) -> UResult<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&meta.encode())?;
    Ok(())
}

fn read_segment_header(file: &mut File, seg_offset: u64) -> UResult<(u64, u64)> {
    let mut buf = [0u8; 16];
    file.seek(SeekFrom::Start(seg_offset))?;
    file.read_exact(&mut buf)?;
    Ok((
        u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        u64::from_le_bytes(buf[8..16].try_into().unwrap()),
    ))
}

fn write_segment_header(file: &mut File, seg_offset: u64, prev: u64, next: u64) -> UResult<()> {
    let mut buf = [0u8; 16];
    buf[0..8].copy_from_slice(&prev.to_le_bytes());
    buf[8..16].copy_from_slice(&next.to_le_bytes());
    file.seek(SeekFrom::Start(seg_offset))?;
    file.write_all(&buf)?;
    Ok(())
}

/// Zero the trailing bytes between the write cursor and the seal, then
/// write the seal (the hash of the segment's first record).
fn seal_segment(file: &mut File, seg_offset: u64, write_pos: u64) -> UResult<()> {
    let records_start = seg_offset + SEG_HEADER_LEN;
    let seal_offset = seg_offset + SEG_HEADER_LEN + RECORDS_AREA_LEN;
    if write_pos < seal_offset {
        let padding = vec![0u8; (seal_offset - write_pos) as usize];
        file.seek(SeekFrom::Start(write_pos))?;
        file.write_all(&padding)?;
    }
    let mut first_hash = [0u8; 20];
    file.seek(SeekFrom::Start(records_start))?;
    file.read_exact(&mut first_hash)?;
    file.seek(SeekFrom::Start(seal_offset))?;
    file.write_all(&first_hash)?;
    file.sync_data()?;
    Ok(())
}

/// Find where the next record would be appended within `seg_offset`'s
/// records area by scanning forward from its start.
fn segment_write_cursor(file: &mut File, seg_offset: u64) -> UResult<u64> {
    let records_start = seg_offset + SEG_HEADER_LEN;
    let seal_offset = seg_offset + SEG_HEADER_LEN + RECORDS_AREA_LEN;
    let mut pos = records_start;
    loop {
        match read_record_len(file, pos, seal_offset)? {
            Some(record_len) => pos += record_len,
            None => break,
        }
    }
    Ok(pos)
}

/// Attempt to read one record's total length (20 + declared chunk size) at
/// `pos`. Returns `None` at a zeroed/malformed/out-of-space position,
/// meaning this is the first free slot.
fn read_record_len(file: &mut File, pos: u64, seal_offset: u64) -> UResult<Option<u64>> {
    if pos + 24 > seal_offset {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(pos + 20))?;
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let declared = u32::from_le_bytes(len_buf) as u64;
    if declared < crate::chunk::HEADER_LEN as u64 || pos + 20 + declared > seal_offset {
        return Ok(None);
    }
    Ok(Some(20 + declared))
}

/// Scan every sealed segment (major and minor lists) plus the active
/// segment, rebuilding the in-memory hash index and `StoreInfo` counters.
/// The active segment is truncated logically at the first zeroed or
/// malformed record (§4.1's failure model: a torn write is discarded, sync
/// is the commit barrier).
fn recover(file: &mut File, meta: &MetaBlock) -> UResult<(HashMap<Hash, (u64, u64)>, StoreInfo)> {
    let mut index = HashMap::new();
    let mut info = StoreInfo::default();

    for &(list_head, active) in
        &[(meta.major_head, meta.current_major), (meta.minor_head, meta.current_minor)]
    {
        let mut seg = list_head;
        while seg != NULL_OFFSET {
            scan_segment(file, seg, seg == active, &mut index, &mut info)?;
            let (_, next) = read_segment_header(file, seg)?;
            seg = next;
        }
    }
    Ok((index, info))
}

fn scan_segment(
    file: &mut File,
    seg_offset: u64,
    is_active: bool,
    index: &mut HashMap<Hash, (u64, u64)>,
    info: &mut StoreInfo,
) -> UResult<()> {
    let records_start = seg_offset + SEG_HEADER_LEN;
    let seal_offset = seg_offset + SEG_HEADER_LEN + RECORDS_AREA_LEN;
    let mut pos = records_start;

    loop {
        if pos + 20 > seal_offset {
            break;
        }
        let mut hash_buf = [0u8; 20];
        file.seek(SeekFrom::Start(pos))?;
        if file.read_exact(&mut hash_buf).is_err() {
            break;
        }
        let Ok(hash) = Hash::try_from(&hash_buf[..]) else { break };

        let Some(record_len) = read_record_len(file, pos, seal_offset)? else {
            if !is_active {
                tracing::warn!(
                    target: "ustore_store",
                    segment = seg_offset,
                    "sealed segment ends with a malformed record"
                );
            }
            break;
        };

        let mut chunk_bytes = vec![0u8; (record_len - 20) as usize];
        file.seek(SeekFrom::Start(pos + 20))?;
        file.read_exact(&mut chunk_bytes)?;
        let Some(chunk) = Chunk::from_bytes(chunk_bytes) else { break };
        if chunk.hash() != hash {
            if !is_active {
                return Err(UError::IoFault(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("sealed segment at offset {seg_offset} is corrupt: hash mismatch"),
                )));
            }
            break;
        }

        info.record(chunk.chunk_type(), chunk.len() as u64);
        index.insert(hash, (seg_offset, pos));
        pos += record_len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ustore_primitives::ChunkType;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("s.dat"), 4).unwrap();
        let chunk = Chunk::new(ChunkType::Blob, b"payload bytes");
        assert!(store.put(&chunk).unwrap());
        let back = store.get(&chunk.hash()).unwrap().unwrap();
        assert_eq!(back.as_bytes(), chunk.as_bytes());
        assert!(store.exists(&chunk.hash()).unwrap());
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("s.dat"), 4).unwrap();
        let chunk = Chunk::new(ChunkType::Blob, b"same bytes twice");
        assert!(store.put(&chunk).unwrap());
        assert!(store.put(&chunk).unwrap());
        let info = store.info().unwrap();
        assert_eq!(info.num_chunks, 1);
    }

    #[test]
    fn missing_hash_returns_none() {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("s.dat"), 4).unwrap();
        assert!(store.get(&Hash::compute(b"never written")).unwrap().is_none());
        assert!(!store.exists(&Hash::compute(b"never written")).unwrap());
    }

    #[test]
    fn survives_reopen_after_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.dat");
        let hashes: Vec<Hash> = {
            let store = SegmentFileStore::open(&path, 4).unwrap();
            let mut hashes = Vec::new();
            for i in 0..50u32 {
                let chunk = Chunk::new(ChunkType::Blob, format!("entry-{i}").as_bytes());
                store.put(&chunk).unwrap();
                hashes.push(chunk.hash());
            }
            store.sync().unwrap();
            hashes
        };
        let reopened = SegmentFileStore::open(&path, 4).unwrap();
        for hash in hashes {
            assert!(reopened.get(&hash).unwrap().is_some());
        }
    }

    #[test]
    fn rolls_over_into_a_new_major_segment_once_full() {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("s.dat"), 3).unwrap();
        // Each chunk is a few KB; enough of them force at least one
        // segment roll within RECORDS_AREA_LEN (~4 MiB).
        let payload = vec![0xABu8; 64 * 1024];
        let mut hashes = Vec::new();
        for i in 0..80u32 {
            let mut bytes = payload.clone();
            bytes.extend_from_slice(&i.to_le_bytes());
            let chunk = Chunk::new(ChunkType::Blob, &bytes);
            store.put(&chunk).unwrap();
            hashes.push(chunk.hash());
        }
        let info = store.info().unwrap();
        assert!(info.num_segments_major >= 2, "expected at least one roll, got {info:?}");
        for hash in hashes {
            assert!(store.get(&hash).unwrap().is_some());
        }
    }

    #[test]
    fn wrong_segment_count_on_reopen_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.dat");
        SegmentFileStore::open(&path, 4).unwrap();
        assert!(SegmentFileStore::open(&path, 8).is_err());
    }

    #[test]
    fn info_reports_per_type_breakdown() {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("s.dat"), 4).unwrap();
        store.put(&Chunk::new(ChunkType::Blob, b"a")).unwrap();
        store.put(&Chunk::new(ChunkType::String, b"bb")).unwrap();
        store.put(&Chunk::new(ChunkType::String, b"ccc")).unwrap();
        let info = store.info().unwrap();
        assert_eq!(info.num_chunks, 3);
        assert_eq!(*info.chunks_by_type.get("Blob").unwrap(), 1);
        assert_eq!(*info.chunks_by_type.get("String").unwrap(), 2);
    }
}
