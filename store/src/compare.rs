//! Structural comparator / differ / merger (§4.8).
//!
//! All three operate by shortcutting whenever two subtree (here: whole
//! object) root hashes are equal — a direct consequence of content
//! addressing (equal hashes imply pointwise-equal subtrees, so there is
//! nothing further to compare). Below the root, comparisons work over a
//! flattened view of each object's elements (see `builder::NodeBuilder::
//! flatten` and its `DESIGN.md` note on the builder's full-rebuild
//! simplification, which this module inherits: there is no sub-tree-level
//! hash-shortcutting below the root, only at it).
//!
//! Two flavors of comparator are distinguished by which [`ObjectKind`]
//! (index-addressed: blob/list, or key-addressed: map/set) the caller is
//! comparing; the functions below are grouped accordingly rather than
//! built as trait objects, since nothing here needs runtime polymorphism
//! across the two.

use ustore_primitives::{ChunkType, Hash};

use crate::builder::NodeBuilder;
use crate::segment::Entry;

/// A maximal contiguous run of indices, `[start, start+len)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRange {
    pub start: u64,
    pub len: u64,
}

impl IndexRange {
    pub fn new(start: u64, len: u64) -> Self {
        IndexRange { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

fn element_bytes(e: &Entry) -> Vec<u8> {
    match e {
        Entry::Byte(b) => vec![*b],
        Entry::ListValue(v) => v.clone(),
        Entry::MapEntry { value, .. } => value.clone(),
        Entry::SetEntry { key } => key.clone(),
        Entry::Child { .. } => unreachable!("element_bytes given a meta entry"),
    }
}

fn element_key(e: &Entry) -> Option<Vec<u8>> {
    match e {
        Entry::MapEntry { key, .. } | Entry::SetEntry { key } => Some(key.clone()),
        _ => None,
    }
}

/// `diff(L, R)`: maximal contiguous index ranges in `L` whose elements do
/// not appear at the same position in `R` (index-addressed objects only).
pub fn diff(builder: &NodeBuilder, l: Hash, r: Hash) -> ustore_primitives::UResult<Vec<IndexRange>> {
    if l == r {
        return Ok(Vec::new());
    }
    let lv = builder.flatten(l)?;
    let rv = builder.flatten(r)?;
    Ok(diff_ranges(&lv, &rv))
}

/// `intersect(L, R)`: the complement of [`diff`] within `[0, |L|)`.
pub fn intersect(
    builder: &NodeBuilder,
    l: Hash,
    r: Hash,
) -> ustore_primitives::UResult<Vec<IndexRange>> {
    let lv = builder.flatten(l)?;
    let diffs = diff(builder, l, r)?;
    Ok(complement(&diffs, lv.len() as u64))
}

pub(crate) fn diff_ranges(l: &[Entry], r: &[Entry]) -> Vec<IndexRange> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < l.len() {
        let differs = i >= r.len() || element_bytes(&l[i]) != element_bytes(&r[i]);
        if !differs {
            i += 1;
            continue;
        }
        let start = i;
        while i < l.len() && (i >= r.len() || element_bytes(&l[i]) != element_bytes(&r[i])) {
            i += 1;
        }
        out.push(IndexRange::new(start as u64, (i - start) as u64));
    }
    out
}

pub(crate) fn complement(ranges: &[IndexRange], total_len: u64) -> Vec<IndexRange> {
    let mut out = Vec::new();
    let mut cursor = 0u64;
    for r in ranges {
        if r.start > cursor {
            out.push(IndexRange::new(cursor, r.start - cursor));
        }
        cursor = r.end();
    }
    if cursor < total_len {
        out.push(IndexRange::new(cursor, total_len - cursor));
    }
    out
}

/// `dually_diff(L, R)`: every key at which `L` and `R` disagree, with
/// both sides' values (key-addressed objects only; either side may be
/// absent).
pub fn dually_diff(
    builder: &NodeBuilder,
    l: Hash,
    r: Hash,
) -> ustore_primitives::UResult<Vec<(Vec<u8>, Option<Entry>, Option<Entry>)>> {
    if l == r {
        return Ok(Vec::new());
    }
    let lv = builder.flatten(l)?;
    let rv = builder.flatten(r)?;
    Ok(dually_diff_entries(&lv, &rv))
}

fn dually_diff_entries(
    l: &[Entry],
    r: &[Entry],
) -> Vec<(Vec<u8>, Option<Entry>, Option<Entry>)> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < l.len() || j < r.len() {
        let lk = l.get(i).and_then(element_key);
        let rk = r.get(j).and_then(element_key);
        match (lk, rk) {
            (Some(lk), Some(rk)) => match lk.cmp(&rk) {
                std::cmp::Ordering::Equal => {
                    if l[i] != r[j] {
                        out.push((lk, Some(l[i].clone()), Some(r[j].clone())));
                    }
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => {
                    out.push((lk, Some(l[i].clone()), None));
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push((rk, None, Some(r[j].clone())));
                    j += 1;
                }
            },
            (Some(lk), None) => {
                out.push((lk, Some(l[i].clone()), None));
                i += 1;
            }
            (None, Some(rk)) => {
                out.push((rk, None, Some(r[j].clone())));
                j += 1;
            }
            (None, None) => break,
        }
    }
    out
}

/// Which object kind a merge is operating over; picks the alignment
/// strategy (index-range replace for blob/list, key-by-key for map/set).
pub fn object_kind_is_index_addressed(kind: ChunkType) -> bool {
    kind.is_index_addressed()
}

/// Three-way merge (§4.8): for each position/key, yields `Base` if
/// neither side changed, the changed side's value if only one side
/// changed, or aborts the whole merge (returns `Ok(None)`) on a genuine
/// conflict — both sides changed the same position/key to different
/// values.
pub fn merge(
    builder: &NodeBuilder,
    base: Hash,
    l: Hash,
    r: Hash,
) -> ustore_primitives::UResult<Option<Hash>> {
    if l == r {
        return Ok(Some(l));
    }
    if l == base {
        return Ok(Some(r));
    }
    if r == base {
        return Ok(Some(l));
    }

    if builder.object_kind().is_index_addressed() {
        merge_index_addressed(builder, base, l, r)
    } else {
        merge_key_addressed(builder, base, l, r)
    }
}

/// A contiguous run of `base` indices replaced by `replacement` content,
/// derived from an edit script against `base` (the "Levenshtein mapper"
/// of §4.8, implemented directly over flattened elements rather than the
/// two-phase chunk-hash/gap dynamic-program hybrid described there — see
/// `DESIGN.md`: for the element counts this engine is exercised with, a
/// direct O(n*m) alignment is simpler and behaves identically).
pub(crate) struct Replace {
    pub(crate) base_start: usize,
    pub(crate) base_len: usize,
    pub(crate) replacement: Vec<Entry>,
}

fn merge_index_addressed(
    builder: &NodeBuilder,
    base: Hash,
    l: Hash,
    r: Hash,
) -> ustore_primitives::UResult<Option<Hash>> {
    let base_entries = builder.flatten(base)?;
    let l_entries = builder.flatten(l)?;
    let r_entries = builder.flatten(r)?;

    let l_edits = align(&base_entries, &l_entries);
    let r_edits = align(&base_entries, &r_entries);

    if edits_conflict(&l_edits, &r_edits) {
        return Ok(None);
    }

    let mut merged = Vec::new();
    let mut i = 0usize;
    while i < base_entries.len() {
        for e in l_edits.iter().chain(r_edits.iter()).filter(|e| e.base_start == i && e.base_len == 0)
        {
            merged.extend(e.replacement.clone());
        }
        if let Some(e) = l_edits.iter().find(|e| e.base_start == i && e.base_len > 0) {
            merged.extend(e.replacement.clone());
            i += e.base_len;
            continue;
        }
        if let Some(e) = r_edits.iter().find(|e| e.base_start == i && e.base_len > 0) {
            merged.extend(e.replacement.clone());
            i += e.base_len;
            continue;
        }
        merged.push(base_entries[i].clone());
        i += 1;
    }
    // Trailing pure-append edits (base_start == base_entries.len()).
    for e in l_edits.iter().chain(r_edits.iter()) {
        if e.base_start == base_entries.len() && e.base_len == 0 {
            merged.extend(e.replacement.clone());
        }
    }

    Ok(Some(builder.build_from_entries(merged)?))
}

pub(crate) fn edits_conflict(l: &[Replace], r: &[Replace]) -> bool {
    for le in l {
        for re in r {
            let overlap = le.base_start < re.base_start + re.base_len.max(1)
                && re.base_start < le.base_start + le.base_len.max(1);
            if overlap && le.replacement != re.replacement {
                return true;
            }
        }
    }
    false
}

/// A minimal edit-distance alignment of `other` against `base`, reduced
/// to maximal replace-regions expressed in `base` index coordinates.
pub(crate) fn align(base: &[Entry], other: &[Entry]) -> Vec<Replace> {
    let n = base.len();
    let m = other.len();
    // dp[i][j] = edit distance between base[i..] and other[j..].
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in 0..=n {
        dp[i][m] = (n - i) as u32;
    }
    for j in 0..=m {
        dp[n][j] = (m - j) as u32;
    }
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            if base[i] == other[j] {
                dp[i][j] = dp[i + 1][j + 1];
            } else {
                dp[i][j] = 1 + dp[i + 1][j].min(dp[i][j + 1]).min(dp[i + 1][j + 1]);
            }
        }
    }

    let mut edits = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n || j < m {
        if i < n && j < m && base[i] == other[j] {
            i += 1;
            j += 1;
            continue;
        }
        let start_i = i;
        let start_j = j;
        while i < n && j < m && base[i] != other[j] && dp[i][j] == 1 + dp[i + 1][j + 1] {
            i += 1;
            j += 1;
        }
        while i < n && dp[i][j] == 1 + dp[i + 1][j] {
            i += 1;
        }
        while j < m && dp[i][j] == 1 + dp[i][j + 1] {
            j += 1;
        }
        if i == start_i && j == start_j {
            break;
        }
        edits.push(Replace {
            base_start: start_i,
            base_len: i - start_i,
            replacement: other[start_j..j].to_vec(),
        });
    }
    edits
}

fn merge_key_addressed(
    builder: &NodeBuilder,
    base: Hash,
    l: Hash,
    r: Hash,
) -> ustore_primitives::UResult<Option<Hash>> {
    let base_entries = builder.flatten(base)?;
    let l_entries = builder.flatten(l)?;
    let r_entries = builder.flatten(r)?;

    let by_key = |entries: &[Entry]| -> std::collections::BTreeMap<Vec<u8>, Entry> {
        entries.iter().filter_map(|e| element_key(e).map(|k| (k, e.clone()))).collect()
    };
    let base_map = by_key(&base_entries);
    let l_map = by_key(&l_entries);
    let r_map = by_key(&r_entries);

    let mut keys: std::collections::BTreeSet<Vec<u8>> = std::collections::BTreeSet::new();
    keys.extend(base_map.keys().cloned());
    keys.extend(l_map.keys().cloned());
    keys.extend(r_map.keys().cloned());

    let mut merged = std::collections::BTreeMap::new();
    for key in keys {
        let b = base_map.get(&key);
        let lv = l_map.get(&key);
        let rv = r_map.get(&key);
        let resolved = if lv == rv {
            lv.cloned()
        } else if lv == b {
            rv.cloned()
        } else if rv == b {
            lv.cloned()
        } else {
            return Ok(None);
        };
        if let Some(v) = resolved {
            merged.insert(key, v);
        }
    }

    let entries: Vec<Entry> = merged.into_values().collect();
    Ok(Some(builder.build_from_entries(entries)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::{ChunkLoader, ChunkWriter, SegmentFileStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fresh_builder(kind: ChunkType) -> NodeBuilder {
        let dir = tempdir().unwrap();
        let store = SegmentFileStore::open(dir.path().join("test.dat"), 4).unwrap();
        std::mem::forget(dir);
        let loader = ChunkLoader::new(Arc::new(store));
        let writer = ChunkWriter::new(loader.clone());
        NodeBuilder::new(loader, writer, kind)
    }

    fn blob(b: &NodeBuilder, s: &[u8]) -> Hash {
        b.build_from_entries(s.iter().map(|c| Entry::Byte(*c)).collect()).unwrap()
    }

    #[test]
    fn diff_and_intersect_partition_the_range() {
        let b = fresh_builder(ChunkType::Blob);
        let base = b"abcededfhijklmnopqrst";
        let mut edited = base.to_vec();
        edited.splice(10..12, b"xxx".iter().copied());
        let l_len = edited.len();
        edited.splice(l_len - 2..l_len, b"y".iter().copied());

        let l_root = blob(&b, &edited);
        let base_root = blob(&b, base);

        let diffs = diff(&b, l_root, base_root).unwrap();
        let inter = intersect(&b, l_root, base_root).unwrap();

        let mut all = diffs.clone();
        all.extend(inter.clone());
        all.sort_by_key(|r| r.start);
        let mut cursor = 0u64;
        for r in &all {
            assert_eq!(r.start, cursor);
            cursor = r.end();
        }
        assert_eq!(cursor, b.flatten(l_root).unwrap().len() as u64);
    }

    #[test]
    fn merge_of_noop_returns_base() {
        let b = fresh_builder(ChunkType::Blob);
        let base = blob(&b, b"stable content");
        assert_eq!(merge(&b, base, base, base).unwrap(), Some(base));
    }

    #[test]
    fn map_merge_resolves_disjoint_edits() {
        let b = fresh_builder(ChunkType::Map);
        let entry = |k: &str, v: &str| Entry::MapEntry { key: k.into(), value: v.into() };
        let base = b
            .build_from_entries(vec![
                entry("k0", "v0"),
                entry("k1", "v1"),
                entry("k2", "v2"),
                entry("k3", "v3"),
                entry("k5", "v5"),
                entry("k7", "v7"),
            ])
            .unwrap();
        let l = b
            .build_from_entries(vec![
                entry("k1", "v1p"),
                entry("k11", "v11"),
                entry("k2", "v2"),
                entry("k3", "v3"),
                entry("k4", "v4"),
                entry("k5", "v5"),
                entry("k6", "v6"),
                entry("k7", "v7"),
            ])
            .unwrap();
        let r = b
            .build_from_entries(vec![
                entry("k0", "v0"),
                entry("k1", "v1"),
                entry("k2", "v2"),
                entry("k3", "v3p"),
                entry("k5", "v5"),
                entry("k6", "v6"),
                entry("k7", "v7"),
                entry("k8", "v8"),
            ])
            .unwrap();

        let merged_root = merge(&b, base, l, r).unwrap().expect("non-conflicting merge");
        let mut flat = b.flatten(merged_root).unwrap();
        flat.sort_by(|a, b| match (a, b) {
            (Entry::MapEntry { key: k1, .. }, Entry::MapEntry { key: k2, .. }) => k1.cmp(k2),
            _ => unreachable!(),
        });
        let pairs: Vec<(String, String)> = flat
            .into_iter()
            .map(|e| match e {
                Entry::MapEntry { key, value } => {
                    (String::from_utf8(key).unwrap(), String::from_utf8(value).unwrap())
                }
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("k11".into(), "v11".into()),
                ("k2".into(), "v2".into()),
                ("k3".into(), "v3p".into()),
                ("k4".into(), "v4".into()),
                ("k5".into(), "v5".into()),
                ("k6".into(), "v6".into()),
                ("k7".into(), "v7".into()),
                ("k8".into(), "v8".into()),
            ]
        );
    }
}
