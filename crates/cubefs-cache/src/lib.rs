//! Per-inode sparse interval map from file-offset ranges to remote extent
//! locations. This is core subsystem machinery:
//! it is the thing every read and write consults before talking to a
//! writer/reader pipeline, and the thing that must stay consistent with
//! the authoritative metadata server across concurrent writers, truncates
//! and overwrites.
//!
//! The cache is owned exclusively by one [`crate::ExtentCache`] per open
//! regular file (the stream here); there is no cross-stream sharing
//! and therefore no internal locking here -- callers serialize access
//! themselves (the stream does this at per-range granularity).

mod descriptor;

pub use descriptor::ExtentDescriptor;

use std::collections::BTreeMap;

/// What [`ExtentCache::lookup`] found at a given offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// `offset` falls inside a cached descriptor; `remaining` is the
    /// number of bytes from `offset` to the descriptor's end.
    Covered {
        descriptor: ExtentDescriptor,
        remaining: u64,
    },
    /// `offset` is not covered by any cached descriptor. `until` is the
    /// offset of the next known descriptor, or `size_hint` if there is
    /// none -- "unknown, ask meta on next read".
    Hole { until: u64 },
}

/// Per-inode sparse extent cache.
///
/// Invariants maintained by every mutating method:
/// 1. stored descriptors are pairwise disjoint in file-offset range;
/// 2. `size_hint >= max(file_offset + size)` over all stored descriptors;
/// 3. `generation` increases on every structural change.
#[derive(Debug, Default)]
pub struct ExtentCache {
    entries: BTreeMap<u64, ExtentDescriptor>,
    generation: u64,
    size_hint: u64,
}

impl ExtentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn size_hint(&self) -> u64 {
        self.size_hint
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary-search by start, verify containment.
    pub fn lookup(&self, offset: u64) -> Lookup {
        if let Some((_, desc)) = self.entries.range(..=offset).next_back() {
            if offset < desc.end() {
                return Lookup::Covered {
                    descriptor: *desc,
                    remaining: desc.end() - offset,
                };
            }
        }
        let until = self
            .entries
            .range(offset.saturating_add(1)..)
            .next()
            .map(|(start, _)| *start)
            .unwrap_or(self.size_hint);
        Lookup::Hole { until }
    }

    /// All descriptors overlapping `[start, start+len)` in file-offset
    /// order.
    pub fn list(&self, start: u64, len: u64) -> Vec<ExtentDescriptor> {
        let end = start.saturating_add(len);
        let mut out = Vec::new();
        if let Some((_, desc)) = self.entries.range(..start).next_back() {
            if desc.overlaps(start, end) {
                out.push(*desc);
            }
        }
        for (_, desc) in self.entries.range(start..end) {
            out.push(*desc);
        }
        out
    }

    /// Inserts `new_ext`, evicting and returning (via `discard_out`) any
    /// existing descriptor whose range intersects it.
    ///
    /// `sync` distinguishes the two call sites spec §4.E describes: a
    /// writer inserts its own in-flight contribution speculatively
    /// (`sync = false`) so a same-file read-after-write hits the cache
    /// without a meta round trip; the stream's flush reconciles against
    /// the meta server's authoritative extent list with `sync = true`.
    /// The cache itself does not distinguish committed from provisional
    /// entries when serving `lookup`/`list` -- both read identically, so
    /// no commit-state bookkeeping is kept beyond what `discard_out`
    /// reports back to the caller.
    pub fn append(&mut self, new_ext: ExtentDescriptor, _sync: bool, discard_out: &mut Vec<ExtentDescriptor>) {
        let start = new_ext.file_offset;
        let end = new_ext.end();

        let overlapping_keys: Vec<u64> = self
            .entries
            .range(..)
            .filter(|(_, d)| d.overlaps(start, end))
            .map(|(k, _)| *k)
            .collect();
        for key in overlapping_keys {
            if let Some(desc) = self.entries.remove(&key) {
                discard_out.push(desc);
            }
        }

        self.entries.insert(start, new_ext);
        self.size_hint = self.size_hint.max(end);
        self.generation += 1;
    }

    /// Idempotently removes the given descriptors from the cache -- a
    /// no-op for entries already gone . Used
    /// by the stream to inform itself (and eventually meta) which extents
    /// an overlapping append superseded.
    pub fn remove_discard(&mut self, discards: &[ExtentDescriptor]) {
        let mut changed = false;
        for d in discards {
            if let Some(desc) = self.entries.get(&d.file_offset) {
                if desc == d {
                    self.entries.remove(&d.file_offset);
                    changed = true;
                }
            }
        }
        if changed {
            self.generation += 1;
        }
    }

    /// Removes or trims extents past `new_size`; updates `size_hint`.
    pub fn truncate(&mut self, new_size: u64) {
        let to_drop: Vec<u64> = self
            .entries
            .range(new_size.saturating_add(1)..)
            .map(|(k, _)| *k)
            .collect();
        for key in &to_drop {
            self.entries.remove(key);
        }
        // The entry straddling `new_size`, if any, is trimmed in place
        // rather than discarded: its file_offset and remote location are
        // unchanged, only its visible length shrinks.
        if let Some((&start, desc)) = self.entries.range_mut(..new_size).next_back() {
            if desc.end() > new_size {
                let new_len = (new_size - start) as u32;
                *desc = desc.with_size(new_len);
            }
        }
        // An entry exactly at new_size with size 0 would violate the
        // nonzero-size invariant; `range(new_size.saturating_add(1)..)`
        // above already excludes `new_size` itself, so an entry starting
        // exactly there falls through to this check instead.
        if let Some(desc) = self.entries.get(&new_size) {
            if desc.file_offset == new_size {
                self.entries.remove(&new_size);
            }
        }
        self.size_hint = new_size;
        self.generation += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_hint = 0;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(file_offset: u64, partition_id: u64, extent_id: u64, extent_offset: u64, size: u32) -> ExtentDescriptor {
        ExtentDescriptor::new(file_offset, partition_id, extent_id, extent_offset, size)
    }

    #[test]
    fn e1_sequential_write_then_lookup() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(0, 1, 100, 0, 8192), true, &mut discards);
        assert!(discards.is_empty());
        match cache.lookup(0) {
            Lookup::Covered { descriptor, remaining } => {
                assert_eq!(descriptor.size, 8192);
                assert_eq!(remaining, 8192);
            }
            other => panic!("expected covered, got {other:?}"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn e2_overwrite_with_discard() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(0, 7, 11, 0, 4096), true, &mut discards);
        discards.clear();
        cache.append(ext(0, 8, 22, 0, 8192), true, &mut discards);
        assert_eq!(discards, vec![ext(0, 7, 11, 0, 4096)]);
        assert_eq!(cache.len(), 1);
        match cache.lookup(0) {
            Lookup::Covered { descriptor, .. } => assert_eq!(descriptor, ext(0, 8, 22, 0, 8192)),
            other => panic!("expected covered, got {other:?}"),
        }
    }

    #[test]
    fn e5_truncate_narrows_cache() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(0, 1, 1, 0, 4096), true, &mut discards);
        cache.append(ext(4096, 1, 2, 0, 4096), true, &mut discards);
        cache.truncate(2048);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_hint(), 2048);
        match cache.lookup(0) {
            Lookup::Covered { descriptor, .. } => {
                assert_eq!(descriptor.file_offset, 0);
                assert_eq!(descriptor.size, 2048);
            }
            other => panic!("expected covered, got {other:?}"),
        }
    }

    #[test]
    fn property_disjointness_holds_after_random_overlapping_appends() {
        let mut cache = ExtentCache::new();
        let writes = [(0u64, 4096u32), (2048, 4096), (0, 1024), (5000, 200)];
        for (i, (offset, size)) in writes.iter().enumerate() {
            let mut discards = Vec::new();
            cache.append(ext(*offset, 1, i as u64, 0, *size), true, &mut discards);
        }
        let mut prev_end = None;
        for (start, desc) in cache.entries.iter() {
            if let Some(prev_end) = prev_end {
                assert!(*start >= prev_end, "entries must be disjoint");
            }
            prev_end = Some(desc.end());
        }
    }

    #[test]
    fn append_with_discard_coverage_matches_union() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(0, 1, 1, 0, 4096), true, &mut discards);
        cache.append(ext(4096, 1, 2, 0, 4096), true, &mut discards);
        discards.clear();
        // Overlaps both prior extents.
        cache.append(ext(2048, 1, 3, 0, 4096), true, &mut discards);
        assert_eq!(discards.len(), 2);
        for d in &discards {
            match cache.lookup(d.file_offset) {
                Lookup::Covered { descriptor, .. } => assert_ne!(descriptor, *d),
                Lookup::Hole { .. } => {}
            }
        }
    }

    #[test]
    fn remove_discard_is_idempotent() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(0, 1, 1, 0, 4096), false, &mut discards);
        let gone = ext(0, 1, 1, 0, 4096);
        cache.remove_discard(&[gone]);
        assert!(cache.is_empty());
        // Second call: entry already gone, must not panic or double-count generation weirdly.
        let gen_before = cache.generation();
        cache.remove_discard(&[gone]);
        assert_eq!(cache.generation(), gen_before);
    }

    #[test]
    fn list_returns_overlapping_range_in_order() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(0, 1, 1, 0, 1000), true, &mut discards);
        cache.append(ext(2000, 1, 2, 0, 1000), true, &mut discards);
        cache.append(ext(5000, 1, 3, 0, 1000), true, &mut discards);
        let found = cache.list(900, 4200);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].file_offset, 0);
        assert_eq!(found[1].file_offset, 2000);
    }

    #[test]
    fn hole_reports_next_known_start_or_size_hint() {
        let mut cache = ExtentCache::new();
        let mut discards = Vec::new();
        cache.append(ext(4096, 1, 1, 0, 4096), true, &mut discards);
        match cache.lookup(0) {
            Lookup::Hole { until } => assert_eq!(until, 4096),
            other => panic!("expected hole, got {other:?}"),
        }
        match cache.lookup(9000) {
            Lookup::Hole { until } => assert_eq!(until, 8192),
            other => panic!("expected hole, got {other:?}"),
        }
    }
}
