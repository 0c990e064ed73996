//! Pure bundle-assembly state machine.
//!
//! The bundler owns no I/O. It accepts one-block files in any order, keeps
//! forks side by side, and reports when the longest chain connected by
//! `previous_id` links has crossed the current bundle boundary. The caller
//! merges the emitted range and then commits, which advances the boundary
//! and drains everything below it, orphaned forks included.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use crate::one_block_file::OneBlockFile;

pub struct Bundler {
    size: u64,
    current_lower: u64,
    /// Ordered by block number ascending, ties by id.
    accepted: BTreeMap<(u64, String), OneBlockFile>,
}

impl Bundler {
    /// `inclusive_lower` must be a multiple of `size`.
    pub fn new(size: u64, inclusive_lower: u64) -> Self {
        Self {
            size,
            current_lower: inclusive_lower,
            accepted: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn current_lower(&self) -> u64 {
        self.current_lower
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn contains(&self, num: u64, id: &str) -> bool {
        self.accepted.contains_key(&(num, id.to_string()))
    }

    /// Inserts a file. Re-adding the same `(num, id)` is a no-op, except
    /// that a memoized payload is kept if the first copy lacked one.
    pub fn add(&mut self, file: OneBlockFile) {
        let key = (file.num, file.id.clone());
        match self.accepted.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().payload.is_none() && file.payload.is_some() {
                    entry.get_mut().payload = file.payload;
                }
            }
            Entry::Vacant(entry) => {
                tracing::trace!(num = file.num, id = %file.id, "accepted one-block file");
                entry.insert(file);
            }
        }
    }

    /// Returns the completed range `(inclusive_lower, files)` once the
    /// longest chain has produced a block at or past the bundle boundary.
    ///
    /// The emitted files are the chain members below the boundary, ascending.
    /// Forks off the chain are not emitted. A chain that has not crossed the
    /// boundary, or one living entirely above the current range, yields
    /// `None`.
    pub fn bundle_complete(&self) -> Option<(u64, Vec<OneBlockFile>)> {
        let chain = self.longest_chain();
        let tip = chain.last()?;
        let boundary = self.current_lower + self.size;
        if tip.num < boundary {
            return None;
        }
        let files: Vec<OneBlockFile> = chain
            .iter()
            .filter(|f| f.num < boundary)
            .map(|f| (*f).clone())
            .collect();
        if files.is_empty() {
            return None;
        }
        Some((self.current_lower, files))
    }

    pub fn has_complete_bundle(&self) -> bool {
        let chain = self.longest_chain();
        let Some(tip) = chain.last() else {
            return false;
        };
        let boundary = self.current_lower + self.size;
        tip.num >= boundary && chain.iter().any(|f| f.num < boundary)
    }

    /// Last block of the longest connected chain, for LIB tracking.
    pub fn longest_chain_last_block(&self) -> Option<&OneBlockFile> {
        self.longest_chain().last().copied()
    }

    /// Advances the boundary past the emitted range and drains everything
    /// below it, orphaned forks included. Returns the drained files.
    pub fn commit(&mut self, inclusive_lower: u64) -> Vec<OneBlockFile> {
        let boundary = inclusive_lower + self.size;
        self.current_lower = boundary;
        let keep = self.accepted.split_off(&(boundary, String::new()));
        let drained = std::mem::replace(&mut self.accepted, keep);
        drained.into_values().collect()
    }

    /// Longest chain connected by `previous_id` links, ascending.
    ///
    /// Parents always carry strictly smaller numbers than their children, so
    /// a single ascending pass computes every chain length before it is
    /// needed. Length ties keep the earliest tip in `(num, id)` order.
    fn longest_chain(&self) -> Vec<&OneBlockFile> {
        let by_id: HashMap<&str, &OneBlockFile> = self
            .accepted
            .values()
            .map(|f| (f.id.as_str(), f))
            .collect();

        let mut lengths: HashMap<&str, u64> = HashMap::with_capacity(self.accepted.len());
        let mut best: Option<(&OneBlockFile, u64)> = None;
        for file in self.accepted.values() {
            let parent_len = lengths.get(file.previous_id.as_str()).copied().unwrap_or(0);
            let len = parent_len + 1;
            lengths.insert(file.id.as_str(), len);
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((file, len));
            }
        }

        let Some((tip, _)) = best else {
            return Vec::new();
        };
        let mut chain = vec![tip];
        let mut current = tip;
        while let Some(parent) = by_id.get(current.previous_id.as_str()) {
            chain.push(*parent);
            current = parent;
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::one_block_file::OneBlockFile;

    fn file(name: &str) -> OneBlockFile {
        OneBlockFile::parse(name).unwrap()
    }

    fn nums(files: &[OneBlockFile]) -> Vec<u64> {
        files.iter().map(|f| f.num).collect()
    }

    #[test]
    fn should_not_complete_before_boundary_block_is_seen() {
        let mut bundler = Bundler::new(5, 0);
        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));
        bundler.add(file("00000000002-20210728T105016.02-00000002a-00000001a-0-x"));
        bundler.add(file("00000000003-20210728T105016.03-00000003a-00000002a-0-x"));
        bundler.add(file("00000000004-20210728T105016.06-00000004a-00000003a-2-x"));
        assert!(bundler.bundle_complete().is_none());
    }

    #[test]
    fn should_complete_first_bundle_without_leading_blocks() {
        let mut bundler = Bundler::new(5, 0);
        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));
        bundler.add(file("00000000002-20210728T105016.02-00000002a-00000001a-0-x"));
        bundler.add(file("00000000003-20210728T105016.03-00000003a-00000002a-0-x"));
        bundler.add(file("00000000004-20210728T105016.06-00000004a-00000003a-2-x"));
        bundler.add(file("00000000006-20210728T105016.08-00000006a-00000004a-2-x"));

        let (lower, files) = bundler.bundle_complete().unwrap();
        assert_eq!(lower, 0);
        assert_eq!(nums(&files), vec![1, 2, 3, 4]);
    }

    #[test]
    fn should_complete_at_higher_boundary() {
        let mut bundler = Bundler::new(5, 10);
        bundler.add(file("00000000011-20210728T105016.01-00000011a-00000010a-10-x"));
        bundler.add(file("00000000012-20210728T105016.02-00000012a-00000011a-10-x"));
        bundler.add(file("00000000013-20210728T105016.03-00000013a-00000012a-10-x"));
        bundler.add(file("00000000014-20210728T105016.06-00000014a-00000013a-12-x"));
        assert!(bundler.bundle_complete().is_none());

        bundler.add(file("00000000016-20210728T105016.08-00000016a-00000014a-12-x"));
        let (lower, files) = bundler.bundle_complete().unwrap();
        assert_eq!(lower, 10);
        assert_eq!(nums(&files), vec![11, 12, 13, 14]);
    }

    #[test]
    fn should_ignore_disconnected_chainlet() {
        // 1-2 is disconnected from 4-6-7-9; only the long chain is emitted.
        let mut bundler = Bundler::new(5, 0);
        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));
        bundler.add(file("00000000002-20210728T105016.02-00000002a-00000001a-1-x"));
        bundler.add(file("00000000004-20210728T105016.06-00000004a-00000003a-1-x"));
        bundler.add(file("00000000006-20210728T105016.08-00000006a-00000004a-4-x"));
        bundler.add(file("00000000007-20210728T105016.09-00000007a-00000006a-4-x"));
        bundler.add(file("00000000009-20210728T105016.09-00000009a-00000007a-6-x"));

        let (lower, files) = bundler.bundle_complete().unwrap();
        assert_eq!(lower, 0);
        assert_eq!(nums(&files), vec![4]);

        let drained = bundler.commit(lower);
        assert_eq!(nums(&drained), vec![1, 2, 4]);
        assert_eq!(bundler.current_lower(), 5);

        bundler.add(file("00000000010-20210728T105016.09-00000010a-00000009a-6-x"));
        let (lower, files) = bundler.bundle_complete().unwrap();
        assert_eq!(lower, 5);
        assert_eq!(nums(&files), vec![6, 7, 9]);
    }

    #[test]
    fn should_emit_fork_branch_reachable_from_boundary_block() {
        // Two blocks numbered 4; block 6 descends from 4b.
        let mut bundler = Bundler::new(5, 0);
        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));
        bundler.add(file("00000000002-20210728T105016.02-00000002a-00000001a-0-x"));
        bundler.add(file("00000000003-20210728T105016.03-00000003a-00000002a-0-x"));
        bundler.add(file("00000000004-20210728T105016.06-00000004a-00000003a-2-x"));
        bundler.add(file("00000000004-20210728T105016.06-00000004b-00000003a-2-x"));
        bundler.add(file("00000000006-20210728T105016.08-00000006a-00000004b-2-x"));

        let (lower, files) = bundler.bundle_complete().unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["00000001a", "00000002a", "00000003a", "00000004b"]);

        // The orphan fork is drained from state on commit, not emitted.
        let drained = bundler.commit(lower);
        assert_eq!(drained.len(), 5);
        assert!(bundler.is_empty());
    }

    #[test]
    fn should_keep_payload_on_duplicate_add() {
        let mut bundler = Bundler::new(5, 0);
        let mut with_payload = file("00000000001-20210728T105016.01-00000001a-00000000a-0-x");
        with_payload.payload = Some(bytes::Bytes::from_static(b"record"));
        bundler.add(with_payload.clone());
        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));

        assert_eq!(bundler.len(), 1);
        let (_, files) = {
            bundler.add(file("00000000002-20210728T105016.02-00000002a-00000001a-0-x"));
            bundler.add(file("00000000003-20210728T105016.03-00000003a-00000002a-0-x"));
            bundler.add(file("00000000004-20210728T105016.06-00000004a-00000003a-2-x"));
            bundler.add(file("00000000006-20210728T105016.08-00000006a-00000004a-2-x"));
            bundler.bundle_complete().unwrap()
        };
        assert_eq!(files[0].payload.as_deref(), Some(b"record".as_ref()));
    }

    #[test]
    fn should_backfill_payload_on_duplicate_add() {
        let mut bundler = Bundler::new(5, 0);
        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));
        let mut with_payload = file("00000000001-20210728T105016.01-00000001a-00000000a-0-x");
        with_payload.payload = Some(bytes::Bytes::from_static(b"record"));
        bundler.add(with_payload);

        assert_eq!(bundler.len(), 1);
        let only = bundler.accepted.values().next().unwrap();
        assert_eq!(only.payload.as_deref(), Some(b"record".as_ref()));
    }

    #[test]
    fn should_track_longest_chain_last_block() {
        let mut bundler = Bundler::new(100, 0);
        assert!(bundler.longest_chain_last_block().is_none());

        bundler.add(file("00000000001-20210728T105016.01-00000001a-00000000a-0-x"));
        bundler.add(file("00000000002-20210728T105016.02-00000002a-00000001a-1-x"));
        bundler.add(file("00000000009-20210728T105016.09-00000009a-00000008a-6-x"));

        let last = bundler.longest_chain_last_block().unwrap();
        assert_eq!(last.num, 2);
        assert_eq!(last.lib_num, 1);
    }
}
