//! Keyed list reconciliation.
//!
//! A templating layer rendering a sequence keeps one mounted row per item
//! key. When the sequence changes it asks [`reconcile`] how to turn the old
//! key list into the new one with the fewest row moves: rows whose relative
//! order survives (the longest increasing run of old positions) stay put,
//! every other surviving row moves, and keys only present on one side are
//! inserted or removed.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A surviving row that changes position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// Edit script from an old key list to a new one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Patch {
    /// Old indices with no counterpart in the new list, ascending.
    pub removed: Vec<usize>,
    /// New indices that need a fresh row, ascending.
    pub inserted: Vec<usize>,
    /// Surviving rows that must move, by new index.
    pub moved: Vec<Move>,
    /// New indices whose row stays in place.
    pub kept: Vec<usize>,
    /// For each new index, the old index it reuses.
    pub sources: Vec<Option<usize>>,
}

impl Patch {
    /// True when the old list can be reused without any change.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.inserted.is_empty() && self.moved.is_empty()
    }
}

/// Compute the edit script turning `old` into `new`.
///
/// A key repeated in `new` matches the old row only at its first
/// occurrence; later copies get fresh rows and a warning is logged.
///
/// ```rust
/// use vigil_core::{Move, reconcile};
///
/// let patch = reconcile(&["a", "b", "c", "d"], &["d", "a", "b", "e"]);
/// assert_eq!(patch.removed, vec![2]);
/// assert_eq!(patch.inserted, vec![3]);
/// assert_eq!(patch.moved, vec![Move { from: 3, to: 0 }]);
/// assert_eq!(patch.kept, vec![1, 2]);
/// ```
pub fn reconcile<K>(old: &[K], new: &[K]) -> Patch
where
    K: Eq + Hash + Debug,
{
    let mut old_index: HashMap<&K, usize> = HashMap::with_capacity(old.len());
    for (i, key) in old.iter().enumerate() {
        old_index.entry(key).or_insert(i);
    }

    let mut seen: HashMap<&K, usize> = HashMap::with_capacity(new.len());
    let mut sources = Vec::with_capacity(new.len());
    for (j, key) in new.iter().enumerate() {
        if let Some(first) = seen.get(key) {
            log::warn!("duplicate key {key:?} at index {j} (first seen at {first}); treating it as a new row");
            sources.push(None);
            continue;
        }
        seen.insert(key, j);
        sources.push(old_index.get(key).copied());
    }

    let mut used = vec![false; old.len()];
    for src in sources.iter().flatten() {
        used[*src] = true;
    }
    let removed: Vec<usize> = (0..old.len()).filter(|i| !used[*i]).collect();

    let stay = longest_increasing(&sources);
    let mut inserted = Vec::new();
    let mut moved = Vec::new();
    let mut kept = Vec::new();
    for (j, src) in sources.iter().enumerate() {
        match src {
            None => inserted.push(j),
            Some(_) if stay[j] => kept.push(j),
            Some(from) => moved.push(Move { from: *from, to: j }),
        }
    }

    log::trace!(
        "reconcile: {} kept, {} moved, {} inserted, {} removed",
        kept.len(),
        moved.len(),
        inserted.len(),
        removed.len()
    );
    Patch {
        removed,
        inserted,
        moved,
        kept,
        sources,
    }
}

/// Marks the positions of one longest strictly increasing subsequence of the
/// `Some` entries. O(n log n) patience sorting.
fn longest_increasing(sources: &[Option<usize>]) -> Vec<bool> {
    // tails[k]: position in `sources` ending the best run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; sources.len()];

    for (j, src) in sources.iter().enumerate() {
        let Some(v) = *src else {
            continue;
        };
        let k = tails.partition_point(|&t| sources[t].is_some_and(|s| s < v));
        if k > 0 {
            prev[j] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(j);
        } else {
            tails[k] = j;
        }
    }

    let mut stay = vec![false; sources.len()];
    let mut cur = tails.last().copied();
    while let Some(j) = cur {
        stay[j] = true;
        cur = prev[j];
    }
    stay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_lists_are_a_noop() {
        let patch = reconcile(&[1, 2, 3], &[1, 2, 3]);
        assert!(patch.is_noop());
        assert_eq!(patch.kept, vec![0, 1, 2]);
        assert_eq!(patch.sources, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn reversal_keeps_one_row() {
        let patch = reconcile(&["a", "b", "c"], &["c", "b", "a"]);
        assert_eq!(patch.kept.len(), 1);
        assert_eq!(patch.moved.len(), 2);
        assert!(patch.removed.is_empty());
        assert!(patch.inserted.is_empty());
    }

    #[test]
    fn swap_moves_a_single_row() {
        let patch = reconcile(&["a", "b", "c", "d"], &["a", "c", "b", "d"]);
        assert_eq!(patch.kept.len(), 3);
        assert_eq!(patch.moved.len(), 1);
    }

    #[test]
    fn empty_sides() {
        let patch = reconcile::<&str>(&[], &["x", "y"]);
        assert_eq!(patch.inserted, vec![0, 1]);
        let patch = reconcile(&["x", "y"], &[]);
        assert_eq!(patch.removed, vec![0, 1]);
        assert!(patch.sources.is_empty());
    }

    #[test]
    fn duplicate_new_keys_become_insertions() {
        let _ = env_logger::builder().is_test(true).try_init();
        let patch = reconcile(&["a", "b"], &["a", "a", "b"]);
        assert_eq!(patch.sources, vec![Some(0), None, Some(1)]);
        assert_eq!(patch.inserted, vec![1]);
        assert_eq!(patch.kept, vec![0, 2]);
    }

    #[test]
    fn duplicate_old_keys_reuse_the_first_row() {
        let patch = reconcile(&["a", "a", "b"], &["b", "a"]);
        assert_eq!(patch.sources, vec![Some(2), Some(0)]);
        assert_eq!(patch.removed, vec![1]);
    }

    #[test]
    fn interleaved_changes() {
        let patch = reconcile(&[1, 2, 3, 4, 5], &[5, 1, 6, 3, 2]);
        assert_eq!(patch.removed, vec![3]);
        assert_eq!(patch.inserted, vec![2]);
        // 1 and 3 (or 1 and 2) survive in order; the rest move.
        assert_eq!(patch.kept.len() + patch.moved.len(), 4);
        assert_eq!(patch.kept.len(), 2);
    }
}
