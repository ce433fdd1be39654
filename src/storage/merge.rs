//! Sorted-merge iteration over bucket slices.
//!
//! `MergeIter` walks two same-keyed slices in sort order, yielding
//! `(Some, None)` / `(None, Some)` / `(Some, Some)` pairs; it is the
//! backbone of the O(n+m) pairwise numeric operations. `TargetJoin` walks
//! a graph bucket against a vector bucket, joining vector entries onto
//! edges by target index.

use crate::model::{Entry1, Entry2};
use crate::storage::bucket::PackedEntry;

pub(crate) struct MergeIter<'a, E: PackedEntry> {
    a: &'a [E],
    b: &'a [E],
    i: usize,
    j: usize,
}

impl<'a, E: PackedEntry> MergeIter<'a, E> {
    pub(crate) fn new(a: &'a [E], b: &'a [E]) -> Self {
        MergeIter { a, b, i: 0, j: 0 }
    }
}

impl<'a, E: PackedEntry> Iterator for MergeIter<'a, E> {
    type Item = (Option<&'a E>, Option<&'a E>);

    fn next(&mut self) -> Option<Self::Item> {
        let left = self.a.get(self.i);
        let right = self.b.get(self.j);
        match (left, right) {
            (Some(a), Some(b)) => {
                if a.key() < b.key() {
                    self.i += 1;
                    Some((Some(a), None))
                } else if a.key() > b.key() {
                    self.j += 1;
                    Some((None, Some(b)))
                } else {
                    self.i += 1;
                    self.j += 1;
                    Some((Some(a), Some(b)))
                }
            }
            (Some(a), None) => {
                self.i += 1;
                Some((Some(a), None))
            }
            (None, Some(b)) => {
                self.j += 1;
                Some((None, Some(b)))
            }
            (None, None) => None,
        }
    }
}

/// Joins vector entries onto edges with `entry.index == edge.target`.
/// Vector entries without a matching edge are skipped; the cursor is not
/// advanced on a match, so consecutive edges sharing a target all join the
/// same entry.
pub(crate) struct TargetJoin<'a> {
    edges: &'a [Entry2],
    entries: &'a [Entry1],
    i: usize,
    j: usize,
}

impl<'a> TargetJoin<'a> {
    pub(crate) fn new(edges: &'a [Entry2], entries: &'a [Entry1]) -> Self {
        TargetJoin {
            edges,
            entries,
            i: 0,
            j: 0,
        }
    }
}

impl<'a> Iterator for TargetJoin<'a> {
    type Item = (&'a Entry2, Option<&'a Entry1>);

    fn next(&mut self) -> Option<Self::Item> {
        let edge = self.edges.get(self.i)?;
        self.i += 1;
        while let Some(entry) = self.entries.get(self.j) {
            if entry.index < edge.target {
                self.j += 1;
            } else if entry.index > edge.target {
                return Some((edge, None));
            } else {
                return Some((edge, Some(entry)));
            }
        }
        Some((edge, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e1(index: u64) -> Entry1 {
        Entry1 { index, weight: 1.0 }
    }

    fn e2(source: u64, target: u64) -> Entry2 {
        Entry2 {
            source,
            target,
            weight: 1.0,
        }
    }

    #[test]
    fn merge_yields_three_way_pairs() {
        let a = [e1(1), e1(3), e1(5)];
        let b = [e1(2), e1(3), e1(6)];
        let out: Vec<(Option<u64>, Option<u64>)> = MergeIter::new(&a, &b)
            .map(|(x, y)| (x.map(|e| e.index), y.map(|e| e.index)))
            .collect();
        assert_eq!(
            out,
            vec![
                (Some(1), None),
                (None, Some(2)),
                (Some(3), Some(3)),
                (Some(5), None),
                (None, Some(6)),
            ]
        );
    }

    #[test]
    fn merge_handles_empty_sides() {
        let a = [e1(1)];
        let out: Vec<_> = MergeIter::new(&a, &[]).collect();
        assert_eq!(out.len(), 1);
        let out: Vec<_> = MergeIter::<Entry1>::new(&[], &[]).collect();
        assert!(out.is_empty());
    }

    #[test]
    fn target_join_matches_repeated_targets() {
        // Edges sorted by (target, source); targets 2, 2, 4.
        let edges = [e2(1, 2), e2(3, 2), e2(1, 4)];
        let entries = [e1(1), e1(2), e1(5)];
        let out: Vec<(u64, Option<u64>)> = TargetJoin::new(&edges, &entries)
            .map(|(edge, entry)| (edge.target, entry.map(|e| e.index)))
            .collect();
        // Both target-2 edges join index 2; index 1 is skipped, index 5 has
        // no edge and never appears.
        assert_eq!(out, vec![(2, Some(2)), (2, Some(2)), (4, None)]);
    }
}
