use std::cmp::Ordering;
use std::mem;

use crate::error::{GraphError, Result};
use crate::model::{Entry1, Entry2};

/// An entry stored in a packed, sorted bucket.
pub(crate) trait PackedEntry: Copy {
    type Key: Ord + Copy;

    fn key(&self) -> Self::Key;

    /// True if the entry routes to the upper half when the bucket is split
    /// on the given mask bits.
    fn in_upper(&self, mask_source: u64, mask_target: u64) -> bool;
}

impl PackedEntry for Entry1 {
    type Key = u64;

    fn key(&self) -> u64 {
        self.index
    }

    fn in_upper(&self, mask_source: u64, _mask_target: u64) -> bool {
        self.index & mask_source != 0
    }
}

impl PackedEntry for Entry2 {
    // Sort key order is (target, source); the two-dimensional merge
    // iterators depend on it.
    type Key = (u64, u64);

    fn key(&self) -> (u64, u64) {
        (self.target, self.source)
    }

    fn in_upper(&self, mask_source: u64, mask_target: u64) -> bool {
        (self.source & mask_source) | (self.target & mask_target) != 0
    }
}

/// Reserve `additional` slots, mapping allocator refusal to `OutOfMemory`.
/// All bucket and bucket-table growth funnels through here so the failpoint
/// below can simulate allocation failure in tests.
pub(crate) fn reserve_items<T>(vec: &mut Vec<T>, additional: usize) -> Result<()> {
    #[cfg(test)]
    failpoint::check()?;
    vec.try_reserve_exact(additional)
        .map_err(|_| GraphError::OutOfMemory)
}


/// A packed array of entries kept sorted by key, with a last-accessed slot
/// hint to speed up runs of nearby lookups.
#[derive(Clone, Debug)]
pub(crate) struct Bucket<E> {
    entries: Vec<E>,
    hint: usize,
}

impl<E> Default for Bucket<E> {
    fn default() -> Self {
        Bucket {
            entries: Vec::new(),
            hint: 0,
        }
    }
}

pub(crate) type Bucket1 = Bucket<Entry1>;
pub(crate) type Bucket2 = Bucket<Entry2>;

impl<E: PackedEntry> Bucket<E> {
    fn from_vec(entries: Vec<E>) -> Self {
        Bucket { entries, hint: 0 }
    }

    /// Wraps entries that are already sorted by key (e.g. read back from a
    /// snapshot written in bucket order).
    pub(crate) fn from_sorted(entries: Vec<E>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].key() < w[1].key()));
        Bucket { entries, hint: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[E] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [E] {
        &mut self.entries
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.entries.capacity() * mem::size_of::<E>()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.hint = 0;
    }

    /// Binary search seeded by the hint: probe the hinted slot, gallop
    /// outward to bracket the key, then bisect the bracket.
    fn search(&self, key: E::Key) -> std::result::Result<usize, usize> {
        let entries = &self.entries;
        let n = entries.len();
        if n == 0 {
            return Err(0);
        }
        let hint = self.hint.min(n - 1);
        let (lo, hi) = match entries[hint].key().cmp(&key) {
            Ordering::Equal => return Ok(hint),
            Ordering::Less => {
                let mut lo = hint + 1;
                let mut step = 1usize;
                let hi;
                loop {
                    let probe = hint + step;
                    if probe >= n {
                        hi = n;
                        break;
                    }
                    match entries[probe].key().cmp(&key) {
                        Ordering::Less => {
                            lo = probe + 1;
                            step <<= 1;
                        }
                        Ordering::Equal => return Ok(probe),
                        Ordering::Greater => {
                            hi = probe;
                            break;
                        }
                    }
                }
                (lo, hi)
            }
            Ordering::Greater => {
                let mut hi = hint;
                let mut step = 1usize;
                let lo;
                loop {
                    if step > hint {
                        lo = 0;
                        break;
                    }
                    let probe = hint - step;
                    match entries[probe].key().cmp(&key) {
                        Ordering::Greater => {
                            hi = probe;
                            step <<= 1;
                        }
                        Ordering::Equal => return Ok(probe),
                        Ordering::Less => {
                            lo = probe + 1;
                            break;
                        }
                    }
                }
                (lo, hi)
            }
        };
        match entries[lo..hi].binary_search_by(|e| e.key().cmp(&key)) {
            Ok(i) => Ok(lo + i),
            Err(i) => Err(lo + i),
        }
    }

    pub(crate) fn get(&self, key: E::Key) -> Option<&E> {
        self.search(key).ok().map(|i| &self.entries[i])
    }

    /// Grow capacity ahead of an insert of `key`, so that the following
    /// `put_reserved` cannot fail. A no-op when the key is already present
    /// or capacity is free.
    pub(crate) fn reserve_one(&mut self, key: E::Key) -> Result<()> {
        if self.search(key).is_err() {
            self.ensure_spare(1)?;
        }
        Ok(())
    }

    /// Grow capacity until `additional` more entries fit without
    /// reallocating. Growth is geometric with a floor of two slots.
    pub(crate) fn ensure_spare(&mut self, additional: usize) -> Result<()> {
        let needed = self.entries.len() + additional;
        if needed <= self.entries.capacity() {
            return Ok(());
        }
        let mut target = (self.entries.capacity() * 2).max(2);
        while target < needed {
            target *= 2;
        }
        let delta = target - self.entries.len();
        reserve_items(&mut self.entries, delta)
    }

    /// Insert or overwrite an entry. Capacity must have been reserved via
    /// `reserve_one`; the insert path never allocates.
    pub(crate) fn put_reserved(&mut self, entry: E) {
        match self.search(entry.key()) {
            Ok(i) => {
                self.entries[i] = entry;
                self.hint = i;
            }
            Err(i) => {
                debug_assert!(self.entries.len() < self.entries.capacity());
                self.entries.insert(i, entry);
                self.hint = i;
            }
        }
    }

    /// Remove by key, shifting the suffix down. Capacity is retained; the
    /// slack is only reclaimed by `compress`.
    pub(crate) fn remove(&mut self, key: E::Key) -> Option<E> {
        match self.search(key) {
            Ok(i) => {
                let entry = self.entries.remove(i);
                self.hint = i.min(self.entries.len().saturating_sub(1));
                Some(entry)
            }
            Err(_) => None,
        }
    }

    /// Drop entries whose weight the predicate rejects, preserving order.
    pub(crate) fn retain(&mut self, keep: impl FnMut(&E) -> bool) {
        self.entries.retain(keep);
        self.hint = 0;
    }

    /// Shrink the allocation to fit once the slack exceeds the size of the
    /// live entries.
    pub(crate) fn compress(&mut self) {
        if self.entries.capacity() > self.entries.len().saturating_mul(2) {
            self.entries.shrink_to_fit();
        }
    }

    /// Partition into (lower, upper) halves on the mask bits, preserving
    /// sort order in each. The bucket itself is left untouched, so a failed
    /// reservation has nothing to roll back.
    pub(crate) fn split(&self, mask_source: u64, mask_target: u64) -> Result<(Self, Self)> {
        let mut low = Vec::new();
        reserve_items(&mut low, self.entries.len())?;
        let mut high = Vec::new();
        reserve_items(&mut high, self.entries.len())?;
        for entry in &self.entries {
            if entry.in_upper(mask_source, mask_target) {
                high.push(*entry);
            } else {
                low.push(*entry);
            }
        }
        Ok((Bucket::from_vec(low), Bucket::from_vec(high)))
    }

    /// Linear merge of two sorted buckets into a fresh one.
    pub(crate) fn merged(a: &Self, b: &Self) -> Result<Self> {
        let mut out = Vec::new();
        reserve_items(&mut out, a.entries.len() + b.entries.len())?;
        let (mut i, mut j) = (0, 0);
        while i < a.entries.len() && j < b.entries.len() {
            if a.entries[i].key() <= b.entries[j].key() {
                out.push(a.entries[i]);
                i += 1;
            } else {
                out.push(b.entries[j]);
                j += 1;
            }
        }
        out.extend_from_slice(&a.entries[i..]);
        out.extend_from_slice(&b.entries[j..]);
        Ok(Bucket::from_vec(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, weight: f32) -> Entry1 {
        Entry1 { index, weight }
    }

    fn put(bucket: &mut Bucket1, index: u64, weight: f32) {
        bucket.reserve_one(index).unwrap();
        bucket.put_reserved(entry(index, weight));
    }

    #[test]
    fn insert_keeps_sort_order() {
        let mut bucket = Bucket1::default();
        for index in [5, 1, 9, 3, 7, 0, 2] {
            put(&mut bucket, index, index as f32);
        }
        let indices: Vec<u64> = bucket.entries().iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 5, 7, 9]);
    }

    #[test]
    fn put_overwrites_existing_key() {
        let mut bucket = Bucket1::default();
        put(&mut bucket, 4, 1.0);
        put(&mut bucket, 4, 2.0);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.get(4).unwrap().weight, 2.0);
    }

    #[test]
    fn search_works_from_any_hint() {
        let mut bucket = Bucket1::default();
        for index in 0..64 {
            put(&mut bucket, index * 2, 1.0);
        }
        // Lookups in both directions relative to wherever the hint landed.
        for index in 0..64 {
            assert!(bucket.get(index * 2).is_some());
            assert!(bucket.get(index * 2 + 1).is_none());
        }
        for index in (0..64).rev() {
            assert!(bucket.get(index * 2).is_some());
        }
    }

    #[test]
    fn remove_shifts_suffix() {
        let mut bucket = Bucket1::default();
        for index in 0..8 {
            put(&mut bucket, index, index as f32);
        }
        assert_eq!(bucket.remove(3).unwrap().index, 3);
        assert!(bucket.remove(3).is_none());
        let indices: Vec<u64> = bucket.entries().iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn split_partitions_on_mask() {
        let mut bucket = Bucket1::default();
        for index in 0..16 {
            put(&mut bucket, index, index as f32);
        }
        let (low, high) = bucket.split(0x4, 0).unwrap();
        assert!(low.entries().iter().all(|e| e.index & 0x4 == 0));
        assert!(high.entries().iter().all(|e| e.index & 0x4 != 0));
        assert_eq!(low.len() + high.len(), 16);
        assert!(low.entries().windows(2).all(|w| w[0].index < w[1].index));
        assert!(high.entries().windows(2).all(|w| w[0].index < w[1].index));
    }

    #[test]
    fn merged_restores_split_content() {
        let mut bucket = Bucket1::default();
        for index in [1, 4, 6, 9, 12, 13] {
            put(&mut bucket, index, index as f32);
        }
        let (low, high) = bucket.split(0x1, 0).unwrap();
        let merged = Bucket1::merged(&low, &high).unwrap();
        assert_eq!(merged.entries(), bucket.entries());
    }

    #[test]
    fn split_failure_leaves_bucket_intact() {
        let mut bucket = Bucket1::default();
        for index in 0..8 {
            put(&mut bucket, index, index as f32);
        }
        failpoint::arm(0);
        let result = bucket.split(0x1, 0);
        failpoint::disarm();
        assert!(matches!(result, Err(GraphError::OutOfMemory)));
        assert_eq!(bucket.len(), 8);
    }

    #[test]
    fn bucket2_sorts_by_target_then_source() {
        let mut bucket = Bucket2::default();
        for (source, target) in [(3, 1), (1, 2), (2, 1), (1, 1)] {
            bucket.reserve_one((target, source)).unwrap();
            bucket.put_reserved(Entry2 {
                source,
                target,
                weight: 1.0,
            });
        }
        let keys: Vec<(u64, u64)> = bucket.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![(1, 1), (1, 2), (1, 3), (2, 1)]);
    }

    #[test]
    fn compress_reclaims_slack() {
        let mut bucket = Bucket1::default();
        for index in 0..32 {
            put(&mut bucket, index, 1.0);
        }
        for index in 4..32 {
            bucket.remove(index);
        }
        bucket.compress();
        assert_eq!(bucket.entries.capacity(), bucket.len());
    }
}
