use tracing::warn;

use crate::error::{GraphError, Result};
use crate::model::{Entry1, FLAGS_TRANSIENT, FLAG_NONZERO, FLAG_POSITIVE, FLAG_READONLY, MAX_BITS};
use crate::storage::bucket::{reserve_items, Bucket1};

/// Sparse mapping from `u64` indices to `f32` weights, stored as a
/// power-of-two table of sorted buckets keyed by the low bits of the index.
///
/// Iteration order is bucket order, then sorted order inside each bucket —
/// not a global sort over indices.
#[derive(Debug)]
pub struct Vector {
    flags: u32,
    revision: u64,
    eps: f32,
    bits: u32,
    buckets: Vec<Bucket1>,
    optimize: u64,
}

impl Vector {
    /// Creates an empty vector. Only `FLAG_POSITIVE` may be passed;
    /// `FLAG_NONZERO` is derived from it and anything else is rejected.
    pub fn new(flags: u32) -> Result<Vector> {
        if flags & !FLAG_POSITIVE != 0 {
            return Err(GraphError::InvalidArgument(format!(
                "unsupported vector flags {flags:#x}"
            )));
        }
        let mut flags = flags;
        if flags & FLAG_POSITIVE != 0 {
            flags |= FLAG_NONZERO;
        }
        let mut buckets = Vec::new();
        reserve_items(&mut buckets, 1)?;
        buckets.push(Bucket1::default());
        let mut vector = Vector {
            flags,
            revision: 0,
            eps: 0.0,
            bits: 0,
            buckets,
            optimize: 0,
        };
        vector.rebalance();
        Ok(vector)
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn is_readonly(&self) -> bool {
        self.flags & FLAG_READONLY != 0
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        if readonly {
            self.flags |= FLAG_READONLY;
        } else {
            self.flags &= !FLAG_READONLY;
        }
    }

    /// Sets the collapse threshold. On a NONZERO vector the stored entries
    /// are re-checked against the new threshold immediately.
    pub fn set_eps(&mut self, eps: f32) -> Result<()> {
        self.ensure_writable()?;
        self.eps = eps.abs();
        if self.flags & FLAG_NONZERO != 0 {
            self.collapse_small(self.eps);
            self.revision += 1;
        }
        Ok(())
    }

    pub fn num_entries(&self) -> u64 {
        self.buckets.iter().map(|b| b.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    pub fn has_entry(&self, index: u64) -> bool {
        self.bucket(index).get(index).is_some()
    }

    /// Returns the stored weight, or 0.0 for an absent entry.
    pub fn get_entry(&self, index: u64) -> f32 {
        self.bucket(index).get(index).map_or(0.0, |e| e.weight)
    }

    pub fn set_entry(&mut self, index: u64, weight: f32) -> Result<()> {
        self.update_entry(index, |_| weight)
    }

    pub fn add_entry(&mut self, index: u64, weight: f32) -> Result<()> {
        self.update_entry(index, |old| old + weight)
    }

    pub fn sub_entry(&mut self, index: u64, weight: f32) -> Result<()> {
        self.update_entry(index, |old| old - weight)
    }

    /// Removes an entry. Deleting an absent index is a no-op and does not
    /// bump the revision.
    pub fn del_entry(&mut self, index: u64) -> Result<()> {
        self.ensure_writable()?;
        let mask = self.index_mask();
        if self.buckets[(index & mask) as usize].remove(index).is_some() {
            self.touch();
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_writable()?;
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.touch();
        Ok(())
    }

    /// One-pass removal of entries at or below the threshold: `w ≤ eps` for
    /// POSITIVE vectors, `|w| ≤ eps` otherwise.
    pub fn del_small(&mut self, eps: f32) -> Result<()> {
        self.ensure_writable()?;
        self.collapse_small(eps.abs());
        self.revision += 1;
        Ok(())
    }

    pub fn entries(&self) -> VectorEntries<'_> {
        VectorEntries {
            buckets: &self.buckets,
            bucket: 0,
            pos: 0,
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Vector>()
            + self.buckets.capacity() * std::mem::size_of::<Bucket1>()
            + self.buckets.iter().map(|b| b.allocated_bytes()).sum::<usize>()
    }

    /// Validates the structural invariants: table size, entry routing,
    /// intra-bucket sort order, and the NONZERO/POSITIVE weight bounds.
    pub fn check_consistency(&self) -> Result<()> {
        if self.buckets.len() != 1usize << self.bits {
            return Err(GraphError::Corruption(format!(
                "bucket table holds {} buckets, expected {}",
                self.buckets.len(),
                1usize << self.bits
            )));
        }
        let mask = self.index_mask();
        for (i, bucket) in self.buckets.iter().enumerate() {
            let mut prev = None;
            for entry in bucket.entries() {
                if (entry.index & mask) as usize != i {
                    return Err(GraphError::Corruption(format!(
                        "index {} routed to bucket {i}",
                        entry.index
                    )));
                }
                if prev.is_some_and(|p| p >= entry.index) {
                    return Err(GraphError::Corruption(format!(
                        "bucket {i} out of order at index {}",
                        entry.index
                    )));
                }
                prev = Some(entry.index);
                self.check_weight(entry.weight)?;
            }
        }
        Ok(())
    }

    fn check_weight(&self, weight: f32) -> Result<()> {
        if self.collapses(weight) {
            return Err(GraphError::Corruption(format!(
                "weight {weight} violates the nonzero bound"
            )));
        }
        Ok(())
    }

    fn index_mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    fn bucket(&self, index: u64) -> &Bucket1 {
        &self.buckets[(index & self.index_mask()) as usize]
    }

    pub(crate) fn buckets(&self) -> &[Bucket1] {
        &self.buckets
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut [Bucket1] {
        &mut self.buckets
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.is_readonly() {
            return Err(GraphError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn collapses(&self, weight: f32) -> bool {
        if self.flags & FLAG_POSITIVE != 0 {
            weight <= self.eps
        } else if self.flags & FLAG_NONZERO != 0 {
            weight.abs() <= self.eps
        } else {
            false
        }
    }

    pub(crate) fn collapse_small(&mut self, eps: f32) {
        let positive = self.flags & FLAG_POSITIVE != 0;
        for bucket in &mut self.buckets {
            if positive {
                bucket.retain(|e| e.weight > eps);
            } else {
                bucket.retain(|e| e.weight.abs() > eps);
            }
        }
    }

    fn update_entry(&mut self, index: u64, f: impl FnOnce(f32) -> f32) -> Result<()> {
        self.ensure_writable()?;
        let weight = f(self.get_entry(index));
        let collapse = self.collapses(weight);
        let mask = self.index_mask();
        let bucket = &mut self.buckets[(index & mask) as usize];
        if collapse {
            bucket.remove(index);
        } else {
            bucket.reserve_one(index)?;
            bucket.put_reserved(Entry1 { index, weight });
        }
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.optimize = self.optimize.saturating_sub(1);
        if self.optimize == 0 {
            self.rebalance();
        }
    }

    /// Doubles the bucket table, splitting every bucket on the next index
    /// bit. Built over a fresh table and swapped in on success, so a failed
    /// reservation leaves the vector untouched.
    pub(crate) fn inc_bits(&mut self) -> Result<()> {
        if self.bits >= MAX_BITS {
            return Err(GraphError::InvalidArgument(
                "bucket bits exhausted".into(),
            ));
        }
        let num = self.buckets.len();
        let mask = 1u64 << self.bits;
        let mut low = Vec::new();
        reserve_items(&mut low, num * 2)?;
        let mut high = Vec::new();
        reserve_items(&mut high, num)?;
        for bucket in &self.buckets {
            let (lo, hi) = bucket.split(mask, 0)?;
            low.push(lo);
            high.push(hi);
        }
        low.append(&mut high);
        for bucket in &mut low {
            bucket.compress();
        }
        self.buckets = low;
        self.bits += 1;
        Ok(())
    }

    /// Halves the bucket table by merging partner buckets.
    pub(crate) fn dec_bits(&mut self) -> Result<()> {
        if self.bits == 0 {
            return Err(GraphError::InvalidArgument(
                "bucket table cannot shrink below one bucket".into(),
            ));
        }
        let half = self.buckets.len() / 2;
        let mut merged = Vec::new();
        reserve_items(&mut merged, half)?;
        for i in 0..half {
            merged.push(Bucket1::merged(&self.buckets[i], &self.buckets[i + half])?);
        }
        self.buckets = merged;
        self.bits -= 1;
        Ok(())
    }

    /// Grows or shrinks the bucket table to keep the per-bucket load inside
    /// [16, 256), then schedules the next check. A failed resize is retried
    /// after 1024 further mutations.
    fn rebalance(&mut self) {
        let n = self.num_entries();
        let mut failed = false;
        if n >= (self.buckets.len() as u64).saturating_mul(256) {
            while n >= (self.buckets.len() as u64).saturating_mul(64) {
                if let Err(error) = self.inc_bits() {
                    warn!(%error, "vector.rebalance.retry_later");
                    failed = true;
                    break;
                }
            }
        }
        if !failed && self.buckets.len() >= 2 && n < 16 * self.buckets.len() as u64 {
            while self.buckets.len() >= 2 && n < 64 * self.buckets.len() as u64 {
                if let Err(error) = self.dec_bits() {
                    warn!(%error, "vector.rebalance.retry_later");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            self.optimize = 1024;
            return;
        }
        let buckets = self.buckets.len() as u64;
        self.optimize = buckets
            .saturating_mul(256)
            .saturating_sub(n)
            .min(n.saturating_sub(buckets * 16))
            .max(256);
    }
}

impl Clone for Vector {
    /// Duplicates the content; the copy is writable even if the original
    /// was read-only.
    fn clone(&self) -> Self {
        Vector {
            flags: self.flags & !FLAGS_TRANSIENT,
            revision: self.revision,
            eps: self.eps,
            bits: self.bits,
            buckets: self.buckets.clone(),
            optimize: self.optimize,
        }
    }
}

pub struct VectorEntries<'a> {
    buckets: &'a [Bucket1],
    bucket: usize,
    pos: usize,
}

impl Iterator for VectorEntries<'_> {
    type Item = Entry1;

    fn next(&mut self) -> Option<Self::Item> {
        while self.bucket < self.buckets.len() {
            let entries = self.buckets[self.bucket].entries();
            if self.pos < entries.len() {
                let entry = entries[self.pos];
                self.pos += 1;
                return Some(entry);
            }
            self.bucket += 1;
            self.pos = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::bucket::failpoint;

    #[test]
    fn rejects_unknown_flags() {
        assert!(Vector::new(FLAG_NONZERO).is_err());
        assert!(Vector::new(0x80).is_err());
        assert!(Vector::new(FLAG_POSITIVE).is_ok());
    }

    #[test]
    fn positive_implies_nonzero() {
        let vector = Vector::new(FLAG_POSITIVE).unwrap();
        assert_eq!(vector.flags() & FLAG_NONZERO, FLAG_NONZERO);
    }

    #[test]
    fn set_get_del_roundtrip() {
        let mut vector = Vector::new(0).unwrap();
        vector.set_entry(7, 2.5).unwrap();
        assert!(vector.has_entry(7));
        assert_eq!(vector.get_entry(7), 2.5);
        assert_eq!(vector.get_entry(8), 0.0);
        vector.del_entry(7).unwrap();
        assert!(!vector.has_entry(7));
    }

    #[test]
    fn plain_vector_stores_zero() {
        let mut vector = Vector::new(0).unwrap();
        vector.set_entry(1, 0.0).unwrap();
        assert!(vector.has_entry(1));
    }

    #[test]
    fn nonzero_collapse_on_add() {
        let mut vector = Vector::new(FLAG_POSITIVE).unwrap();
        vector.set_entry(1, 2.0).unwrap();
        vector.add_entry(1, -2.0).unwrap();
        assert!(!vector.has_entry(1));
        // A negative result also collapses on a POSITIVE vector.
        vector.set_entry(2, -1.0).unwrap();
        assert!(!vector.has_entry(2));
    }

    #[test]
    fn eps_threshold_applies() {
        let mut vector = Vector::new(FLAG_POSITIVE).unwrap();
        vector.set_eps(0.5).unwrap();
        vector.set_entry(1, 0.5).unwrap();
        assert!(!vector.has_entry(1));
        vector.set_entry(1, 0.6).unwrap();
        assert!(vector.has_entry(1));
        // Raising eps retroactively collapses stored entries.
        vector.set_eps(0.7).unwrap();
        assert!(!vector.has_entry(1));
    }

    #[test]
    fn readonly_blocks_mutation() {
        let mut vector = Vector::new(0).unwrap();
        vector.set_entry(1, 1.0).unwrap();
        vector.set_readonly(true);
        let revision = vector.revision();
        assert!(matches!(
            vector.set_entry(2, 1.0),
            Err(GraphError::ReadOnly)
        ));
        assert!(matches!(vector.del_entry(1), Err(GraphError::ReadOnly)));
        assert!(matches!(vector.clear(), Err(GraphError::ReadOnly)));
        assert_eq!(vector.revision(), revision);
        assert_eq!(vector.get_entry(1), 1.0);
    }

    #[test]
    fn revision_tracks_mutations_only() {
        let mut vector = Vector::new(0).unwrap();
        let r0 = vector.revision();
        vector.set_entry(1, 1.0).unwrap();
        let r1 = vector.revision();
        assert!(r1 > r0);
        vector.get_entry(1);
        assert!(vector.has_entry(1));
        assert_eq!(vector.revision(), r1);
        // Deleting an absent entry is a pure no-op.
        vector.del_entry(42).unwrap();
        assert_eq!(vector.revision(), r1);
    }

    #[test]
    fn table_grows_under_load() {
        let mut vector = Vector::new(0).unwrap();
        for i in 0..2000u64 {
            vector.set_entry(i * 31, 1.0).unwrap();
        }
        assert!(vector.bits() > 0);
        assert_eq!(vector.num_entries(), 2000);
        for i in 0..2000u64 {
            assert_eq!(vector.get_entry(i * 31), 1.0);
        }
        vector.check_consistency().unwrap();
    }

    #[test]
    fn table_shrinks_after_mass_delete() {
        let mut vector = Vector::new(0).unwrap();
        for i in 0..2000u64 {
            vector.set_entry(i, 1.0).unwrap();
        }
        let grown = vector.bits();
        assert!(grown > 0);
        for i in 0..2000u64 {
            vector.del_entry(i).unwrap();
        }
        // The shrink check runs on the optimize countdown, so push a few
        // more mutations through.
        for _ in 0..1100 {
            vector.set_entry(0, 1.0).unwrap();
        }
        assert!(vector.bits() < grown);
        vector.check_consistency().unwrap();
    }

    #[test]
    fn inc_bits_failure_rolls_back() {
        let mut vector = Vector::new(0).unwrap();
        for i in 0..100u64 {
            vector.set_entry(i, i as f32 + 1.0).unwrap();
        }
        failpoint::arm(2);
        let result = vector.inc_bits();
        failpoint::disarm();
        assert!(matches!(result, Err(GraphError::OutOfMemory)));
        assert_eq!(vector.bits(), 0);
        assert_eq!(vector.num_entries(), 100);
        for i in 0..100u64 {
            assert_eq!(vector.get_entry(i), i as f32 + 1.0);
        }
        vector.check_consistency().unwrap();
    }

    #[test]
    fn del_small_respects_sign_mode() {
        let mut vector = Vector::new(0).unwrap();
        vector.set_entry(1, 0.1).unwrap();
        vector.set_entry(2, -0.1).unwrap();
        vector.set_entry(3, 5.0).unwrap();
        vector.del_small(0.5).unwrap();
        assert!(!vector.has_entry(1));
        assert!(!vector.has_entry(2));
        assert!(vector.has_entry(3));
    }

    #[test]
    fn clone_is_writable() {
        let mut vector = Vector::new(0).unwrap();
        vector.set_entry(1, 1.0).unwrap();
        vector.set_readonly(true);
        let mut copy = vector.clone();
        assert!(!copy.is_readonly());
        copy.set_entry(2, 2.0).unwrap();
        assert_eq!(copy.get_entry(1), 1.0);
        assert!(!vector.has_entry(2));
    }

    #[test]
    fn iteration_covers_all_buckets() {
        let mut vector = Vector::new(0).unwrap();
        for i in 0..600u64 {
            vector.set_entry(i, 1.0).unwrap();
        }
        let mut seen: Vec<u64> = vector.entries().map(|e| e.index).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..600).collect::<Vec<_>>());
    }
}
