use tracing::warn;

use crate::error::{GraphError, Result};
use crate::model::{
    Entry2, FLAGS_TRANSIENT, FLAG_DIRECTED, FLAG_NONZERO, FLAG_POSITIVE, FLAG_READONLY, MAX_BITS,
};
use crate::storage::bucket::{reserve_items, Bucket2};
use crate::storage::vector::Vector;

/// Sparse weighted graph stored as a power-of-two table of sorted buckets.
/// The bucket for an edge is selected by the low `bits_source` bits of the
/// source and the low `bits_target` bits of the target; inside a bucket,
/// entries are sorted by `(target, source)`.
///
/// Without `FLAG_DIRECTED` every off-diagonal edge is stored in both
/// orientations, and mutations keep the two mirrors in lockstep.
///
/// Iteration order is bucket order, then sorted order inside each bucket —
/// not a global sort over edges.
#[derive(Debug)]
pub struct Graph {
    flags: u32,
    revision: u64,
    eps: f32,
    bits_source: u32,
    bits_target: u32,
    buckets: Vec<Bucket2>,
    optimize: u64,
}

impl Graph {
    /// Creates an empty graph. Only `FLAG_POSITIVE` and `FLAG_DIRECTED`
    /// may be passed; `FLAG_NONZERO` is derived from `FLAG_POSITIVE` and
    /// anything else is rejected.
    pub fn new(flags: u32) -> Result<Graph> {
        if flags & !(FLAG_POSITIVE | FLAG_DIRECTED) != 0 {
            return Err(GraphError::InvalidArgument(format!(
                "unsupported graph flags {flags:#x}"
            )));
        }
        let mut flags = flags;
        if flags & FLAG_POSITIVE != 0 {
            flags |= FLAG_NONZERO;
        }
        let mut buckets = Vec::new();
        reserve_items(&mut buckets, 1)?;
        buckets.push(Bucket2::default());
        let mut graph = Graph {
            flags,
            revision: 0,
            eps: 0.0,
            bits_source: 0,
            bits_target: 0,
            buckets,
            optimize: 0,
        };
        graph.rebalance();
        Ok(graph)
    }

    pub(crate) fn from_raw_parts(
        flags: u32,
        bits_source: u32,
        bits_target: u32,
        buckets: Vec<Bucket2>,
    ) -> Graph {
        Graph {
            flags,
            revision: 0,
            eps: 0.0,
            bits_source,
            bits_target,
            buckets,
            optimize: 256,
        }
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

    pub fn bits_source(&self) -> u32 {
        self.bits_source
    }

    pub fn bits_target(&self) -> u32 {
        self.bits_target
    }

    pub fn is_directed(&self) -> bool {
        self.flags & FLAG_DIRECTED != 0
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

    /// Sets the collapse threshold. On a NONZERO graph the stored edges are
    /// re-checked against the new threshold immediately.
    pub fn set_eps(&mut self, eps: f32) -> Result<()> {
        self.ensure_writable()?;
        self.eps = eps.abs();
        if self.flags & FLAG_NONZERO != 0 {
            self.collapse_small(self.eps);
            self.revision += 1;
        }
        Ok(())
    }

    pub fn has_edge(&self, source: u64, target: u64) -> bool {
        self.buckets[self.bucket_for(source, target)]
            .get((target, source))
            .is_some()
    }

    /// Returns the stored weight, or 0.0 for an absent edge.
    pub fn get_edge(&self, source: u64, target: u64) -> f32 {
        self.buckets[self.bucket_for(source, target)]
            .get((target, source))
            .map_or(0.0, |e| e.weight)
    }

    pub fn set_edge(&mut self, source: u64, target: u64, weight: f32) -> Result<()> {
        self.update_edge(source, target, |_| weight)
    }

    pub fn add_edge(&mut self, source: u64, target: u64, weight: f32) -> Result<()> {
        self.update_edge(source, target, |old| old + weight)
    }

    pub fn sub_edge(&mut self, source: u64, target: u64, weight: f32) -> Result<()> {
        self.update_edge(source, target, |old| old - weight)
    }

    /// Removes an edge (both orientations on an undirected graph).
    /// Deleting an absent edge is a no-op and does not bump the revision.
    pub fn del_edge(&mut self, source: u64, target: u64) -> Result<()> {
        self.ensure_writable()?;
        let i = self.bucket_for(source, target);
        let mut removed = self.buckets[i].remove((target, source)).is_some();
        if !self.is_directed() && source != target {
            let j = self.bucket_for(target, source);
            removed |= self.buckets[j].remove((source, target)).is_some();
        }
        if removed {
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

    /// One-pass removal of edges at or below the threshold: `w ≤ eps` for
    /// POSITIVE graphs, `|w| ≤ eps` otherwise. Mirrored entries carry equal
    /// weights, so the pass keeps undirected graphs symmetric.
    pub fn del_small(&mut self, eps: f32) -> Result<()> {
        self.ensure_writable()?;
        self.collapse_small(eps.abs());
        self.revision += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    /// Number of edges, counting an undirected pair once.
    pub fn num_edges(&self) -> u64 {
        if self.is_directed() {
            return self.buckets.iter().map(|b| b.len() as u64).sum();
        }
        // Mirrors of entries in a diagonal bucket (equal masked source and
        // target bits) live in the same bucket; everywhere else the mirror
        // sits in another bucket and plain entry counting double-counts the
        // pair on its own.
        let mask = (1u64 << self.bits_source.min(self.bits_target)) - 1;
        let mut count = 0u64;
        for (i, bucket) in self.buckets.iter().enumerate() {
            let i = i as u64;
            if ((i >> self.bits_source) ^ i) & mask != 0 {
                count += bucket.len() as u64;
            } else {
                count += 2 * bucket
                    .entries()
                    .iter()
                    .filter(|e| e.target >= e.source)
                    .count() as u64;
            }
        }
        debug_assert!(count % 2 == 0);
        count / 2
    }

    /// Iterates edges, visiting an undirected pair once (the orientation
    /// with `target >= source`).
    pub fn edges(&self) -> EdgeIter<'_> {
        EdgeIter {
            graph: self,
            bucket: 0,
            pos: 0,
            directed_view: self.is_directed(),
        }
    }

    /// Iterates every stored entry, including undirected mirrors.
    pub fn directed_edges(&self) -> EdgeIter<'_> {
        EdgeIter {
            graph: self,
            bucket: 0,
            pos: 0,
            directed_view: true,
        }
    }

    /// Iterates the stored entries whose source is `source`.
    pub fn adjacent_edges(&self, source: u64) -> AdjacentEdges<'_> {
        let mask = (1u64 << self.bits_source) - 1;
        AdjacentEdges {
            graph: self,
            bucket: (source & mask) as usize,
            pos: 0,
            source,
        }
    }

    /// Occurrence vector over all edge endpoints. The result is returned
    /// read-only; clone it to get a writable copy.
    pub fn nodes(&self) -> Result<Vector> {
        let mut nodes = Vector::new(0)?;
        for edge in self.edges() {
            nodes.add_entry(edge.source, 1.0)?;
            nodes.add_entry(edge.target, 1.0)?;
        }
        nodes.set_readonly(true);
        Ok(nodes)
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Graph>()
            + self.buckets.capacity() * std::mem::size_of::<Bucket2>()
            + self.buckets.iter().map(|b| b.allocated_bytes()).sum::<usize>()
    }

    /// Validates the structural invariants: table size, edge routing,
    /// intra-bucket sort order, NONZERO/POSITIVE weight bounds, and mirror
    /// symmetry on undirected graphs.
    pub fn check_consistency(&self) -> Result<()> {
        if self.buckets.len() != 1usize << (self.bits_source + self.bits_target) {
            return Err(GraphError::Corruption(format!(
                "bucket table holds {} buckets, expected {}",
                self.buckets.len(),
                1usize << (self.bits_source + self.bits_target)
            )));
        }
        for (i, bucket) in self.buckets.iter().enumerate() {
            let mut prev = None;
            for entry in bucket.entries() {
                if self.bucket_for(entry.source, entry.target) != i {
                    return Err(GraphError::Corruption(format!(
                        "edge ({}, {}) routed to bucket {i}",
                        entry.source, entry.target
                    )));
                }
                let key = (entry.target, entry.source);
                if prev.is_some_and(|p| p >= key) {
                    return Err(GraphError::Corruption(format!(
                        "bucket {i} out of order at edge ({}, {})",
                        entry.source, entry.target
                    )));
                }
                prev = Some(key);
                if self.collapses(entry.weight) {
                    return Err(GraphError::Corruption(format!(
                        "weight {} violates the nonzero bound",
                        entry.weight
                    )));
                }
            }
        }
        if !self.is_directed() {
            for edge in self.directed_edges() {
                if edge.source != edge.target
                    && self.get_edge(edge.target, edge.source) != edge.weight
                {
                    return Err(GraphError::Corruption(format!(
                        "edge ({}, {}) has no matching mirror",
                        edge.source, edge.target
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn bucket_for(&self, source: u64, target: u64) -> usize {
        let mask_source = (1u64 << self.bits_source) - 1;
        let mask_target = (1u64 << self.bits_target) - 1;
        ((source & mask_source) | ((target & mask_target) << self.bits_source)) as usize
    }

    pub(crate) fn buckets(&self) -> &[Bucket2] {
        &self.buckets
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut [Bucket2] {
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

    /// Shared body of set/add/sub. Bucket capacity for both orientations is
    /// reserved before either is touched, so the mirror write can never
    /// fail halfway: the pair either updates together or not at all.
    fn update_edge(&mut self, source: u64, target: u64, f: impl FnOnce(f32) -> f32) -> Result<()> {
        self.ensure_writable()?;
        let weight = f(self.get_edge(source, target));
        let collapse = self.collapses(weight);
        let mirror = !self.is_directed() && source != target;
        if !collapse {
            let i = self.bucket_for(source, target);
            if mirror {
                let j = self.bucket_for(target, source);
                if i == j {
                    // Both orientations land in the same bucket; reserve
                    // room for both inserts at once.
                    let bucket = &mut self.buckets[i];
                    let missing = usize::from(bucket.get((target, source)).is_none())
                        + usize::from(bucket.get((source, target)).is_none());
                    bucket.ensure_spare(missing)?;
                } else {
                    self.buckets[i].reserve_one((target, source))?;
                    self.buckets[j].reserve_one((source, target))?;
                }
            } else {
                self.buckets[i].reserve_one((target, source))?;
            }
        }
        self.commit_edge(source, target, weight, collapse);
        if mirror {
            self.commit_edge(target, source, weight, collapse);
        }
        self.touch();
        Ok(())
    }

    fn commit_edge(&mut self, source: u64, target: u64, weight: f32, collapse: bool) {
        let i = self.bucket_for(source, target);
        let bucket = &mut self.buckets[i];
        if collapse {
            bucket.remove((target, source));
        } else {
            bucket.put_reserved(Entry2 {
                source,
                target,
                weight,
            });
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.optimize = self.optimize.saturating_sub(1);
        if self.optimize == 0 {
            self.rebalance();
        }
    }

    fn num_stored_entries(&self) -> u64 {
        self.buckets.iter().map(|b| b.len() as u64).sum()
    }

    /// Doubles the table on the next source bit. The replacement table is
    /// built first and swapped in on success, so a failed reservation
    /// leaves the graph untouched.
    pub(crate) fn inc_bits_source(&mut self) -> Result<()> {
        if self.bits_source >= MAX_BITS {
            return Err(GraphError::InvalidArgument(
                "source bucket bits exhausted".into(),
            ));
        }
        let num = self.buckets.len();
        let num_source = 1usize << self.bits_source;
        let mask = 1u64 << self.bits_source;
        let mut next: Vec<Bucket2> = Vec::new();
        reserve_items(&mut next, num * 2)?;
        next.resize_with(num * 2, Bucket2::default);
        // Every source row doubles in place: the old row at (t, s) moves to
        // (t, s) and its upper split half to (t, s + num_source).
        for (i, bucket) in self.buckets.iter().enumerate() {
            let (low, high) = bucket.split(mask, 0)?;
            let s = i & (num_source - 1);
            let t = i >> self.bits_source;
            let base = (t << (self.bits_source + 1)) | s;
            next[base] = low;
            next[base + num_source] = high;
        }
        for bucket in &mut next {
            bucket.compress();
        }
        self.buckets = next;
        self.bits_source += 1;
        Ok(())
    }

    /// Doubles the table on the next target bit.
    pub(crate) fn inc_bits_target(&mut self) -> Result<()> {
        if self.bits_target >= MAX_BITS {
            return Err(GraphError::InvalidArgument(
                "target bucket bits exhausted".into(),
            ));
        }
        let num = self.buckets.len();
        let mask = 1u64 << self.bits_target;
        let mut low = Vec::new();
        reserve_items(&mut low, num * 2)?;
        let mut high = Vec::new();
        reserve_items(&mut high, num)?;
        for bucket in &self.buckets {
            let (lo, hi) = bucket.split(0, mask)?;
            low.push(lo);
            high.push(hi);
        }
        low.append(&mut high);
        for bucket in &mut low {
            bucket.compress();
        }
        self.buckets = low;
        self.bits_target += 1;
        Ok(())
    }

    /// Halves the table by dropping the top source bit.
    pub(crate) fn dec_bits_source(&mut self) -> Result<()> {
        if self.bits_source == 0 {
            return Err(GraphError::InvalidArgument(
                "source bucket bits already zero".into(),
            ));
        }
        let num_source = 1usize << (self.bits_source - 1);
        let num = self.buckets.len() / 2;
        let mut next = Vec::new();
        reserve_items(&mut next, num)?;
        for new_i in 0..num {
            let s = new_i & (num_source - 1);
            let t = new_i >> (self.bits_source - 1);
            let low = (t << self.bits_source) | s;
            next.push(Bucket2::merged(
                &self.buckets[low],
                &self.buckets[low + num_source],
            )?);
        }
        self.buckets = next;
        self.bits_source -= 1;
        Ok(())
    }

    /// Halves the table by dropping the top target bit.
    pub(crate) fn dec_bits_target(&mut self) -> Result<()> {
        if self.bits_target == 0 {
            return Err(GraphError::InvalidArgument(
                "target bucket bits already zero".into(),
            ));
        }
        let num = self.buckets.len() / 2;
        let mut next = Vec::new();
        reserve_items(&mut next, num)?;
        for i in 0..num {
            next.push(Bucket2::merged(&self.buckets[i], &self.buckets[i + num])?);
        }
        self.buckets = next;
        self.bits_target -= 1;
        Ok(())
    }

    /// Grows or shrinks the bucket table to keep the per-bucket load inside
    /// [16, 256), preferring to grow the smaller and shrink the larger of
    /// the two bit widths, then schedules the next check. A failed resize
    /// is retried after 1024 further mutations.
    pub(crate) fn rebalance(&mut self) {
        let n = self.num_stored_entries();
        let mut failed = false;
        if n >= (self.buckets.len() as u64).saturating_mul(256) {
            while n >= (self.buckets.len() as u64).saturating_mul(64) {
                let result = if self.bits_source <= self.bits_target {
                    self.inc_bits_source()
                } else {
                    self.inc_bits_target()
                };
                if let Err(error) = result {
                    warn!(%error, "graph.rebalance.retry_later");
                    failed = true;
                    break;
                }
            }
        }
        if !failed && self.buckets.len() >= 2 && n < 16 * self.buckets.len() as u64 {
            while self.buckets.len() >= 2 && n < 64 * self.buckets.len() as u64 {
                let result = if self.bits_source <= self.bits_target {
                    self.dec_bits_target()
                } else {
                    self.dec_bits_source()
                };
                if let Err(error) = result {
                    warn!(%error, "graph.rebalance.retry_later");
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
        if !self.is_directed() {
            self.optimize /= 2;
        }
    }
}

impl Clone for Graph {
    /// Duplicates the content; the copy is writable and carries no
    /// timeline reload hints, even if the original did.
    fn clone(&self) -> Self {
        Graph {
            flags: self.flags & !FLAGS_TRANSIENT,
            revision: self.revision,
            eps: self.eps,
            bits_source: self.bits_source,
            bits_target: self.bits_target,
            buckets: self.buckets.clone(),
            optimize: self.optimize,
        }
    }
}

pub struct EdgeIter<'a> {
    graph: &'a Graph,
    bucket: usize,
    pos: usize,
    directed_view: bool,
}

impl Iterator for EdgeIter<'_> {
    type Item = Entry2;

    fn next(&mut self) -> Option<Self::Item> {
        while self.bucket < self.graph.buckets.len() {
            let entries = self.graph.buckets[self.bucket].entries();
            while self.pos < entries.len() {
                let entry = entries[self.pos];
                self.pos += 1;
                if self.directed_view || entry.target >= entry.source {
                    return Some(entry);
                }
            }
            self.bucket += 1;
            self.pos = 0;
        }
        None
    }
}

pub struct AdjacentEdges<'a> {
    graph: &'a Graph,
    bucket: usize,
    pos: usize,
    source: u64,
}

impl Iterator for AdjacentEdges<'_> {
    type Item = Entry2;

    fn next(&mut self) -> Option<Self::Item> {
        let step = 1usize << self.graph.bits_source;
        while self.bucket < self.graph.buckets.len() {
            let entries = self.graph.buckets[self.bucket].entries();
            while self.pos < entries.len() {
                let entry = entries[self.pos];
                self.pos += 1;
                if entry.source == self.source {
                    return Some(entry);
                }
            }
            self.bucket += step;
            self.pos = 0;
        }
        None
    }
}
