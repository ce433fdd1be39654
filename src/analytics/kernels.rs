//! Arithmetic kernels: scaling, graph/vector accumulation, the sparse
//! matrix-vector product, degree and weight projections, and the derived
//! anomaly / normalization transforms.

use std::collections::BinaryHeap;

use crate::error::{GraphError, Result};
use crate::model::{Entry2, FLAG_DIRECTED, FLAG_NONZERO, FLAG_POSITIVE};
use crate::storage::graph::Graph;
use crate::storage::merge::{MergeIter, TargetJoin};
use crate::storage::vector::Vector;

impl Graph {
    /// Scales every weight in place. Scaling by 1.0 is a no-op; results
    /// falling below the collapse threshold are removed.
    pub fn mul_const(&mut self, constant: f32) -> Result<()> {
        self.ensure_writable()?;
        if constant == 1.0 {
            return Ok(());
        }
        for bucket in self.buckets_mut() {
            for entry in bucket.entries_mut() {
                entry.weight *= constant;
            }
        }
        if self.flags() & FLAG_NONZERO != 0 {
            let eps = self.eps();
            self.collapse_small(eps);
        }
        self.bump_revision();
        Ok(())
    }

    /// Adds every edge of `other`, scaled by `weight`. Both graphs must
    /// agree on the DIRECTED flag.
    pub fn add_graph(&mut self, other: &Graph, weight: f32) -> Result<()> {
        if (self.flags() ^ other.flags()) & FLAG_DIRECTED != 0 {
            return Err(GraphError::InvalidArgument(
                "cannot combine directed and undirected graphs".into(),
            ));
        }
        for edge in other.edges() {
            self.add_edge(edge.source, edge.target, edge.weight * weight)?;
        }
        Ok(())
    }

    /// Subtracts every edge of `other`, scaled by `weight`.
    pub fn sub_graph(&mut self, other: &Graph, weight: f32) -> Result<()> {
        self.add_graph(other, -weight)
    }

    /// Sparse matrix-vector product: `out[s] = Σ_t g[s,t] · v[t]`.
    ///
    /// The vector's bucket table is first aligned to the graph's target
    /// bits so that each graph bucket pairs with exactly one vector bucket;
    /// the product then runs as a sorted merge join per bucket pair. The
    /// alignment changes the vector's layout but not its content.
    pub fn mul_vector(&self, vector: &mut Vector) -> Result<Vector> {
        while vector.bits() > self.bits_target() {
            vector.dec_bits()?;
        }
        let mut out = Vector::new(0)?;
        let vector_mask = (1u64 << vector.bits()) - 1;
        for (i, bucket) in self.buckets().iter().enumerate() {
            let target_low = (i as u64) >> self.bits_source();
            let entries = vector.buckets()[(target_low & vector_mask) as usize].entries();
            for (edge, entry) in TargetJoin::new(bucket.entries(), entries) {
                if let Some(entry) = entry {
                    out.add_entry(edge.source, edge.weight * entry.weight)?;
                }
            }
        }
        Ok(out)
    }

    /// Incoming edge count per node, over the stored entries.
    pub fn in_degrees(&self) -> Result<Vector> {
        let mut vector = Vector::new(0)?;
        for edge in self.directed_edges() {
            vector.add_entry(edge.target, 1.0)?;
        }
        Ok(vector)
    }

    /// Incoming weight sum per node, over the stored entries.
    pub fn in_weights(&self) -> Result<Vector> {
        let mut vector = Vector::new(0)?;
        for edge in self.directed_edges() {
            vector.add_entry(edge.target, edge.weight)?;
        }
        Ok(vector)
    }

    /// Outgoing edge count per node, over the stored entries.
    pub fn out_degrees(&self) -> Result<Vector> {
        let mut vector = Vector::new(0)?;
        for edge in self.directed_edges() {
            vector.add_entry(edge.source, 1.0)?;
        }
        Ok(vector)
    }

    /// Outgoing weight sum per node, over the stored entries.
    pub fn out_weights(&self) -> Result<Vector> {
        let mut vector = Vector::new(0)?;
        for edge in self.directed_edges() {
            vector.add_entry(edge.source, edge.weight)?;
        }
        Ok(vector)
    }

    /// Per-node deviation of the out-degree from the mean out-degree of
    /// its successors: `result[s] = deg(s) − (Σ_{(s,t)} deg(t)) / deg(s)`.
    pub fn degree_anomalies(&self) -> Result<Vector> {
        let mut vector = self.out_degrees()?;
        let mut temp = Vector::new(0)?;
        for edge in self.directed_edges() {
            temp.add_entry(edge.source, vector.get_entry(edge.target))?;
        }
        for bucket in vector.buckets_mut() {
            for entry in bucket.entries_mut() {
                entry.weight -= temp.get_entry(entry.index) / entry.weight;
            }
        }
        vector.bump_revision();
        Ok(vector)
    }

    /// Weighted variant of [`Graph::degree_anomalies`].
    pub fn weight_anomalies(&self) -> Result<Vector> {
        let mut vector = self.out_weights()?;
        let mut temp = Vector::new(0)?;
        for edge in self.directed_edges() {
            temp.add_entry(edge.source, edge.weight * vector.get_entry(edge.target))?;
        }
        for bucket in vector.buckets_mut() {
            for entry in bucket.entries_mut() {
                entry.weight -= temp.get_entry(entry.index) / entry.weight;
            }
        }
        vector.bump_revision();
        Ok(vector)
    }

    /// New graph restricted to edges whose endpoints both appear in
    /// `nodes`.
    pub fn filter_nodes(&self, nodes: &Vector) -> Result<Graph> {
        let mut out = Graph::new(self.flags() & (FLAG_POSITIVE | FLAG_DIRECTED))?;
        for edge in self.edges() {
            if !nodes.has_entry(edge.source) || !nodes.has_entry(edge.target) {
                continue;
            }
            out.set_edge(edge.source, edge.target, edge.weight)?;
        }
        Ok(out)
    }

    /// New graph with every weight divided by the product of its source's
    /// outgoing and its target's incoming weight sums. On an undirected
    /// graph the two sums coincide.
    pub fn normalize(&self) -> Result<Graph> {
        let out_weights = self.out_weights()?;
        let in_weights = if self.is_directed() {
            Some(self.in_weights()?)
        } else {
            None
        };
        let in_weights = in_weights.as_ref().unwrap_or(&out_weights);

        let mut result = Graph::new(self.flags() & FLAG_DIRECTED)?;
        for edge in self.edges() {
            let scale =
                out_weights.get_entry(edge.source) * in_weights.get_entry(edge.target);
            result.add_edge(edge.source, edge.target, edge.weight / scale)?;
        }
        Ok(result)
    }

    /// Sum of all stored entry weights in double precision. Undirected
    /// mirrors are included, so an undirected edge contributes twice.
    pub fn sum_weights(&self) -> f64 {
        self.directed_edges().map(|e| e.weight as f64).sum()
    }

    /// The `max_edges` heaviest edges in descending weight order. Edges
    /// tied with the last returned weight are included as well.
    pub fn top_edges(&self, max_edges: u64) -> Vec<Entry2> {
        if max_edges == 0 {
            return Vec::new();
        }
        let mut queue: BinaryHeap<ByWeight> = self.edges().map(ByWeight).collect();
        let mut out = Vec::new();
        while let Some(ByWeight(edge)) = queue.pop() {
            if (out.len() as u64) < max_edges {
                out.push(edge);
                continue;
            }
            let cutoff = out[out.len() - 1].weight;
            if edge.weight != cutoff {
                break;
            }
            out.push(edge);
        }
        out
    }
}

struct ByWeight(Entry2);

impl PartialEq for ByWeight {
    fn eq(&self, other: &Self) -> bool {
        self.0.weight.total_cmp(&other.0.weight).is_eq()
    }
}

impl Eq for ByWeight {}

impl PartialOrd for ByWeight {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByWeight {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.weight.total_cmp(&other.0.weight)
    }
}

impl Vector {
    /// Scales every weight in place. Scaling by 1.0 is a no-op; results
    /// falling below the collapse threshold are removed.
    pub fn mul_const(&mut self, constant: f32) -> Result<()> {
        self.ensure_writable()?;
        if constant == 1.0 {
            return Ok(());
        }
        for bucket in self.buckets_mut() {
            for entry in bucket.entries_mut() {
                entry.weight *= constant;
            }
        }
        if self.flags() & FLAG_NONZERO != 0 {
            let eps = self.eps();
            self.collapse_small(eps);
        }
        self.bump_revision();
        Ok(())
    }

    /// Adds every entry of `other`, scaled by `weight`.
    pub fn add_vector(&mut self, other: &Vector, weight: f32) -> Result<()> {
        for entry in other.entries() {
            self.add_entry(entry.index, entry.weight * weight)?;
        }
        Ok(())
    }

    /// Subtracts every entry of `other`, scaled by `weight`.
    pub fn sub_vector(&mut self, other: &Vector, weight: f32) -> Result<()> {
        self.add_vector(other, -weight)
    }

    /// Euclidean norm in double precision.
    pub fn norm(&self) -> f64 {
        self.entries()
            .map(|e| e.weight as f64 * e.weight as f64)
            .sum::<f64>()
            .sqrt()
    }

    /// Dot product in double precision. When the two bucket tables have the
    /// same width the product runs as a per-bucket sorted merge; otherwise
    /// it falls back to per-entry lookups.
    pub fn dot(&self, other: &Vector) -> f64 {
        let mut sum = 0.0f64;
        if self.bits() == other.bits() {
            for (a, b) in self.buckets().iter().zip(other.buckets()) {
                for pair in MergeIter::new(a.entries(), b.entries()) {
                    if let (Some(x), Some(y)) = pair {
                        sum += x.weight as f64 * y.weight as f64;
                    }
                }
            }
        } else {
            for entry in self.entries() {
                sum += entry.weight as f64 * other.get_entry(entry.index) as f64;
            }
        }
        sum
    }

    /// Euclidean distance `‖self − other‖₂` in double precision.
    pub fn sub_norm(&self, other: &Vector) -> f64 {
        let mut sum = 0.0f64;
        if self.bits() == other.bits() {
            for (a, b) in self.buckets().iter().zip(other.buckets()) {
                for (x, y) in MergeIter::new(a.entries(), b.entries()) {
                    let x = x.map_or(0.0, |e| e.weight) as f64;
                    let y = y.map_or(0.0, |e| e.weight) as f64;
                    sum += (x - y) * (x - y);
                }
            }
        } else {
            for entry in self.entries() {
                let d = entry.weight as f64 - other.get_entry(entry.index) as f64;
                sum += d * d;
            }
            for entry in other.entries() {
                if !self.has_entry(entry.index) {
                    sum += entry.weight as f64 * entry.weight as f64;
                }
            }
        }
        sum.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_const_by_one_is_noop() {
        let mut vector = Vector::new(0).unwrap();
        vector.set_entry(1, 2.0).unwrap();
        let revision = vector.revision();
        vector.mul_const(1.0).unwrap();
        assert_eq!(vector.revision(), revision);
        vector.mul_const(2.0).unwrap();
        assert_eq!(vector.get_entry(1), 4.0);
        assert!(vector.revision() > revision);
    }

    #[test]
    fn mul_const_collapses_below_eps() {
        let mut graph = Graph::new(FLAG_POSITIVE).unwrap();
        graph.set_eps(0.25).unwrap();
        graph.set_edge(1, 2, 1.0).unwrap();
        graph.set_edge(3, 4, 10.0).unwrap();
        graph.mul_const(0.1).unwrap();
        assert!(!graph.has_edge(1, 2));
        assert_eq!(graph.get_edge(3, 4), 1.0);
        graph.check_consistency().unwrap();
    }

    #[test]
    fn add_graph_rejects_flag_mismatch() {
        let mut out = Graph::new(0).unwrap();
        let directed = Graph::new(FLAG_DIRECTED).unwrap();
        assert!(matches!(
            out.add_graph(&directed, 1.0),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn mul_vector_aligns_wider_vectors() {
        let mut graph = Graph::new(FLAG_DIRECTED).unwrap();
        graph.set_edge(0, 1, 2.0).unwrap();
        graph.set_edge(0, 2, 3.0).unwrap();
        let mut vector = Vector::new(0).unwrap();
        for i in 0..1000u64 {
            vector.set_entry(i, 1.0).unwrap();
        }
        assert!(vector.bits() > graph.bits_target());
        let out = graph.mul_vector(&mut vector).unwrap();
        assert!(vector.bits() <= graph.bits_target());
        assert_eq!(out.get_entry(0), 5.0);
        assert_eq!(vector.num_entries(), 1000);
    }

    #[test]
    fn dot_agrees_across_layouts() {
        let mut a = Vector::new(0).unwrap();
        let mut b = Vector::new(0).unwrap();
        for i in 0..600u64 {
            a.set_entry(i, 1.0 + (i % 7) as f32).unwrap();
            if i % 2 == 0 {
                b.set_entry(i, 2.0).unwrap();
            }
        }
        let merged = a.dot(&b);
        // Force the fallback path by shrinking one side.
        while b.bits() > 0 {
            b.dec_bits().unwrap();
        }
        assert_ne!(a.bits(), b.bits());
        let looked_up = a.dot(&b);
        assert!((merged - looked_up).abs() < 1e-9);
    }

    #[test]
    fn top_edges_includes_ties_at_cutoff() {
        let mut graph = Graph::new(FLAG_DIRECTED).unwrap();
        graph.set_edge(0, 1, 5.0).unwrap();
        graph.set_edge(0, 2, 3.0).unwrap();
        graph.set_edge(0, 3, 3.0).unwrap();
        graph.set_edge(0, 4, 1.0).unwrap();
        let top = graph.top_edges(2);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].weight, 5.0);
        assert!(top[1..].iter().all(|e| e.weight == 3.0));
    }
}
