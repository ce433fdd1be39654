//! Callback-driven best-first traversal.
//!
//! The frontier is a min-heap over either accumulated edge weight or hop
//! count; a visited vector ensures each reachable node is delivered to the
//! callback exactly once, in non-decreasing metric order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{GraphError, Result};
use crate::storage::graph::Graph;
use crate::storage::vector::Vector;

/// A frontier element delivered to the BFS callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BfsEntry {
    /// Accumulated edge weight along the discovered path.
    pub weight: f64,
    /// Number of edges along the discovered path.
    pub hops: u32,
    /// Predecessor node, or `u64::MAX` for the start node.
    pub from: u64,
    /// The node being visited.
    pub to: u64,
}

/// Verdict returned by a BFS callback. Returning an error from the
/// callback aborts the traversal and propagates the error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BfsControl {
    /// Keep exploring.
    Continue,
    /// Finish successfully without exploring further.
    Stop,
}

struct Frontier {
    key: f64,
    entry: BfsEntry,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.key.total_cmp(&other.key).is_eq()
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Reversed so the BinaryHeap pops the smallest metric first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.total_cmp(&self.key)
    }
}

impl Graph {
    /// Explores nodes reachable from `source`, invoking the callback once
    /// per node in non-decreasing order of accumulated weight (when
    /// `use_weights`) or hop count.
    ///
    /// Duplicate frontier entries are not filtered at push time; the
    /// visited check on pop discards them.
    pub fn bfs<F>(&self, source: u64, use_weights: bool, mut callback: F) -> Result<()>
    where
        F: FnMut(&BfsEntry) -> Result<BfsControl>,
    {
        let mut visited = Vector::new(0)?;
        let mut frontier = BinaryHeap::new();
        frontier.push(Frontier {
            key: 0.0,
            entry: BfsEntry {
                weight: 0.0,
                hops: 0,
                from: u64::MAX,
                to: source,
            },
        });

        while let Some(Frontier { entry, .. }) = frontier.pop() {
            if visited.has_entry(entry.to) {
                continue;
            }
            match callback(&entry)? {
                BfsControl::Stop => return Ok(()),
                BfsControl::Continue => {}
            }
            visited.set_entry(entry.to, 1.0)?;

            for edge in self.adjacent_edges(entry.to) {
                if visited.has_entry(edge.target) {
                    continue;
                }
                let next = BfsEntry {
                    weight: entry.weight + edge.weight as f64,
                    hops: entry.hops + 1,
                    from: entry.to,
                    to: edge.target,
                };
                frontier.push(Frontier {
                    key: if use_weights {
                        next.weight
                    } else {
                        next.hops as f64
                    },
                    entry: next,
                });
            }
        }

        Ok(())
    }

    /// Length in hops of the shortest path from `source` to `end`, or
    /// `u64::MAX` when `end` is unreachable. An allocation failure during
    /// the traversal is indistinguishable from an unreachable node.
    pub fn distance_hops(&self, source: u64, end: u64) -> u64 {
        let mut distance = u64::MAX;
        let _ = self.bfs(source, false, |entry| {
            if entry.to != end {
                return Ok(BfsControl::Continue);
            }
            distance = entry.hops as u64;
            Ok(BfsControl::Stop)
        });
        distance
    }

    /// Weight of the lightest path from `source` to `end`, or `+∞` when
    /// `end` is unreachable. An allocation failure during the traversal is
    /// indistinguishable from an unreachable node.
    pub fn distance_weight(&self, source: u64, end: u64) -> f64 {
        let mut distance = f64::INFINITY;
        let _ = self.bfs(source, true, |entry| {
            if entry.to != end {
                return Ok(BfsControl::Continue);
            }
            distance = entry.weight;
            Ok(BfsControl::Stop)
        });
        distance
    }

    /// Hop distance from `source` to every node within `max_hops`. The
    /// frontier is ordered, so the traversal stops at the first node past
    /// the bound.
    pub fn all_distances_hops(&self, source: u64, max_hops: u64) -> Result<Vector> {
        let mut result = Vector::new(0)?;
        self.bfs(source, false, |entry| {
            if entry.hops as u64 > max_hops {
                return Ok(BfsControl::Stop);
            }
            result.set_entry(entry.to, entry.hops as f32)?;
            Ok(BfsControl::Continue)
        })?;
        Ok(result)
    }

    /// Weight distance from `source` to every node within `max_weight`.
    pub fn all_distances_weight(&self, source: u64, max_weight: f64) -> Result<Vector> {
        let mut result = Vector::new(0)?;
        self.bfs(source, true, |entry| {
            if entry.weight > max_weight {
                return Ok(BfsControl::Stop);
            }
            result.set_entry(entry.to, entry.weight as f32)?;
            Ok(BfsControl::Continue)
        })?;
        Ok(result)
    }

    /// All-pairs distances as a graph: edge `(s, v)` carries the metric of
    /// the shortest path from `s` to `v`, diagonal omitted. Runs one
    /// traversal per node, so the cost is O(V·(V+E)) with no cancellation
    /// hook.
    pub fn all_distances_graph(&self, use_weights: bool) -> Result<Graph> {
        let mut result = Graph::new(self.flags() & crate::model::FLAG_DIRECTED)?;
        let nodes = self.nodes()?;
        for node in nodes.entries() {
            let source = node.index;
            self.bfs(source, use_weights, |entry| {
                if entry.to != source {
                    let metric = if use_weights {
                        entry.weight as f32
                    } else {
                        entry.hops as f32
                    };
                    result.set_edge(source, entry.to, metric)?;
                }
                Ok(BfsControl::Continue)
            })?;
        }
        Ok(result)
    }

    /// Maps every node to a component id such that two nodes share an id
    /// iff they are connected. Only defined for undirected graphs.
    pub fn connected_components(&self) -> Result<Vector> {
        if self.is_directed() {
            return Err(GraphError::Unsupported(
                "connected components on a directed graph",
            ));
        }
        let mut result = Vector::new(0)?;
        let nodes = self.nodes()?;
        let mut component = 0.0f32;
        for node in nodes.entries() {
            if result.has_entry(node.index) {
                continue;
            }
            self.bfs(node.index, false, |entry| {
                result.set_entry(entry.to, component)?;
                Ok(BfsControl::Continue)
            })?;
            component += 1.0;
        }
        Ok(result)
    }
}
