//! Multi-objective (Pareto) stability ranking over snapshot sequences.
//!
//! Entries are scored by `value1 = -mean` and `value2 = Σ (gᵢ − mean)²`,
//! sorted lexicographically, and consumed front-to-back in repeated front
//! sweeps: a candidate is taken when it is the first of the sweep, improves
//! on the best variance taken so far, or ties the best exactly on both
//! objectives. The exact-tie rule is implementation-defined when distinct
//! entries share the same floats; it is kept as-is for compatibility.

use std::cmp::Ordering;

use crate::error::{GraphError, Result};
use crate::model::{FLAG_DIRECTED, FLAG_POSITIVE};
use crate::storage::graph::Graph;
use crate::storage::vector::Vector;

#[derive(Clone, Copy)]
struct Scored<K: Copy> {
    key: K,
    value1: f32,
    value2: f32,
}

fn compare(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Ranks edges by how large and how stable their weight is across the
/// snapshots. Each front sweep writes its edges with the current weight;
/// the weight then advances by `+1` when `base` is 0 and by `×base`
/// otherwise. The mean graph is computed from the snapshots unless
/// `override_mean` supplies the iteration domain.
pub fn edge_stability_pareto(
    graphs: &[&Graph],
    override_mean: Option<&Graph>,
    base: f32,
) -> Result<Graph> {
    if graphs.is_empty() {
        return Err(GraphError::InvalidArgument(
            "edge stability requires at least one graph".into(),
        ));
    }
    let directed = graphs[0].flags() & FLAG_DIRECTED;
    if graphs
        .iter()
        .any(|g| g.flags() & FLAG_DIRECTED != directed)
    {
        return Err(GraphError::InvalidArgument(
            "cannot mix directed and undirected graphs".into(),
        ));
    }

    let mut mean = Graph::new(directed)?;
    for graph in graphs {
        mean.add_graph(graph, 1.0)?;
    }
    mean.mul_const(1.0 / graphs.len() as f32)?;

    let domain = override_mean.unwrap_or(&mean);
    let mut scored = Vec::with_capacity(domain.num_edges() as usize);
    for edge in domain.edges() {
        let center = if override_mean.is_some() {
            mean.get_edge(edge.source, edge.target)
        } else {
            edge.weight
        };
        let mut sum2 = 0.0f32;
        for graph in graphs {
            let delta = graph.get_edge(edge.source, edge.target) - center;
            sum2 += delta * delta;
        }
        scored.push(Scored {
            key: (edge.source, edge.target),
            value1: -edge.weight,
            value2: sum2,
        });
    }

    let mut result = Graph::new(directed | FLAG_POSITIVE)?;
    sweep_fronts(scored, base, |(source, target), weight| {
        result.set_edge(source, target, weight)
    })?;
    Ok(result)
}

/// Vector counterpart of [`edge_stability_pareto`], ranking indices
/// instead of edges.
pub fn node_stability_pareto(
    vectors: &[&Vector],
    override_mean: Option<&Vector>,
    base: f32,
) -> Result<Vector> {
    if vectors.is_empty() {
        return Err(GraphError::InvalidArgument(
            "node stability requires at least one vector".into(),
        ));
    }

    let mut mean = Vector::new(0)?;
    for vector in vectors {
        mean.add_vector(vector, 1.0)?;
    }
    mean.mul_const(1.0 / vectors.len() as f32)?;

    let domain = override_mean.unwrap_or(&mean);
    let mut scored = Vec::with_capacity(domain.num_entries() as usize);
    for entry in domain.entries() {
        let center = if override_mean.is_some() {
            mean.get_entry(entry.index)
        } else {
            entry.weight
        };
        let mut sum2 = 0.0f32;
        for vector in vectors {
            let delta = vector.get_entry(entry.index) - center;
            sum2 += delta * delta;
        }
        scored.push(Scored {
            key: entry.index,
            value1: -entry.weight,
            value2: sum2,
        });
    }

    let mut result = Vector::new(FLAG_POSITIVE)?;
    sweep_fronts(scored, base, |index, weight| {
        result.set_entry(index, weight)
    })?;
    Ok(result)
}

fn sweep_fronts<K: Copy>(
    mut queue: Vec<Scored<K>>,
    base: f32,
    mut emit: impl FnMut(K, f32) -> Result<()>,
) -> Result<()> {
    queue.sort_by(|a, b| compare(a.value1, b.value1).then(compare(a.value2, b.value2)));

    let mut weight = 1.0f32;
    while !queue.is_empty() {
        let mut best: Option<Scored<K>> = None;
        let mut remaining = Vec::with_capacity(queue.len());
        for candidate in queue {
            let take = match best {
                None => true,
                Some(best) => {
                    candidate.value2 < best.value2
                        || (candidate.value1 == best.value1 && candidate.value2 == best.value2)
                }
            };
            if take {
                emit(candidate.key, weight)?;
                best = Some(candidate);
            } else {
                remaining.push(candidate);
            }
        }
        queue = remaining;

        if base == 0.0 {
            weight += 1.0;
        } else {
            weight *= base;
        }
    }
    Ok(())
}
