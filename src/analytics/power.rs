//! Dominant-eigenvector computation by power iteration.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::error::Result;
use crate::storage::graph::Graph;
use crate::storage::vector::Vector;

const DEFAULT_ITERATIONS: u32 = 100;

/// Options for [`Graph::power_iteration`].
///
/// The random pool behind the starting vector is seeded per call, so runs
/// with the same seed on the same graph are reproducible.
#[derive(Debug)]
pub struct PowerIterationOptions<'a> {
    /// Starting values per node; nodes missing here (or carrying 0.0) get a
    /// uniform random draw from `[0, 1)`.
    pub initial_guess: Option<&'a Vector>,
    /// Maximum rounds; 0 selects the default of 100.
    pub num_iterations: u32,
    /// Early-stop threshold on `‖v − t‖₂` between rounds; 0 disables it.
    pub tolerance: f64,
    /// Also compute the eigenvalue `v · (g · v)`.
    pub eigenvalue: bool,
    /// Seed for the per-call random pool.
    pub seed: u64,
}

impl Default for PowerIterationOptions<'_> {
    fn default() -> Self {
        PowerIterationOptions {
            initial_guess: None,
            num_iterations: 0,
            tolerance: 0.0,
            eigenvalue: false,
            seed: 0,
        }
    }
}

impl Graph {
    /// Approximates the dominant eigenvector, and optionally the matching
    /// eigenvalue, of the graph's adjacency operator.
    ///
    /// The result is not guaranteed to converge within the iteration
    /// budget; with a zero norm along the way the weights degrade to NaN,
    /// which callers should treat as failure.
    pub fn power_iteration(
        &self,
        options: &PowerIterationOptions<'_>,
    ) -> Result<(Vector, Option<f64>)> {
        let num_iterations = if options.num_iterations == 0 {
            DEFAULT_ITERATIONS
        } else {
            options.num_iterations
        };
        let mut pool = ChaCha8Rng::seed_from_u64(options.seed);

        // One starting entry per node with at least one incoming stored
        // edge; everything else stays structurally zero throughout.
        let mut vector = Vector::new(0)?;
        for edge in self.directed_edges() {
            if vector.has_entry(edge.target) {
                continue;
            }
            let mut value = options
                .initial_guess
                .map_or(0.0, |guess| guess.get_entry(edge.target));
            if value == 0.0 {
                value = pool.gen::<f32>();
            }
            vector.add_entry(edge.target, value)?;
        }

        let mut rounds = 0u32;
        for _ in 0..num_iterations {
            rounds += 1;
            let mut next = self.mul_vector(&mut vector)?;
            next.mul_const((1.0 / next.norm()) as f32)?;
            let converged =
                options.tolerance > 0.0 && vector.sub_norm(&next) <= options.tolerance;
            vector = next;
            if converged {
                break;
            }
        }
        debug!(rounds, "graph.power_iteration.finished");

        let eigenvalue = if options.eigenvalue {
            let product = self.mul_vector(&mut vector)?;
            Some(vector.dot(&product))
        } else {
            None
        };

        Ok((vector, eigenvalue))
    }
}
