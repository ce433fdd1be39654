pub mod analytics;
pub mod error;
pub mod model;
pub mod storage;

pub use crate::analytics::bfs::{BfsControl, BfsEntry};
pub use crate::analytics::power::PowerIterationOptions;
pub use crate::analytics::stability::{edge_stability_pareto, node_stability_pareto};
pub use crate::error::{GraphError, Result};
pub use crate::model::{
    Entry1, Entry2, FLAG_DIRECTED, FLAG_LOAD_NEXT, FLAG_LOAD_PREV, FLAG_NONZERO, FLAG_POSITIVE,
    FLAG_READONLY, FLAG_STREAMING,
};
pub use crate::storage::graph::Graph;
pub use crate::storage::vector::Vector;
