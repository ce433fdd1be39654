use tvgraph::{
    edge_stability_pareto, node_stability_pareto, Graph, GraphError, Vector, FLAG_DIRECTED,
    FLAG_NONZERO, FLAG_POSITIVE,
};

fn snapshot(edges: &[(u64, u64, f32)]) -> Graph {
    let mut graph = Graph::new(FLAG_DIRECTED).unwrap();
    for &(source, target, weight) in edges {
        graph.set_edge(source, target, weight).unwrap();
    }
    graph
}

#[test]
fn ranks_stable_heavy_edges_first() {
    // Edge (0,1) holds 5 in every snapshot; edge (2,3) fluctuates.
    let g1 = snapshot(&[(0, 1, 5.0), (2, 3, 1.0)]);
    let g2 = snapshot(&[(0, 1, 5.0), (2, 3, 5.0)]);
    let g3 = snapshot(&[(0, 1, 5.0), (2, 3, 1.0)]);

    let result = edge_stability_pareto(&[&g1, &g2, &g3], None, 0.0).unwrap();
    assert_eq!(result.flags() & FLAG_POSITIVE, FLAG_POSITIVE);
    assert_eq!(result.flags() & FLAG_NONZERO, FLAG_NONZERO);
    assert_eq!(result.num_edges(), 2);
    // The stable high-mean edge makes the first front; the volatile one
    // (mean 7/3, variance 32/3) is swept second.
    assert_eq!(result.get_edge(0, 1), 1.0);
    assert_eq!(result.get_edge(2, 3), 2.0);
    result.check_consistency().unwrap();
}

#[test]
fn identical_snapshots_collapse_to_one_front() {
    // Uniform weights: zero variance everywhere and exact value ties, so
    // the first sweep takes every edge at weight one.
    let graph = snapshot(&[(0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0)]);
    let copies = [&graph, &graph, &graph];

    let result = edge_stability_pareto(&copies, None, 0.0).unwrap();
    assert_eq!(result.num_edges(), 3);
    for (source, target) in [(0, 1), (1, 2), (2, 0)] {
        assert_eq!(result.get_edge(source, target), 1.0);
    }
}

#[test]
fn distinct_means_rank_in_descending_order() {
    let graph = snapshot(&[(0, 1, 3.0), (1, 2, 2.0), (2, 3, 1.0)]);
    let copies = [&graph, &graph];

    let result = edge_stability_pareto(&copies, None, 0.0).unwrap();
    // All variances are zero but the primary objectives differ, so each
    // sweep takes exactly one edge, heaviest mean first.
    assert_eq!(result.get_edge(0, 1), 1.0);
    assert_eq!(result.get_edge(1, 2), 2.0);
    assert_eq!(result.get_edge(2, 3), 3.0);
}

#[test]
fn multiplicative_base_scales_sweep_weights() {
    let graph = snapshot(&[(0, 1, 3.0), (1, 2, 2.0), (2, 3, 1.0)]);
    let copies = [&graph, &graph];

    let result = edge_stability_pareto(&copies, None, 2.0).unwrap();
    assert_eq!(result.get_edge(0, 1), 1.0);
    assert_eq!(result.get_edge(1, 2), 2.0);
    assert_eq!(result.get_edge(2, 3), 4.0);
}

#[test]
fn override_mean_selects_the_domain() {
    let g1 = snapshot(&[(0, 1, 5.0), (2, 3, 1.0)]);
    let g2 = snapshot(&[(0, 1, 5.0), (2, 3, 5.0)]);
    let g3 = snapshot(&[(0, 1, 5.0), (2, 3, 1.0)]);

    let domain = snapshot(&[(2, 3, 10.0)]);
    let result = edge_stability_pareto(&[&g1, &g2, &g3], Some(&domain), 0.0).unwrap();
    assert_eq!(result.num_edges(), 1);
    assert_eq!(result.get_edge(2, 3), 1.0);
    assert!(!result.has_edge(0, 1));
}

#[test]
fn undirected_inputs_produce_undirected_fronts() {
    let mut g1 = Graph::new(0).unwrap();
    g1.set_edge(0, 1, 2.0).unwrap();
    let mut g2 = Graph::new(0).unwrap();
    g2.set_edge(0, 1, 4.0).unwrap();

    let result = edge_stability_pareto(&[&g1, &g2], None, 0.0).unwrap();
    assert!(!result.is_directed());
    assert_eq!(result.get_edge(0, 1), 1.0);
    assert_eq!(result.get_edge(1, 0), 1.0);
    result.check_consistency().unwrap();
}

#[test]
fn rejects_mixed_directedness_and_empty_input() {
    let directed = Graph::new(FLAG_DIRECTED).unwrap();
    let undirected = Graph::new(0).unwrap();
    assert!(matches!(
        edge_stability_pareto(&[&directed, &undirected], None, 0.0),
        Err(GraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        edge_stability_pareto(&[], None, 0.0),
        Err(GraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        node_stability_pareto(&[], None, 0.0),
        Err(GraphError::InvalidArgument(_))
    ));
}

#[test]
fn node_stability_mirrors_the_edge_metric() {
    let mut v1 = Vector::new(0).unwrap();
    v1.set_entry(0, 5.0).unwrap();
    v1.set_entry(1, 1.0).unwrap();
    let mut v2 = Vector::new(0).unwrap();
    v2.set_entry(0, 5.0).unwrap();
    v2.set_entry(1, 5.0).unwrap();
    let mut v3 = Vector::new(0).unwrap();
    v3.set_entry(0, 5.0).unwrap();
    v3.set_entry(1, 1.0).unwrap();

    let result = node_stability_pareto(&[&v1, &v2, &v3], None, 0.0).unwrap();
    assert_eq!(result.flags() & FLAG_POSITIVE, FLAG_POSITIVE);
    assert_eq!(result.get_entry(0), 1.0);
    assert_eq!(result.get_entry(1), 2.0);
}
