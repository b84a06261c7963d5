mod common;

use std::collections::BTreeSet;

use gradmem::ordering::{topological_sort, topological_sort_longest_path};
use gradmem::{linearize, DependencyGraph, LongestPathTree, NetBuilder, OptimizeError, OrderStrategy};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn blobs(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Shared source 0 feeding a short branch (1) and a long branch (2, 3, 4)
/// that meet again at sink 5.
fn shared_source_net() -> gradmem::Net {
    let mut builder = NetBuilder::new("shared_source");
    builder
        .op("Fill", &[], &["s"])
        .op("Relu", &["s"], &["p1"])
        .op("Relu", &["s"], &["q1"])
        .op("Relu", &["q1"], &["q2"])
        .op("Relu", &["q2"], &["q3"])
        .op("Add", &["p1", "q3"], &["out"]);
    builder.finish()
}

/// Short branch from source 0, long branch from source 2, joined at sink 5.
fn two_source_net() -> gradmem::Net {
    let mut builder = NetBuilder::new("two_sources");
    builder
        .op("Fill", &[], &["p0"])
        .op("Relu", &["p0"], &["p1"])
        .op("Fill", &[], &["q0"])
        .op("Relu", &["q0"], &["q1"])
        .op("Relu", &["q1"], &["q2"])
        .op("Add", &["p1", "q2"], &["out"]);
    builder.finish()
}

#[test]
fn chain_graph_edges_carry_blob_labels() {
    let net = common::chain_net();
    let graph = DependencyGraph::build(&net.ops).expect("chain is acyclic");
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.edge_blobs(0, 1), Some(&blobs(&["a"])));
    assert_eq!(graph.edge_blobs(1, 2), Some(&blobs(&["b"])));
    assert!(!graph.has_edge(0, 2));
    assert_eq!(graph.sources(), vec![0]);
    assert_eq!(graph.sinks(), vec![2]);
}

#[test]
fn edge_labels_merge_every_shared_blob() {
    let mut builder = NetBuilder::new("multi");
    builder
        .op("Split", &[], &["x", "y"])
        .op("Add", &["x", "y"], &["z"]);
    let net = builder.finish();
    let graph = DependencyGraph::build(&net.ops).expect("acyclic");
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.edge_blobs(0, 1), Some(&blobs(&["x", "y"])));
}

#[test]
fn in_place_ops_do_not_form_self_loops() {
    let mut builder = NetBuilder::new("in_place");
    builder
        .op("Fill", &[], &["a"])
        .op("Relu", &["a"], &["a"])
        .op("Relu", &["a"], &["b"]);
    let net = builder.finish();
    let graph = DependencyGraph::build(&net.ops).expect("in-place op is not a cycle");
    assert!(!graph.has_edge(1, 1));
    assert!(graph.has_edge(0, 1));
    assert!(graph.has_edge(1, 2));
}

#[test]
fn cyclic_schedule_is_a_structural_violation() {
    let mut builder = NetBuilder::new("cycle");
    builder.op("Relu", &["b"], &["a"]).op("Relu", &["a"], &["b"]);
    let net = builder.finish();
    let err = DependencyGraph::build(&net.ops).expect_err("cycle must be rejected");
    assert_eq!(
        err,
        OptimizeError::StructuralViolation {
            from: 1,
            to: 0,
            blobs: blobs(&["b"]),
        }
    );
}

#[test]
fn add_edge_rejects_back_edges() {
    let mut graph = DependencyGraph::with_nodes(3);
    graph.add_edge(0, 1, blobs(&["a"])).expect("first edge");
    graph.add_edge(1, 2, blobs(&["b"])).expect("second edge");
    graph
        .add_edge(0, 1, blobs(&["c"]))
        .expect("existing edge merges labels");
    assert_eq!(graph.edge_blobs(0, 1), Some(&blobs(&["a", "c"])));
    assert!(matches!(
        graph.add_edge(2, 0, blobs(&["d"])),
        Err(OptimizeError::StructuralViolation { from: 2, to: 0, .. })
    ));
    assert_eq!(graph.edge_count(), 2);
}

#[test]
fn plain_order_keeps_a_valid_schedule() {
    let net = shared_source_net();
    let graph = DependencyGraph::build(&net.ops).expect("acyclic");
    let order = linearize(&graph, OrderStrategy::Plain).expect("plain order");
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn plain_order_moves_producers_ahead_of_readers() {
    let mut builder = NetBuilder::new("backwards");
    builder.op("Relu", &["x"], &["y"]).op("Fill", &[], &["x"]);
    let net = builder.finish();
    let graph = DependencyGraph::build(&net.ops).expect("acyclic");
    assert_eq!(topological_sort(&graph).expect("sorted"), vec![1, 0]);
}

#[test]
fn longest_path_schedules_long_branch_of_shared_source_first() {
    let net = shared_source_net();
    let graph = DependencyGraph::build(&net.ops).expect("acyclic");
    let order = linearize(&graph, OrderStrategy::LongestPath).expect("longest-path order");
    assert!(graph.is_topological_order(&order));
    assert_eq!(order, vec![0, 2, 3, 4, 1, 5]);
}

#[test]
fn longest_path_starts_source_with_longest_chain_first() {
    let net = two_source_net();
    let graph = DependencyGraph::build(&net.ops).expect("acyclic");

    let tree = LongestPathTree::analyze(&graph).expect("tree");
    assert_eq!(tree.root, 5);
    assert_eq!(tree.virtual_sink, None);
    assert_eq!(tree.paths[&0], vec![0, 1, 5]);
    assert_eq!(tree.paths[&2], vec![2, 3, 4, 5]);
    assert_eq!(tree.distance[0], 2);
    assert_eq!(tree.distance[2], 3);
    assert_eq!(tree.heights[&5], 3);
    assert_eq!(tree.heights[&1], 1);
    assert_eq!(tree.heights[&4], 2);
    assert_eq!(tree.sorted_leaves, vec![0, 2]);

    let order = topological_sort_longest_path(&graph).expect("longest-path order");
    assert_eq!(order, vec![2, 3, 4, 0, 1, 5]);
}

#[test]
fn multiple_sinks_get_a_virtual_root() {
    let mut builder = NetBuilder::new("fan_out");
    builder
        .op("Fill", &[], &["a"])
        .op("Relu", &["a"], &["b"])
        .op("Sigmoid", &["a"], &["c"]);
    let net = builder.finish();
    let graph = DependencyGraph::build(&net.ops).expect("acyclic");

    let tree = LongestPathTree::analyze(&graph).expect("tree");
    assert_eq!(tree.virtual_sink, Some(3));
    assert_eq!(tree.root, 3);
    assert_eq!(tree.paths[&0], vec![0, 1, 3]);
    assert_eq!(tree.sorted_leaves, vec![0]);

    let order = linearize(&graph, OrderStrategy::LongestPath).expect("order");
    assert!(graph.is_topological_order(&order));
    assert_eq!(order[0], 0);
}

#[test]
fn empty_graph_linearizes_to_nothing() {
    let graph = DependencyGraph::with_nodes(0);
    for strategy in [OrderStrategy::Plain, OrderStrategy::LongestPath] {
        assert!(linearize(&graph, strategy).expect("empty order").is_empty());
    }
}

#[test]
fn strategy_names_parse() {
    assert_eq!("plain".parse::<OrderStrategy>(), Ok(OrderStrategy::Plain));
    assert_eq!(
        " Longest-Path ".parse::<OrderStrategy>(),
        Ok(OrderStrategy::LongestPath)
    );
    assert!("breadth_first".parse::<OrderStrategy>().is_err());
    assert_eq!(OrderStrategy::default(), OrderStrategy::LongestPath);
    assert_eq!(OrderStrategy::LongestPath.to_string(), "longest_path");
}

#[test]
fn random_dags_always_get_topological_orders() {
    let mut rng = StdRng::seed_from_u64(7);
    for round in 0..64 {
        let net = common::random_net(&mut rng, 1 + round % 24);
        let graph = DependencyGraph::build(&net.ops).expect("random nets are acyclic");
        for strategy in [OrderStrategy::Plain, OrderStrategy::LongestPath] {
            let order = linearize(&graph, strategy).expect("order");
            assert!(
                graph.is_topological_order(&order),
                "round {round}: {strategy} order {order:?} breaks an edge"
            );
        }
    }
}
