//! Linearization of the dependency graph.
//!
//! [`OrderStrategy::Plain`] is a stable topological sort: ready ops are taken
//! lowest index first, so an op sequence that is already a valid schedule comes
//! back unchanged.
//!
//! [`OrderStrategy::LongestPath`] starts long dependency chains first. Every
//! source's longest path to the (single, possibly virtual) sink is merged into
//! a tree rooted at the sink; sources are visited by ascending subtree height
//! and fed to a depth-first topological sort whose reversed post-order emits
//! the sources with the longest downstream chains first.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;
use std::str::FromStr;

use crate::error::{OptimizeError, OptimizeResult};
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderStrategy {
    Plain,
    #[default]
    LongestPath,
}

impl OrderStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStrategy::Plain => "plain",
            OrderStrategy::LongestPath => "longest_path",
        }
    }
}

impl fmt::Display for OrderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "topological" => Ok(OrderStrategy::Plain),
            "longest_path" | "longest-path" | "longestpath" => Ok(OrderStrategy::LongestPath),
            other => Err(format!("unknown ordering strategy '{other}'")),
        }
    }
}

/// Linearizes `graph` with the given strategy.
///
/// The result is always a permutation of all nodes that respects every edge.
pub fn linearize(graph: &DependencyGraph, strategy: OrderStrategy) -> OptimizeResult<Vec<usize>> {
    let order = match strategy {
        OrderStrategy::Plain => topological_sort(graph)?,
        OrderStrategy::LongestPath => topological_sort_longest_path(graph)?,
    };
    check_len("linearized order", graph.node_count(), order.len())?;
    Ok(order)
}

/// Stable topological order (Kahn's algorithm, lowest ready index first).
pub fn topological_sort(graph: &DependencyGraph) -> OptimizeResult<Vec<usize>> {
    let count = graph.node_count();
    let mut indegree: Vec<usize> = (0..count)
        .map(|node| graph.predecessors(node).len())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|node| indegree[*node] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &succ in graph.successors(node) {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    if order.len() != count {
        return Err(cycle_error(graph, &indegree));
    }
    Ok(order)
}

/// Topological order that schedules long dependency chains first.
pub fn topological_sort_longest_path(graph: &DependencyGraph) -> OptimizeResult<Vec<usize>> {
    if graph.node_count() == 0 {
        return Ok(Vec::new());
    }
    let tree = LongestPathTree::analyze(graph)?;
    check_leaves_match_sources(&graph.sources(), &tree.sorted_leaves)?;

    let order = depth_first_order(graph, &tree.sorted_leaves, &tree.distance)?;
    check_len("longest-path order", graph.node_count(), order.len())?;
    Ok(order)
}

/// Longest paths from every source to the sink, merged into a tree.
#[derive(Debug, Clone)]
pub struct LongestPathTree {
    /// Tree root: the unique sink, or the virtual sink when there were several.
    pub root: usize,
    /// Index of the virtual sink (`node_count()` of the graph) when one was added.
    pub virtual_sink: Option<usize>,
    /// Longest path from each source, ending at `root`.
    pub paths: BTreeMap<usize, Vec<usize>>,
    /// Length of the longest path from each node to `root`, in edges.
    pub distance: Vec<usize>,
    /// Subtree height of every tree node; leaves are 0.
    pub heights: BTreeMap<usize, usize>,
    /// Sources in visiting order: children by ascending height, then index.
    pub sorted_leaves: Vec<usize>,
}

impl LongestPathTree {
    pub fn analyze(graph: &DependencyGraph) -> OptimizeResult<Self> {
        let count = graph.node_count();
        if count == 0 {
            return Ok(Self {
                root: 0,
                virtual_sink: None,
                paths: BTreeMap::new(),
                distance: Vec::new(),
                heights: BTreeMap::new(),
                sorted_leaves: Vec::new(),
            });
        }
        let sinks = graph.sinks();
        let virtual_sink = (sinks.len() > 1).then_some(count);
        let total = count + usize::from(virtual_sink.is_some());
        let root = virtual_sink.unwrap_or(sinks.first().copied().unwrap_or(0));

        let successors = |node: usize| -> Vec<usize> {
            if node == count {
                return Vec::new();
            }
            match virtual_sink {
                Some(sink) if graph.successors(node).is_empty() => vec![sink],
                _ => graph.successors(node).to_vec(),
            }
        };

        let topo = topological_sort(graph)?;
        let mut distance = vec![0usize; total];
        let mut next: Vec<Option<usize>> = vec![None; total];
        for &node in topo.iter().rev() {
            for succ in successors(node) {
                let candidate = distance[succ] + 1;
                let better = match next[node] {
                    None => true,
                    Some(current) => {
                        candidate > distance[node] || (candidate == distance[node] && succ < current)
                    }
                };
                if better {
                    distance[node] = candidate;
                    next[node] = Some(succ);
                }
            }
        }

        let mut paths = BTreeMap::new();
        let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut in_tree = vec![false; total];
        in_tree[root] = true;
        for source in graph.sources() {
            let mut path = vec![source];
            let mut current = source;
            while let Some(step) = next[current] {
                path.push(step);
                current = step;
            }
            for pair in path.windows(2) {
                let (child, parent) = (pair[0], pair[1]);
                if !std::mem::replace(&mut in_tree[child], true) {
                    children.entry(parent).or_default().push(child);
                }
            }
            paths.insert(source, path);
        }

        // Children precede their parent in topological order.
        let mut heights = BTreeMap::new();
        for node in topo.iter().copied().chain(virtual_sink) {
            if !in_tree[node] {
                continue;
            }
            let height = children
                .get(&node)
                .map(|kids| kids.iter().map(|kid| heights[kid] + 1).max().unwrap_or(0))
                .unwrap_or(0);
            heights.insert(node, height);
        }

        for kids in children.values_mut() {
            kids.sort_by_key(|kid| (heights[kid], *kid));
        }
        let mut sorted_leaves = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match children.get(&node) {
                Some(kids) if !kids.is_empty() => stack.extend(kids.iter().rev().copied()),
                _ => sorted_leaves.push(node),
            }
        }

        Ok(Self {
            root,
            virtual_sink,
            paths,
            distance,
            heights,
            sorted_leaves,
        })
    }
}

/// Depth-first topological sort seeded with `starts`, returning the reversed
/// post-order. Successors with a longer path to the sink are pushed first so
/// they finish last and are emitted earlier.
fn depth_first_order(
    graph: &DependencyGraph,
    starts: &[usize],
    distance: &[usize],
) -> OptimizeResult<Vec<usize>> {
    let count = graph.node_count();
    let mut seen = vec![false; count];
    let mut explored = vec![false; count];
    let mut post_order = Vec::with_capacity(count);

    for &start in starts {
        if explored[start] {
            continue;
        }
        let mut fringe = vec![start];
        while let Some(&node) = fringe.last() {
            if explored[node] {
                fringe.pop();
                continue;
            }
            seen[node] = true;
            let mut new_nodes = Vec::new();
            for &succ in graph.successors(node) {
                if explored[succ] {
                    continue;
                }
                if seen[succ] {
                    return Err(OptimizeError::StructuralViolation {
                        from: node,
                        to: succ,
                        blobs: graph.edge_blobs(node, succ).cloned().unwrap_or_default(),
                    });
                }
                new_nodes.push(succ);
            }
            if new_nodes.is_empty() {
                explored[node] = true;
                post_order.push(node);
                fringe.pop();
            } else {
                new_nodes.sort_by_key(|succ| Reverse(distance[*succ]));
                fringe.extend(new_nodes);
            }
        }
    }

    post_order.reverse();
    Ok(post_order)
}

fn cycle_error(graph: &DependencyGraph, indegree: &[usize]) -> OptimizeError {
    let stuck = (0..graph.node_count()).find(|node| indegree[*node] > 0);
    let (from, to) = stuck
        .and_then(|to| {
            graph
                .predecessors(to)
                .iter()
                .find(|from| indegree[**from] > 0)
                .map(|from| (*from, to))
        })
        .unwrap_or((0, 0));
    OptimizeError::StructuralViolation {
        from,
        to,
        blobs: graph.edge_blobs(from, to).cloned().unwrap_or_default(),
    }
}

/// Counts leaves that are also sources against the larger of the two sets, so
/// any difference shows up as `actual < expected`.
fn check_leaves_match_sources(sources: &[usize], leaves: &[usize]) -> OptimizeResult<()> {
    let sources: BTreeSet<usize> = sources.iter().copied().collect();
    let leaves: BTreeSet<usize> = leaves.iter().copied().collect();
    let expected = sources.len().max(leaves.len());
    let actual = sources.intersection(&leaves).count();
    check_len("longest-path tree leaves matching graph sources", expected, actual)
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> OptimizeResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(OptimizeError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_source_mismatch_of_equal_size_reports_distinct_counts() {
        let err = check_leaves_match_sources(&[0, 2], &[0, 3]).expect_err("sets differ");
        assert_eq!(
            err,
            OptimizeError::ShapeMismatch {
                what: "longest-path tree leaves matching graph sources",
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn leaves_in_any_order_match_sources() {
        check_leaves_match_sources(&[0, 2, 5], &[5, 0, 2]).expect("same set");
    }
}
