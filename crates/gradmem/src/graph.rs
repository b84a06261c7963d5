use std::collections::{BTreeMap, BTreeSet, HashMap};

use smallvec::SmallVec;

use crate::error::{OptimizeError, OptimizeResult};
use crate::net::Operation;

type Adjacency = SmallVec<[usize; 4]>;

/// Producer/consumer dependency graph over op indices.
///
/// Edge `i -> j` exists when some output of op `i` is an input of op `j`, and
/// is labelled with those blob names. The graph is acyclic by construction.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    succs: Vec<Adjacency>,
    preds: Vec<Adjacency>,
    edges: BTreeMap<(usize, usize), BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn with_nodes(count: usize) -> Self {
        Self {
            succs: vec![Adjacency::new(); count],
            preds: vec![Adjacency::new(); count],
            edges: BTreeMap::new(),
        }
    }

    /// Builds the graph for an op sequence, failing on the first edge that
    /// would close a cycle.
    pub fn build(ops: &[Operation]) -> OptimizeResult<Self> {
        let mut consumers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, op) in ops.iter().enumerate() {
            for input in &op.inputs {
                let entry = consumers.entry(input.as_str()).or_default();
                if entry.last() != Some(&index) {
                    entry.push(index);
                }
            }
        }

        let mut labels: BTreeMap<(usize, usize), BTreeSet<String>> = BTreeMap::new();
        for (from, op) in ops.iter().enumerate() {
            for output in &op.outputs {
                let Some(readers) = consumers.get(output.as_str()) else {
                    continue;
                };
                for &to in readers {
                    if to == from {
                        continue;
                    }
                    labels.entry((from, to)).or_default().insert(output.clone());
                }
            }
        }

        let mut graph = Self::with_nodes(ops.len());
        for ((from, to), blobs) in labels {
            graph.add_edge(from, to, blobs)?;
        }
        Ok(graph)
    }

    /// Inserts an edge, merging labels when it already exists.
    pub fn add_edge(
        &mut self,
        from: usize,
        to: usize,
        blobs: BTreeSet<String>,
    ) -> OptimizeResult<()> {
        if let Some(existing) = self.edges.get_mut(&(from, to)) {
            existing.extend(blobs);
            return Ok(());
        }
        if from == to || self.reaches(to, from) {
            return Err(OptimizeError::StructuralViolation { from, to, blobs });
        }
        insert_sorted(&mut self.succs[from], to);
        insert_sorted(&mut self.preds[to], from);
        self.edges.insert((from, to), blobs);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.succs.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        &self.succs[node]
    }

    pub fn predecessors(&self, node: usize) -> &[usize] {
        &self.preds[node]
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.edges.contains_key(&(from, to))
    }

    /// Blob names carried by the edge, if it exists.
    pub fn edge_blobs(&self, from: usize, to: usize) -> Option<&BTreeSet<String>> {
        self.edges.get(&(from, to))
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &BTreeSet<String>)> + '_ {
        self.edges
            .iter()
            .map(|((from, to), blobs)| (*from, *to, blobs))
    }

    /// Nodes without predecessors.
    pub fn sources(&self) -> Vec<usize> {
        (0..self.node_count())
            .filter(|node| self.preds[*node].is_empty())
            .collect()
    }

    /// Nodes without successors.
    pub fn sinks(&self) -> Vec<usize> {
        (0..self.node_count())
            .filter(|node| self.succs[*node].is_empty())
            .collect()
    }

    /// Returns `true` when `order` is a permutation of all nodes respecting
    /// every edge.
    pub fn is_topological_order(&self, order: &[usize]) -> bool {
        if order.len() != self.node_count() {
            return false;
        }
        let mut position = vec![usize::MAX; self.node_count()];
        for (pos, &node) in order.iter().enumerate() {
            if node >= position.len() || position[node] != usize::MAX {
                return false;
            }
            position[node] = pos;
        }
        self.edges
            .keys()
            .all(|(from, to)| position[*from] < position[*to])
    }

    fn reaches(&self, start: usize, target: usize) -> bool {
        let mut visited = vec![false; self.node_count()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if std::mem::replace(&mut visited[node], true) {
                continue;
            }
            stack.extend(self.succs[node].iter().copied().filter(|n| !visited[*n]));
        }
        false
    }
}

fn insert_sorted(list: &mut Adjacency, node: usize) {
    if let Err(pos) = list.binary_search(&node) {
        list.insert(pos, node);
    }
}
