use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use crate::allocator::{compute_assignments, count_sharable, verify_assignments, Assignment};
use crate::env;
use crate::error::{OptimizeError, OptimizeResult};
use crate::graph::DependencyGraph;
use crate::net::{Net, Operation};
use crate::ordering::{linearize, OrderStrategy};
use crate::ranges::compute_ranges;
use crate::rewrite::{apply_assignments, compute_blob_assignments, BlobAssignments, CanonicalNaming};
use crate::stats::{compute_statistics, BlobSizer, Statistics};
use crate::trace::{OptimizeEvent, OptimizeSink, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeOptions {
    pub ordering: OrderStrategy,
    /// Scope for synthetic slot names; `None` names each slot after its last member.
    pub namescope: Option<String>,
    /// Re-check the no-overlap rule on the computed slots before rewriting.
    pub verify: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            ordering: OrderStrategy::LongestPath,
            namescope: None,
            verify: true,
        }
    }
}

impl OptimizeOptions {
    /// Defaults overridden by `GRADMEM_ORDERING`, `GRADMEM_NAMESCOPE` and
    /// `GRADMEM_VERIFY`. The environment is read on every call.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ordering: env::ordering().unwrap_or(defaults.ordering),
            namescope: env::namescope().or(defaults.namescope),
            verify: env::verify().unwrap_or(defaults.verify),
        }
    }

    pub fn naming(&self) -> CanonicalNaming {
        match &self.namescope {
            Some(namescope) => CanonicalNaming::Scoped(namescope.clone()),
            None => CanonicalNaming::LastMember,
        }
    }
}

/// Everything produced by one optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimization {
    /// Ops in linearized order with blob names canonicalized.
    pub net: Net,
    pub assignments: Vec<Assignment>,
    pub blob_assignments: BlobAssignments,
    pub statistics: Statistics,
    /// Linearized op order, as indices into the input net.
    pub order: Vec<usize>,
}

/// Shares storage between blobs whose live ranges never overlap.
///
/// The returned net holds the ops in the order used for range analysis; a
/// different schedule could overwrite a blob before its last reader runs.
/// Static blobs keep their own slot and name. When `blob_sizes` is given it
/// must cover every blob the ops reference.
pub fn optimize_interference(
    net: &Net,
    static_blobs: &HashSet<String>,
    blob_sizes: Option<&dyn BlobSizer>,
    options: &OptimizeOptions,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<Optimization> {
    let started = Instant::now();
    sink.emit(OptimizeEvent::Started {
        net: net.name.clone(),
        ops: net.ops.len(),
        static_blobs: static_blobs.len(),
    });

    let graph = DependencyGraph::build(&net.ops)?;
    let order = linearize(&graph, options.ordering)?;
    sink.emit(OptimizeEvent::Ordered {
        ordering: options.ordering,
        order: order.clone(),
    });
    let linearized = reorder_ops(&net.ops, &order)?;

    let ranges = compute_ranges(&linearized, blob_sizes)?;
    sink.emit(OptimizeEvent::RangesComputed {
        blobs: ranges.len(),
    });
    sink.emit(OptimizeEvent::SharableBlobs {
        count: count_sharable(&ranges, static_blobs),
    });

    let assignments = compute_assignments(&ranges, static_blobs);
    if options.verify {
        verify_assignments(&assignments)?;
    }
    sink.emit(OptimizeEvent::Assigned {
        slots: assignments.len(),
        shared_slots: assignments.iter().filter(|slot| slot.len() > 1).count(),
    });

    let blob_assignments = compute_blob_assignments(&assignments, &options.naming());
    let representatives: BTreeSet<&String> = blob_assignments.values().collect();
    sink.emit(OptimizeEvent::Remapped {
        remapped: blob_assignments.len(),
        shared: representatives.len(),
    });

    let reordered = Net {
        ops: linearized,
        ..net.clone()
    };
    let rewritten = apply_assignments(&reordered, &blob_assignments, sink)?;
    let statistics = compute_statistics(&assignments);
    sink.emit(OptimizeEvent::Finished {
        stage: Stage::Interference,
        elapsed: started.elapsed(),
        statistics: Some(statistics),
    });

    Ok(Optimization {
        net: rewritten,
        assignments,
        blob_assignments,
        statistics,
        order,
    })
}

/// Returns `ops` permuted by `order`, which must name every op exactly once.
pub fn reorder_ops(ops: &[Operation], order: &[usize]) -> OptimizeResult<Vec<Operation>> {
    if order.len() != ops.len() {
        return Err(OptimizeError::ShapeMismatch {
            what: "op order",
            expected: ops.len(),
            actual: order.len(),
        });
    }
    let mut placed = vec![false; ops.len()];
    let mut reordered = Vec::with_capacity(ops.len());
    for &index in order {
        match placed.get_mut(index) {
            Some(seen) if !*seen => *seen = true,
            _ => {
                return Err(OptimizeError::ShapeMismatch {
                    what: "distinct op indices",
                    expected: ops.len(),
                    actual: placed.iter().filter(|seen| **seen).count(),
                })
            }
        }
        reordered.push(ops[index].clone());
    }
    Ok(reordered)
}
