//! Reporting events emitted while optimizing a net.
//!
//! Entry points take the sink explicitly; nothing here is process-global.
//! [`TracingSink`] forwards events to the `tracing` ecosystem, [`RecordingSink`]
//! keeps them for inspection, and [`NullSink`] drops them.

use std::time::Duration;

use crate::ordering::OrderStrategy;
use crate::stats::Statistics;

/// Optimizer stage an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Interference-based sharing over the whole net.
    Interference,
    /// Gradient-only sharing along backward branches.
    ShareGrad,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeEvent {
    Started {
        net: String,
        ops: usize,
        static_blobs: usize,
    },
    /// The gradient sharing pass is experimental and announces itself.
    Experimental { stage: Stage, message: String },
    Ordered {
        ordering: OrderStrategy,
        order: Vec<usize>,
    },
    RangesComputed { blobs: usize },
    SharableBlobs { count: usize },
    Assigned { slots: usize, shared_slots: usize },
    Remapped { remapped: usize, shared: usize },
    NestedRewrite { op_type: String, arg: String },
    Finished {
        stage: Stage,
        elapsed: Duration,
        statistics: Option<Statistics>,
    },
}

pub trait OptimizeSink {
    fn emit(&mut self, event: OptimizeEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OptimizeSink for NullSink {
    fn emit(&mut self, _event: OptimizeEvent) {}
}

#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<OptimizeEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find<F>(&self, predicate: F) -> Option<&OptimizeEvent>
    where
        F: Fn(&OptimizeEvent) -> bool,
    {
        self.events.iter().find(|event| predicate(event))
    }
}

impl OptimizeSink for RecordingSink {
    fn emit(&mut self, event: OptimizeEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OptimizeSink for TracingSink {
    fn emit(&mut self, event: OptimizeEvent) {
        match event {
            OptimizeEvent::Started {
                net,
                ops,
                static_blobs,
            } => tracing::info!(net = %net, ops, static_blobs, "optimizing blob memory"),
            OptimizeEvent::Experimental { stage, message } => {
                tracing::warn!(stage = ?stage, "{message}")
            }
            OptimizeEvent::Ordered { ordering, order } => {
                tracing::debug!(ordering = ?ordering, len = order.len(), "linearized ops")
            }
            OptimizeEvent::RangesComputed { blobs } => {
                tracing::debug!(blobs, "computed live ranges")
            }
            OptimizeEvent::SharableBlobs { count } => {
                tracing::info!(count, "total sharable blobs")
            }
            OptimizeEvent::Assigned {
                slots,
                shared_slots,
            } => tracing::debug!(slots, shared_slots, "assigned blobs to slots"),
            OptimizeEvent::Remapped { remapped, shared } => {
                tracing::info!(remapped, shared, "remapping blobs")
            }
            OptimizeEvent::NestedRewrite { op_type, arg } => {
                tracing::debug!(op_type = %op_type, arg = %arg, "rewriting nested net")
            }
            OptimizeEvent::Finished {
                stage,
                elapsed,
                statistics,
            } => match statistics {
                Some(stats) => tracing::info!(
                    stage = ?stage,
                    elapsed_ms = elapsed.as_secs_f64() * 1e3,
                    baseline_nbytes = stats.baseline_nbytes,
                    optimized_nbytes = stats.optimized_nbytes,
                    "blob memory optimization finished"
                ),
                None => tracing::info!(
                    stage = ?stage,
                    elapsed_ms = elapsed.as_secs_f64() * 1e3,
                    "blob memory optimization finished"
                ),
            },
        }
    }
}
