pub mod allocator;
mod env;
pub mod error;
pub mod graph;
pub mod net;
pub mod optimizer;
pub mod ordering;
pub mod ranges;
pub mod rewrite;
pub mod share;
pub mod stats;
pub mod trace;

pub use allocator::{
    compute_assignments, compute_assignments_greedy, is_compatible, verify_assignments, Assignment,
};
pub use error::{OptimizeError, OptimizeResult};
pub use graph::DependencyGraph;
pub use net::{ArgValue, Argument, Net, NetBuilder, OpKind, Operation};
pub use optimizer::{optimize_interference, OptimizeOptions, Optimization};
pub use ordering::{linearize, LongestPathTree, OrderStrategy};
pub use ranges::{compute_ranges, get_updated_ranges, BlobRanges, LiveRange};
pub use rewrite::{apply_assignments, compute_blob_assignments, BlobAssignments, CanonicalNaming};
pub use share::{optimize_gradient_memory, share_grad_blobs, ShareGradResult};
pub use stats::{
    collect_blob_sizes, compute_statistics, compute_statistics_with, get_memory_usage, BlobSizer,
    Statistics,
};
pub use trace::{NullSink, OptimizeEvent, OptimizeSink, RecordingSink, Stage, TracingSink};
