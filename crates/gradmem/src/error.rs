use std::collections::BTreeSet;

use thiserror::Error;

/// Fatal failures of a single optimization attempt.
///
/// None of these are retried. Any error means the caller must keep using the
/// unmodified net.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptimizeError {
    #[error("dependency edge {from} -> {to} over blobs {blobs:?} closes a cycle; the op sequence is not a single-pass schedule")]
    StructuralViolation {
        from: usize,
        to: usize,
        blobs: BTreeSet<String>,
    },
    #[error("blob size map has no entry for blob '{blob}'")]
    MissingSizeInfo { blob: String },
    #[error("{what}: expected {expected} entries, found {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("op '{op_type}' carries nested net argument '{arg}' in an unrecognized format")]
    UnsupportedNesting { op_type: String, arg: String },
    #[error("blob '{later}' reuses a slot while '{earlier}' is still live")]
    OverlappingAssignment { earlier: String, later: String },
}

pub type OptimizeResult<T> = Result<T, OptimizeError>;
