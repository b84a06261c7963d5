use std::collections::{BTreeMap, HashMap};

use crate::allocator::Assignment;
use crate::error::{OptimizeError, OptimizeResult};
use crate::net::Net;

/// Source of blob byte sizes, typically backed by a live workspace.
pub trait BlobSizer {
    fn nbytes(&self, blob: &str) -> Option<u64>;
}

impl BlobSizer for HashMap<String, u64> {
    fn nbytes(&self, blob: &str) -> Option<u64> {
        self.get(blob).copied()
    }
}

impl BlobSizer for BTreeMap<String, u64> {
    fn nbytes(&self, blob: &str) -> Option<u64> {
        self.get(blob).copied()
    }
}

/// Memory footprint before and after blob sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    /// Sum of every blob's own size.
    pub baseline_nbytes: u64,
    /// Sum over slots of the largest member size.
    pub optimized_nbytes: u64,
}

impl Statistics {
    pub fn saved_nbytes(&self) -> u64 {
        self.baseline_nbytes.saturating_sub(self.optimized_nbytes)
    }
}

/// Statistics from the sizes recorded in the assignment ranges.
pub fn compute_statistics(assignments: &[Assignment]) -> Statistics {
    let baseline_nbytes = assignments
        .iter()
        .flat_map(|slot| slot.iter())
        .map(|(_, range)| range.size.unwrap_or(0))
        .sum();
    Statistics {
        baseline_nbytes,
        optimized_nbytes: get_memory_usage(assignments),
    }
}

/// Statistics with sizes looked up through `sizer`.
pub fn compute_statistics_with(
    assignments: &[Assignment],
    sizer: &dyn BlobSizer,
) -> OptimizeResult<Statistics> {
    let mut blob_bytes: HashMap<&str, u64> = HashMap::new();
    for slot in assignments {
        for (blob, _) in slot {
            let bytes = sizer
                .nbytes(blob)
                .ok_or_else(|| OptimizeError::MissingSizeInfo { blob: blob.clone() })?;
            blob_bytes.insert(blob.as_str(), bytes);
        }
    }
    let baseline_nbytes = blob_bytes.values().sum();
    let optimized_nbytes = assignments
        .iter()
        .map(|slot| {
            slot.iter()
                .map(|(blob, _)| blob_bytes[blob.as_str()])
                .max()
                .unwrap_or(0)
        })
        .sum();
    Ok(Statistics {
        baseline_nbytes,
        optimized_nbytes,
    })
}

/// Sum over slots of the largest member size; unknown sizes count as zero.
pub fn get_memory_usage(assignments: &[Assignment]) -> u64 {
    assignments.iter().map(|slot| slot_size(slot)).sum()
}

pub(crate) fn slot_size(slot: &Assignment) -> u64 {
    slot.iter()
        .map(|(_, range)| range.size.unwrap_or(0))
        .max()
        .unwrap_or(0)
}

/// Sizes of every blob the top-level ops read or write.
pub fn collect_blob_sizes(net: &Net, sizer: &dyn BlobSizer) -> OptimizeResult<HashMap<String, u64>> {
    let mut sizes = HashMap::new();
    for blob in net.blob_names() {
        let bytes = sizer
            .nbytes(&blob)
            .ok_or_else(|| OptimizeError::MissingSizeInfo { blob: blob.clone() })?;
        sizes.insert(blob, bytes);
    }
    Ok(sizes)
}
