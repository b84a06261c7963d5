use std::collections::HashMap;

use crate::error::{OptimizeError, OptimizeResult};
use crate::net::Operation;
use crate::stats::BlobSizer;

/// Definition/use interval and size of one blob within a linear schedule.
///
/// `defined` is the earliest producing position and `used` the latest
/// consuming one; `None` means "never" within the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LiveRange {
    pub defined: Option<i64>,
    pub used: Option<i64>,
    pub size: Option<u64>,
}

impl LiveRange {
    pub fn new(defined: Option<i64>, used: Option<i64>, size: Option<u64>) -> Self {
        Self {
            defined,
            used,
            size,
        }
    }

    /// Range with every field known.
    pub fn resolved(defined: i64, used: i64, size: u64) -> Self {
        Self::new(Some(defined), Some(used), Some(size))
    }
}

/// Live ranges keyed by blob name, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobRanges {
    entries: Vec<(String, LiveRange)>,
    index: HashMap<String, usize>,
}

impl BlobRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, blob: &str) -> Option<&LiveRange> {
        self.index.get(blob).map(|idx| &self.entries[*idx].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LiveRange)> + '_ {
        self.entries
            .iter()
            .map(|(name, range)| (name.as_str(), range))
    }

    pub fn into_entries(self) -> Vec<(String, LiveRange)> {
        self.entries
    }

    fn entry(&mut self, blob: &str) -> &mut LiveRange {
        let idx = match self.index.get(blob) {
            Some(idx) => *idx,
            None => {
                let idx = self.entries.len();
                self.entries.push((blob.to_string(), LiveRange::default()));
                self.index.insert(blob.to_string(), idx);
                idx
            }
        };
        &mut self.entries[idx].1
    }
}

impl FromIterator<(String, LiveRange)> for BlobRanges {
    fn from_iter<T: IntoIterator<Item = (String, LiveRange)>>(iter: T) -> Self {
        let mut ranges = BlobRanges::new();
        for (name, range) in iter {
            *ranges.entry(&name) = range;
        }
        ranges
    }
}

/// Computes one live range per blob referenced by the linearized ops.
///
/// When `sizes` is provided, every referenced blob must have an entry.
pub fn compute_ranges<'a, I>(ops: I, sizes: Option<&dyn BlobSizer>) -> OptimizeResult<BlobRanges>
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut ranges = BlobRanges::new();
    for (position, op) in ops.into_iter().enumerate() {
        let position = position as i64;
        for blob in &op.inputs {
            let size = lookup_size(sizes, blob)?;
            let range = ranges.entry(blob);
            range.used = Some(range.used.map_or(position, |used| used.max(position)));
            range.size = size;
        }
        for blob in &op.outputs {
            let size = lookup_size(sizes, blob)?;
            let range = ranges.entry(blob);
            range.defined = Some(range.defined.map_or(position, |defined| defined.min(position)));
            range.size = size;
        }
    }
    Ok(ranges)
}

fn lookup_size(sizes: Option<&dyn BlobSizer>, blob: &str) -> OptimizeResult<Option<u64>> {
    match sizes {
        None => Ok(None),
        Some(sizer) => sizer
            .nbytes(blob)
            .map(Some)
            .ok_or_else(|| OptimizeError::MissingSizeInfo {
                blob: blob.to_string(),
            }),
    }
}

/// Fills unknown fields so every range can take part in allocation.
///
/// Missing `defined` becomes `-1` (live on entry), missing `used` becomes
/// `max_live` (live until the end; defaults to one past the largest known
/// use), and missing `size` becomes `1`.
pub fn get_updated_ranges(
    ranges: Vec<(String, LiveRange)>,
    max_live: Option<i64>,
) -> Vec<(String, LiveRange)> {
    let max_live = max_live.unwrap_or_else(|| {
        ranges
            .iter()
            .filter_map(|(_, range)| range.used)
            .max()
            .map_or(0, |used| used + 1)
    });
    ranges
        .into_iter()
        .map(|(name, range)| {
            let range = LiveRange {
                defined: Some(range.defined.unwrap_or(-1)),
                used: Some(range.used.unwrap_or(max_live)),
                size: Some(range.size.unwrap_or(1)),
            };
            (name, range)
        })
        .collect()
}
