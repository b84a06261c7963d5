use std::collections::HashSet;

use crate::error::{OptimizeError, OptimizeResult};
use crate::ranges::{get_updated_ranges, BlobRanges, LiveRange};
use crate::stats::slot_size;

/// Blobs sharing one physical slot, ordered by definition.
pub type Assignment = Vec<(String, LiveRange)>;

/// Returns `true` when `candidate` may follow the last occupant of `assignment`.
///
/// The candidate must be defined strictly after the occupant's last use, and
/// static blobs never hand their slot on.
pub fn is_compatible(
    candidate: &LiveRange,
    assignment: &Assignment,
    static_blobs: &HashSet<String>,
) -> bool {
    let Some((name, last)) = assignment.last() else {
        return false;
    };
    if static_blobs.contains(name) {
        return false;
    }
    match (candidate.defined, last.defined, last.used) {
        (Some(defined), Some(_), Some(used)) => defined > used,
        _ => false,
    }
}

/// Greedy best-fit slot assignment.
///
/// Ranges are placed in the given order. Among compatible slots the one whose
/// current size is closest to the candidate's wins, first slot on ties; with
/// no compatible slot a new one is opened. Names already present in `init` are
/// skipped.
pub fn compute_assignments_greedy(
    ranges_sorted: &[(String, LiveRange)],
    init: Vec<Assignment>,
    static_blobs: &HashSet<String>,
) -> Vec<Assignment> {
    let mut assignments = init;
    let visited: HashSet<String> = assignments
        .iter()
        .flat_map(|slot| slot.iter().map(|(name, _)| name.clone()))
        .collect();

    for (name, range) in ranges_sorted {
        if visited.contains(name) {
            continue;
        }
        let candidate_size = range.size.unwrap_or(0);
        let mut best: Option<(usize, u64)> = None;
        for (idx, assignment) in assignments.iter().enumerate() {
            if !is_compatible(range, assignment, static_blobs) {
                continue;
            }
            let dist = slot_size(assignment).abs_diff(candidate_size);
            if best.map_or(true, |(_, min_dist)| dist < min_dist) {
                best = Some((idx, dist));
            }
        }
        match best {
            Some((idx, _)) => assignments[idx].push((name.clone(), *range)),
            None => assignments.push(vec![(name.clone(), *range)]),
        }
    }
    assignments
}

/// Partitions blobs into slots.
///
/// Ranges are sorted by last use (never-used blobs last), normalized, and the
/// sharable ones assigned greedily. Every static blob then gets a singleton
/// slot of its own.
pub fn compute_assignments(ranges: &BlobRanges, static_blobs: &HashSet<String>) -> Vec<Assignment> {
    let mut sorted = ranges.clone().into_entries();
    sorted.sort_by_key(|(_, range)| (range.used.is_none(), range.used));
    let sorted = get_updated_ranges(sorted, None);

    let (statics, sharable): (Vec<_>, Vec<_>) = sorted
        .into_iter()
        .partition(|(name, _)| static_blobs.contains(name));

    let mut assignments = compute_assignments_greedy(&sharable, Vec::new(), static_blobs);
    assignments.extend(statics.into_iter().map(|entry| vec![entry]));
    assignments
}

/// Number of blobs that take part in sharing.
pub fn count_sharable(ranges: &BlobRanges, static_blobs: &HashSet<String>) -> usize {
    ranges
        .iter()
        .filter(|(name, _)| !static_blobs.contains(*name))
        .count()
}

/// Checks that no slot holds overlapping ranges.
pub fn verify_assignments(assignments: &[Assignment]) -> OptimizeResult<()> {
    for slot in assignments {
        for pair in slot.windows(2) {
            let (earlier, first) = &pair[0];
            let (later, second) = &pair[1];
            let disjoint = matches!(
                (first.used, second.defined),
                (Some(used), Some(defined)) if used < defined
            );
            if !disjoint {
                return Err(OptimizeError::OverlappingAssignment {
                    earlier: earlier.clone(),
                    later: later.clone(),
                });
            }
        }
    }
    Ok(())
}
