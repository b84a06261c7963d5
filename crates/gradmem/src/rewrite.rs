use std::collections::BTreeMap;

use crate::allocator::Assignment;
use crate::error::{OptimizeError, OptimizeResult};
use crate::net::{ArgValue, Argument, Net, Operation, RENAME_SUFFIX};
use crate::trace::{OptimizeEvent, OptimizeSink};

/// Blob name to canonical slot name.
pub type BlobAssignments = BTreeMap<String, String>;

/// How the representative name of a shared slot is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CanonicalNaming {
    /// The slot's last member names the slot.
    #[default]
    LastMember,
    /// Synthetic `{namescope}__m{j}_` names, `j` counting shared slots.
    Scoped(String),
}

/// Appends the scope separator unless the scope is empty or already ends in one.
pub fn normalize_namescope(namescope: &str) -> String {
    if namescope.is_empty() || namescope.ends_with('/') {
        namescope.to_string()
    } else {
        format!("{namescope}/")
    }
}

pub fn shared_blob_name(namescope: &str, index: usize) -> String {
    format!("{namescope}__m{index}_")
}

/// Builds the canonical mapping for every blob in a shared slot.
///
/// Singleton slots, static blobs included, are left unmapped.
pub fn compute_blob_assignments(
    assignments: &[Assignment],
    naming: &CanonicalNaming,
) -> BlobAssignments {
    let scope = match naming {
        CanonicalNaming::Scoped(namescope) => Some(normalize_namescope(namescope)),
        CanonicalNaming::LastMember => None,
    };
    let mut mapping = BlobAssignments::new();
    let shared = assignments.iter().filter(|slot| slot.len() > 1);
    for (index, slot) in shared.enumerate() {
        let representative = match (&scope, slot.last()) {
            (Some(namescope), _) => shared_blob_name(namescope, index),
            (None, Some((last, _))) => last.clone(),
            (None, None) => continue,
        };
        for (blob, _) in slot {
            mapping.insert(blob.clone(), representative.clone());
        }
    }
    mapping
}

pub fn canonical_name<'a>(mapping: &'a BlobAssignments, blob: &'a str) -> &'a str {
    mapping.get(blob).map(String::as_str).unwrap_or(blob)
}

/// Returns a copy of `net` with every blob reference renamed through `mapping`.
///
/// Step nets of recurrent ops are rewritten as well, and each rename touching a
/// recurrent op is recorded on it as a `{blob}.rename` argument. On error the
/// input net is untouched and no partial result escapes.
pub fn apply_assignments(
    net: &Net,
    mapping: &BlobAssignments,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<Net> {
    let mut rewritten = net.clone();
    rewrite_ops(&mut rewritten.ops, mapping, sink)?;
    Ok(rewritten)
}

fn rewrite_ops(
    ops: &mut [Operation],
    mapping: &BlobAssignments,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<()> {
    for op in ops.iter_mut() {
        if op.is_recurrent() {
            rewrite_recurrent(op, mapping, sink)?;
        }
        rename_all(&mut op.inputs, mapping);
        rename_all(&mut op.outputs, mapping);
    }
    Ok(())
}

fn rewrite_recurrent(
    op: &mut Operation,
    mapping: &BlobAssignments,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<()> {
    for arg in op.args.iter_mut().filter(|arg| arg.is_step_net()) {
        match &mut arg.value {
            ArgValue::Net(step) => rewrite_step_net(step, mapping, sink)?,
            ArgValue::Str(encoded) => {
                let unsupported = || OptimizeError::UnsupportedNesting {
                    op_type: op.op_type.clone(),
                    arg: arg.name.clone(),
                };
                let mut step = Net::from_json_str(encoded).map_err(|_| unsupported())?;
                rewrite_step_net(&mut step, mapping, sink)?;
                *encoded = step.to_json_string().map_err(|_| unsupported())?;
            }
            _ => {
                return Err(OptimizeError::UnsupportedNesting {
                    op_type: op.op_type.clone(),
                    arg: arg.name.clone(),
                })
            }
        }
        sink.emit(OptimizeEvent::NestedRewrite {
            op_type: op.op_type.clone(),
            arg: arg.name.clone(),
        });
    }

    for (blob, renamed) in mapping {
        if blob == renamed || !op.references(blob) {
            continue;
        }
        let name = format!("{blob}{RENAME_SUFFIX}");
        if op.args.iter().any(|arg| arg.name == name) {
            continue;
        }
        op.args
            .push(Argument::new(name, ArgValue::Str(renamed.clone())));
    }
    Ok(())
}

fn rewrite_step_net(
    step: &mut Net,
    mapping: &BlobAssignments,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<()> {
    rewrite_ops(&mut step.ops, mapping, sink)?;
    rename_all(&mut step.external_inputs, mapping);
    rename_all(&mut step.external_outputs, mapping);
    Ok(())
}

fn rename_all(blobs: &mut [String], mapping: &BlobAssignments) {
    for blob in blobs.iter_mut() {
        if let Some(renamed) = mapping.get(blob.as_str()) {
            if renamed != blob {
                *blob = renamed.clone();
            }
        }
    }
}
