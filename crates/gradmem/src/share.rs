//! Gradient-only blob sharing.
//!
//! Gradient ops are walked depth-first from the loss blobs. A gradient blob is
//! freed once every gradient op reading it has run, and the next gradient
//! output produced further down the same branch takes it over. Sibling
//! branches start with an empty free set so parallel workers never alias.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use crate::error::OptimizeResult;
use crate::net::{Net, Operation};
use crate::rewrite::{apply_assignments, normalize_namescope, shared_blob_name, BlobAssignments};
use crate::trace::{OptimizeEvent, OptimizeSink, Stage};

/// Rewritten net plus the mapping applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareGradResult {
    pub net: Net,
    pub mapping: BlobAssignments,
}

struct GradFilter<'a> {
    namescope: String,
    underscored: String,
    param_grads: &'a HashSet<String>,
}

impl GradFilter<'_> {
    /// Gradient blobs live under the namescope, or under `_{namescope}` for
    /// auto-split gradients; parameter gradients are excluded.
    fn is_grad_blob(&self, blob: &str) -> bool {
        blob.contains("_grad")
            && (blob.starts_with(&self.namescope) || blob.starts_with(&self.underscored))
            && !self.param_grads.contains(blob)
    }

    fn is_grad_op(&self, op: &Operation) -> bool {
        op.inputs
            .iter()
            .chain(op.outputs.iter())
            .any(|blob| self.is_grad_blob(blob))
    }
}

struct Frame {
    op: usize,
    free: usize,
    output: usize,
    reader: usize,
    first_branch: bool,
}

struct Walk<'a> {
    filter: &'a GradFilter<'a>,
    grad_ops: Vec<&'a Operation>,
    blobs_to_ops: HashMap<&'a str, Vec<usize>>,
    op_inputs: Vec<usize>,
    op_visits: Vec<usize>,
    blob_input_count: HashMap<&'a str, usize>,
    output_blobs: HashSet<&'a str>,
    free_sets: Vec<BTreeSet<String>>,
    mapping: HashMap<String, String>,
}

impl<'a> Walk<'a> {
    fn new<S: AsRef<str>>(net: &'a Net, losses: &[S], filter: &'a GradFilter<'a>) -> Self {
        let grad_ops: Vec<&Operation> = net.ops.iter().filter(|op| filter.is_grad_op(op)).collect();
        let is_loss = |blob: &str| losses.iter().any(|loss| loss.as_ref() == blob);

        let mut blobs_to_ops: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut op_inputs = vec![0usize; grad_ops.len()];
        for (index, &op) in grad_ops.iter().enumerate() {
            for input in &op.inputs {
                if !(filter.is_grad_blob(input) || is_loss(input.as_str())) {
                    continue;
                }
                // In-place ops do not start a new dependency.
                if op.outputs.contains(input) {
                    continue;
                }
                blobs_to_ops.entry(input.as_str()).or_default().push(index);
                op_inputs[index] += 1;
            }
        }

        Self {
            filter,
            op_visits: vec![0; grad_ops.len()],
            grad_ops,
            blobs_to_ops,
            op_inputs,
            blob_input_count: HashMap::new(),
            output_blobs: HashSet::new(),
            free_sets: Vec::new(),
            mapping: HashMap::new(),
        }
    }

    fn readers(&self, blob: &str) -> &[usize] {
        self.blobs_to_ops.get(blob).map(Vec::as_slice).unwrap_or(&[])
    }

    fn fresh_free_set(&mut self) -> usize {
        self.free_sets.push(BTreeSet::new());
        self.free_sets.len() - 1
    }

    /// Releases fully consumed inputs and hands free blobs to new outputs.
    fn enter(&mut self, op_index: usize, free: usize) -> Frame {
        let op = self.grad_ops[op_index];
        let mut newly_free = Vec::new();
        for input in &op.inputs {
            if !self.filter.is_grad_blob(input) {
                continue;
            }
            let readers = self.readers(input).len();
            let count = self.blob_input_count.entry(input.as_str()).or_insert(0);
            *count += 1;
            if *count == readers {
                let actual = self.mapping.get(input).unwrap_or(input).clone();
                newly_free.push(actual);
            }
        }

        for output in &op.outputs {
            if !self.filter.is_grad_blob(output) {
                continue;
            }
            if !self.output_blobs.contains(output.as_str()) {
                if let Some(taken) = self.free_sets[free].pop_first() {
                    self.mapping.insert(output.clone(), taken);
                }
            }
            self.output_blobs.insert(output.as_str());
        }

        self.free_sets[free].extend(newly_free);
        Frame {
            op: op_index,
            free,
            output: 0,
            reader: 0,
            first_branch: true,
        }
    }

    /// Next reader whose gradient inputs are now all satisfied.
    fn next_child(&mut self, frame: &mut Frame) -> Option<(usize, usize)> {
        let op = self.grad_ops[frame.op];
        while frame.output < op.outputs.len() {
            let readers = self.readers(&op.outputs[frame.output]).to_vec();
            while frame.reader < readers.len() {
                let reader = readers[frame.reader];
                frame.reader += 1;
                self.op_visits[reader] += 1;
                if self.op_visits[reader] == self.op_inputs[reader] {
                    let free = if frame.first_branch {
                        frame.free
                    } else {
                        self.fresh_free_set()
                    };
                    frame.first_branch = false;
                    return Some((reader, free));
                }
            }
            frame.output += 1;
            frame.reader = 0;
        }
        None
    }

    fn descend(&mut self, start: usize) {
        let free = self.fresh_free_set();
        let mut stack = vec![self.enter(start, free)];
        while let Some(mut frame) = stack.pop() {
            if let Some((child, free)) = self.next_child(&mut frame) {
                stack.push(frame);
                let child_frame = self.enter(child, free);
                stack.push(child_frame);
            }
        }
    }
}

/// Shares gradient blobs between ops on the same backward branch.
///
/// Every shared blob, donor included, is renamed to `{namescope}__m{j}_`. The
/// returned net keeps the original op order; only blob names change.
pub fn share_grad_blobs<S: AsRef<str>>(
    net: &Net,
    losses: &[S],
    param_grads: &HashSet<String>,
    namescope: &str,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<ShareGradResult> {
    let started = Instant::now();
    sink.emit(OptimizeEvent::Experimental {
        stage: Stage::ShareGrad,
        message: "executing experimental gradient memory sharing".to_string(),
    });

    let namescope = if namescope.ends_with('/') {
        namescope.to_string()
    } else {
        format!("{namescope}/")
    };
    let filter = GradFilter {
        underscored: format!("_{namescope}"),
        namescope: namescope.clone(),
        param_grads,
    };

    let mut walk = Walk::new(net, losses, &filter);
    for loss in losses {
        let starts = walk.readers(loss.as_ref()).to_vec();
        for start in starts {
            walk.descend(start);
        }
    }

    let shared: BTreeSet<&String> = walk.mapping.values().collect();
    let renamed: BTreeMap<String, String> = shared
        .into_iter()
        .enumerate()
        .map(|(index, blob)| (blob.clone(), shared_blob_name(&namescope, index)))
        .collect();

    let mut mapping: BlobAssignments = walk
        .mapping
        .iter()
        .map(|(blob, donor)| (blob.clone(), renamed[donor].clone()))
        .collect();
    mapping.extend(renamed.iter().map(|(blob, name)| (blob.clone(), name.clone())));

    sink.emit(OptimizeEvent::Remapped {
        remapped: mapping.len(),
        shared: renamed.len(),
    });
    let net = apply_assignments(net, &mapping, sink)?;
    sink.emit(OptimizeEvent::Finished {
        stage: Stage::ShareGrad,
        elapsed: started.elapsed(),
        statistics: None,
    });
    Ok(ShareGradResult { net, mapping })
}

/// Runs [`share_grad_blobs`] once per device under the `gpu_{id}/` namescope.
pub fn optimize_gradient_memory<S: AsRef<str>>(
    net: &Net,
    losses_by_device: &BTreeMap<usize, Vec<S>>,
    param_grads: &HashSet<String>,
    sink: &mut dyn OptimizeSink,
) -> OptimizeResult<Net> {
    let mut current = net.clone();
    for (device, losses) in losses_by_device {
        let namescope = device_namescope(*device);
        current = share_grad_blobs(&current, losses, param_grads, &namescope, sink)?.net;
    }
    Ok(current)
}

pub fn device_namescope(device: usize) -> String {
    normalize_namescope(&format!("gpu_{device}"))
}
