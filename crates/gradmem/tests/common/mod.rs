#![allow(dead_code)]

use std::collections::HashMap;

use gradmem::{Net, Operation};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Acyclic net with uniquely produced blobs, ops shuffled out of schedule order.
pub fn random_net(rng: &mut StdRng, op_count: usize) -> Net {
    let mut produced: Vec<String> = Vec::new();
    let mut ops = Vec::with_capacity(op_count);
    for index in 0..op_count {
        let mut inputs: Vec<String> = Vec::new();
        if !produced.is_empty() {
            let reads = rng.gen_range(0..=produced.len().min(3));
            for _ in 0..reads {
                let blob = produced[rng.gen_range(0..produced.len())].clone();
                if !inputs.contains(&blob) {
                    inputs.push(blob);
                }
            }
        }
        if rng.gen_bool(0.2) {
            inputs.push(format!("ext{index}"));
        }
        let outputs: Vec<String> = (0..rng.gen_range(1..=2))
            .map(|slot| format!("blob{index}_{slot}"))
            .collect();
        produced.extend(outputs.iter().cloned());
        ops.push(Operation::new(format!("Op{index}"), inputs, outputs));
    }
    ops.shuffle(rng);
    Net::new("random").with_ops(ops)
}

pub fn random_sizes(rng: &mut StdRng, net: &Net) -> HashMap<String, u64> {
    net.blob_names()
        .into_iter()
        .map(|blob| (blob, rng.gen_range(1..=64) * 4))
        .collect()
}

/// `() -> a`, `(a) -> b`, `(b) -> c`.
pub fn chain_net() -> Net {
    let mut builder = gradmem::NetBuilder::new("chain");
    builder
        .op("Fill", &[], &["a"])
        .op("Relu", &["a"], &["b"])
        .op("Relu", &["b"], &["c"])
        .external_output("c");
    builder.finish()
}
