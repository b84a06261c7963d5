use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use gradmem::net::{NetSerdeError, NET_FORMAT_VERSION};
use gradmem::{ArgValue, Argument, Net, NetBuilder, OpKind, Operation};

fn sample_net() -> Net {
    let mut step = NetBuilder::new("step");
    step.external_input("h")
        .op("Tanh", &["h"], &["h_next"])
        .external_output("h_next");
    let rnn = Operation::new("RecurrentNetwork", ["x", "h0"], ["y"])
        .with_arg(Argument::new("step_net", ArgValue::Net(Box::new(step.finish()))))
        .with_arg(Argument::new("alpha", ArgValue::Float(0.5)))
        .with_arg(Argument::new("dims", ArgValue::Ints(vec![2, 3])));

    let mut builder = NetBuilder::new("main");
    builder
        .external_input("x")
        .op("Fill", &[], &["h0"])
        .push(rnn)
        .external_output("y");
    builder.finish()
}

fn temp_path(name: &str) -> std::path::PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("gradmem_{}_{stamp}_{name}", std::process::id()))
}

#[test]
fn recurrent_ops_are_classified_by_type() {
    let net = sample_net();
    assert_eq!(net.ops[0].kind(), OpKind::Plain);
    assert_eq!(net.ops[1].kind(), OpKind::Recurrent);
    assert!(net.ops[1].is_recurrent());
    assert_eq!(net.blob_names(), vec!["h0", "x", "y"]);
}

#[test]
fn json_round_trip_preserves_nested_nets() {
    let net = sample_net();
    let encoded = net.to_json_string().expect("encode");
    let decoded = Net::from_json_str(&encoded).expect("decode");
    assert_eq!(decoded, net);
}

#[test]
fn bincode_round_trip_preserves_nested_nets() {
    let net = sample_net();
    let bytes = net.to_bincode_bytes().expect("encode");
    let decoded = Net::from_bincode_slice(&bytes).expect("decode");
    assert_eq!(decoded, net);
}

#[test]
fn files_round_trip() {
    let net = sample_net();
    let json_path = temp_path("net.json");
    let bin_path = temp_path("net.bin");

    net.save_json(&json_path).expect("save json");
    net.save_bincode(&bin_path).expect("save bincode");
    let from_json = Net::load_json(&json_path).expect("load json");
    let from_bin = Net::load_bincode(&bin_path).expect("load bincode");
    fs::remove_file(&json_path).expect("cleanup json");
    fs::remove_file(&bin_path).expect("cleanup bincode");

    assert_eq!(from_json, net);
    assert_eq!(from_bin, net);
}

#[test]
fn foreign_format_version_is_rejected() {
    let mut net = sample_net();
    net.format_version = "other.v9".to_string();
    let encoded = serde_json::to_string(&net).expect("encode");
    match Net::from_json_str(&encoded) {
        Err(NetSerdeError::FormatVersionMismatch { found, expected }) => {
            assert_eq!(found, "other.v9");
            assert_eq!(expected, NET_FORMAT_VERSION);
        }
        other => panic!("expected a version mismatch, got {other:?}"),
    }
}

#[test]
fn missing_optional_fields_take_defaults() {
    let decoded = Net::from_json_str(
        r#"{"name":"bare","ops":[{"op_type":"Relu","inputs":["a"],"outputs":["b"]}]}"#,
    )
    .expect("decode");
    assert_eq!(decoded.format_version, NET_FORMAT_VERSION);
    assert!(decoded.external_inputs.is_empty());
    assert_eq!(decoded.ops[0].kind(), OpKind::Plain);
    assert!(decoded.ops[0].args.is_empty());
}

#[test]
fn text_dump_indents_nested_nets() {
    let text = sample_net().to_text();
    assert!(text.starts_with("net @main {\n"));
    assert!(text.contains("    (y) = RecurrentNetwork(x, h0)\n"));
    assert!(text.contains("      step_net =\n"));
    assert!(text.contains("        net @step {\n"));
    assert!(text.contains("          external_inputs: [h]\n"));
    assert!(text.ends_with("}\n"));
}
