use std::{collections::BTreeSet, fmt, fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Net format version enforced on decode.
pub const NET_FORMAT_VERSION: &str = "gradmem.net.v1";

/// Op type prefix of recurrent control-flow ops that embed step nets.
pub const RECURRENT_OP_PREFIX: &str = "RecurrentNetwork";

/// Suffix of argument names that carry a nested step net.
pub const STEP_NET_SUFFIX: &str = "step_net";

/// Suffix of the annotation recording a blob rename on an enclosing op.
pub const RENAME_SUFFIX: &str = ".rename";

fn default_format_version() -> String {
    NET_FORMAT_VERSION.to_string()
}

/// Distinguishes plain ops from control-flow ops that carry nested nets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Plain,
    Recurrent,
}

impl OpKind {
    /// Classifies an op type string.
    pub fn classify(op_type: &str) -> Self {
        if op_type.starts_with(RECURRENT_OP_PREFIX) {
            OpKind::Recurrent
        } else {
            OpKind::Plain
        }
    }
}

/// Attribute value attached to an operation.
///
/// The optimizer never looks inside these, except for `*step_net` arguments of
/// recurrent ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
    Net(Box<Net>),
}

/// Named attribute of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: ArgValue,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn is_step_net(&self) -> bool {
        self.name.ends_with(STEP_NET_SUFFIX)
    }
}

/// A scheduled unit consuming and producing named blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl Operation {
    pub fn new<I, O, S, T>(op_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            op_type: op_type.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    /// Always derived from `op_type`.
    pub fn kind(&self) -> OpKind {
        OpKind::classify(&self.op_type)
    }

    pub fn is_recurrent(&self) -> bool {
        self.kind() == OpKind::Recurrent
    }

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| &arg.value)
    }

    /// Returns `true` when `blob` appears among the inputs or outputs.
    pub fn references(&self, blob: &str) -> bool {
        self.inputs.iter().any(|b| b == blob) || self.outputs.iter().any(|b| b == blob)
    }
}

/// Ordered operation sequence plus the blobs visible outside of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    #[serde(default = "default_format_version")]
    pub format_version: String,
    pub name: String,
    pub ops: Vec<Operation>,
    #[serde(default)]
    pub external_inputs: Vec<String>,
    #[serde(default)]
    pub external_outputs: Vec<String>,
}

#[derive(Debug, Error)]
pub enum NetSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("net format version '{found}' does not match expected '{expected}'")]
    FormatVersionMismatch {
        found: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum NetIoError {
    #[error(transparent)]
    Serialization(#[from] NetSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Net {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            format_version: NET_FORMAT_VERSION.to_string(),
            name: name.into(),
            ops: Vec::new(),
            external_inputs: Vec::new(),
            external_outputs: Vec::new(),
        }
    }

    pub fn with_ops(mut self, ops: Vec<Operation>) -> Self {
        self.ops = ops;
        self
    }

    pub fn with_external_inputs<I, S>(mut self, blobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_inputs = blobs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_external_outputs<I, S>(mut self, blobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_outputs = blobs.into_iter().map(Into::into).collect();
        self
    }

    /// Distinct blob names referenced by the top-level ops, in first-seen order.
    pub fn blob_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for op in &self.ops {
            for blob in op.inputs.iter().chain(op.outputs.iter()) {
                if seen.insert(blob.as_str()) {
                    names.push(blob.clone());
                }
            }
        }
        names
    }

    pub fn to_json_string(&self) -> Result<String, NetSerdeError> {
        serde_json::to_string_pretty(self).map_err(NetSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, NetSerdeError> {
        let mut net: Net = serde_json::from_str(src).map_err(NetSerdeError::from)?;
        net.normalize_format_version()?;
        Ok(net)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, NetSerdeError> {
        bincode::serialize(self).map_err(NetSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, NetSerdeError> {
        let mut net: Net = bincode::deserialize(bytes).map_err(NetSerdeError::from)?;
        net.normalize_format_version()?;
        Ok(net)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), NetIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(NetIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, NetIoError> {
        let contents = fs::read_to_string(path).map_err(NetIoError::from)?;
        Net::from_json_str(&contents).map_err(NetIoError::from)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), NetIoError> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes).map_err(NetIoError::from)
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, NetIoError> {
        let bytes = fs::read(path).map_err(NetIoError::from)?;
        Net::from_bincode_slice(&bytes).map_err(NetIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }

    fn normalize_format_version(&mut self) -> Result<(), NetSerdeError> {
        if self.format_version.is_empty() {
            self.format_version = NET_FORMAT_VERSION.to_string();
            return Ok(());
        }
        if self.format_version == NET_FORMAT_VERSION {
            Ok(())
        } else {
            Err(NetSerdeError::FormatVersionMismatch {
                found: self.format_version.clone(),
                expected: NET_FORMAT_VERSION,
            })
        }
    }
}

impl fmt::Display for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_net(self, 0, f)
    }
}

fn fmt_net(net: &Net, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_line(f, indent, &format!("net @{} {{", net.name))?;
    if !net.external_inputs.is_empty() {
        write_line(
            f,
            indent + 1,
            &format!("external_inputs: [{}]", net.external_inputs.join(", ")),
        )?;
    }
    if !net.ops.is_empty() {
        write_line(f, indent + 1, "ops:")?;
        for op in &net.ops {
            fmt_op(op, indent + 2, f)?;
        }
    }
    if !net.external_outputs.is_empty() {
        write_line(
            f,
            indent + 1,
            &format!("external_outputs: [{}]", net.external_outputs.join(", ")),
        )?;
    }
    write_line(f, indent, "}")
}

fn fmt_op(op: &Operation, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_line(
        f,
        indent,
        &format!(
            "({}) = {}({})",
            op.outputs.join(", "),
            op.op_type,
            op.inputs.join(", ")
        ),
    )?;
    for arg in &op.args {
        match &arg.value {
            ArgValue::Net(nested) => {
                write_line(f, indent + 1, &format!("{} =", arg.name))?;
                fmt_net(nested, indent + 2, f)?;
            }
            other => write_line(f, indent + 1, &format!("{} = {:?}", arg.name, other))?,
        }
    }
    Ok(())
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}

/// Lightweight builder for constructing nets programmatically.
#[derive(Debug, Default)]
pub struct NetBuilder {
    name: String,
    ops: Vec<Operation>,
    external_inputs: Vec<String>,
    external_outputs: Vec<String>,
}

impl NetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn external_input(&mut self, blob: impl Into<String>) -> &mut Self {
        self.external_inputs.push(blob.into());
        self
    }

    pub fn external_output(&mut self, blob: impl Into<String>) -> &mut Self {
        self.external_outputs.push(blob.into());
        self
    }

    pub fn op(&mut self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> &mut Self {
        self.ops.push(Operation::new(
            op_type,
            inputs.iter().copied(),
            outputs.iter().copied(),
        ));
        self
    }

    pub fn push(&mut self, op: Operation) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn finish(self) -> Net {
        Net {
            format_version: NET_FORMAT_VERSION.to_string(),
            name: self.name,
            ops: self.ops,
            external_inputs: self.external_inputs,
            external_outputs: self.external_outputs,
        }
    }
}
