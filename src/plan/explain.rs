//! Explain trees and deterministic plan digests.

use std::fmt;
use std::hash::Hasher;

use xxhash_rust::xxh64::Xxh64;

use super::{ModifyOp, NodeKind, PlanNode};

/// Explain node representing an operator with its properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Properties describing the operator.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

/// Single property of an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Rendered value.
    pub value: String,
}

impl ExplainNode {
    /// Creates a node without properties.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    fn prop(&mut self, key: &str, value: impl fmt::Display) {
        self.props.push(ExplainProp {
            key: key.to_owned(),
            value: value.to_string(),
        });
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}(", "", self.op, indent = depth * 2)?;
        for (i, prop) in self.props.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", prop.key, prop.value)?;
        }
        f.write_str(")\n")?;
        for input in &self.inputs {
            input.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ExplainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

impl PlanNode {
    /// Explain tree of this node and its inputs.
    pub fn explain(&self) -> ExplainNode {
        let mut explain = ExplainNode::new(self.kind().name());
        match self.kind() {
            NodeKind::Scan { table } => explain.prop("table", table.path.join(".")),
            NodeKind::Values { rows } => {
                let tuples = rows
                    .iter()
                    .map(|row| {
                        let values: Vec<String> = row.iter().map(ToString::to_string).collect();
                        format!("{{ {} }}", values.join(", "))
                    })
                    .collect::<Vec<_>>();
                explain.prop("tuples", format!("[{}]", tuples.join(", ")));
            }
            NodeKind::Calc { program } => explain.prop("program", program),
            NodeKind::Aggregate { group, calls } => {
                explain.prop("group", format!("{group:?}"));
                for (call, field) in calls
                    .iter()
                    .zip(self.row_type().fields().iter().skip(group.len()))
                {
                    explain.prop(&field.name, call);
                }
            }
            NodeKind::Join { kind, condition } => {
                explain.prop("condition", condition);
                explain.prop("joinType", kind.name().to_ascii_lowercase());
            }
            NodeKind::SetOp { all, .. } | NodeKind::ModifyCollect { all } => {
                explain.prop("all", all)
            }
            NodeKind::Sort {
                collation,
                offset,
                fetch,
            } => {
                explain.prop("sort", collation);
                if let Some(offset) = offset {
                    explain.prop("offset", offset);
                }
                if let Some(fetch) = fetch {
                    explain.prop("fetch", fetch);
                }
            }
            NodeKind::Modify { table, op } => {
                explain.prop("table", table.path.join("."));
                explain.prop("operation", op.name());
                if let ModifyOp::Update { columns, sources } = op {
                    let assignments = columns
                        .iter()
                        .zip(sources)
                        .map(|(column, source)| {
                            let name = table
                                .row_type
                                .field(*column)
                                .map(|field| field.name.as_str())
                                .unwrap_or("?");
                            format!("{name}={source}")
                        })
                        .collect::<Vec<_>>();
                    explain.prop("set", format!("[{}]", assignments.join(", ")));
                }
            }
            NodeKind::Converter { from } => explain.prop("from", from),
        }
        explain.prop("convention", self.convention());
        explain.inputs = self.inputs().iter().map(|input| input.explain()).collect();
        explain
    }

    /// Deterministic hash of the tree, stable across runs; used to correlate
    /// log lines for one plan.
    pub fn digest(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hash_node(self, &mut hasher);
        hasher.finish()
    }
}

fn hash_node(node: &PlanNode, hasher: &mut Xxh64) {
    let explain = node.explain();
    hasher.write(explain.op.as_bytes());
    for prop in &explain.props {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write(node.row_type().to_string().as_bytes());
    hasher.write_u64(node.inputs().len() as u64);
    for input in node.inputs() {
        hash_node(input, hasher);
    }
}
