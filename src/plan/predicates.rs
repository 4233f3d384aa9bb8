//! Derivation of predicates that provably hold on a node's output.

use super::{JoinKind, NodeKind, PlanNode, SetOpKind};
use crate::rex::{Expr, PredicateList};

/// Predicates known to be `TRUE` for every row `node` emits, in terms of the
/// node's output fields.
pub fn pulled_up_predicates(node: &PlanNode) -> PredicateList {
    match node.kind() {
        NodeKind::Scan { .. } => PredicateList::new(
            node.row_type()
                .fields()
                .iter()
                .enumerate()
                .filter(|(_, field)| !field.nullable)
                .map(|(index, field)| {
                    Expr::is_not_null(Expr::field(index, field.ty.clone(), false))
                }),
        ),
        NodeKind::Values { .. } | NodeKind::Modify { .. } | NodeKind::ModifyCollect { .. } => {
            PredicateList::empty()
        }
        NodeKind::Calc { program } => {
            let mut below = child_predicates(node, 0);
            if let Some(condition) = program.condition() {
                below = below.union(&PredicateList::new([condition.clone()]));
            }
            let forwarded = program.forwarded_fields();
            below.remap(&|input| forwarded.iter().position(|f| *f == Some(input)))
        }
        NodeKind::Sort { .. } | NodeKind::Converter { .. } => child_predicates(node, 0),
        NodeKind::Aggregate { group, .. } => {
            child_predicates(node, 0).remap(&|input| group.iter().position(|g| *g == input))
        }
        NodeKind::Join { kind, condition } => {
            let left = child_predicates(node, 0);
            let left_len = node
                .inputs()
                .first()
                .map(|input| input.row_type().len())
                .unwrap_or(0);
            let right = child_predicates(node, 1).remap(&|i| Some(i + left_len));
            match kind {
                JoinKind::Inner => left
                    .union(&right)
                    .union(&PredicateList::new([condition.clone()])),
                JoinKind::Left | JoinKind::Semi | JoinKind::Anti => left,
                JoinKind::Right => right,
                JoinKind::Full => PredicateList::empty(),
            }
        }
        NodeKind::SetOp { kind, .. } => {
            let mut inputs = node.inputs().iter().map(|input| pulled_up_predicates(input));
            let Some(first) = inputs.next() else {
                return PredicateList::empty();
            };
            match kind {
                SetOpKind::Minus => first,
                SetOpKind::Union | SetOpKind::Intersect => {
                    inputs.fold(first, |acc, next| acc.intersect(&next))
                }
            }
        }
    }
}

fn child_predicates(node: &PlanNode, index: usize) -> PredicateList {
    node.inputs()
        .get(index)
        .map(|input| pulled_up_predicates(input))
        .unwrap_or_default()
}
