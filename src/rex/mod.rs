#![forbid(unsafe_code)]

//! Scalar and boolean expressions over an input row.
//!
//! Expressions are immutable trees. Field references are positional
//! (`$0`, `$1`, ...) and carry the referenced field's type and nullability so
//! the simplifier can reason about them without the row type at hand.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{RowType, SqlType};
use crate::value::Value;

pub mod eval;
pub mod program;
pub mod simplify;

pub use program::{ExprProgram, Normalized};
pub use simplify::{PredicateList, Simplifier};

/// Scalar operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// N-ary conjunction.
    And,
    /// N-ary disjunction.
    Or,
    /// Negation.
    Not,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
    /// `IS TRUE`
    IsTrue,
    /// `IS FALSE`
    IsFalse,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Times,
    /// `/`
    Divide,
    /// `MOD`
    Mod,
    /// Unary minus.
    Negate,
    /// String concatenation `||`.
    Concat,
    /// `UPPER`
    Upper,
    /// `LOWER`
    Lower,
    /// `CHAR_LENGTH`
    CharLength,
    /// `SUBSTRING(s FROM start [FOR len])`, 1-based.
    Substring,
    /// `CAST(x AS type)`; the target type is the call's type.
    Cast,
    /// `CASE WHEN c1 THEN v1 ... [ELSE e] END`, operands flattened as
    /// `[c1, v1, c2, v2, ..., e]`.
    Case,
    /// `COALESCE`
    Coalesce,
    /// Array element access, 1-based.
    Item,
    /// Array constructor.
    ArrayValue,
    /// Multi-valued expansion of an array; only valid as a top-level
    /// projection.
    Unwind,
}

impl Op {
    /// Display name used in digests and explain output.
    pub fn name(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Not => "NOT",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
            Op::IsTrue => "IS TRUE",
            Op::IsFalse => "IS FALSE",
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Times => "*",
            Op::Divide => "/",
            Op::Mod => "MOD",
            Op::Negate => "-",
            Op::Concat => "||",
            Op::Upper => "UPPER",
            Op::Lower => "LOWER",
            Op::CharLength => "CHAR_LENGTH",
            Op::Substring => "SUBSTRING",
            Op::Cast => "CAST",
            Op::Case => "CASE",
            Op::Coalesce => "COALESCE",
            Op::Item => "ITEM",
            Op::ArrayValue => "ARRAY",
            Op::Unwind => "UNWIND",
        }
    }

    /// Whether the operator is a binary comparison.
    pub fn is_comparison(self) -> bool {
        matches!(self, Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }

    /// Comparison that holds exactly when `self` is false (for non-null
    /// operands).
    pub fn negate(self) -> Option<Op> {
        Some(match self {
            Op::Eq => Op::Ne,
            Op::Ne => Op::Eq,
            Op::Lt => Op::Ge,
            Op::Le => Op::Gt,
            Op::Gt => Op::Le,
            Op::Ge => Op::Lt,
            Op::IsNull => Op::IsNotNull,
            Op::IsNotNull => Op::IsNull,
            _ => return None,
        })
    }

    /// Comparison with swapped operands (`a < b` becomes `b > a`).
    pub fn reverse(self) -> Option<Op> {
        Some(match self {
            Op::Eq => Op::Eq,
            Op::Ne => Op::Ne,
            Op::Lt => Op::Gt,
            Op::Le => Op::Ge,
            Op::Gt => Op::Lt,
            Op::Ge => Op::Le,
            _ => return None,
        })
    }

    /// Whether the call returns null exactly when one of its operands is null.
    pub fn is_strict(self) -> bool {
        !matches!(
            self,
            Op::And
                | Op::Or
                | Op::IsNull
                | Op::IsNotNull
                | Op::IsTrue
                | Op::IsFalse
                | Op::Case
                | Op::Coalesce
                | Op::Item
                | Op::ArrayValue
                | Op::Unwind
        )
    }
}

/// Expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Reference to an input field.
    InputRef {
        /// Field position in the input row.
        index: usize,
        /// Type of the referenced field.
        ty: SqlType,
        /// Whether the referenced field is nullable.
        nullable: bool,
    },
    /// Constant.
    Literal(Value),
    /// Dynamic parameter bound per execution.
    Param {
        /// Parameter ordinal.
        index: usize,
        /// Declared type.
        ty: SqlType,
    },
    /// Operator application.
    Call {
        /// Operator.
        op: Op,
        /// Operands in order.
        operands: Vec<Expr>,
        /// Result type.
        ty: SqlType,
    },
}

impl Expr {
    /// Reference to field `index` of `input`; fails when out of range.
    pub fn input(input: &RowType, index: usize) -> Result<Expr> {
        let field = input.field(index).ok_or_else(|| {
            Error::contract(format!(
                "field reference ${index} out of range for row type {input}"
            ))
        })?;
        Ok(Expr::InputRef {
            index,
            ty: field.ty.clone(),
            nullable: field.nullable,
        })
    }

    /// Unchecked field reference; validated when placed in a program.
    pub fn field(index: usize, ty: SqlType, nullable: bool) -> Expr {
        Expr::InputRef {
            index,
            ty,
            nullable,
        }
    }

    /// Literal constant.
    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    /// `TRUE` literal.
    pub fn true_lit() -> Expr {
        Expr::Literal(Value::Bool(true))
    }

    /// `FALSE` literal.
    pub fn false_lit() -> Expr {
        Expr::Literal(Value::Bool(false))
    }

    /// Dynamic parameter.
    pub fn param(index: usize, ty: SqlType) -> Expr {
        Expr::Param { index, ty }
    }

    /// Operator call with derived result type.
    pub fn call(op: Op, operands: Vec<Expr>) -> Expr {
        let ty = derive_type(op, &operands);
        Expr::Call { op, operands, ty }
    }

    /// `CAST(expr AS ty)`.
    pub fn cast(expr: Expr, ty: SqlType) -> Expr {
        Expr::Call {
            op: Op::Cast,
            operands: vec![expr],
            ty,
        }
    }

    /// Binary comparison or arithmetic helper.
    pub fn binary(op: Op, left: Expr, right: Expr) -> Expr {
        Expr::call(op, vec![left, right])
    }

    /// Conjunction of `exprs`; `TRUE` when empty, the sole element when single.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut exprs: Vec<Expr> = exprs.into_iter().collect();
        match exprs.len() {
            0 => Expr::true_lit(),
            1 => exprs.remove(0),
            _ => Expr::call(Op::And, exprs),
        }
    }

    /// Disjunction of `exprs`; `FALSE` when empty.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut exprs: Vec<Expr> = exprs.into_iter().collect();
        match exprs.len() {
            0 => Expr::false_lit(),
            1 => exprs.remove(0),
            _ => Expr::call(Op::Or, exprs),
        }
    }

    /// `NOT expr`.
    pub fn not(expr: Expr) -> Expr {
        Expr::call(Op::Not, vec![expr])
    }

    /// `expr IS NULL`.
    pub fn is_null(expr: Expr) -> Expr {
        Expr::call(Op::IsNull, vec![expr])
    }

    /// `expr IS NOT NULL`.
    pub fn is_not_null(expr: Expr) -> Expr {
        Expr::call(Op::IsNotNull, vec![expr])
    }

    /// Multi-valued expansion of an array-valued expression.
    pub fn unwind(expr: Expr) -> Expr {
        Expr::call(Op::Unwind, vec![expr])
    }

    /// Result type.
    pub fn ty(&self) -> SqlType {
        match self {
            Expr::InputRef { ty, .. } | Expr::Param { ty, .. } | Expr::Call { ty, .. } => {
                ty.clone()
            }
            Expr::Literal(value) => value.sql_type(),
        }
    }

    /// Whether the expression may evaluate to null.
    pub fn nullable(&self) -> bool {
        match self {
            Expr::InputRef { nullable, .. } => *nullable,
            Expr::Literal(value) => value.is_null(),
            Expr::Param { .. } => true,
            Expr::Call { op, operands, .. } => match op {
                Op::IsNull | Op::IsNotNull | Op::IsTrue | Op::IsFalse => false,
                Op::Coalesce => operands.iter().all(Expr::nullable),
                Op::Case => {
                    let has_else = operands.len() % 2 == 1;
                    !has_else
                        || operands
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| i % 2 == 1 || *i == operands.len() - 1)
                            .any(|(_, e)| e.nullable())
                }
                Op::Item | Op::Unwind => true,
                Op::ArrayValue => false,
                _ => operands.iter().any(Expr::nullable),
            },
        }
    }

    /// Whether this is the literal `TRUE`.
    pub fn is_true_lit(&self) -> bool {
        matches!(self, Expr::Literal(Value::Bool(true)))
    }

    /// Whether this is the literal `FALSE`.
    pub fn is_false_lit(&self) -> bool {
        matches!(self, Expr::Literal(Value::Bool(false)))
    }

    /// Whether this is the literal `NULL`.
    pub fn is_null_lit(&self) -> bool {
        matches!(self, Expr::Literal(Value::Null))
    }

    /// Operator of a call, if this is one.
    pub fn op(&self) -> Option<Op> {
        match self {
            Expr::Call { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Operands of a call; empty for leaves.
    pub fn operands(&self) -> &[Expr] {
        match self {
            Expr::Call { operands, .. } => operands,
            _ => &[],
        }
    }

    /// Top-level conjuncts (`a AND (b AND c)` yields `[a, b, c]`).
    pub fn conjuncts(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        collect_conjuncts(self, &mut out);
        out
    }

    /// Whether any sub-expression is an unwind.
    pub fn contains_unwind(&self) -> bool {
        match self {
            Expr::Call { op, operands, .. } => {
                *op == Op::Unwind || operands.iter().any(Expr::contains_unwind)
            }
            _ => false,
        }
    }

    /// Calls `f` for every field reference index.
    pub fn visit_input_refs(&self, f: &mut impl FnMut(usize)) {
        match self {
            Expr::InputRef { index, .. } => f(*index),
            Expr::Call { operands, .. } => {
                for operand in operands {
                    operand.visit_input_refs(f);
                }
            }
            _ => {}
        }
    }

    /// Set of referenced input fields.
    pub fn input_refs(&self) -> BTreeSet<usize> {
        let mut refs = BTreeSet::new();
        self.visit_input_refs(&mut |i| {
            refs.insert(i);
        });
        refs
    }

    /// Adds every dynamic parameter ordinal to `out`.
    pub fn collect_params(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::Param { index, .. } => {
                out.insert(*index);
            }
            Expr::Call { operands, .. } => {
                for operand in operands {
                    operand.collect_params(out);
                }
            }
            _ => {}
        }
    }

    /// Rewrites field references through `mapping`; `None` when a referenced
    /// field has no image.
    pub fn remap(&self, mapping: &impl Fn(usize) -> Option<usize>) -> Option<Expr> {
        Some(match self {
            Expr::InputRef {
                index,
                ty,
                nullable,
            } => Expr::InputRef {
                index: mapping(*index)?,
                ty: ty.clone(),
                nullable: *nullable,
            },
            Expr::Call { op, operands, ty } => Expr::Call {
                op: *op,
                operands: operands
                    .iter()
                    .map(|operand| operand.remap(mapping))
                    .collect::<Option<Vec<_>>>()?,
                ty: ty.clone(),
            },
            other => other.clone(),
        })
    }

    /// Shifts every field reference by `offset`.
    pub fn shift(&self, offset: usize) -> Expr {
        self.remap(&|i| Some(i + offset))
            .unwrap_or_else(|| self.clone())
    }

    /// Replaces each field reference `$i` with `exprs[i]`; `None` when a
    /// reference is out of range.
    pub fn substitute(&self, exprs: &[Expr]) -> Option<Expr> {
        Some(match self {
            Expr::InputRef { index, .. } => exprs.get(*index)?.clone(),
            Expr::Call { op, operands, ty } => Expr::Call {
                op: *op,
                operands: operands
                    .iter()
                    .map(|operand| operand.substitute(exprs))
                    .collect::<Option<Vec<_>>>()?,
                ty: ty.clone(),
            },
            other => other.clone(),
        })
    }

    /// Checks every field reference against an input of `arity` fields.
    pub fn validate(&self, arity: usize) -> Result<()> {
        let mut bad = None;
        self.visit_input_refs(&mut |i| {
            if i >= arity && bad.is_none() {
                bad = Some(i);
            }
        });
        match bad {
            Some(i) => Err(Error::contract(format!(
                "field reference ${i} out of range for input of arity {arity}"
            ))),
            None => Ok(()),
        }
    }
}

fn collect_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Call {
            op: Op::And,
            operands,
            ..
        } => {
            for operand in operands {
                collect_conjuncts(operand, out);
            }
        }
        Expr::Literal(Value::Bool(true)) => {}
        other => out.push(other),
    }
}

fn derive_type(op: Op, operands: &[Expr]) -> SqlType {
    let first = || operands.first().map(Expr::ty).unwrap_or(SqlType::Any);
    match op {
        Op::Eq
        | Op::Ne
        | Op::Lt
        | Op::Le
        | Op::Gt
        | Op::Ge
        | Op::And
        | Op::Or
        | Op::Not
        | Op::IsNull
        | Op::IsNotNull
        | Op::IsTrue
        | Op::IsFalse => SqlType::Boolean,
        Op::Plus | Op::Minus | Op::Times | Op::Divide | Op::Mod => operands
            .iter()
            .map(Expr::ty)
            .reduce(|a, b| a.numeric_join(&b))
            .unwrap_or(SqlType::Any),
        Op::Negate => first(),
        Op::Concat | Op::Upper | Op::Lower | Op::Substring => SqlType::Varchar(None),
        Op::CharLength => SqlType::Integer,
        Op::Cast => first(),
        Op::Case => operands
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 1 || *i == operands.len() - 1)
            .map(|(_, e)| e.ty())
            .find(|ty| *ty != SqlType::Null)
            .unwrap_or(SqlType::Null),
        Op::Coalesce => operands
            .iter()
            .map(Expr::ty)
            .find(|ty| *ty != SqlType::Null)
            .unwrap_or(SqlType::Null),
        Op::Item | Op::Unwind => match first() {
            SqlType::Array(inner) => *inner,
            _ => SqlType::Any,
        },
        Op::ArrayValue => SqlType::Array(Box::new(
            operands
                .iter()
                .map(Expr::ty)
                .find(|ty| *ty != SqlType::Null)
                .unwrap_or(SqlType::Any),
        )),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::InputRef { index, .. } => write!(f, "${index}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Param { index, .. } => write!(f, "?{index}"),
            Expr::Call {
                op: Op::Cast,
                operands,
                ty,
            } => match operands.first() {
                Some(operand) => write!(f, "CAST({operand}):{ty}"),
                None => write!(f, "CAST():{ty}"),
            },
            Expr::Call { op, operands, .. } => {
                write!(f, "{}(", op.name())?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    fn row() -> RowType {
        RowType::new(vec![
            Field::not_null("a", SqlType::Integer),
            Field::new("b", SqlType::Varchar(None)),
        ])
    }

    #[test]
    fn input_ref_out_of_range_is_contract_violation() {
        let err = Expr::input(&row(), 2).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn conjuncts_flatten_nested_and() {
        let a = Expr::input(&row(), 0).unwrap();
        let expr = Expr::and([
            Expr::binary(Op::Gt, a.clone(), Expr::lit(1)),
            Expr::and([Expr::is_not_null(a.clone()), Expr::true_lit()]),
        ]);
        assert_eq!(expr.conjuncts().len(), 2);
    }

    #[test]
    fn nullability_follows_operands() {
        let a = Expr::input(&row(), 0).unwrap();
        let b = Expr::input(&row(), 1).unwrap();
        assert!(!Expr::binary(Op::Plus, a.clone(), Expr::lit(1)).nullable());
        assert!(Expr::binary(Op::Concat, b.clone(), Expr::lit("x")).nullable());
        assert!(!Expr::is_null(b).nullable());
    }

    #[test]
    fn display_uses_prefix_form() {
        let a = Expr::input(&row(), 0).unwrap();
        let expr = Expr::binary(Op::Ge, a, Expr::param(0, SqlType::Integer));
        assert_eq!(expr.to_string(), ">=($0, ?0)");
    }

    #[test]
    fn remap_drops_unmapped_refs() {
        let a = Expr::input(&row(), 0).unwrap();
        let b = Expr::input(&row(), 1).unwrap();
        let expr = Expr::binary(Op::Eq, a, Expr::lit(3));
        assert_eq!(expr.remap(&|i| (i == 0).then_some(4)).unwrap().to_string(), "=($4, 3)");
        assert!(Expr::is_null(b).remap(&|i| (i == 0).then_some(0)).is_none());
    }
}
