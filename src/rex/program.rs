//! Validated filter-and-project programs.

use std::collections::BTreeSet;
use std::fmt;

use super::{Expr, Op, Simplifier};
use crate::error::{Error, Result};
use crate::types::{Field, RowType, SqlType};
use crate::value::{ParamSet, Row, Value};

/// Input row type, named projections and an optional condition, all in terms
/// of input field references. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprProgram {
    input: RowType,
    projects: Vec<Expr>,
    condition: Option<Expr>,
    output: RowType,
}

/// Outcome of [`ExprProgram::normalize`].
#[derive(Clone, Debug, PartialEq)]
pub enum Normalized {
    /// Simplified program.
    Program(ExprProgram),
    /// The condition can never hold; the program emits no rows.
    Empty,
}

impl ExprProgram {
    /// Builds a program, validating every reference against the input arity,
    /// the condition's type and the unwind rules (at most one, top level of a
    /// projection only).
    pub fn new(
        input: RowType,
        projects: Vec<(Expr, String)>,
        condition: Option<Expr>,
    ) -> Result<Self> {
        let arity = input.len();
        let mut fields = Vec::with_capacity(projects.len());
        let mut exprs = Vec::with_capacity(projects.len());
        let mut unwinds = 0;
        for (expr, name) in projects {
            expr.validate(arity)?;
            if expr.op() == Some(Op::Unwind) {
                unwinds += 1;
                if expr.operands().iter().any(Expr::contains_unwind) {
                    return Err(Error::contract("nested unwind in projection"));
                }
            } else if expr.contains_unwind() {
                return Err(Error::contract(format!(
                    "unwind must be a top-level projection, found inside {expr}"
                )));
            }
            fields.push(Field {
                name,
                ty: expr.ty(),
                nullable: expr.nullable(),
            });
            exprs.push(expr);
        }
        if unwinds > 1 {
            return Err(Error::contract(format!(
                "program has {unwinds} multi-valued projections; at most one is allowed"
            )));
        }
        if let Some(condition) = &condition {
            condition.validate(arity)?;
            if !matches!(
                condition.ty(),
                SqlType::Boolean | SqlType::Null | SqlType::Any
            ) {
                return Err(Error::contract(format!(
                    "condition {condition} has type {}, expected BOOLEAN",
                    condition.ty()
                )));
            }
            if condition.contains_unwind() {
                return Err(Error::contract("unwind is not allowed in a condition"));
            }
        }
        Ok(Self {
            input,
            projects: exprs,
            condition,
            output: RowType::new(fields),
        })
    }

    /// Pass-through program over `input`.
    pub fn identity(input: &RowType) -> Self {
        let projects = input
            .fields()
            .iter()
            .enumerate()
            .map(|(index, field)| Expr::InputRef {
                index,
                ty: field.ty.clone(),
                nullable: field.nullable,
            })
            .collect();
        Self {
            input: input.clone(),
            projects,
            condition: None,
            output: input.clone(),
        }
    }

    /// Identity projection with a condition.
    pub fn filter(input: &RowType, condition: Expr) -> Result<Self> {
        let identity = Self::identity(input);
        let projects = identity
            .projects
            .into_iter()
            .zip(input.names().map(str::to_owned))
            .collect();
        Self::new(input.clone(), projects, Some(condition))
    }

    /// Projection without a condition.
    pub fn project(input: &RowType, projects: Vec<(Expr, String)>) -> Result<Self> {
        Self::new(input.clone(), projects, None)
    }

    /// Input row type.
    pub fn input(&self) -> &RowType {
        &self.input
    }

    /// Output row type.
    pub fn output(&self) -> &RowType {
        &self.output
    }

    /// Projection expressions in output order.
    pub fn projects(&self) -> &[Expr] {
        &self.projects
    }

    /// Condition, if any.
    pub fn condition(&self) -> Option<&Expr> {
        self.condition.as_ref()
    }

    /// Whether every projection is `$i` at position `i` over the whole input.
    pub fn is_identity_projection(&self) -> bool {
        self.projects.len() == self.input.len()
            && self
                .projects
                .iter()
                .enumerate()
                .all(|(i, expr)| matches!(expr, Expr::InputRef { index, .. } if *index == i))
    }

    /// Identity projection and no condition.
    pub fn is_trivial(&self) -> bool {
        self.condition.is_none() && self.is_identity_projection()
    }

    /// Position of the multi-valued projection, if any.
    pub fn unwind_position(&self) -> Option<usize> {
        self.projects
            .iter()
            .position(|expr| expr.op() == Some(Op::Unwind))
    }

    /// For each output position, the input field it forwards unchanged.
    pub fn forwarded_fields(&self) -> Vec<Option<usize>> {
        self.projects
            .iter()
            .map(|expr| match expr {
                Expr::InputRef { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Dynamic parameters referenced anywhere in the program.
    pub fn params(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for expr in self.projects.iter().chain(self.condition.iter()) {
            expr.collect_params(&mut out);
        }
        out
    }

    /// Simplifies the condition and projections given predicates known to
    /// hold on the input. A condition that reduces to `TRUE` is dropped; one
    /// that reduces to `FALSE` or `NULL` yields [`Normalized::Empty`].
    ///
    /// The output row type is kept, so a normalized program stays
    /// interchangeable with the original.
    pub fn normalize(&self, simplifier: &Simplifier) -> Normalized {
        let condition = match &self.condition {
            None => None,
            Some(condition) => {
                let simplified = simplifier.simplify_condition(condition);
                if simplified.is_true_lit() {
                    None
                } else if simplified.is_false_lit() || simplified.is_null_lit() {
                    return Normalized::Empty;
                } else {
                    Some(simplified)
                }
            }
        };
        let project_simplifier = match &condition {
            Some(condition) => simplifier.assuming(condition),
            None => simplifier.clone(),
        };
        let projects = self
            .projects
            .iter()
            .map(|expr| project_simplifier.simplify(expr))
            .collect();
        Normalized::Program(Self {
            input: self.input.clone(),
            projects,
            condition,
            output: self.output.clone(),
        })
    }

    /// Evaluates the condition for `row`; absent conditions accept every row.
    pub fn accepts(&self, row: &[Value], params: &ParamSet) -> Result<bool> {
        match &self.condition {
            Some(condition) => condition.eval_predicate(row, params),
            None => Ok(true),
        }
    }

    /// Evaluates every projection against `row`. An unwind projection yields
    /// the whole array; expansion is the caller's job.
    pub fn project_row(&self, row: &[Value], params: &ParamSet) -> Result<Row> {
        self.projects
            .iter()
            .map(|expr| expr.eval(row, params))
            .collect()
    }
}

impl fmt::Display for ExprProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (expr, name)) in self.projects.iter().zip(self.output.names()).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={expr}")?;
        }
        f.write_str("]")?;
        if let Some(condition) = &self.condition {
            write!(f, " WHERE {condition}")?;
        }
        Ok(())
    }
}
