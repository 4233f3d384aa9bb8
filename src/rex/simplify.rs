//! Algebraic simplification of expressions under three-valued logic.
//!
//! The simplifier rewrites bottom-up until a fixpoint is reached. Every
//! rewrite is sound for rows on which the [`PredicateList`] holds. Two modes
//! exist: plain simplification preserves the exact value (including `NULL`),
//! condition simplification may turn `NULL` into `FALSE` because a filter
//! rejects both.

use tracing::trace;

use super::{Expr, Op};
use crate::profile::{profile_timer, record_profile_timer, CompileProfileKind};
use crate::types::SqlType;
use crate::value::{ParamSet, Value};

/// Default bound on rewrite passes.
pub const DEFAULT_MAX_PASSES: usize = 16;

/// Largest integer magnitude reasoned about through `f64` bounds.
const EXACT_F64_INT: i64 = 1 << 53;

/// Conjunction of predicates known to be `TRUE` on every input row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredicateList {
    conjuncts: Vec<Expr>,
}

impl PredicateList {
    /// Flattens, canonicalizes and deduplicates `predicates`.
    pub fn new(predicates: impl IntoIterator<Item = Expr>) -> Self {
        let mut list = Self::default();
        for predicate in predicates {
            list.push(predicate);
        }
        list
    }

    /// No known predicates.
    pub fn empty() -> Self {
        Self::default()
    }

    fn push(&mut self, predicate: Expr) {
        for conjunct in predicate.conjuncts() {
            if conjunct.is_true_lit() {
                continue;
            }
            let conjunct = canonicalize(conjunct.clone());
            if !self.conjuncts.contains(&conjunct) {
                self.conjuncts.push(conjunct);
            }
        }
    }

    /// Conjuncts in insertion order.
    pub fn conjuncts(&self) -> &[Expr] {
        &self.conjuncts
    }

    /// Whether no predicate is known.
    pub fn is_empty(&self) -> bool {
        self.conjuncts.is_empty()
    }

    /// Number of conjuncts.
    pub fn len(&self) -> usize {
        self.conjuncts.len()
    }

    /// Whether `expr` is one of the conjuncts.
    pub fn contains(&self, expr: &Expr) -> bool {
        self.conjuncts.contains(expr)
    }

    /// Conjunction of both lists.
    pub fn union(&self, other: &PredicateList) -> PredicateList {
        let mut out = self.clone();
        for conjunct in &other.conjuncts {
            out.push(conjunct.clone());
        }
        out
    }

    /// Conjuncts present in both lists.
    pub fn intersect(&self, other: &PredicateList) -> PredicateList {
        PredicateList {
            conjuncts: self
                .conjuncts
                .iter()
                .filter(|conjunct| other.contains(conjunct))
                .cloned()
                .collect(),
        }
    }

    /// Re-indexes the conjuncts; those referencing an unmapped field are
    /// dropped.
    pub fn remap(&self, mapping: &impl Fn(usize) -> Option<usize>) -> PredicateList {
        PredicateList::new(
            self.conjuncts
                .iter()
                .filter_map(|conjunct| conjunct.remap(mapping)),
        )
    }

    /// Whether field `index` is non-null on every row satisfying the list.
    pub fn proves_not_null(&self, index: usize) -> bool {
        let is_ref = |expr: &Expr| matches!(expr, Expr::InputRef { index: i, .. } if *i == index);
        self.conjuncts.iter().any(|conjunct| match conjunct {
            Expr::Call { op, operands, .. } => match op {
                Op::IsNotNull | Op::Not | Op::IsTrue | Op::IsFalse => {
                    operands.first().is_some_and(is_ref)
                }
                op if op.is_comparison() => operands.iter().any(is_ref),
                _ => false,
            },
            other => is_ref(other),
        })
    }

    fn interval(&self, index: usize) -> Option<Interval> {
        let mut bounds: Option<Interval> = None;
        for conjunct in &self.conjuncts {
            if let Some((i, op, c)) = field_vs_number(conjunct) {
                if i != index || op == Op::Ne {
                    continue;
                }
                let next = Interval::for_comparison(op, c);
                bounds = Some(match bounds {
                    Some(current) => current.intersect(&next),
                    None => next,
                });
            }
        }
        bounds
    }
}

/// Expression simplifier parameterized by the predicates known to hold.
#[derive(Clone, Debug)]
pub struct Simplifier {
    predicates: PredicateList,
    max_passes: usize,
}

impl Default for Simplifier {
    fn default() -> Self {
        Self::new(PredicateList::empty())
    }
}

impl Simplifier {
    /// Simplifier that may assume `predicates`.
    pub fn new(predicates: PredicateList) -> Self {
        Self {
            predicates,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    /// Caps the number of rewrite passes.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Predicates this simplifier assumes.
    pub fn predicates(&self) -> &PredicateList {
        &self.predicates
    }

    /// Simplifier that additionally assumes `condition` holds.
    pub fn assuming(&self, condition: &Expr) -> Simplifier {
        Simplifier {
            predicates: self.predicates.union(&PredicateList::new([condition.clone()])),
            max_passes: self.max_passes,
        }
    }

    /// Simplifies a value-producing expression; the result is equal to the
    /// input (including `NULL`) on every row satisfying the predicates.
    pub fn simplify(&self, expr: &Expr) -> Expr {
        self.fixpoint(expr, false)
    }

    /// Simplifies a filter condition; `NULL` and `FALSE` are interchangeable.
    pub fn simplify_condition(&self, expr: &Expr) -> Expr {
        self.fixpoint(expr, true)
    }

    fn fixpoint(&self, expr: &Expr, unknown_as_false: bool) -> Expr {
        let timer = profile_timer();
        let mut current = expr.clone();
        for pass in 0..self.max_passes {
            let next = self.rewrite(&current, unknown_as_false);
            if next == current {
                break;
            }
            trace!(pass, from = %current, to = %next, "simplified expression");
            current = next;
        }
        record_profile_timer(CompileProfileKind::Simplify, timer);
        current
    }

    fn rewrite(&self, expr: &Expr, unknown_as_false: bool) -> Expr {
        let Expr::Call { op, operands, ty } = expr else {
            return self.substitute(expr.clone());
        };
        let len = operands.len();
        let operands = operands
            .iter()
            .enumerate()
            .map(|(i, operand)| {
                let child_uaf = match op {
                    Op::And | Op::Or => unknown_as_false,
                    Op::Case => i % 2 == 0 && i + 1 < len,
                    _ => false,
                };
                self.rewrite(operand, child_uaf)
            })
            .collect();
        let rewritten = self.rewrite_call(*op, operands, ty.clone(), unknown_as_false);
        self.substitute(rewritten)
    }

    fn rewrite_call(&self, op: Op, operands: Vec<Expr>, ty: SqlType, uaf: bool) -> Expr {
        if let Some(folded) = fold_constant(op, &operands, &ty) {
            return folded;
        }
        match op {
            Op::And => simplify_and(operands, uaf),
            Op::Or => simplify_or(operands, uaf),
            Op::Not => match <[Expr; 1]>::try_from(operands) {
                Ok([operand]) => simplify_not(operand, uaf),
                Err(operands) => Expr::Call { op, operands, ty },
            },
            Op::IsNull | Op::IsNotNull => self.simplify_null_test(op, operands, ty),
            Op::IsTrue | Op::IsFalse => match operands.as_slice() {
                [operand] if !operand.nullable() => {
                    if op == Op::IsTrue {
                        operand.clone()
                    } else {
                        simplify_not(operand.clone(), uaf)
                    }
                }
                _ => Expr::Call { op, operands, ty },
            },
            op if op.is_comparison() => simplify_comparison(op, operands, ty),
            Op::Case => simplify_case(operands, ty),
            Op::Coalesce => simplify_coalesce(operands, ty),
            _ => Expr::Call { op, operands, ty },
        }
    }

    fn simplify_null_test(&self, op: Op, operands: Vec<Expr>, ty: SqlType) -> Expr {
        let known_not_null = match operands.as_slice() {
            [operand] => {
                !operand.nullable()
                    || matches!(operand, Expr::InputRef { index, .. } if self.predicates.proves_not_null(*index))
            }
            _ => false,
        };
        if known_not_null {
            Expr::lit(op == Op::IsNotNull)
        } else {
            Expr::Call { op, operands, ty }
        }
    }

    /// Replaces a boolean expression by a literal when the predicates decide it.
    fn substitute(&self, expr: Expr) -> Expr {
        if matches!(expr, Expr::Literal(_)) || expr.ty() != SqlType::Boolean {
            return expr;
        }
        if self.predicates.is_empty() {
            return expr;
        }
        if self.predicates.contains(&expr) {
            return Expr::true_lit();
        }
        if self.predicates.contains(&negation(&expr)) {
            return Expr::false_lit();
        }
        if let Some((index, op, c)) = field_vs_number(&expr) {
            if let Some(decided) = self.decide_range(index, op, c) {
                return Expr::lit(decided);
            }
        }
        expr
    }

    fn decide_range(&self, index: usize, op: Op, c: f64) -> Option<bool> {
        let known = self.predicates.interval(index)?;
        if known.is_empty() {
            return None;
        }
        if op == Op::Ne {
            return if !known.contains(c) {
                Some(true)
            } else if known.is_point(c) {
                Some(false)
            } else {
                None
            };
        }
        let holds = Interval::for_comparison(op, c);
        if known.is_subset_of(&holds) {
            Some(true)
        } else if known.intersect(&holds).is_empty() {
            Some(false)
        } else {
            None
        }
    }
}

fn is_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(_) | Expr::Param { .. })
}

/// Moves constants to the right of comparisons (`5 < $0` becomes `$0 > 5`).
fn canonicalize(expr: Expr) -> Expr {
    match expr {
        Expr::Call { op, operands, ty } if op.is_comparison() => {
            simplify_comparison(op, operands, ty)
        }
        other => other,
    }
}

/// Expression that is `TRUE` exactly when `expr` is `FALSE` (and non-null).
fn negation(expr: &Expr) -> Expr {
    match expr {
        Expr::Call {
            op: Op::Not,
            operands,
            ..
        } if operands.len() == 1 => operands[0].clone(),
        Expr::Call { op, operands, ty } => match op.negate() {
            Some(negated) => Expr::Call {
                op: negated,
                operands: operands.clone(),
                ty: ty.clone(),
            },
            None => Expr::not(expr.clone()),
        },
        other => Expr::not(other.clone()),
    }
}

fn typed_literal(value: Value, ty: &SqlType) -> Expr {
    if value.is_null() && !matches!(ty, SqlType::Null | SqlType::Boolean | SqlType::Any) {
        Expr::cast(Expr::Literal(Value::Null), ty.clone())
    } else {
        Expr::Literal(value)
    }
}

fn fold_constant(op: Op, operands: &[Expr], ty: &SqlType) -> Option<Expr> {
    if matches!(op, Op::Unwind | Op::ArrayValue)
        || operands.is_empty()
        || !operands.iter().all(|operand| matches!(operand, Expr::Literal(_)))
        || (op == Op::Cast && operands[0].is_null_lit())
    {
        return None;
    }
    let call = Expr::Call {
        op,
        operands: operands.to_vec(),
        ty: ty.clone(),
    };
    match call.eval(&[], &ParamSet::new()) {
        Ok(value) => Some(typed_literal(value, ty)),
        Err(err) => {
            trace!(expr = %call, error = %err, "constant folding skipped");
            None
        }
    }
}

fn flatten(op: Op, operands: Vec<Expr>) -> Vec<Expr> {
    let mut out = Vec::with_capacity(operands.len());
    for operand in operands {
        match operand {
            Expr::Call {
                op: inner,
                operands,
                ..
            } if inner == op => out.extend(flatten(op, operands)),
            other => out.push(other),
        }
    }
    out
}

/// Whether `x` and its negation can never both be `TRUE` nor both be `FALSE`,
/// i.e. the pair is decided without treating unknown as false.
fn complement_is_total(x: &Expr) -> bool {
    !x.nullable() || matches!(x.op(), Some(Op::IsNull | Op::IsNotNull))
}

fn simplify_and(operands: Vec<Expr>, uaf: bool) -> Expr {
    let mut terms: Vec<Expr> = Vec::new();
    let mut saw_null = false;
    for term in flatten(Op::And, operands) {
        if term.is_false_lit() {
            return Expr::false_lit();
        }
        if term.is_true_lit() {
            continue;
        }
        if term.is_null_lit() {
            if uaf {
                return Expr::false_lit();
            }
            saw_null = true;
            continue;
        }
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    for term in &terms {
        if (uaf || complement_is_total(term)) && terms.contains(&negation(term)) {
            return Expr::false_lit();
        }
    }
    if saw_null {
        terms.push(Expr::Literal(Value::Null));
    }
    Expr::and(terms)
}

fn simplify_or(operands: Vec<Expr>, uaf: bool) -> Expr {
    let mut terms: Vec<Expr> = Vec::new();
    let mut saw_null = false;
    for term in flatten(Op::Or, operands) {
        if term.is_true_lit() {
            return Expr::true_lit();
        }
        if term.is_false_lit() {
            continue;
        }
        if term.is_null_lit() {
            if !uaf {
                saw_null = true;
            }
            continue;
        }
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    for term in &terms {
        if complement_is_total(term) && terms.contains(&negation(term)) {
            return Expr::true_lit();
        }
    }
    if saw_null {
        terms.push(Expr::Literal(Value::Null));
    }
    if terms.is_empty() {
        return Expr::false_lit();
    }
    Expr::or(terms)
}

fn simplify_not(operand: Expr, uaf: bool) -> Expr {
    match operand {
        Expr::Literal(Value::Bool(b)) => Expr::lit(!b),
        Expr::Literal(Value::Null) => Expr::Literal(Value::Null),
        Expr::Call {
            op: Op::Not,
            mut operands,
            ..
        } if operands.len() == 1 => operands.remove(0),
        Expr::Call {
            op: Op::And,
            operands,
            ..
        } => simplify_or(
            operands
                .into_iter()
                .map(|operand| simplify_not(operand, false))
                .collect(),
            uaf,
        ),
        Expr::Call {
            op: Op::Or,
            operands,
            ..
        } => simplify_and(
            operands
                .into_iter()
                .map(|operand| simplify_not(operand, false))
                .collect(),
            uaf,
        ),
        Expr::Call { op, operands, ty } => match op.negate() {
            Some(negated) => Expr::Call {
                op: negated,
                operands,
                ty,
            },
            None => Expr::not(Expr::Call { op, operands, ty }),
        },
        other => Expr::not(other),
    }
}

fn simplify_comparison(op: Op, operands: Vec<Expr>, ty: SqlType) -> Expr {
    let [left, right] = match <[Expr; 2]>::try_from(operands) {
        Ok(pair) => pair,
        Err(operands) => return Expr::Call { op, operands, ty },
    };
    let (op, left, right) = match op.reverse() {
        Some(reversed) if is_constant(&left) && !is_constant(&right) => (reversed, right, left),
        _ => (op, left, right),
    };
    if left == right && !left.nullable() && !is_constant(&left) {
        return Expr::lit(matches!(op, Op::Eq | Op::Le | Op::Ge));
    }
    Expr::Call {
        op,
        operands: vec![left, right],
        ty,
    }
}

fn simplify_case(operands: Vec<Expr>, ty: SqlType) -> Expr {
    let mut branches: Vec<Expr> = Vec::with_capacity(operands.len());
    let mut otherwise: Option<Expr> = None;
    let mut iter = operands.into_iter();
    loop {
        match (iter.next(), iter.next()) {
            (Some(when), Some(then)) => {
                if when.is_true_lit() {
                    otherwise = Some(then);
                    break;
                }
                if when.is_false_lit() || when.is_null_lit() {
                    continue;
                }
                branches.push(when);
                branches.push(then);
            }
            (Some(last), None) => {
                otherwise = Some(last);
                break;
            }
            _ => break,
        }
    }
    if branches.is_empty() {
        return otherwise.unwrap_or_else(|| typed_literal(Value::Null, &ty));
    }
    branches.extend(otherwise);
    Expr::Call {
        op: Op::Case,
        operands: branches,
        ty,
    }
}

fn simplify_coalesce(operands: Vec<Expr>, ty: SqlType) -> Expr {
    let mut kept: Vec<Expr> = Vec::with_capacity(operands.len());
    for operand in operands {
        if operand.is_null_lit() || kept.contains(&operand) {
            continue;
        }
        let stop = !operand.nullable();
        kept.push(operand);
        if stop {
            break;
        }
    }
    match kept.len() {
        0 => typed_literal(Value::Null, &ty),
        1 => kept.remove(0),
        _ => Expr::Call {
            op: Op::Coalesce,
            operands: kept,
            ty,
        },
    }
}

/// Recognizes `$i op c` with a finite numeric literal `c`.
fn field_vs_number(expr: &Expr) -> Option<(usize, Op, f64)> {
    let Expr::Call { op, operands, .. } = expr else {
        return None;
    };
    if !op.is_comparison() {
        return None;
    }
    match operands.as_slice() {
        [Expr::InputRef { index, .. }, Expr::Literal(value)] => {
            let c = match value {
                Value::Int(i) if i.unsigned_abs() <= EXACT_F64_INT as u64 => *i as f64,
                Value::Float(f) if f.is_finite() => *f,
                _ => return None,
            };
            Some((*index, *op, c))
        }
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bound {
    value: f64,
    inclusive: bool,
}

/// Interval of the real line with open or closed ends.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Interval {
    lo: Bound,
    hi: Bound,
}

impl Interval {
    fn unbounded() -> Self {
        Self {
            lo: Bound {
                value: f64::NEG_INFINITY,
                inclusive: false,
            },
            hi: Bound {
                value: f64::INFINITY,
                inclusive: false,
            },
        }
    }

    fn for_comparison(op: Op, c: f64) -> Self {
        let mut out = Self::unbounded();
        let at = |inclusive| Bound {
            value: c,
            inclusive,
        };
        match op {
            Op::Eq => {
                out.lo = at(true);
                out.hi = at(true);
            }
            Op::Lt => out.hi = at(false),
            Op::Le => out.hi = at(true),
            Op::Gt => out.lo = at(false),
            Op::Ge => out.lo = at(true),
            _ => {}
        }
        out
    }

    fn intersect(&self, other: &Interval) -> Interval {
        let lo = if self.lo.value > other.lo.value {
            self.lo
        } else if other.lo.value > self.lo.value {
            other.lo
        } else {
            Bound {
                value: self.lo.value,
                inclusive: self.lo.inclusive && other.lo.inclusive,
            }
        };
        let hi = if self.hi.value < other.hi.value {
            self.hi
        } else if other.hi.value < self.hi.value {
            other.hi
        } else {
            Bound {
                value: self.hi.value,
                inclusive: self.hi.inclusive && other.hi.inclusive,
            }
        };
        Interval { lo, hi }
    }

    fn is_empty(&self) -> bool {
        self.lo.value > self.hi.value
            || (self.lo.value == self.hi.value && !(self.lo.inclusive && self.hi.inclusive))
    }

    fn contains(&self, c: f64) -> bool {
        (self.lo.value < c || (self.lo.value == c && self.lo.inclusive))
            && (c < self.hi.value || (c == self.hi.value && self.hi.inclusive))
    }

    fn is_point(&self, c: f64) -> bool {
        self.lo.value == c && self.hi.value == c && self.lo.inclusive && self.hi.inclusive
    }

    fn is_subset_of(&self, other: &Interval) -> bool {
        let lo_ok = self.lo.value > other.lo.value
            || (self.lo.value == other.lo.value && (other.lo.inclusive || !self.lo.inclusive));
        let hi_ok = self.hi.value < other.hi.value
            || (self.hi.value == other.hi.value && (other.hi.inclusive || !self.hi.inclusive));
        lo_ok && hi_ok
    }
}
