#![allow(missing_docs)]

use penumbra::rex::simplify::PredicateList;
use penumbra::{Expr, Op, ParamSet, Simplifier, SqlType, Value};
use proptest::prelude::*;

// $0: nullable INTEGER, $1: non-null INTEGER, $2: nullable BOOLEAN.

fn nullable_int() -> Expr {
    Expr::field(0, SqlType::Integer, true)
}

fn strict_int() -> Expr {
    Expr::field(1, SqlType::Integer, false)
}

fn flag() -> Expr {
    Expr::field(2, SqlType::Boolean, true)
}

fn int_operand() -> impl Strategy<Value = Expr> {
    prop_oneof![
        Just(nullable_int()),
        Just(strict_int()),
        (-3i64..=3).prop_map(Expr::lit),
        Just(Expr::Literal(Value::Null)),
    ]
}

fn comparison() -> impl Strategy<Value = Expr> {
    let ops = prop_oneof![
        Just(Op::Eq),
        Just(Op::Ne),
        Just(Op::Lt),
        Just(Op::Le),
        Just(Op::Gt),
        Just(Op::Ge),
    ];
    (ops, int_operand(), int_operand()).prop_map(|(op, l, r)| Expr::binary(op, l, r))
}

fn leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        4 => comparison(),
        1 => Just(flag()),
        1 => any::<bool>().prop_map(Expr::lit),
        1 => Just(Expr::Literal(Value::Null)),
        1 => Just(Expr::is_null(nullable_int())),
        1 => Just(Expr::is_not_null(flag())),
    ]
}

fn condition() -> impl Strategy<Value = Expr> {
    leaf().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..=3).prop_map(Expr::and),
            prop::collection::vec(inner.clone(), 2..=3).prop_map(Expr::or),
            inner.clone().prop_map(Expr::not),
            inner.prop_map(Expr::is_null),
        ]
    })
}

fn row() -> impl Strategy<Value = Vec<Value>> {
    (
        prop::option::of(-3i64..=3),
        -3i64..=3,
        prop::option::of(any::<bool>()),
    )
        .prop_map(|(a, b, c)| {
            vec![
                a.map(Value::Int).unwrap_or(Value::Null),
                Value::Int(b),
                c.map(Value::Bool).unwrap_or(Value::Null),
            ]
        })
}

fn eval(expr: &Expr, row: &[Value]) -> Value {
    expr.eval(row, &ParamSet::new()).unwrap()
}

fn holds(expr: &Expr, row: &[Value]) -> bool {
    expr.eval_predicate(row, &ParamSet::new()).unwrap()
}

proptest! {
    #[test]
    fn simplify_preserves_value(expr in condition(), row in row()) {
        let simplified = Simplifier::default().simplify(&expr);
        prop_assert_eq!(eval(&simplified, &row), eval(&expr, &row), "{} => {}", expr, simplified);
    }

    #[test]
    fn condition_simplification_preserves_truth(expr in condition(), row in row()) {
        let simplified = Simplifier::default().simplify_condition(&expr);
        prop_assert_eq!(holds(&simplified, &row), holds(&expr, &row), "{} => {}", expr, simplified);
    }

    #[test]
    fn simplify_is_idempotent(expr in condition()) {
        let simplifier = Simplifier::default();
        let once = simplifier.simplify(&expr);
        let twice = simplifier.simplify(&once);
        prop_assert_eq!(&twice, &once);
        let once = simplifier.simplify_condition(&expr);
        prop_assert_eq!(simplifier.simplify_condition(&once), once);
    }

    #[test]
    fn known_range_is_sound_on_rows_that_satisfy_it(
        expr in condition(),
        row in row(),
        lower in -2i64..=2,
    ) {
        let known = Expr::binary(Op::Gt, strict_int(), Expr::lit(lower));
        prop_assume!(holds(&known, &row));
        let simplifier = Simplifier::new(PredicateList::new([known]));
        let simplified = simplifier.simplify_condition(&expr);
        prop_assert_eq!(holds(&simplified, &row), holds(&expr, &row), "{} => {}", expr, simplified);
    }
}

#[test]
fn contradiction_with_known_range_is_false() {
    let known = Expr::binary(Op::Lt, strict_int(), Expr::lit(3i64));
    let simplifier = Simplifier::new(PredicateList::new([known]));
    let above = Expr::binary(Op::Gt, strict_int(), Expr::lit(5i64));
    assert!(simplifier.simplify_condition(&above).is_false_lit());
    let below = Expr::binary(Op::Lt, strict_int(), Expr::lit(10i64));
    assert!(simplifier.simplify_condition(&below).is_true_lit());
}
