#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::dialect::sql::to_sql;
use penumbra::dialect::StatementKind;
use penumbra::plan::{AggCall, AggFunc, Collation, FieldCollation, JoinKind, ModifyOp, SetOpKind};
use penumbra::{Error, Expr, Field, Op, PlanNode, RowType, SqlDialect, SqlType, TableDef, Value};

fn emp_type() -> RowType {
    RowType::new(vec![
        Field::not_null("id", SqlType::Integer),
        Field::new("dept", SqlType::Integer),
        Field::new("name", SqlType::Varchar(None)),
    ])
}

fn table(name: &str) -> Arc<TableDef> {
    Arc::new(TableDef::new(name, emp_type()))
}

fn emp() -> Arc<PlanNode> {
    PlanNode::scan(table("emp"))
}

fn text(node: &PlanNode, dialect: &SqlDialect) -> String {
    to_sql(node, dialect).unwrap().text
}

fn sorted(collation: Vec<FieldCollation>) -> Arc<PlanNode> {
    PlanNode::sort(emp(), Collation::new(collation), None, None).unwrap()
}

fn per_dept_counts() -> Arc<PlanNode> {
    PlanNode::aggregate(emp(), vec![1], vec![AggCall::count_star("c")]).unwrap()
}

#[test]
fn nested_aggregate_merges_where_supported() {
    let max_of_counts =
        PlanNode::aggregate(per_dept_counts(), vec![], vec![AggCall::new(AggFunc::Max, 1, "m")])
            .unwrap();
    assert_eq!(
        text(&max_of_counts, &SqlDialect::ansi()),
        "SELECT MAX(COUNT(*)) AS \"m\"\nFROM \"emp\"\nGROUP BY \"dept\""
    );
    assert_eq!(
        text(&max_of_counts, &SqlDialect::postgresql()),
        "SELECT MAX(\"c\") AS \"m\"\nFROM (SELECT \"dept\", COUNT(*) AS \"c\"\nFROM \"emp\"\nGROUP BY \"dept\") AS \"t0\""
    );
}

#[test]
fn counting_groups_keeps_the_inner_aggregate_as_a_subselect() {
    let groups =
        PlanNode::aggregate(per_dept_counts(), vec![], vec![AggCall::count_star("n")]).unwrap();
    assert_eq!(
        text(&groups, &SqlDialect::ansi()),
        "SELECT COUNT(*) AS \"n\"\nFROM (SELECT \"dept\", COUNT(*) AS \"c\"\nFROM \"emp\"\nGROUP BY \"dept\") AS \"t0\""
    );
    assert_eq!(
        text(&groups, &SqlDialect::oracle()),
        "SELECT COUNT(*) \"n\"\nFROM (SELECT \"dept\", COUNT(*) \"c\"\nFROM \"emp\"\nGROUP BY \"dept\") \"t0\""
    );

    let counted =
        PlanNode::aggregate(per_dept_counts(), vec![], vec![AggCall::new(AggFunc::Count, 1, "n")])
            .unwrap();
    assert_eq!(
        text(&counted, &SqlDialect::ansi()),
        "SELECT COUNT(COUNT(*)) AS \"n\"\nFROM \"emp\"\nGROUP BY \"dept\""
    );
}

#[test]
fn group_key_argument_blocks_aggregate_merging() {
    let mixed = PlanNode::aggregate(
        per_dept_counts(),
        vec![],
        vec![AggCall::new(AggFunc::Max, 0, "d"), AggCall::new(AggFunc::Max, 1, "m")],
    )
    .unwrap();
    assert_eq!(
        text(&mixed, &SqlDialect::ansi()),
        "SELECT MAX(\"dept\") AS \"d\", MAX(\"c\") AS \"m\"\nFROM (SELECT \"dept\", COUNT(*) AS \"c\"\nFROM \"emp\"\nGROUP BY \"dept\") AS \"t0\""
    );
}

#[test]
fn null_ordering_uses_syntax_or_emulation() {
    let nulls_first = sorted(vec![FieldCollation::asc(1).nulls_first()]);
    assert_eq!(
        text(&nulls_first, &SqlDialect::postgresql()),
        "SELECT *\nFROM \"emp\"\nORDER BY \"dept\" NULLS FIRST"
    );
    // Nulls already sort first ascending in MySQL.
    assert_eq!(
        text(&nulls_first, &SqlDialect::mysql()),
        "SELECT *\nFROM `emp`\nORDER BY `dept`"
    );

    let nulls_last = sorted(vec![FieldCollation::asc(1).nulls_last()]);
    assert_eq!(
        text(&nulls_last, &SqlDialect::mysql()),
        "SELECT *\nFROM `emp`\nORDER BY `dept` IS NULL, `dept`"
    );
    assert_eq!(
        text(&nulls_last, &SqlDialect::hive(Some("2.1"))),
        "SELECT *\nFROM `emp`\nORDER BY `dept` NULLS LAST"
    );
    assert_eq!(
        text(&nulls_last, &SqlDialect::hive(None)),
        "SELECT *\nFROM `emp`\nORDER BY `dept` IS NULL, `dept`"
    );
}

#[test]
fn mssql_emulates_null_order_with_case() {
    let nulls_last = sorted(vec![FieldCollation::asc(1).nulls_last()]);
    assert_eq!(
        text(&nulls_last, &SqlDialect::mssql()),
        "SELECT *\nFROM [emp]\nORDER BY CASE WHEN [dept] IS NULL THEN 1 ELSE 0 END, [dept]"
    );
    let nulls_first = sorted(vec![FieldCollation::desc(1).nulls_first()]);
    assert_eq!(
        text(&nulls_first, &SqlDialect::mssql()),
        "SELECT *\nFROM [emp]\nORDER BY CASE WHEN [dept] IS NULL THEN 1 ELSE 0 END DESC, [dept] DESC"
    );
}

#[test]
fn unspecified_null_order_emits_nothing() {
    let plain = sorted(vec![FieldCollation::desc(1)]);
    assert_eq!(
        text(&plain, &SqlDialect::mysql()),
        "SELECT *\nFROM `emp`\nORDER BY `dept` DESC"
    );
}

#[test]
fn nested_union_all_flattens() {
    let inner = PlanNode::union(
        true,
        vec![PlanNode::scan(table("a")), PlanNode::scan(table("b"))],
    )
    .unwrap();
    let outer = PlanNode::union(true, vec![inner, PlanNode::scan(table("c"))]).unwrap();
    assert_eq!(
        text(&outer, &SqlDialect::ansi()),
        "SELECT *\nFROM \"a\"\nUNION ALL\nSELECT *\nFROM \"b\"\nUNION ALL\nSELECT *\nFROM \"c\""
    );
}

fn abc() -> Vec<Arc<PlanNode>> {
    ["a", "b", "c"].into_iter().map(|name| PlanNode::scan(table(name))).collect()
}

#[test]
fn three_input_union_renders_one_flat_clause() {
    let union = PlanNode::union(true, abc()).unwrap();
    assert_eq!(
        text(&union, &SqlDialect::ansi()),
        "SELECT *\nFROM \"a\"\nUNION ALL\nSELECT *\nFROM \"b\"\nUNION ALL\nSELECT *\nFROM \"c\""
    );
    let intersect = PlanNode::set_op(SetOpKind::Intersect, false, abc()).unwrap();
    assert_eq!(
        text(&intersect, &SqlDialect::ansi()),
        "SELECT *\nFROM \"a\"\nINTERSECT\nSELECT *\nFROM \"b\"\nINTERSECT\nSELECT *\nFROM \"c\""
    );
}

#[test]
fn minus_stays_left_associative() {
    let flat = PlanNode::set_op(SetOpKind::Minus, false, abc()).unwrap();
    assert_eq!(
        text(&flat, &SqlDialect::oracle()),
        "SELECT *\nFROM \"a\"\nMINUS\nSELECT *\nFROM \"b\"\nMINUS\nSELECT *\nFROM \"c\""
    );

    let (a, b, c) = (
        PlanNode::scan(table("a")),
        PlanNode::scan(table("b")),
        PlanNode::scan(table("c")),
    );
    let left_nested = PlanNode::set_op(
        SetOpKind::Minus,
        false,
        vec![PlanNode::set_op(SetOpKind::Minus, false, vec![a.clone(), b.clone()]).unwrap(), c.clone()],
    )
    .unwrap();
    assert_eq!(text(&left_nested, &SqlDialect::oracle()), text(&flat, &SqlDialect::oracle()));

    let right_nested = PlanNode::set_op(
        SetOpKind::Minus,
        false,
        vec![a, PlanNode::set_op(SetOpKind::Minus, false, vec![b, c]).unwrap()],
    )
    .unwrap();
    assert_eq!(
        text(&right_nested, &SqlDialect::oracle()),
        "SELECT *\nFROM \"a\"\nMINUS\n(SELECT *\nFROM \"b\"\nMINUS\nSELECT *\nFROM \"c\")"
    );
    assert_eq!(
        text(&right_nested, &SqlDialect::sqlite()),
        "SELECT *\nFROM \"a\"\nEXCEPT\nSELECT *\nFROM (SELECT *\nFROM \"b\"\nEXCEPT\nSELECT *\nFROM \"c\")"
    );
}

#[test]
fn sqlite_selects_limited_operands_from_a_derived_table() {
    let top = PlanNode::sort(
        PlanNode::scan(table("a")),
        Collation::new(vec![FieldCollation::asc(0)]),
        None,
        Some(1),
    )
    .unwrap();
    let union = PlanNode::union(true, vec![top, PlanNode::scan(table("b"))]).unwrap();
    assert_eq!(
        text(&union, &SqlDialect::sqlite()),
        "SELECT *\nFROM (SELECT *\nFROM \"a\"\nORDER BY \"id\"\nLIMIT 1)\nUNION ALL\nSELECT *\nFROM \"b\""
    );
}

#[test]
fn non_finite_floats_have_no_literal() {
    for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let projected = PlanNode::project(emp(), vec![(Expr::lit(x), "x".into())]).unwrap();
        let err = to_sql(&projected, &SqlDialect::postgresql()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { ref target, .. } if target == "postgresql"));
    }
}

#[test]
fn set_operation_keywords_follow_the_dialect() {
    let minus = PlanNode::set_op(
        SetOpKind::Minus,
        false,
        vec![PlanNode::scan(table("a")), PlanNode::scan(table("b"))],
    )
    .unwrap();
    assert_eq!(
        text(&minus, &SqlDialect::oracle()),
        "SELECT *\nFROM \"a\"\nMINUS\nSELECT *\nFROM \"b\""
    );
    let union = PlanNode::union(false, vec![PlanNode::scan(table("a")), PlanNode::scan(table("b"))])
        .unwrap();
    assert_eq!(
        text(&union, &SqlDialect::bigquery()),
        "SELECT *\nFROM `a`\nUNION DISTINCT\nSELECT *\nFROM `b`"
    );
}

#[test]
fn mssql_substring_needs_a_length() {
    let name = Expr::field(2, SqlType::Varchar(None), true);
    let without_len = PlanNode::project(
        emp(),
        vec![(
            Expr::call(Op::Substring, vec![name.clone(), Expr::lit(2i64)]),
            "s".into(),
        )],
    )
    .unwrap();
    let err = to_sql(&without_len, &SqlDialect::mssql()).unwrap_err();
    assert!(matches!(err, Error::Unsupported { ref target, .. } if target == "mssql"));

    let with_len = PlanNode::project(
        emp(),
        vec![(
            Expr::call(Op::Substring, vec![name, Expr::lit(2i64), Expr::lit(3i64)]),
            "s".into(),
        )],
    )
    .unwrap();
    assert_eq!(
        text(&with_len, &SqlDialect::mssql()),
        "SELECT SUBSTRING([name], 2, 3) AS [s]\nFROM [emp]"
    );
}

#[test]
fn mysql_casts_integers_to_signed() {
    let cast = PlanNode::project(
        emp(),
        vec![(
            Expr::cast(Expr::field(2, SqlType::Varchar(None), true), SqlType::Integer),
            "n".into(),
        )],
    )
    .unwrap();
    assert_eq!(
        text(&cast, &SqlDialect::mysql()),
        "SELECT CAST(`name` AS SIGNED) AS `n`\nFROM `emp`"
    );
}

#[test]
fn self_join_aliases_the_second_scan() {
    let join = PlanNode::join(
        emp(),
        emp(),
        JoinKind::Inner,
        Expr::binary(
            Op::Eq,
            Expr::field(0, SqlType::Integer, false),
            Expr::field(4, SqlType::Integer, true),
        ),
    )
    .unwrap();
    let sql = text(&join, &SqlDialect::ansi());
    assert!(
        sql.contains("FROM \"emp\"\nINNER JOIN \"emp\" AS \"t0\" ON \"emp\".\"id\" = \"t0\".\"dept\""),
        "{sql}"
    );
}

#[test]
fn anti_join_becomes_not_exists() {
    let other = PlanNode::scan(table("ex"));
    let join = PlanNode::join(
        emp(),
        other,
        JoinKind::Anti,
        Expr::binary(
            Op::Eq,
            Expr::field(0, SqlType::Integer, false),
            Expr::field(3, SqlType::Integer, false),
        ),
    )
    .unwrap();
    assert_eq!(
        text(&join, &SqlDialect::ansi()),
        "SELECT *\nFROM \"emp\"\nWHERE NOT EXISTS (SELECT *\nFROM \"ex\"\nWHERE \"emp\".\"id\" = \"ex\".\"id\")"
    );
}

#[test]
fn mssql_fetch_without_order_gets_a_dummy_key() {
    let limited = PlanNode::sort(emp(), Collation::empty(), None, Some(5)).unwrap();
    assert_eq!(
        text(&limited, &SqlDialect::mssql()),
        "SELECT *\nFROM [emp]\nORDER BY (SELECT NULL)\nOFFSET 0 ROWS\nFETCH NEXT 5 ROWS ONLY"
    );
}

#[test]
fn data_modification_statements() {
    let emp_table = table("emp");
    let insert = PlanNode::modify(
        emp_table.clone(),
        ModifyOp::Insert,
        PlanNode::values(
            emp_type(),
            vec![
                vec![Value::Int(1), Value::Int(10), Value::from("ann")],
                vec![Value::Int(2), Value::Null, Value::from("o'neil")],
            ],
        )
        .unwrap(),
    )
    .unwrap();
    let query = to_sql(&insert, &SqlDialect::postgresql()).unwrap();
    assert_eq!(query.kind, StatementKind::Insert);
    assert_eq!(
        query.text,
        "INSERT INTO \"emp\" (\"id\", \"dept\", \"name\")\nVALUES (1, 10, 'ann'),\n(2, NULL, 'o''neil')"
    );

    let target = PlanNode::filter(
        PlanNode::scan(emp_table.clone()),
        Expr::binary(
            Op::Eq,
            Expr::field(0, SqlType::Integer, false),
            Expr::param(0, SqlType::Integer),
        ),
    )
    .unwrap();
    let delete = PlanNode::modify(emp_table.clone(), ModifyOp::Delete, target.clone()).unwrap();
    let query = to_sql(&delete, &SqlDialect::postgresql()).unwrap();
    assert_eq!(query.kind, StatementKind::Delete);
    assert_eq!(query.text, "DELETE FROM \"emp\"\nWHERE \"id\" = CAST(? AS INTEGER)");
    assert_eq!(query.params, vec![0]);

    let update = PlanNode::modify(
        emp_table,
        ModifyOp::Update {
            columns: vec![1],
            sources: vec![Expr::lit(99i64)],
        },
        target,
    )
    .unwrap();
    assert_eq!(
        text(&update, &SqlDialect::mysql()),
        "UPDATE `emp` SET `dept` = 99\nWHERE `id` = ?"
    );
}

#[test]
fn modify_collect_is_rejected() {
    let emp_table = table("emp");
    let delete = PlanNode::modify(emp_table.clone(), ModifyOp::Delete, emp()).unwrap();
    let collect = PlanNode::modify_collect(true, vec![delete.clone(), delete]).unwrap();
    let err = to_sql(&collect, &SqlDialect::ansi()).unwrap_err();
    assert_eq!(err.code(), "Unsupported");
}
