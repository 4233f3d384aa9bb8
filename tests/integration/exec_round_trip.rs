#![allow(missing_docs)]

use std::sync::{Arc, Mutex, Once};

use penumbra::dialect::Artifact;
use penumbra::exec::RowsEnumerator;
use penumbra::plan::{
    AggCall, AggFunc, Collation, ConventionKind, FieldCollation, JoinKind, ModifyOp,
};
use penumbra::{
    collect_rows, ArtifactExecutor, Convention, ConventionPlanner, Enumerator, Error, ExecContext,
    ExecutionCompiler, Expr, Field, Op, ParamSet, PlanNode, Result, RowType, SqlType, TableDef,
    Value,
};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn emp_type() -> RowType {
    RowType::new(vec![
        Field::not_null("id", SqlType::Integer),
        Field::new("dept", SqlType::Integer),
        Field::new("salary", SqlType::Integer),
    ])
}

fn emp() -> Arc<TableDef> {
    Arc::new(TableDef::new("emp", emp_type()).with_rows(vec![
        vec![Value::Int(1), Value::Int(10), Value::Int(100)],
        vec![Value::Int(2), Value::Int(20), Value::Int(200)],
        vec![Value::Int(3), Value::Int(10), Value::Int(300)],
        vec![Value::Int(4), Value::Null, Value::Int(50)],
    ]))
}

fn int(index: usize, nullable: bool) -> Expr {
    Expr::field(index, SqlType::Integer, nullable)
}

fn run(plan: &Arc<PlanNode>, compiler: &ExecutionCompiler, ctx: &ExecContext) -> Vec<Vec<Value>> {
    init_tracing();
    let physical = ConventionPlanner::new()
        .plan(plan, &Convention::PullIterator)
        .unwrap();
    collect_rows(compiler.compile(&physical, ctx).unwrap()).unwrap()
}

fn ints(rows: &[&[i64]]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| row.iter().map(|v| Value::Int(*v)).collect())
        .collect()
}

#[test]
fn filter_with_parameter_then_sort() {
    let table = emp();
    let filtered = PlanNode::filter(
        PlanNode::scan(table),
        Expr::binary(Op::Ge, int(2, true), Expr::param(0, SqlType::Integer)),
    )
    .unwrap();
    let sorted = PlanNode::sort(
        filtered,
        Collation::new(vec![FieldCollation::desc(2)]),
        None,
        None,
    )
    .unwrap();
    let ctx = ExecContext::new(ParamSet::from([(0, Value::Int(100))]));
    let rows = run(&sorted, &ExecutionCompiler::new(), &ctx);
    assert_eq!(
        rows,
        ints(&[&[3, 10, 300], &[2, 20, 200], &[1, 10, 100]])
    );
}

#[test]
fn aggregate_by_department_keeps_null_group() {
    let agg = PlanNode::aggregate(
        PlanNode::scan(emp()),
        vec![1],
        vec![
            AggCall::count_star("n"),
            AggCall::new(AggFunc::Sum, 2, "total"),
        ],
    )
    .unwrap();
    let rows = run(&agg, &ExecutionCompiler::new(), &ExecContext::default());
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(10), Value::Int(2), Value::Int(400)],
            vec![Value::Int(20), Value::Int(1), Value::Int(200)],
            vec![Value::Null, Value::Int(1), Value::Int(50)],
        ]
    );
}

#[test]
fn left_join_pads_unmatched_rows() {
    let depts = Arc::new(
        TableDef::new(
            "dept",
            RowType::new(vec![
                Field::not_null("id", SqlType::Integer),
                Field::new("floor", SqlType::Integer),
            ]),
        )
        .with_rows(ints(&[&[10, 1], &[30, 3]])),
    );
    let join = PlanNode::join(
        PlanNode::scan(emp()),
        PlanNode::scan(depts),
        JoinKind::Left,
        Expr::binary(Op::Eq, int(1, true), int(3, false)),
    )
    .unwrap();
    let projected = PlanNode::project(
        join,
        vec![(int(0, false), "id".into()), (int(4, true), "floor".into())],
    )
    .unwrap();
    let rows = run(&projected, &ExecutionCompiler::new(), &ExecContext::default());
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(2), Value::Null],
            vec![Value::Int(3), Value::Int(1)],
            vec![Value::Int(4), Value::Null],
        ]
    );
}

fn unwind_tags(rows: Vec<Vec<Value>>) -> Arc<PlanNode> {
    let tags = RowType::new(vec![
        Field::not_null("id", SqlType::Integer),
        Field::new("tags", SqlType::Array(Box::new(SqlType::Integer))),
    ]);
    let values = PlanNode::values(tags, rows).unwrap();
    PlanNode::project(
        values,
        vec![
            (int(0, false), "id".into()),
            (
                Expr::unwind(Expr::field(
                    1,
                    SqlType::Array(Box::new(SqlType::Integer)),
                    true,
                )),
                "tag".into(),
            ),
        ],
    )
    .unwrap()
}

#[test]
fn unwind_skips_empty_arrays() {
    let unwound = unwind_tags(vec![
        vec![Value::Int(1), Value::Array(vec![Value::Int(7), Value::Int(8)])],
        vec![Value::Int(2), Value::Array(Vec::new())],
        vec![Value::Int(3), Value::Array(vec![Value::Int(9)])],
    ]);
    let rows = run(&unwound, &ExecutionCompiler::new(), &ExecContext::default());
    assert_eq!(rows, ints(&[&[1, 7], &[1, 8], &[3, 9]]));
}

proptest! {
    #[test]
    fn unwind_emits_one_row_per_element(lists in prop::collection::vec(prop::collection::vec(0i64..100, 0..4), 0..6)) {
        let input = lists
            .iter()
            .enumerate()
            .map(|(id, list)| {
                vec![
                    Value::Int(id as i64),
                    Value::Array(list.iter().copied().map(Value::Int).collect()),
                ]
            })
            .collect();
        let expected: Vec<Vec<Value>> = lists
            .iter()
            .enumerate()
            .flat_map(|(id, list)| list.iter().map(move |v| vec![Value::Int(id as i64), Value::Int(*v)]))
            .collect();
        let rows = run(&unwind_tags(input), &ExecutionCompiler::new(), &ExecContext::default());
        prop_assert_eq!(rows, expected);
    }
}

#[test]
fn insert_then_delete_reports_counts() {
    let table = emp();
    let insert = PlanNode::modify(
        table.clone(),
        ModifyOp::Insert,
        PlanNode::values(emp_type(), ints(&[&[5, 20, 70], &[6, 20, 80]])).unwrap(),
    )
    .unwrap();
    let compiler = ExecutionCompiler::new();
    let rows = run(&insert, &compiler, &ExecContext::default());
    assert_eq!(rows, ints(&[&[2]]));

    let doomed = PlanNode::filter(
        PlanNode::scan(table.clone()),
        Expr::binary(Op::Eq, int(1, true), Expr::lit(20i64)),
    )
    .unwrap();
    let delete = PlanNode::modify(table.clone(), ModifyOp::Delete, doomed).unwrap();
    let rows = run(&delete, &compiler, &ExecContext::default());
    assert_eq!(rows, ints(&[&[3]]));
    assert_eq!(table.mem_table().unwrap().len(), 3);
}

#[test]
fn intersect_keeps_common_rows_once() {
    let ty = RowType::new(vec![Field::not_null("n", SqlType::Integer)]);
    let left = PlanNode::values(ty.clone(), ints(&[&[1], &[2], &[2], &[3]])).unwrap();
    let right = PlanNode::values(ty, ints(&[&[2], &[3], &[4]])).unwrap();
    let intersect =
        PlanNode::set_op(penumbra::plan::SetOpKind::Intersect, false, vec![left, right]).unwrap();
    let mut rows = run(&intersect, &ExecutionCompiler::new(), &ExecContext::default());
    rows.sort_by(|a, b| a[0].total_cmp(&b[0]));
    assert_eq!(rows, ints(&[&[2], &[3]]));
}

/// Remote rows whose close is recorded, and fails for one table.
struct TrackedRows {
    table: char,
    rows: RowsEnumerator,
    closed: Arc<Mutex<Vec<char>>>,
    failing: char,
}

impl Enumerator for TrackedRows {
    fn reset(&mut self) -> Result<()> {
        self.rows.reset()
    }

    fn move_next(&mut self) -> Result<bool> {
        self.rows.move_next()
    }

    fn current(&self) -> Result<Vec<Value>> {
        self.rows.current()
    }

    fn close(&mut self) -> Result<()> {
        self.closed.lock().unwrap().push(self.table);
        self.rows.close()?;
        if self.table == self.failing {
            return Err(Error::Backend {
                adapter: "remote".into(),
                message: format!("{} went away", self.table),
            });
        }
        Ok(())
    }
}

struct TrackedSql {
    closed: Arc<Mutex<Vec<char>>>,
    failing: char,
}

impl ArtifactExecutor for TrackedSql {
    fn open(&self, artifact: &Artifact, _ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        let Artifact::Sql(query) = artifact else {
            panic!("expected SQL, got {artifact}");
        };
        let table = query
            .text
            .trim_end_matches(['"', '`'])
            .chars()
            .last()
            .unwrap();
        let id = table as i64 - 'a' as i64 + 1;
        Ok(Box::new(TrackedRows {
            table,
            rows: RowsEnumerator::new(vec![vec![Value::Int(id)]]),
            closed: self.closed.clone(),
            failing: self.failing,
        }))
    }
}

#[test]
fn union_closes_every_fragment_and_reports_the_first_failure() {
    let ty = RowType::new(vec![Field::not_null("n", SqlType::Integer)]);
    let scans = [("a", "postgresql"), ("b", "mysql"), ("c", "sqlite")]
        .into_iter()
        .map(|(name, dialect)| {
            PlanNode::scan(Arc::new(
                TableDef::new(name, ty.clone()).in_convention(Convention::sql(dialect)),
            ))
        })
        .collect();
    let union = PlanNode::union(true, scans).unwrap();
    let physical = ConventionPlanner::new()
        .plan(&union, &Convention::PullIterator)
        .unwrap();

    let closed = Arc::new(Mutex::new(Vec::new()));
    let compiler = ExecutionCompiler::new().with_executor(
        ConventionKind::Sql,
        Arc::new(TrackedSql {
            closed: closed.clone(),
            failing: 'b',
        }),
    );
    let mut enumerator = compiler.compile(&physical, &ExecContext::default()).unwrap();
    let mut seen = Vec::new();
    while enumerator.move_next().unwrap() {
        seen.push(enumerator.current().unwrap());
    }
    assert_eq!(seen, ints(&[&[1], &[2], &[3]]));

    let err = enumerator.close().unwrap_err();
    assert_eq!(err.to_string(), "backend error on remote: b went away");
    assert_eq!(*closed.lock().unwrap(), vec!['a', 'b', 'c']);
    enumerator.close().unwrap();
    assert_eq!(closed.lock().unwrap().len(), 3);
}

struct CannedSql {
    seen: Mutex<Vec<(String, Vec<Value>)>>,
    rows: Vec<Vec<Value>>,
}

impl ArtifactExecutor for CannedSql {
    fn open(&self, artifact: &Artifact, ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        let Artifact::Sql(query) = artifact else {
            panic!("expected SQL, got {artifact}");
        };
        let args = query.bind(&ctx.params)?;
        self.seen.lock().unwrap().push((query.text.clone(), args));
        Ok(Box::new(RowsEnumerator::new(self.rows.clone())))
    }
}

#[test]
fn foreign_sql_fragment_feeds_local_join() {
    let remote = Arc::new(
        TableDef::new(
            "dept",
            RowType::new(vec![
                Field::not_null("id", SqlType::Integer),
                Field::new("floor", SqlType::Integer),
            ]),
        )
        .in_convention(Convention::sql("postgresql")),
    );
    let remote_filtered = PlanNode::filter(
        PlanNode::scan(remote),
        Expr::binary(Op::Gt, int(1, true), Expr::param(0, SqlType::Integer)),
    )
    .unwrap();
    let join = PlanNode::join(
        PlanNode::scan(emp()),
        remote_filtered,
        JoinKind::Semi,
        Expr::binary(Op::Eq, int(1, true), int(3, false)),
    )
    .unwrap();

    let executor = Arc::new(CannedSql {
        seen: Mutex::new(Vec::new()),
        rows: ints(&[&[20, 2]]),
    });
    let compiler =
        ExecutionCompiler::new().with_executor(ConventionKind::Sql, executor.clone());
    let ctx = ExecContext::new(ParamSet::from([(0, Value::Int(1))]));
    let rows = run(&join, &compiler, &ctx);
    assert_eq!(rows, ints(&[&[2, 20, 200]]));

    let seen = executor.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (text, args) = &seen[0];
    assert_eq!(
        text,
        "SELECT *\nFROM \"dept\"\nWHERE \"floor\" > CAST(? AS INTEGER)"
    );
    assert_eq!(args, &vec![Value::Int(1)]);
}

#[test]
fn unbound_parameter_fails_at_execution() {
    let filtered = PlanNode::filter(
        PlanNode::scan(emp()),
        Expr::binary(Op::Eq, int(0, false), Expr::param(3, SqlType::Integer)),
    )
    .unwrap();
    let physical = ConventionPlanner::new()
        .plan(&filtered, &Convention::PullIterator)
        .unwrap();
    let enumerator = ExecutionCompiler::new()
        .compile(&physical, &ExecContext::default())
        .unwrap();
    let err = collect_rows(enumerator).unwrap_err();
    assert_eq!(err.code(), "UnboundParameter");
}
