#![allow(missing_docs)]

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use penumbra::dialect::Artifact;
use penumbra::exec::RowsEnumerator;
use penumbra::plan::{AggCall, AggFunc, Collation, ConventionKind, FieldCollation, JoinKind, ModifyOp};
use penumbra::{
    collect_rows, ArtifactExecutor, Convention, ConventionPlanner, Enumerator, Error,
    ExecContext, ExecutionCompiler, Expr, Field, Op, ParamSet, PlanNode, Result, RowType, SqlType,
    TableDef, Value,
};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::Connection;
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

const ROWS: [(i64, Option<i64>, i64); 5] = [
    (1, Some(10), 100),
    (2, None, 250),
    (3, Some(20), 300),
    (4, Some(10), 50),
    (5, Some(20), 75),
];

fn emp_type() -> RowType {
    RowType::new(vec![
        Field::not_null("id", SqlType::Integer),
        Field::new("dept", SqlType::Integer),
        Field::new("salary", SqlType::Integer),
    ])
}

fn rows() -> Vec<Vec<Value>> {
    ROWS.iter()
        .map(|(id, dept, salary)| {
            vec![
                Value::Int(*id),
                dept.map(Value::Int).unwrap_or(Value::Null),
                Value::Int(*salary),
            ]
        })
        .collect()
}

/// Runs emitted SQL against an in-memory SQLite database.
struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    fn new() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE emp (id INTEGER NOT NULL, dept INTEGER, salary INTEGER)")
            .unwrap();
        for (id, dept, salary) in ROWS {
            conn.execute(
                "INSERT INTO emp (id, dept, salary) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, dept, salary],
            )
            .unwrap();
        }
        Self {
            conn: Mutex::new(conn),
        }
    }
}

fn to_sqlite(value: Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(b)),
        Value::Int(i) => SqliteValue::Integer(i),
        Value::Float(f) => SqliteValue::Real(f),
        Value::String(s) => SqliteValue::Text(s),
        other => SqliteValue::Text(other.to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn backend(err: rusqlite::Error) -> Error {
    Error::Backend {
        adapter: "sqlite".into(),
        message: err.to_string(),
    }
}

impl ArtifactExecutor for SqliteExecutor {
    fn open(&self, artifact: &Artifact, ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        let Artifact::Sql(query) = artifact else {
            return Err(Error::contract("sqlite executor handed a non-SQL artifact"));
        };
        let args: Vec<SqliteValue> = query.bind(&ctx.params)?.into_iter().map(to_sqlite).collect();
        let conn = self.conn.lock();
        if query.kind.is_dml() {
            let changed = conn
                .execute(&query.text, rusqlite::params_from_iter(args))
                .map_err(backend)?;
            return Ok(Box::new(RowsEnumerator::new(vec![vec![Value::Int(changed as i64)]])));
        }
        let width = query.row_type.len();
        let mut statement = conn.prepare(&query.text).map_err(backend)?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(args), |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(from_sqlite))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(Box::new(RowsEnumerator::new(rows)))
    }
}

struct Fixture {
    executor: Arc<SqliteExecutor>,
    remote: Arc<TableDef>,
    local: Arc<TableDef>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        Self {
            executor: Arc::new(SqliteExecutor::new()),
            remote: Arc::new(TableDef::new("emp", emp_type()).in_convention(Convention::sql("sqlite"))),
            local: Arc::new(TableDef::new("emp", emp_type()).with_rows(rows())),
        }
    }

    fn run(&self, plan: &Arc<PlanNode>, ctx: &ExecContext) -> Vec<Vec<Value>> {
        let physical = ConventionPlanner::new()
            .plan(plan, &Convention::PullIterator)
            .unwrap();
        let compiler = ExecutionCompiler::new()
            .with_executor(ConventionKind::Sql, self.executor.clone());
        collect_rows(compiler.compile(&physical, ctx).unwrap()).unwrap()
    }

    /// Runs the plan built by `build` over SQLite and over the in-process
    /// copy of the same rows, and checks both agree.
    fn agree(
        &self,
        build: impl Fn(Arc<PlanNode>) -> Arc<PlanNode>,
        ctx: &ExecContext,
    ) -> Vec<Vec<Value>> {
        let remote = self.run(&build(PlanNode::scan(self.remote.clone())), ctx);
        let local = self.run(&build(PlanNode::scan(self.local.clone())), ctx);
        assert_eq!(remote, local);
        remote
    }
}

fn int(index: usize, nullable: bool) -> Expr {
    Expr::field(index, SqlType::Integer, nullable)
}

#[test]
fn filter_and_sort_with_nulls_last() {
    let fixture = Fixture::new();
    let ctx = ExecContext::new(ParamSet::from([(0, Value::Int(1))]));
    let rows = fixture.agree(
        |scan| {
            let filtered =
                PlanNode::filter(scan, Expr::binary(Op::Gt, int(0, false), Expr::param(0, SqlType::Integer)))
                    .unwrap();
            PlanNode::sort(
                filtered,
                Collation::new(vec![FieldCollation::asc(1).nulls_last(), FieldCollation::asc(0)]),
                None,
                None,
            )
            .unwrap()
        },
        &ctx,
    );
    let ids: Vec<Value> = rows.into_iter().map(|row| row[0].clone()).collect();
    assert_eq!(ids, vec![Value::Int(4), Value::Int(3), Value::Int(5), Value::Int(2)]);
}

#[test]
fn grouped_totals_match() {
    let fixture = Fixture::new();
    let rows = fixture.agree(
        |scan| {
            let agg = PlanNode::aggregate(
                scan,
                vec![1],
                vec![AggCall::count_star("n"), AggCall::new(AggFunc::Sum, 2, "total")],
            )
            .unwrap();
            PlanNode::sort(agg, Collation::new(vec![FieldCollation::asc(0).nulls_first()]), None, None)
                .unwrap()
        },
        &ExecContext::default(),
    );
    assert_eq!(
        rows,
        vec![
            vec![Value::Null, Value::Int(1), Value::Int(250)],
            vec![Value::Int(10), Value::Int(2), Value::Int(150)],
            vec![Value::Int(20), Value::Int(2), Value::Int(375)],
        ]
    );
}

#[test]
fn offset_and_fetch_page_through_results() {
    let fixture = Fixture::new();
    let rows = fixture.agree(
        |scan| {
            PlanNode::sort(scan, Collation::new(vec![FieldCollation::desc(2)]), Some(1), Some(2))
                .unwrap()
        },
        &ExecContext::default(),
    );
    let ids: Vec<Value> = rows.into_iter().map(|row| row[0].clone()).collect();
    assert_eq!(ids, vec![Value::Int(2), Value::Int(1)]);
}

#[test]
fn remote_rows_join_local_lookup() {
    let fixture = Fixture::new();
    let floors = Arc::new(
        TableDef::new(
            "floors",
            RowType::new(vec![
                Field::not_null("dept", SqlType::Integer),
                Field::not_null("floor", SqlType::Integer),
            ]),
        )
        .with_rows(vec![
            vec![Value::Int(10), Value::Int(1)],
            vec![Value::Int(20), Value::Int(2)],
        ]),
    );
    let join = PlanNode::join(
        PlanNode::scan(fixture.remote.clone()),
        PlanNode::scan(floors),
        JoinKind::Inner,
        Expr::binary(Op::Eq, int(1, true), int(3, false)),
    )
    .unwrap();
    let projected =
        PlanNode::project(join, vec![(int(0, false), "id".into()), (int(4, false), "floor".into())])
            .unwrap();
    let mut rows = fixture.run(&projected, &ExecContext::default());
    rows.sort_by(|a, b| a[0].total_cmp(&b[0]));
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(3), Value::Int(2)],
            vec![Value::Int(4), Value::Int(1)],
            vec![Value::Int(5), Value::Int(2)],
        ]
    );
}

#[test]
fn delete_runs_as_a_statement() {
    let fixture = Fixture::new();
    let target = PlanNode::filter(
        PlanNode::scan(fixture.remote.clone()),
        Expr::is_null(int(1, true)),
    )
    .unwrap();
    let delete = PlanNode::modify(fixture.remote.clone(), ModifyOp::Delete, target).unwrap();
    assert_eq!(
        fixture.run(&delete, &ExecContext::default()),
        vec![vec![Value::Int(1)]]
    );

    let count = PlanNode::aggregate(
        PlanNode::scan(fixture.remote.clone()),
        vec![],
        vec![AggCall::count_star("n")],
    )
    .unwrap();
    assert_eq!(
        fixture.run(&count, &ExecContext::default()),
        vec![vec![Value::Int(4)]]
    );
}
