#![allow(missing_docs)]

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use penumbra::dialect::pipeline::{DeleteModel, DocumentStore, PipelineRunner};
use penumbra::plan::{ConventionKind, ModifyOp};
use penumbra::session::SessionHandle;
use penumbra::{
    collect_rows, Convention, ConventionPlanner, Error, ExecContext, ExecutionCompiler, Expr,
    Field, Op, ParamSet, PipelineEmitter, PlanNode, Result, RowType, SessionBackend,
    SessionRegistry, SqlType, TableDef, TxId, Value,
};
use serde_json::{json, Value as Json};
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

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Aggregate {
        collection: String,
        stages: Vec<Json>,
        session: Option<u64>,
    },
    Insert {
        collection: String,
        documents: Vec<Json>,
    },
    BulkDelete {
        collection: String,
        models: Vec<DeleteModel>,
    },
    Other(&'static str),
}

#[derive(Default)]
struct FakeStore {
    calls: Mutex<Vec<Call>>,
    reject_writes: Option<String>,
}

impl FakeStore {
    fn rejecting(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject_writes: Some(message.to_owned()),
        }
    }

    fn written(&self, call: Call, count: u64) -> Result<u64> {
        self.calls.lock().push(call);
        match &self.reject_writes {
            Some(message) => Err(Error::Backend {
                adapter: "mongo".into(),
                message: message.clone(),
            }),
            None => Ok(count),
        }
    }
}

impl DocumentStore for FakeStore {
    fn aggregate(
        &self,
        session: Option<&SessionHandle>,
        collection: &str,
        stages: &[Json],
    ) -> Result<Vec<Json>> {
        self.calls.lock().push(Call::Aggregate {
            collection: collection.to_owned(),
            stages: stages.to_vec(),
            session: session.map(|s| s.id),
        });
        Ok(vec![
            json!({ "id": 1, "name": "ada", "visits": 5 }),
            json!({ "id": 2, "visits": 7 }),
        ])
    }

    fn insert_many(
        &self,
        _session: Option<&SessionHandle>,
        collection: &str,
        documents: &[Json],
    ) -> Result<u64> {
        self.written(
            Call::Insert {
                collection: collection.to_owned(),
                documents: documents.to_vec(),
            },
            documents.len() as u64,
        )
    }

    fn update(
        &self,
        _session: Option<&SessionHandle>,
        _collection: &str,
        _filter: &Json,
        _update: &Json,
        _one: bool,
    ) -> Result<u64> {
        self.written(Call::Other("update"), 1)
    }

    fn delete(
        &self,
        _session: Option<&SessionHandle>,
        _collection: &str,
        _filter: &Json,
        _one: bool,
    ) -> Result<u64> {
        self.written(Call::Other("delete"), 1)
    }

    fn bulk_delete(
        &self,
        _session: Option<&SessionHandle>,
        collection: &str,
        models: &[DeleteModel],
    ) -> Result<u64> {
        self.written(
            Call::BulkDelete {
                collection: collection.to_owned(),
                models: models.to_vec(),
            },
            models.len() as u64,
        )
    }
}

#[derive(Default)]
struct Sessions {
    aborted: Mutex<Vec<TxId>>,
}

impl SessionBackend for Sessions {
    fn start(&self, tx: TxId) -> Result<u64> {
        Ok(100 + tx.0)
    }

    fn commit(&self, _session: &SessionHandle) -> Result<()> {
        Ok(())
    }

    fn abort(&self, session: &SessionHandle) -> Result<()> {
        self.aborted.lock().push(session.tx);
        Ok(())
    }
}

fn users() -> Arc<TableDef> {
    Arc::new(
        TableDef::new(
            "users",
            RowType::new(vec![
                Field::not_null("id", SqlType::Integer),
                Field::new("name", SqlType::Varchar(None)),
                Field::new("visits", SqlType::Integer),
            ]),
        )
        .in_convention(Convention::DocumentPipeline)
        .with_primary_key(vec![0])
        .with_physical_names(["_id", "name", "visits"]),
    )
}

struct Harness {
    store: Arc<FakeStore>,
    backend: Arc<Sessions>,
    runner: Arc<PipelineRunner>,
}

impl Harness {
    fn new(store: FakeStore) -> Self {
        init_tracing();
        let store = Arc::new(store);
        let backend = Arc::new(Sessions::default());
        let sessions = Arc::new(SessionRegistry::new("mongo", backend.clone()));
        let runner = Arc::new(PipelineRunner::new(store.clone(), sessions));
        Self {
            store,
            backend,
            runner,
        }
    }

    fn run(&self, plan: &Arc<PlanNode>, ctx: &ExecContext) -> Result<Vec<Vec<Value>>> {
        let physical = ConventionPlanner::new().plan(plan, &Convention::PullIterator)?;
        let compiler = ExecutionCompiler::new()
            .with_executor(ConventionKind::DocumentPipeline, self.runner.clone());
        collect_rows(compiler.compile(&physical, ctx)?)
    }
}

#[test]
fn filtered_scan_runs_in_the_store_session() {
    let harness = Harness::new(FakeStore::default());
    let filtered = PlanNode::filter(
        PlanNode::scan(users()),
        Expr::binary(
            Op::Gt,
            Expr::field(2, SqlType::Integer, true),
            Expr::param(0, SqlType::Integer),
        ),
    )
    .unwrap();
    let ctx = ExecContext::new(ParamSet::from([(0, Value::Int(3))])).in_transaction(TxId(4));
    let rows = harness.run(&filtered, &ctx).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::String("ada".into()), Value::Int(5)],
            vec![Value::Int(2), Value::Null, Value::Int(7)],
        ]
    );

    let calls = harness.store.calls.lock();
    let [Call::Aggregate {
        collection,
        stages,
        session,
    }] = calls.as_slice()
    else {
        panic!("unexpected calls {calls:?}");
    };
    assert_eq!(collection, "users");
    assert_eq!(*session, Some(104));
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[1], json!({ "$match": { "visits": { "$gt": 3 } } }));
    assert!(harness.runner.sessions().is_open(TxId(4)));
}

#[test]
fn insert_reports_written_documents() {
    let harness = Harness::new(FakeStore::default());
    let rows = vec![
        vec![Value::Int(1), Value::String("ada".into()), Value::Int(0)],
        vec![Value::Int(2), Value::Null, Value::Int(3)],
    ];
    let insert = PlanNode::modify(
        users(),
        ModifyOp::Insert,
        PlanNode::values(users().row_type.clone(), rows).unwrap(),
    )
    .unwrap();
    let out = harness.run(&insert, &ExecContext::default()).unwrap();
    assert_eq!(out, vec![vec![Value::Int(2)]]);
    assert_eq!(
        harness.store.calls.lock().as_slice(),
        [Call::Insert {
            collection: "users".into(),
            documents: vec![
                json!({ "_id": 1, "name": "ada", "visits": 0 }),
                json!({ "_id": 2, "name": null, "visits": 3 }),
            ],
        }]
    );
}

#[test]
fn batched_delete_goes_out_in_one_round_trip() {
    let harness = Harness::new(FakeStore::default());
    let table = users();
    let target = PlanNode::filter(
        PlanNode::scan(table.clone()),
        Expr::binary(
            Op::Eq,
            Expr::field(0, SqlType::Integer, false),
            Expr::param(0, SqlType::Integer),
        ),
    )
    .unwrap();
    let delete = PlanNode::modify(table, ModifyOp::Delete, target).unwrap();
    let traits = delete
        .traits()
        .with_convention(Convention::DocumentPipeline);
    let inputs = delete.inputs().to_vec();
    let delete = delete.copy(traits, inputs).unwrap();
    let query = PipelineEmitter::new().emit_dml(&delete).unwrap();

    let sets: Vec<ParamSet> = (1..=3).map(|id| ParamSet::from([(0, Value::Int(id))])).collect();
    let removed = harness.runner.execute_dml_batch(&query, &sets, None).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(
        harness.store.calls.lock().as_slice(),
        [Call::BulkDelete {
            collection: "users".into(),
            models: (1..=3)
                .map(|id| DeleteModel {
                    filter: json!({ "_id": { "$eq": id } }),
                    one: true,
                })
                .collect(),
        }]
    );
}

#[test]
fn rejected_write_rolls_back_only_its_transaction() {
    let harness = Harness::new(FakeStore::rejecting("E11000 duplicate key on _data._id"));
    let bystander = harness.runner.sessions().acquire(TxId(2)).unwrap();
    assert_eq!(bystander.id, 102);

    let insert = PlanNode::modify(
        users(),
        ModifyOp::Insert,
        PlanNode::values(
            users().row_type.clone(),
            vec![vec![Value::Int(1), Value::Null, Value::Int(0)]],
        )
        .unwrap(),
    )
    .unwrap();
    let ctx = ExecContext::default().in_transaction(TxId(1));
    let err = harness.run(&insert, &ctx).unwrap_err();
    assert_eq!(err.code(), "Backend");
    assert_eq!(
        err.to_string(),
        "backend error on mongo: E11000 duplicate key on _id"
    );

    let sessions = harness.runner.sessions();
    assert!(!sessions.is_open(TxId(1)));
    assert!(sessions.is_open(TxId(2)));
    assert_eq!(harness.backend.aborted.lock().as_slice(), [TxId(1)]);
}
