#![allow(missing_docs)]

use std::fs;
use std::sync::{Arc, Mutex};

use penumbra::dialect::Artifact;
use penumbra::exec::EmptyEnumerator;
use penumbra::plan::ConventionKind;
use penumbra::{
    collect_rows, ArtifactExecutor, CompilerOptions, Convention, ConventionPlanner, Enumerator,
    ExecContext, ExecutionCompiler, Field, PlanNode, Result, RowType, SqlType, TableDef,
};
use tempfile::tempdir;

const LAKE: &str = r#"
[planner]
max_simplify_passes = 4

[execution]
fetch_batch_size = 64

[dialects.lake]
base = "sqlite"
quote = ""
offset_fetch = "offset-fetch"
minus_keyword = "EXCEPT"
functions = { CHAR_LENGTH = "STRLEN" }
"#;

fn lake_scan() -> Arc<PlanNode> {
    let table = TableDef::new(
        "events",
        RowType::new(vec![Field::not_null("id", SqlType::Integer)]),
    )
    .in_convention(Convention::sql("lake"));
    PlanNode::scan(Arc::new(table))
}

#[derive(Default)]
struct Capture {
    texts: Mutex<Vec<String>>,
}

impl ArtifactExecutor for Capture {
    fn open(&self, artifact: &Artifact, _ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        self.texts.lock().unwrap().push(artifact.to_string());
        Ok(Box::new(EmptyEnumerator::new()))
    }
}

#[test]
fn file_defines_a_dialect_the_compiler_uses() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("penumbra.toml");
    fs::write(&path, LAKE).unwrap();

    let options = CompilerOptions::load(&path).unwrap();
    assert_eq!(options.max_simplify_passes, 4);
    assert_eq!(options.fetch_batch_size, 64);
    assert!(options.simplify);
    let lake = &options.dialects["lake"];
    assert_eq!(lake.quote, None);
    assert_eq!(lake.functions["CHAR_LENGTH"], "STRLEN");

    let capture = Arc::new(Capture::default());
    let compiler =
        ExecutionCompiler::from_options(&options).with_executor(ConventionKind::Sql, capture.clone());
    let plan = PlanNode::sort(
        lake_scan(),
        penumbra::plan::Collation::empty(),
        Some(2),
        Some(3),
    )
    .unwrap();
    let physical = ConventionPlanner::new()
        .plan(&plan, &Convention::PullIterator)
        .unwrap();
    let rows = collect_rows(compiler.compile(&physical, &ExecContext::default()).unwrap()).unwrap();
    assert!(rows.is_empty());
    assert_eq!(
        capture.texts.lock().unwrap().as_slice(),
        ["SELECT *\nFROM events\nOFFSET 2 ROWS\nFETCH NEXT 3 ROWS ONLY"]
    );
}

#[test]
fn default_compiler_does_not_know_custom_dialects() {
    let physical = ConventionPlanner::new()
        .plan(&lake_scan(), &Convention::PullIterator)
        .unwrap();
    let compiler = ExecutionCompiler::new()
        .with_executor(ConventionKind::Sql, Arc::new(Capture::default()));
    let err = compiler
        .compile(&physical, &ExecContext::default())
        .err()
        .unwrap();
    assert_eq!(err.code(), "Unsupported");
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempdir().unwrap();
    let err = CompilerOptions::load(dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.code(), "ConfigRead");
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("typo.toml");
    fs::write(&path, "[planner]\nsimplfy = false\n").unwrap();
    let err = CompilerOptions::load(&path).unwrap_err();
    assert_eq!(err.code(), "ConfigParse");
}

#[test]
fn bad_quote_is_an_invalid_value() {
    let err = CompilerOptions::from_toml_str("[dialects.odd]\nquote = \"<<>>\"").unwrap_err();
    assert_eq!(err.code(), "InvalidValue");
}
