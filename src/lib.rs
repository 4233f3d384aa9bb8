//! Penumbra: a federated query compiler.
//!
//! A relational plan ([`plan::PlanNode`]) is placed into calling conventions
//! by the [`plan::ConventionPlanner`], which inserts converters wherever a
//! subtree has to move between backends. The [`exec::ExecutionCompiler`]
//! then lowers the pull-iterator part of the plan into enumerators and
//! hands every foreign fragment to an emitter: SQL text for relational
//! sources ([`dialect::SqlEmitter`]) or an aggregation pipeline for document
//! stores ([`dialect::PipelineEmitter`]). Emitted artifacts run through an
//! [`dialect::ArtifactExecutor`] registered per convention.
//!
//! Scalar work is expressed as [`rex::ExprProgram`]s, simplified against the
//! predicates known to hold on their input before compilation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod exec;
pub mod plan;
pub mod profile;
pub mod rex;
pub mod session;
pub mod types;
pub mod value;

pub use catalog::{Catalog, InMemoryCatalog, MemTable, TableDef};
pub use config::{CompilerOptions, ConfigError};
pub use dialect::{
    Artifact, ArtifactExecutor, EmitterRegistry, FragmentEmitter, PipelineEmitter, SqlDialect,
    SqlEmitter,
};
pub use error::{Error, ErrorWithCode, Result};
pub use exec::{collect_rows, Enumerator, ExecContext, ExecutionCompiler};
pub use plan::{Convention, ConventionPlanner, PlanNode};
pub use profile::{profile_snapshot, CompileProfileSnapshot};
pub use rex::{Expr, ExprProgram, Op, Simplifier};
pub use session::{SessionBackend, SessionRegistry, TxId};
pub use types::{Field, RowType, SqlType};
pub use value::{ParamSet, Row, Value};
