//! Emitters turning convention-homogeneous plan fragments into artifacts a
//! foreign store can run, and the executor seam that runs them.

pub mod descriptor;
pub mod pipeline;
pub mod sql;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::{Enumerator, ExecContext};
use crate::plan::{ConventionKind, PlanNode};
use crate::types::RowType;

pub use descriptor::SqlDialect;
pub use pipeline::dml::{DmlPlan, DmlQuery};
pub use pipeline::{ExecutionMode, PipelineEmitter, PipelineQuery};
pub use sql::{SqlEmitter, SqlQuery, StatementKind};

/// Output of an emitter.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    /// SQL text.
    Sql(SqlQuery),
    /// Aggregation pipeline.
    Pipeline(PipelineQuery),
    /// Document-store write.
    Dml(DmlQuery),
}

impl Artifact {
    /// Row type of the rows the artifact produces.
    pub fn row_type(&self) -> RowType {
        match self {
            Artifact::Sql(query) => query.row_type.clone(),
            Artifact::Pipeline(query) => query.row_type.clone(),
            Artifact::Dml(_) => RowType::row_count(),
        }
    }

    /// Convention kind of the emitter that produced the artifact.
    pub fn convention_kind(&self) -> ConventionKind {
        match self {
            Artifact::Sql(_) => ConventionKind::Sql,
            Artifact::Pipeline(_) | Artifact::Dml(_) => ConventionKind::DocumentPipeline,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Sql(query) => f.write_str(&query.text),
            Artifact::Pipeline(query) => write!(f, "{query}"),
            Artifact::Dml(query) => write!(f, "{:?}", query.plan),
        }
    }
}

/// Turns a fragment living entirely in one foreign convention into an
/// artifact.
pub trait FragmentEmitter: Send + Sync {
    /// Convention kind this emitter serves.
    fn convention_kind(&self) -> ConventionKind;

    /// Emits `fragment`; the whole fragment is rejected if any construct is
    /// unsupported.
    fn emit(&self, fragment: &PlanNode) -> Result<Artifact>;
}

/// Runs artifacts against a foreign store.
pub trait ArtifactExecutor: Send + Sync {
    /// Starts executing `artifact`; rows are pulled from the returned
    /// enumerator.
    fn open(&self, artifact: &Artifact, ctx: &ExecContext) -> Result<Box<dyn Enumerator>>;
}

/// Emitters keyed by convention kind.
#[derive(Clone)]
pub struct EmitterRegistry {
    emitters: HashMap<ConventionKind, Arc<dyn FragmentEmitter>>,
}

impl Default for EmitterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EmitterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.emitters.keys().collect();
        kinds.sort();
        f.debug_struct("EmitterRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl EmitterRegistry {
    /// Registry with the SQL emitter (every preset dialect) and the pipeline
    /// emitter.
    pub fn new() -> Self {
        Self::empty()
            .with_emitter(Arc::new(SqlEmitter::new()))
            .with_emitter(Arc::new(PipelineEmitter::new()))
    }

    /// Registry without emitters.
    pub fn empty() -> Self {
        Self {
            emitters: HashMap::new(),
        }
    }

    /// Registers `emitter` for its convention kind, replacing any previous
    /// one.
    pub fn with_emitter(mut self, emitter: Arc<dyn FragmentEmitter>) -> Self {
        self.emitters.insert(emitter.convention_kind(), emitter);
        self
    }

    /// Emits `fragment` with the emitter registered for its convention.
    pub fn emit(&self, fragment: &PlanNode) -> Result<Artifact> {
        let convention = fragment.convention();
        let emitter = self.emitters.get(&convention.kind()).ok_or_else(|| {
            Error::unsupported(
                convention.to_string(),
                fragment.kind().name(),
                format!("no emitter registered for convention {convention}"),
            )
        })?;
        emitter.emit(fragment)
    }
}
