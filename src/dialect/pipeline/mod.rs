//! Document-pipeline emission.
//!
//! Query fragments lower to an aggregation pipeline over one collection;
//! modify fragments lower to a [`DmlQuery`]. Dynamic parameters appear as
//! `{"$dynamic": n}` markers and are bound per parameter set before the
//! artifact reaches the store.

pub mod dml;
pub mod emit;
pub mod params;
pub mod runner;

use std::fmt;

use serde_json::Value as Json;
use tracing::debug;

use self::dml::DmlQuery;
use super::{Artifact, FragmentEmitter};
use crate::error::{Error, Result};
use crate::plan::{Convention, ConventionKind, NodeKind, PlanNode};
use crate::profile::{profile_timer, record_profile_timer, CompileProfileKind};
use crate::types::RowType;
use crate::value::ParamSet;

pub use runner::{DeleteModel, DocumentStore, PipelineRunner};

/// How an artifact reaches the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Literal-only artifact run as is.
    Direct,
    /// Template bound once per parameter set.
    Prepared,
}

/// Aggregation pipeline over one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineQuery {
    /// Source collection; empty when the pipeline starts from `$documents`.
    pub collection: String,
    /// Stages, possibly holding parameter markers.
    pub stages: Vec<Json>,
    /// Whether the stages hold markers.
    pub mode: ExecutionMode,
    /// Logical row type of the produced documents.
    pub row_type: RowType,
}

impl PipelineQuery {
    /// Stages with markers replaced by values from `params`.
    pub fn bind(&self, params: &ParamSet) -> Result<Vec<Json>> {
        if self.mode == ExecutionMode::Direct {
            return Ok(self.stages.clone());
        }
        let timer = profile_timer();
        let bound = self
            .stages
            .iter()
            .map(|stage| params::bind(stage, params))
            .collect::<Result<Vec<_>>>();
        record_profile_timer(CompileProfileKind::Bind, timer);
        bound
    }

    /// One bound pipeline per parameter set.
    pub fn bind_all(&self, sets: &[ParamSet]) -> Result<Vec<Vec<Json>>> {
        sets.iter().map(|set| self.bind(set)).collect()
    }
}

impl fmt::Display for PipelineQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages = Json::Array(self.stages.clone());
        let collection = if self.collection.is_empty() {
            "db"
        } else {
            self.collection.as_str()
        };
        write!(f, "{collection}.aggregate({stages})")
    }
}

/// Emits `document-pipeline` fragments.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineEmitter;

impl PipelineEmitter {
    /// New emitter.
    pub fn new() -> Self {
        Self
    }

    fn check_convention(node: &PlanNode) -> Result<()> {
        if node.convention() != &Convention::DocumentPipeline {
            return Err(Error::contract(format!(
                "pipeline emitter handed a {} fragment",
                node.convention()
            )));
        }
        Ok(())
    }

    /// Lowers a query fragment into an aggregation pipeline.
    pub fn emit_query(&self, node: &PlanNode) -> Result<PipelineQuery> {
        Self::check_convention(node)?;
        let timer = profile_timer();
        let lowered = emit::lower(node);
        record_profile_timer(CompileProfileKind::PipelineEmit, timer);
        let lowered = lowered?;
        let mode = if lowered.stages.iter().any(params::has_markers) {
            ExecutionMode::Prepared
        } else {
            ExecutionMode::Direct
        };
        let query = PipelineQuery {
            collection: lowered.collection,
            stages: lowered.stages,
            mode,
            row_type: node.row_type().clone(),
        };
        debug!(collection = %query.collection, ?mode, pipeline = %Json::Array(query.stages.clone()), "emitted pipeline");
        Ok(query)
    }

    /// Lowers a modify fragment into a document-store write.
    pub fn emit_dml(&self, node: &PlanNode) -> Result<DmlQuery> {
        Self::check_convention(node)?;
        let NodeKind::Modify { table, op } = node.kind() else {
            return Err(Error::contract(format!(
                "expected a modify node, got {}",
                node.kind().name()
            )));
        };
        let timer = profile_timer();
        let query = dml::emit(table, op, node.input(0)?);
        record_profile_timer(CompileProfileKind::PipelineEmit, timer);
        let query = query?;
        debug!(collection = %query.plan.collection(), mode = ?query.mode, "emitted document write");
        Ok(query)
    }
}

impl FragmentEmitter for PipelineEmitter {
    fn convention_kind(&self) -> ConventionKind {
        ConventionKind::DocumentPipeline
    }

    fn emit(&self, fragment: &PlanNode) -> Result<Artifact> {
        match fragment.kind() {
            NodeKind::Modify { .. } => self.emit_dml(fragment).map(Artifact::Dml),
            _ => self.emit_query(fragment).map(Artifact::Pipeline),
        }
    }
}
