//! Runs pipeline and write artifacts against a document store.
//!
//! Every call goes through the session of the executing transaction. When
//! the store rejects a request, that session is rolled back before the
//! error surfaces; sessions of other transactions stay open.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, warn};

use super::dml::{DmlPlan, DmlQuery};
use super::params::{bind, from_json};
use super::{ExecutionMode, PipelineQuery};
use crate::dialect::{Artifact, ArtifactExecutor};
use crate::error::{Error, Result};
use crate::exec::{Enumerator, ExecContext, RowsEnumerator};
use crate::session::{SessionHandle, SessionRegistry, TxId};
use crate::types::RowType;
use crate::value::{ParamSet, Row, Value};

/// Prefix the store puts in front of field paths in its messages.
const DATA_PREFIX: &str = "_data.";

/// One removal of a bulk delete.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteModel {
    /// Query-language filter.
    pub filter: Json,
    /// Whether to remove a single document.
    pub one: bool,
}

/// Document-store client. Failures come back as [`Error::Backend`].
pub trait DocumentStore: Send + Sync {
    /// Runs `stages` over `collection` and returns the result documents.
    fn aggregate(
        &self,
        session: Option<&SessionHandle>,
        collection: &str,
        stages: &[Json],
    ) -> Result<Vec<Json>>;

    /// Inserts `documents`, returning how many were written.
    fn insert_many(
        &self,
        session: Option<&SessionHandle>,
        collection: &str,
        documents: &[Json],
    ) -> Result<u64>;

    /// Applies `update` (a document or a pipeline) to the documents matching
    /// `filter`.
    fn update(
        &self,
        session: Option<&SessionHandle>,
        collection: &str,
        filter: &Json,
        update: &Json,
        one: bool,
    ) -> Result<u64>;

    /// Removes the documents matching `filter`.
    fn delete(
        &self,
        session: Option<&SessionHandle>,
        collection: &str,
        filter: &Json,
        one: bool,
    ) -> Result<u64>;

    /// Applies several removals in one round trip.
    fn bulk_delete(
        &self,
        session: Option<&SessionHandle>,
        collection: &str,
        models: &[DeleteModel],
    ) -> Result<u64>;
}

/// [`ArtifactExecutor`] for the document-pipeline convention.
pub struct PipelineRunner {
    store: Arc<dyn DocumentStore>,
    sessions: Arc<SessionRegistry>,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("sessions", &self.sessions)
            .finish()
    }
}

impl PipelineRunner {
    /// Runner over `store` using `sessions` for transactional calls.
    pub fn new(store: Arc<dyn DocumentStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self { store, sessions }
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn session(&self, tx: Option<TxId>) -> Result<Option<SessionHandle>> {
        tx.map(|tx| self.sessions.session_for(tx)).transpose()
    }

    /// Runs `query` with `params` and decodes the documents into rows.
    pub fn run_query(
        &self,
        query: &PipelineQuery,
        params: &ParamSet,
        tx: Option<TxId>,
    ) -> Result<Vec<Row>> {
        let stages = query.bind(params)?;
        let session = self.session(tx)?;
        let documents = self
            .store
            .aggregate(session.as_ref(), &query.collection, &stages)
            .map_err(|err| self.fail(tx, err))?;
        debug!(collection = %query.collection, documents = documents.len(), "pipeline returned");
        documents
            .iter()
            .map(|doc| decode_row(doc, &query.row_type))
            .collect()
    }

    /// Executes `query` once per parameter set and returns the total number
    /// of affected documents. Direct writes run once regardless of `sets`.
    pub fn execute_dml_batch(
        &self,
        query: &DmlQuery,
        sets: &[ParamSet],
        tx: Option<TxId>,
    ) -> Result<u64> {
        let session = self.session(tx)?;
        self.write(session.as_ref(), query, sets)
            .map_err(|err| self.fail(tx, err))
    }

    fn write(
        &self,
        session: Option<&SessionHandle>,
        query: &DmlQuery,
        sets: &[ParamSet],
    ) -> Result<u64> {
        if query.mode == ExecutionMode::Direct {
            return self.write_plan(session, &query.plan);
        }
        match &query.plan {
            DmlPlan::Insert {
                collection,
                documents,
            } => {
                let mut bound = Vec::with_capacity(sets.len() * documents.len());
                for set in sets {
                    for template in documents {
                        bound.push(bind(template, set)?);
                    }
                }
                self.store.insert_many(session, collection, &bound)
            }
            DmlPlan::Update { .. } => {
                let mut changed = 0;
                for set in sets {
                    changed += self.write_plan(session, &query.bind(set)?)?;
                }
                Ok(changed)
            }
            DmlPlan::Delete {
                collection, one, ..
            } => {
                let mut models = Vec::with_capacity(sets.len());
                for set in sets {
                    if let DmlPlan::Delete { filter, .. } = query.bind(set)? {
                        models.push(DeleteModel { filter, one: *one });
                    }
                }
                self.store.bulk_delete(session, collection, &models)
            }
        }
    }

    fn write_plan(&self, session: Option<&SessionHandle>, plan: &DmlPlan) -> Result<u64> {
        match plan {
            DmlPlan::Insert {
                collection,
                documents,
            } => self.store.insert_many(session, collection, documents),
            DmlPlan::Update {
                collection,
                filter,
                update,
                one,
            } => self.store.update(session, collection, filter, update, *one),
            DmlPlan::Delete {
                collection,
                filter,
                one,
            } => self.store.delete(session, collection, filter, *one),
        }
    }

    /// Rolls back the session of `tx` on a backend failure and cleans the
    /// message up.
    fn fail(&self, tx: Option<TxId>, err: Error) -> Error {
        let Error::Backend { adapter, message } = err else {
            return err;
        };
        if let Some(tx) = tx {
            if let Err(rollback) = self.sessions.rollback(tx) {
                warn!(%tx, error = %rollback, "rollback after backend failure failed");
            }
        }
        Error::Backend {
            adapter,
            message: message.replace(DATA_PREFIX, ""),
        }
    }
}

impl ArtifactExecutor for PipelineRunner {
    fn open(&self, artifact: &Artifact, ctx: &ExecContext) -> Result<Box<dyn Enumerator>> {
        let rows = match artifact {
            Artifact::Pipeline(query) => self.run_query(query, &ctx.params, ctx.tx)?,
            Artifact::Dml(query) => {
                let sets = std::slice::from_ref(ctx.params.as_ref());
                let changed = self.execute_dml_batch(query, sets, ctx.tx)?;
                vec![vec![Value::Int(i64::try_from(changed).unwrap_or(i64::MAX))]]
            }
            Artifact::Sql(_) => {
                return Err(Error::contract(format!(
                    "document store handed a {:?} artifact",
                    artifact.convention_kind()
                )))
            }
        };
        Ok(Box::new(RowsEnumerator::new(rows)))
    }
}

fn decode_row(document: &Json, row_type: &RowType) -> Result<Row> {
    let object = document
        .as_object()
        .ok_or_else(|| Error::eval(format!("pipeline produced a non-document {document}")))?;
    row_type
        .fields()
        .iter()
        .map(|field| from_json(object.get(&field.name).unwrap_or(&Json::Null), &field.ty))
        .collect()
}
