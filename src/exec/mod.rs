//! Pull-iterator runtime.
//!
//! Every compiled operator is an [`Enumerator`] with four states: unstarted,
//! positioned, exhausted and closed. `move_next` is the only transition into
//! positioned or exhausted, `reset` returns to unstarted and `close` is
//! idempotent from any state. Reading `current` outside the positioned state
//! is a contract violation reported as an error.

pub mod aggregate;
pub mod calc;
pub mod compiler;
pub mod join;
pub mod modify;
pub mod setop;
pub mod sort;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::dialect::{Artifact, ArtifactExecutor};
use crate::error::{Error, Result};
use crate::session::TxId;
use crate::value::{ParamSet, Row};

pub use compiler::ExecutionCompiler;

/// Cursor over the rows of one operator.
pub trait Enumerator: Send {
    /// Returns to the unstarted state.
    fn reset(&mut self) -> Result<()>;
    /// Advances to the next row; `false` once exhausted.
    fn move_next(&mut self) -> Result<bool>;
    /// Row at the cursor.
    fn current(&self) -> Result<Row>;
    /// Releases resources, closing every owned child.
    fn close(&mut self) -> Result<()>;
}

/// Lifecycle state of an enumerator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CursorState {
    /// Before the first `move_next`.
    #[default]
    Unstarted,
    /// On a row.
    Positioned,
    /// Past the last row.
    Exhausted,
    /// Closed.
    Closed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CursorState::Unstarted => "unstarted",
            CursorState::Positioned => "positioned",
            CursorState::Exhausted => "exhausted",
            CursorState::Closed => "closed",
        })
    }
}

impl CursorState {
    pub(crate) fn ensure_open(self, call: &str) -> Result<()> {
        if self == CursorState::Closed {
            return Err(Error::contract(format!("{call} on a closed enumerator")));
        }
        Ok(())
    }

    pub(crate) fn ensure_positioned(self) -> Result<()> {
        if self != CursorState::Positioned {
            return Err(Error::contract(format!(
                "current() called while the enumerator is {self}"
            )));
        }
        Ok(())
    }

    pub(crate) fn advanced(found: bool) -> Self {
        if found {
            CursorState::Positioned
        } else {
            CursorState::Exhausted
        }
    }
}

/// Per-execution state shared by every operator of a compiled plan.
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    /// Dynamic parameter values.
    pub params: Arc<ParamSet>,
    /// Transaction the execution belongs to.
    pub tx: Option<TxId>,
}

impl ExecContext {
    /// Context binding `params` outside any transaction.
    pub fn new(params: ParamSet) -> Self {
        Self {
            params: Arc::new(params),
            tx: None,
        }
    }

    /// Same context inside `tx`.
    pub fn in_transaction(mut self, tx: TxId) -> Self {
        self.tx = Some(tx);
        self
    }
}

/// Closes every child even when some fail; the first failure is returned.
pub fn close_all(children: &mut [Box<dyn Enumerator>]) -> Result<()> {
    let mut first = None;
    for child in children.iter_mut() {
        if let Err(err) = child.close() {
            debug!(error = %err, "child enumerator failed to close");
            first.get_or_insert(err);
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Pulls every remaining row from `input`.
pub fn drain(input: &mut dyn Enumerator) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while input.move_next()? {
        rows.push(input.current()?);
    }
    Ok(rows)
}

/// Drains `enumerator` and closes it; a close failure is reported after a
/// successful drain.
pub fn collect_rows(mut enumerator: Box<dyn Enumerator>) -> Result<Vec<Row>> {
    let rows = drain(enumerator.as_mut());
    let closed = enumerator.close();
    let rows = rows?;
    closed?;
    Ok(rows)
}

/// Emits nothing.
#[derive(Debug, Default)]
pub struct EmptyEnumerator {
    state: CursorState,
}

impl EmptyEnumerator {
    /// New empty enumerator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Enumerator for EmptyEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        self.state = CursorState::Exhausted;
        Ok(false)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        Err(Error::contract("empty enumerator has no rows"))
    }

    fn close(&mut self) -> Result<()> {
        self.state = CursorState::Closed;
        Ok(())
    }
}

/// Iterates over rows held in memory.
#[derive(Debug)]
pub struct RowsEnumerator {
    rows: Arc<Vec<Row>>,
    index: usize,
    state: CursorState,
}

impl RowsEnumerator {
    /// Enumerator over `rows`.
    pub fn new(rows: impl Into<Arc<Vec<Row>>>) -> Self {
        Self {
            rows: rows.into(),
            index: 0,
            state: CursorState::Unstarted,
        }
    }
}

impl Enumerator for RowsEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        self.index = 0;
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        match self.state {
            CursorState::Unstarted => self.index = 0,
            CursorState::Positioned => self.index += 1,
            _ => {}
        }
        self.state = CursorState::advanced(self.index < self.rows.len());
        Ok(self.state == CursorState::Positioned)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        self.rows
            .get(self.index)
            .cloned()
            .ok_or_else(|| Error::contract("row cursor out of range"))
    }

    fn close(&mut self) -> Result<()> {
        self.state = CursorState::Closed;
        Ok(())
    }
}

type BuildRows = Box<dyn FnMut(&mut [Box<dyn Enumerator>]) -> Result<Vec<Row>> + Send>;

/// Computes its whole output from its children on the first `move_next`,
/// then iterates over the cached rows. `reset` rewinds the cache without
/// recomputing.
pub struct MaterializeEnumerator {
    name: &'static str,
    children: Vec<Box<dyn Enumerator>>,
    build: BuildRows,
    rows: Option<RowsEnumerator>,
    state: CursorState,
}

impl MaterializeEnumerator {
    /// Enumerator computing its rows with `build` over `children`.
    pub fn new(
        name: &'static str,
        children: Vec<Box<dyn Enumerator>>,
        build: impl FnMut(&mut [Box<dyn Enumerator>]) -> Result<Vec<Row>> + Send + 'static,
    ) -> Self {
        Self {
            name,
            children,
            build: Box::new(build),
            rows: None,
            state: CursorState::Unstarted,
        }
    }
}

impl Enumerator for MaterializeEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        if let Some(rows) = self.rows.as_mut() {
            rows.reset()?;
        }
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        let rows = match self.rows.as_mut() {
            Some(rows) => rows,
            None => {
                let built = (self.build)(&mut self.children)?;
                debug!(operator = self.name, rows = built.len(), "materialized rows");
                self.rows.insert(RowsEnumerator::new(built))
            }
        };
        let found = rows.move_next()?;
        self.state = CursorState::advanced(found);
        Ok(found)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        match &self.rows {
            Some(rows) => rows.current(),
            None => Err(Error::contract("materialized rows missing")),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        self.rows = None;
        close_all(&mut self.children)
    }
}

/// Runs a foreign artifact, opened through its executor on the first
/// `move_next`.
pub struct ForeignEnumerator {
    artifact: Artifact,
    executor: Arc<dyn ArtifactExecutor>,
    ctx: ExecContext,
    inner: Option<Box<dyn Enumerator>>,
    state: CursorState,
}

impl ForeignEnumerator {
    /// Enumerator that will open `artifact` with `executor`.
    pub fn new(artifact: Artifact, executor: Arc<dyn ArtifactExecutor>, ctx: ExecContext) -> Self {
        Self {
            artifact,
            executor,
            ctx,
            inner: None,
            state: CursorState::Unstarted,
        }
    }

    /// Artifact this enumerator runs.
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
}

impl Enumerator for ForeignEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        if let Some(inner) = self.inner.as_mut() {
            inner.reset()?;
        }
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => {
                debug!(artifact = %self.artifact, "opening foreign artifact");
                let opened = self.executor.open(&self.artifact, &self.ctx)?;
                self.inner.insert(opened)
            }
        };
        let found = inner.move_next()?;
        self.state = CursorState::advanced(found);
        Ok(found)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        match &self.inner {
            Some(inner) => inner.current(),
            None => Err(Error::contract("foreign artifact not opened")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.state = CursorState::Closed;
        match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}
