//! Per-transaction sessions against a foreign store.
//!
//! Exactly one session exists per (transaction id, adapter). The registry is
//! the only shared mutable state of the compiler; a backend failure rolls
//! back the session of the failing transaction and leaves every other one
//! untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Identifier of a distributed transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Open session of one transaction on one adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    /// Owning transaction.
    pub tx: TxId,
    /// Adapter the session belongs to.
    pub adapter: String,
    /// Backend session identifier.
    pub id: u64,
}

/// Store-side session lifecycle.
pub trait SessionBackend: Send + Sync {
    /// Starts a session for `tx`, returning its backend id.
    fn start(&self, tx: TxId) -> Result<u64>;
    /// Commits the session.
    fn commit(&self, session: &SessionHandle) -> Result<()>;
    /// Aborts the session.
    fn abort(&self, session: &SessionHandle) -> Result<()>;
}

/// Open sessions of one adapter keyed by transaction.
pub struct SessionRegistry {
    adapter: String,
    backend: Arc<dyn SessionBackend>,
    open: Mutex<HashMap<TxId, SessionHandle>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("adapter", &self.adapter)
            .field("open", &self.open.lock().len())
            .finish()
    }
}

impl SessionRegistry {
    /// Registry for `adapter` over `backend`.
    pub fn new(adapter: impl Into<String>, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            adapter: adapter.into(),
            backend,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Adapter name.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Starts the session of `tx`; a second acquisition is a contract
    /// violation.
    pub fn acquire(&self, tx: TxId) -> Result<SessionHandle> {
        let mut open = self.open.lock();
        if open.contains_key(&tx) {
            return Err(Error::contract(format!(
                "session for {tx} on {} acquired twice",
                self.adapter
            )));
        }
        self.start_locked(&mut open, tx)
    }

    /// Session of `tx`, started on first use.
    pub fn session_for(&self, tx: TxId) -> Result<SessionHandle> {
        let mut open = self.open.lock();
        match open.get(&tx) {
            Some(session) => Ok(session.clone()),
            None => self.start_locked(&mut open, tx),
        }
    }

    fn start_locked(
        &self,
        open: &mut HashMap<TxId, SessionHandle>,
        tx: TxId,
    ) -> Result<SessionHandle> {
        let id = self.backend.start(tx)?;
        let session = SessionHandle {
            tx,
            adapter: self.adapter.clone(),
            id,
        };
        debug!(adapter = %self.adapter, %tx, session = id, "started session");
        open.insert(tx, session.clone());
        Ok(session)
    }

    /// Whether `tx` has an open session.
    pub fn is_open(&self, tx: TxId) -> bool {
        self.open.lock().contains_key(&tx)
    }

    /// Commits and forgets the session of `tx`; `false` when none was open.
    pub fn commit(&self, tx: TxId) -> Result<bool> {
        let Some(session) = self.open.lock().remove(&tx) else {
            return Ok(false);
        };
        self.backend.commit(&session)?;
        debug!(adapter = %self.adapter, %tx, session = session.id, "committed session");
        Ok(true)
    }

    /// Aborts and forgets the session of `tx`; `false` when none was open.
    pub fn rollback(&self, tx: TxId) -> Result<bool> {
        let Some(session) = self.open.lock().remove(&tx) else {
            return Ok(false);
        };
        warn!(adapter = %self.adapter, %tx, session = session.id, "rolling back session");
        self.backend.abort(&session)?;
        Ok(true)
    }
}
