//! Crate-wide error type.
//!
//! Errors fall into four families: IR contract violations (a bug in an
//! upstream stage, never recovered), unsupported-target errors (a dialect or
//! converter cannot express a construct), backend execution errors (surfaced
//! after the failing transaction's session is rolled back) and iterator
//! runtime errors (propagated unchanged).

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::config::ConfigError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while planning, compiling, emitting or executing a query.
#[derive(Debug, Error)]
pub enum Error {
    /// An upstream stage handed over an IR that breaks a documented invariant.
    #[error("contract violation: {0}")]
    Contract(String),
    /// No converter is registered between two calling conventions.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Convention of the subtree that needs converting.
        from: String,
        /// Convention the parent requires.
        to: String,
    },
    /// A compiler or emitter cannot express a construct.
    #[error("{reason}")]
    Unsupported {
        /// Target that rejected the construct (dialect or convention name).
        target: String,
        /// Name of the offending construct.
        construct: String,
        /// Human-readable explanation.
        reason: String,
    },
    /// A dynamic parameter was referenced without a bound value.
    #[error("no value bound for dynamic parameter ?{0}")]
    UnboundParameter(usize),
    /// Scalar evaluation failed at runtime.
    #[error("evaluation error: {0}")]
    Eval(String),
    /// Catalog lookup failed.
    #[error("table '{0}' not found")]
    TableNotFound(String),
    /// The backing store rejected a generated query or pipeline.
    #[error("backend error on {adapter}: {message}")]
    Backend {
        /// Adapter that reported the failure.
        adapter: String,
        /// Backend message.
        message: String,
    },
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Builds an [`Error::Contract`] and logs it; contract violations point at
    /// a bug in whoever produced the plan.
    pub fn contract(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(%message, "plan contract violated");
        Error::Contract(message)
    }

    /// Builds an [`Error::Unsupported`] naming the target and construct.
    pub fn unsupported(
        target: impl Into<String>,
        construct: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Unsupported {
            target: target.into(),
            construct: construct.into(),
            reason: reason.into(),
        }
    }

    /// Builds an [`Error::Eval`].
    pub fn eval(message: impl Into<String>) -> Self {
        Error::Eval(message.into())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Contract(_) => "ContractViolation",
            Error::UnsupportedConversion { .. } => "UnsupportedConversion",
            Error::Unsupported { .. } => "Unsupported",
            Error::UnboundParameter(_) => "UnboundParameter",
            Error::Eval(_) => "Eval",
            Error::TableNotFound(_) => "TableNotFound",
            Error::Backend { .. } => "Backend",
            Error::Config(_) => "Config",
        }
    }

    /// Whether the error signals a bug in an upstream stage.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract(_))
    }
}

/// Formats an error together with its code, e.g. `[Unsupported] ...`.
pub struct ErrorWithCode<'a>(pub &'a Error);

impl fmt::Display for ErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
