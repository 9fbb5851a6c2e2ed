// In crates/core-types/src/error.rs

use thiserror::Error;

/// The error taxonomy shared by every sandbox crate.
///
/// Lower-level crates keep their own error enums and convert into this one at
/// their boundary, so the engine only ever reasons about these variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed order input, rejected before it reaches the book.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Cancel or modify attempted by someone who does not own the order.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Quote unavailable for {symbol} on {exchange}: {reason}")]
    QuoteUnavailable {
        symbol: String,
        exchange: String,
        reason: String,
    },

    /// A fill would break a fund or position invariant (e.g. negative cash).
    #[error("Ledger consistency violation: {0}")]
    LedgerConsistency(String),

    #[error("Scheduler state conflict: {0}")]
    SchedulerState(String),

    /// Storage is unreachable or refused a write. Unrecoverable for the worker.
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl Error {
    /// A status code in the HTTP family, used by the control surface when it
    /// translates an error into a structured response.
    pub fn code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 403,
            Error::NotFound(_) => 404,
            Error::SchedulerState(_) => 409,
            Error::LedgerConsistency(_) => 422,
            Error::Persistence(_) => 500,
            Error::QuoteUnavailable { .. } => 503,
        }
    }

    /// Whether the execution worker must stop when it sees this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
