// In crates/risk/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Order was vetoed by the margin policy: {reason}")]
    Vetoed { reason: String },

    #[error("Invalid margin parameters: {0}")]
    InvalidParameters(String),

    #[error("Order value out of range: {0}")]
    OutOfRange(String),
}

impl From<Error> for core_types::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Vetoed { reason } => core_types::Error::LedgerConsistency(reason),
            Error::InvalidParameters(msg) => core_types::Error::Validation(msg),
            Error::OutOfRange(msg) => core_types::Error::Validation(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
