// In crates/market-data/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build the quote client: {0}")]
    ClientBuildError(String),
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("Quote API error: {msg}")]
    ApiError { msg: String },
    #[error("Malformed quote payload: {0}")]
    MalformedQuote(String),
}

pub type Result<T> = std::result::Result<T, Error>;
