// In crates/market-data/src/lib.rs

use async_trait::async_trait;
use core_types::{Exchange, Quote, Symbol};

pub mod calendar;
pub mod error;
pub mod http;
pub mod static_source;

// Re-export public types
pub use calendar::{HolidayCalendar, TradingCalendar};
pub use error::{Error, Result};
pub use http::HttpQuoteSource;
pub use static_source::StaticQuoteSource;

/// The universal interface for a last-traded-price provider.
///
/// Implementations may block on I/O; callers bound every call with a timeout.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// The name of the source (e.g., "HttpQuoteSource").
    fn name(&self) -> &'static str;

    /// Returns the latest traded price for `symbol` on `exchange`.
    ///
    /// Fails with `core_types::Error::QuoteUnavailable` when the source has no
    /// price for the instrument or cannot be reached.
    async fn get_last_price(&self, symbol: &Symbol, exchange: &Exchange) -> core_types::Result<Quote>;
}
