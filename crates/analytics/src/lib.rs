// In crates/analytics/src/lib.rs

pub mod engine;
pub mod types;

pub use engine::PnlEngine;
pub use types::{AccountSummary, PnlSummary, SymbolPnl};
