// In crates/execution/src/lib.rs

//! The synchronous core of the sandbox: the order book, the position and fund
//! ledger, and the tick matching rules.
//!
//! Nothing in here performs I/O. The engine crate wraps these structures in a
//! lock, persists every change, and only then applies it in memory.

pub mod book;
pub mod ledger;
pub mod matching;

pub use book::OrderBook;
pub use ledger::{Fill, Ledger, LedgerUpdate, SettlementUpdate};
pub use matching::{Decision, MatchingEngine};
