// In crates/core-types/src/lib.rs

pub mod clock;
pub mod error;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use types::{
    Exchange, Fund, NewOrder, Order, OrderChanges, OrderId, OrderStatus, OrderType,
    PendingSettlement, Position, PositionKey, ProductType, Quote, SettlementKind,
    SettlementRecord, Side, Symbol, Trade, UserId,
};
