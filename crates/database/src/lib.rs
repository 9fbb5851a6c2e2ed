// In crates/database/src/lib.rs

use app_config::types::DatabaseSettings;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{
    Fund, Order, OrderId, PendingSettlement, Position, SettlementKind, SettlementRecord, Trade,
};
use std::sync::Arc;

pub mod error;
pub mod memory;
pub mod postgres;
mod rows;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Everything the sandbox keeps, as loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub funds: Vec<Fund>,
    pub trades: Vec<Trade>,
    pub pending: Vec<PendingSettlement>,
    pub settlements: Vec<SettlementRecord>,
}

/// A set of writes that must land together or not at all.
///
/// Rows are upserted by their natural key. Trades, pending entries and
/// settlement records are insert-only; a duplicate is silently skipped.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub funds: Vec<Fund>,
    pub trades: Vec<Trade>,
    pub pending_added: Vec<PendingSettlement>,
    /// Pending entries to delete, by the order that created them.
    pub pending_cleared: Vec<OrderId>,
    pub settlement: Option<SettlementRecord>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.positions.is_empty()
            && self.funds.is_empty()
            && self.trades.is_empty()
            && self.pending_added.is_empty()
            && self.pending_cleared.is_empty()
            && self.settlement.is_none()
    }
}

/// The universal interface for sandbox persistence.
///
/// `commit` is the only write path for ledger data and must be atomic.
#[async_trait]
pub trait Store: Send + Sync {
    /// The name of the backing store.
    fn name(&self) -> &'static str;

    async fn load(&self) -> Result<Snapshot>;

    async fn commit(&self, changes: &Changeset) -> Result<()>;

    async fn has_settlement_record(&self, date: NaiveDate, kind: SettlementKind) -> Result<bool>;

    /// Settlement records with `from <= trading_date <= to`, oldest first.
    async fn settlement_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SettlementRecord>>;

    async fn get_analyze_mode(&self) -> Result<bool>;

    async fn set_analyze_mode(&self, enabled: bool) -> Result<()>;
}

/// Opens the configured store: PostgreSQL when a URL is set, memory otherwise.
pub async fn open_store(settings: &DatabaseSettings) -> Result<Arc<dyn Store>> {
    match settings.url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, settings.max_connections).await?;
            tracing::info!("Connected to PostgreSQL sandbox store.");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No database URL configured; sandbox state will not survive a restart.");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
