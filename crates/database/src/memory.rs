// In crates/database/src/memory.rs

use crate::{Changeset, Error, Result, Snapshot, Store};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{
    Fund, Order, OrderId, PendingSettlement, Position, PositionKey, SettlementKind,
    SettlementRecord, Trade, UserId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    positions: BTreeMap<PositionKey, Position>,
    funds: BTreeMap<UserId, Fund>,
    trades: BTreeMap<OrderId, Trade>,
    pending: BTreeMap<OrderId, PendingSettlement>,
    settlements: BTreeMap<(NaiveDate, SettlementKind), SettlementRecord>,
    analyze_mode: bool,
}

/// A process-local store. Used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_commits: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `commit` fail until switched off again.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Makes settlement-record and analyze-mode lookups fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("read refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "MemoryStore"
    }

    async fn load(&self) -> Result<Snapshot> {
        let tables = self.tables.lock().await;
        Ok(Snapshot {
            orders: tables.orders.values().cloned().collect(),
            positions: tables.positions.values().cloned().collect(),
            funds: tables.funds.values().cloned().collect(),
            trades: tables.trades.values().cloned().collect(),
            pending: tables.pending.values().cloned().collect(),
            settlements: tables.settlements.values().cloned().collect(),
        })
    }

    async fn commit(&self, changes: &Changeset) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("commit refused".into()));
        }
        let mut tables = self.tables.lock().await;
        for order in &changes.orders {
            tables.orders.insert(order.id, order.clone());
        }
        for position in &changes.positions {
            tables.positions.insert(position.key(), position.clone());
        }
        for fund in &changes.funds {
            tables.funds.insert(fund.user_id.clone(), fund.clone());
        }
        for trade in &changes.trades {
            tables.trades.entry(trade.order_id).or_insert_with(|| trade.clone());
        }
        for pending in &changes.pending_added {
            tables.pending.entry(pending.order_id).or_insert_with(|| pending.clone());
        }
        for order_id in &changes.pending_cleared {
            tables.pending.remove(order_id);
        }
        if let Some(record) = &changes.settlement {
            tables
                .settlements
                .entry((record.trading_date, record.kind))
                .or_insert_with(|| record.clone());
        }
        Ok(())
    }

    async fn has_settlement_record(&self, date: NaiveDate, kind: SettlementKind) -> Result<bool> {
        self.check_reads()?;
        Ok(self.tables.lock().await.settlements.contains_key(&(date, kind)))
    }

    async fn settlement_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SettlementRecord>> {
        self.check_reads()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .settlements
            .values()
            .filter(|r| r.trading_date >= from && r.trading_date <= to)
            .cloned()
            .collect())
    }

    async fn get_analyze_mode(&self) -> Result<bool> {
        self.check_reads()?;
        Ok(self.tables.lock().await.analyze_mode)
    }

    async fn set_analyze_mode(&self, enabled: bool) -> Result<()> {
        self.tables.lock().await.analyze_mode = enabled;
        Ok(())
    }
}
