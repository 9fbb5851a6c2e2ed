// In crates/analytics/src/types.rs

use chrono::NaiveDate;
use core_types::{Exchange, Symbol, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

/// Day P&L for one symbol, all products combined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolPnl {
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub net_quantity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    /// Fills executed on the reporting date.
    pub trades: u32,
    pub fees: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlSummary {
    pub user_id: UserId,
    pub trading_date: NaiveDate,
    pub symbols: Vec<SymbolPnl>,
    pub total_realized: Decimal,
    pub total_unrealized: Decimal,
    pub total_pnl: Decimal,
}

/// A snapshot of one user's sandbox account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub user_id: UserId,
    pub starting_capital: Decimal,
    pub available_cash: Decimal,
    pub utilized_margin: Decimal,
    pub unsettled_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub today_realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Cash + blocked margin + unsettled gains + open P&L.
    pub equity: Decimal,
    pub return_percentage: f64,
    pub open_positions: u32,
}
