// In crates/database/src/rows.rs

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{
    Exchange, Fund, Order, OrderId, PendingSettlement, Position, SettlementRecord, Symbol, Trade,
    UserId,
};
use rust_decimal::Decimal;
use sqlx::FromRow;
use std::str::FromStr;

fn parse<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr<Err = core_types::Error>,
{
    value
        .parse()
        .map_err(|e| Error::CorruptRow(format!("{}: {}", column, e)))
}

fn order_id(value: i64) -> Result<OrderId> {
    u64::try_from(value)
        .map(OrderId)
        .map_err(|_| Error::CorruptRow(format!("negative order id {}", value)))
}

pub(crate) fn db_id(id: OrderId) -> Result<i64> {
    i64::try_from(id.0).map_err(|_| Error::CorruptRow(format!("order id {} out of range", id)))
}

#[derive(Debug, FromRow)]
pub(crate) struct OrderRow {
    pub id: i64,
    pub user_id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: String,
    pub order_type: String,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub product: String,
    pub status: String,
    pub filled_price: Option<Decimal>,
    pub triggered: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = Error;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Order {
            id: order_id(row.id)?,
            user_id: UserId(row.user_id),
            symbol: Symbol(row.symbol),
            exchange: Exchange(row.exchange),
            side: parse("side", &row.side)?,
            order_type: parse("order_type", &row.order_type)?,
            quantity: row.quantity,
            limit_price: row.limit_price,
            trigger_price: row.trigger_price,
            product: parse("product", &row.product)?,
            status: parse("status", &row.status)?,
            filled_price: row.filled_price,
            triggered: row.triggered,
            reason: row.reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            filled_at: row.filled_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PositionRow {
    pub user_id: String,
    pub symbol: String,
    pub exchange: String,
    pub product: String,
    pub net_quantity: Decimal,
    pub average_price: Decimal,
    pub realized_pnl: Decimal,
    pub today_realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub margin_blocked: Decimal,
    pub last_settlement_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for Position {
    type Error = Error;

    fn try_from(row: PositionRow) -> Result<Self> {
        Ok(Position {
            user_id: UserId(row.user_id),
            symbol: Symbol(row.symbol),
            exchange: Exchange(row.exchange),
            product: parse("product", &row.product)?,
            net_quantity: row.net_quantity,
            average_price: row.average_price,
            realized_pnl: row.realized_pnl,
            today_realized_pnl: row.today_realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
            margin_blocked: row.margin_blocked,
            last_settlement_date: row.last_settlement_date,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct FundRow {
    pub user_id: String,
    pub starting_capital: Decimal,
    pub available_cash: Decimal,
    pub collateral: Decimal,
    pub utilized_margin: Decimal,
    pub realized_pnl: Decimal,
    pub today_realized_pnl: Decimal,
    pub unsettled_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<FundRow> for Fund {
    fn from(row: FundRow) -> Self {
        Fund {
            user_id: UserId(row.user_id),
            starting_capital: row.starting_capital,
            available_cash: row.available_cash,
            collateral: row.collateral,
            utilized_margin: row.utilized_margin,
            realized_pnl: row.realized_pnl,
            today_realized_pnl: row.today_realized_pnl,
            unsettled_pnl: row.unsettled_pnl,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TradeRow {
    pub order_id: i64,
    pub user_id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: String,
    pub product: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl TryFrom<TradeRow> for Trade {
    type Error = Error;

    fn try_from(row: TradeRow) -> Result<Self> {
        Ok(Trade {
            order_id: order_id(row.order_id)?,
            user_id: UserId(row.user_id),
            symbol: Symbol(row.symbol),
            exchange: Exchange(row.exchange),
            side: parse("side", &row.side)?,
            product: parse("product", &row.product)?,
            quantity: row.quantity,
            price: row.price,
            fee: row.fee,
            realized_pnl: row.realized_pnl,
            executed_at: row.executed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PendingRow {
    pub order_id: i64,
    pub user_id: String,
    pub symbol: String,
    pub exchange: String,
    pub product: String,
    pub trade_date: NaiveDate,
    pub amount: Decimal,
}

impl TryFrom<PendingRow> for PendingSettlement {
    type Error = Error;

    fn try_from(row: PendingRow) -> Result<Self> {
        Ok(PendingSettlement {
            order_id: order_id(row.order_id)?,
            user_id: UserId(row.user_id),
            symbol: Symbol(row.symbol),
            exchange: Exchange(row.exchange),
            product: parse("product", &row.product)?,
            trade_date: row.trade_date,
            amount: row.amount,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SettlementRow {
    pub trading_date: NaiveDate,
    pub kind: String,
    pub ran_at: DateTime<Utc>,
}

impl TryFrom<SettlementRow> for SettlementRecord {
    type Error = Error;

    fn try_from(row: SettlementRow) -> Result<Self> {
        Ok(SettlementRecord {
            trading_date: row.trading_date,
            kind: parse("kind", &row.kind)?,
            ran_at: row.ran_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_types::SettlementKind;

    #[test]
    fn test_unknown_kind_is_corrupt_row() {
        let row = SettlementRow {
            trading_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            kind: "WEEKLY".into(),
            ran_at: Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap(),
        };
        assert!(matches!(SettlementRecord::try_from(row), Err(Error::CorruptRow(_))));
    }

    #[test]
    fn test_settlement_row_round_trips_wire_name() {
        let row = SettlementRow {
            trading_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            kind: SettlementKind::T1Settlement.as_str().into(),
            ran_at: Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap(),
        };
        let record = SettlementRecord::try_from(row).unwrap();
        assert_eq!(record.kind, SettlementKind::T1Settlement);
    }

    #[test]
    fn test_negative_id_is_rejected() {
        assert!(order_id(-1).is_err());
        assert_eq!(db_id(OrderId(42)).unwrap(), 42);
    }
}
