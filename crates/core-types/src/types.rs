// In crates/core-types/src/types.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A simple newtype wrapper for a trading symbol (e.g., "SBIN").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

/// The exchange segment an instrument trades on (e.g., "NSE", "MCX").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Exchange(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Monotonic order identifier. Ids are never reused, including across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

macro_rules! display_newtype {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_newtype!(Symbol, Exchange, UserId, OrderId);

/// Implements `as_str` / `FromStr` / `Display` for the wire names of a plain enum.
macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)*
                    other => Err(Error::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

wire_enum!(Side { Buy => "BUY", Sell => "SELL" });

impl Side {
    /// +1 for buys, -1 for sells. Used to turn quantities into signed exposure.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => dec!(1),
            Side::Sell => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "STOP-LIMIT")]
    StopLimit,
}

wire_enum!(OrderType {
    Market => "MARKET",
    Limit => "LIMIT",
    Stop => "STOP",
    StopLimit => "STOP-LIMIT",
});

impl OrderType {
    pub fn is_stop(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductType {
    #[serde(rename = "INTRADAY")]
    Intraday,
    #[serde(rename = "CARRYFORWARD")]
    CarryForward,
    #[serde(rename = "DELIVERY")]
    Delivery,
}

wire_enum!(ProductType {
    Intraday => "INTRADAY",
    CarryForward => "CARRYFORWARD",
    Delivery => "DELIVERY",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// A stop order waiting for its trigger.
    Pending,
    /// Live and eligible for matching.
    Open,
    Filled,
    Rejected,
    Cancelled,
}

wire_enum!(OrderStatus {
    Pending => "PENDING",
    Open => "OPEN",
    Filled => "FILLED",
    Rejected => "REJECTED",
    Cancelled => "CANCELLED",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }
}

/// An order as submitted by the order-placement layer, before it gets an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub product: ProductType,
}

/// Fields of a resting order that may be amended. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderChanges {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
}

/// A simulated order and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub product: ProductType,
    pub status: OrderStatus,
    /// Set if and only if `status == Filled`.
    pub filled_price: Option<Decimal>,
    /// Stop orders flip this once the trigger condition has been seen.
    pub triggered: bool,
    /// Why the order was rejected or cancelled.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn key(&self) -> PositionKey {
        PositionKey {
            user_id: self.user_id.clone(),
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
            product: self.product,
        }
    }
}

/// Identifies one net position: user + symbol + exchange + product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub product: ProductType,
}

/// Net holding of one symbol/product for one user.
///
/// Closed positions stay in the ledger with `net_quantity == 0` and
/// `average_price == 0`; they are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub product: ProductType,
    /// Positive = long, negative = short.
    pub net_quantity: Decimal,
    pub average_price: Decimal,
    pub realized_pnl: Decimal,
    pub today_realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Margin currently blocked against this exposure.
    pub margin_blocked: Decimal,
    pub last_settlement_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(key: &PositionKey, now: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id.clone(),
            symbol: key.symbol.clone(),
            exchange: key.exchange.clone(),
            product: key.product,
            net_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            today_realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            margin_blocked: Decimal::ZERO,
            last_settlement_date: None,
            updated_at: now,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey {
            user_id: self.user_id.clone(),
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
            product: self.product,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity.is_zero()
    }

    /// Recomputes unrealized P&L against the given last traded price.
    ///
    /// A mark that does not fit a `Decimal` leaves the previous value in place.
    pub fn mark_to_market(&mut self, last_price: Decimal) {
        if self.is_flat() {
            self.unrealized_pnl = Decimal::ZERO;
        } else if let Some(pnl) = last_price
            .checked_sub(self.average_price)
            .and_then(|diff| diff.checked_mul(self.net_quantity))
        {
            self.unrealized_pnl = pnl;
        }
    }
}

/// Cash balance and margin utilisation for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    pub user_id: UserId,
    pub starting_capital: Decimal,
    pub available_cash: Decimal,
    pub collateral: Decimal,
    pub utilized_margin: Decimal,
    /// Running total of all realized P&L.
    pub realized_pnl: Decimal,
    /// Realized P&L since the last daily reset.
    pub today_realized_pnl: Decimal,
    /// Realized gains on carried positions that have not settled yet (T+1).
    pub unsettled_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Fund {
    pub fn new(user_id: UserId, starting_capital: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            starting_capital,
            available_cash: starting_capital,
            collateral: Decimal::ZERO,
            utilized_margin: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            today_realized_pnl: Decimal::ZERO,
            unsettled_pnl: Decimal::ZERO,
            updated_at: now,
        }
    }

    /// Restores the starting balance, keeping the record itself.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Fund::new(self.user_id.clone(), self.starting_capital, now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SettlementKind {
    #[serde(rename = "EOD-SQUAREOFF")]
    EodSquareoff,
    #[serde(rename = "T+1-SETTLEMENT")]
    T1Settlement,
}

wire_enum!(SettlementKind {
    EodSquareoff => "EOD-SQUAREOFF",
    T1Settlement => "T+1-SETTLEMENT",
});

/// Marks that a settlement job ran for a trading day. Unique per (date, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub trading_date: NaiveDate,
    pub kind: SettlementKind,
    pub ran_at: DateTime<Utc>,
}

/// One executed fill. Orders fill in full, so the order id identifies the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub side: Side,
    pub product: ProductType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// A realized gain on a carried product, waiting for its T+1 settlement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSettlement {
    /// The fill that realized the gain. One pending entry per fill at most.
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub product: ProductType,
    pub trade_date: NaiveDate,
    pub amount: Decimal,
}

/// A last traded price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}
