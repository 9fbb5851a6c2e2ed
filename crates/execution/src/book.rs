// In crates/execution/src/book.rs

use chrono::{DateTime, Utc};
use core_types::{
    Error, NewOrder, Order, OrderChanges, OrderId, OrderStatus, OrderType, Result, Symbol, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

/// Largest quantity a single order may carry.
pub const MAX_QUANTITY: Decimal = dec!(1000000000000);
/// Largest limit or trigger price an order may carry.
pub const MAX_PRICE: Decimal = dec!(1000000000000);

/// Every simulated order the sandbox has ever accepted.
///
/// Orders are never removed. Status changes only move forward, and a terminal
/// order is never touched again.
#[derive(Debug, Clone)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    next_id: u64,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rebuilds the book from persisted orders. New ids continue after the highest one.
    pub fn from_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let mut book = Self::new();
        for order in orders {
            book.insert(order);
        }
        book
    }

    /// Checks an incoming order for internal consistency.
    pub fn validate(order: &NewOrder) -> Result<()> {
        if order.user_id.0.trim().is_empty() {
            return Err(Error::Validation("user id is required".into()));
        }
        if order.symbol.0.trim().is_empty() || order.exchange.0.trim().is_empty() {
            return Err(Error::Validation("symbol and exchange are required".into()));
        }
        check_fields(order.order_type, order.quantity, order.limit_price, order.trigger_price)
    }

    /// Validates `new` and builds the order it would become, without storing it.
    ///
    /// The caller persists the returned order and then hands it to [`OrderBook::insert`].
    pub fn prepare(&self, new: NewOrder, now: DateTime<Utc>) -> Result<Order> {
        Self::validate(&new)?;
        let status = if new.order_type.is_stop() {
            OrderStatus::Pending
        } else {
            OrderStatus::Open
        };
        Ok(Order {
            id: OrderId(self.next_id),
            user_id: new.user_id,
            symbol: new.symbol,
            exchange: new.exchange,
            side: new.side,
            order_type: new.order_type,
            quantity: new.quantity,
            limit_price: new.limit_price,
            trigger_price: new.trigger_price,
            product: new.product,
            status,
            filled_price: None,
            triggered: false,
            reason: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
        })
    }

    /// Validates, assigns an id and stores the order.
    pub fn place(&mut self, new: NewOrder, now: DateTime<Utc>) -> Result<OrderId> {
        let order = self.prepare(new, now)?;
        let id = order.id;
        self.insert(order);
        Ok(id)
    }

    /// Stores an order as is, replacing any previous version with the same id.
    ///
    /// Used for prepared orders, for loading from storage and for rolling a
    /// status change back to its prior state.
    pub fn insert(&mut self, order: Order) {
        self.next_id = self.next_id.max(order.id.0 + 1);
        self.orders.insert(order.id, order);
    }

    /// The id the next prepared order will receive.
    pub fn next_id(&self) -> OrderId {
        OrderId(self.next_id)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// All non-terminal orders, optionally for one symbol, in price-time priority
    /// (ascending creation time, ties broken by id).
    pub fn open_orders(&self, symbol: Option<&Symbol>) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| symbol.is_none_or(|s| &o.symbol == s))
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        open
    }

    /// Every order of one user, newest first.
    pub fn orders_for(&self, user_id: &UserId) -> Vec<Order> {
        self.orders
            .values()
            .rev()
            .filter(|o| &o.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Marks an order FILLED at `fill_price`.
    ///
    /// Returns the updated order, or `None` when the order was already terminal
    /// (the call is then a no-op).
    pub fn mark_filled(
        &mut self,
        id: OrderId,
        fill_price: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.transition(id, filled_at, |order| {
            order.status = OrderStatus::Filled;
            order.filled_price = Some(fill_price);
            order.filled_at = Some(filled_at);
        })
    }

    pub fn mark_rejected(
        &mut self,
        id: OrderId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.transition(id, at, |order| {
            order.status = OrderStatus::Rejected;
            order.reason = Some(reason.to_string());
        })
    }

    pub fn mark_cancelled(
        &mut self,
        id: OrderId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.transition(id, at, |order| {
            order.status = OrderStatus::Cancelled;
            order.reason = Some(reason.to_string());
        })
    }

    /// Records that a stop order's trigger was hit. PENDING becomes OPEN.
    pub fn mark_triggered(&mut self, id: OrderId, at: DateTime<Utc>) -> Result<Option<Order>> {
        self.transition(id, at, |order| {
            order.triggered = true;
            order.status = OrderStatus::Open;
        })
    }

    /// Cancels an order on behalf of `user_id`.
    pub fn cancel(&mut self, id: OrderId, user_id: &UserId, at: DateTime<Utc>) -> Result<Order> {
        self.owned_open_order(id, user_id)?;
        self.mark_cancelled(id, "Cancelled by user", at)?
            .ok_or_else(|| Error::Validation(format!("order {} is already closed", id)))
    }

    /// Cancels every non-terminal order of a user. Returns the cancelled orders.
    pub fn cancel_all(&mut self, user_id: &UserId, reason: &str, at: DateTime<Utc>) -> Vec<Order> {
        let ids: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| &o.user_id == user_id && !o.status.is_terminal())
            .map(|o| o.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.mark_cancelled(id, reason, at).ok().flatten())
            .collect()
    }

    /// Amends quantity or prices of a resting order. Creation time, and therefore
    /// queue priority, is kept.
    pub fn modify(
        &mut self,
        id: OrderId,
        user_id: &UserId,
        changes: &OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let current = self.owned_open_order(id, user_id)?;
        let mut amended = current.clone();
        if let Some(quantity) = changes.quantity {
            amended.quantity = quantity;
        }
        if changes.limit_price.is_some() {
            amended.limit_price = changes.limit_price;
        }
        if changes.trigger_price.is_some() {
            amended.trigger_price = changes.trigger_price;
        }
        check_fields(
            amended.order_type,
            amended.quantity,
            amended.limit_price,
            amended.trigger_price,
        )?;
        amended.updated_at = at;
        self.orders.insert(id, amended.clone());
        Ok(amended)
    }

    fn owned_open_order(&self, id: OrderId, user_id: &UserId) -> Result<&Order> {
        let order = self
            .orders
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("order {}", id)))?;
        if &order.user_id != user_id {
            return Err(Error::Unauthorized(format!(
                "order {} does not belong to {}",
                id, user_id
            )));
        }
        if order.status.is_terminal() {
            return Err(Error::Validation(format!(
                "order {} is already {}",
                id, order.status
            )));
        }
        Ok(order)
    }

    fn transition(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
        apply: impl FnOnce(&mut Order),
    ) -> Result<Option<Order>> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("order {}", id)))?;
        if order.status.is_terminal() {
            tracing::warn!(order_id = %id, status = %order.status, "Ignoring transition of a terminal order.");
            return Ok(None);
        }
        apply(order);
        order.updated_at = at;
        Ok(Some(order.clone()))
    }
}

fn check_fields(
    order_type: OrderType,
    quantity: Decimal,
    limit_price: Option<Decimal>,
    trigger_price: Option<Decimal>,
) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(Error::Validation("quantity must be greater than zero".into()));
    }
    if quantity > MAX_QUANTITY {
        return Err(Error::Validation(format!("quantity must not exceed {}", MAX_QUANTITY)));
    }
    if [limit_price, trigger_price].into_iter().flatten().any(|p| p > MAX_PRICE) {
        return Err(Error::Validation(format!("prices must not exceed {}", MAX_PRICE)));
    }
    let positive = |p: Option<Decimal>| p.is_some_and(|v| v > Decimal::ZERO);
    let (needs_limit, needs_trigger) = match order_type {
        OrderType::Market => (false, false),
        OrderType::Limit => (true, false),
        OrderType::Stop => (false, true),
        OrderType::StopLimit => (true, true),
    };
    if needs_limit && !positive(limit_price) {
        return Err(Error::Validation(format!("{} order requires a positive limit price", order_type)));
    }
    if !needs_limit && limit_price.is_some() {
        return Err(Error::Validation(format!("{} order must not carry a limit price", order_type)));
    }
    if needs_trigger && !positive(trigger_price) {
        return Err(Error::Validation(format!("{} order requires a positive trigger price", order_type)));
    }
    if !needs_trigger && trigger_price.is_some() {
        return Err(Error::Validation(format!("{} order must not carry a trigger price", order_type)));
    }
    Ok(())
}
