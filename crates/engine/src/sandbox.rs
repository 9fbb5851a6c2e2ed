// In crates/engine/src/sandbox.rs

use crate::config::EngineConfig;
use analytics::{AccountSummary, PnlEngine, PnlSummary};
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{
    Clock, Error, Exchange, Fund, NewOrder, Order, OrderChanges, OrderId, OrderStatus, OrderType,
    Position, PositionKey, ProductType, Quote, Result, SettlementKind, SettlementRecord, Side,
    Symbol, Trade, UserId,
};
use database::{Changeset, Store};
use events::{EventSender, SandboxEvent, SettlementRun, publish};
use execution::{Decision, Fill, Ledger, MatchingEngine, OrderBook};
use market_data::QuoteSource;
use risk::MarginPolicy;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

const SQUAREOFF_REASON: &str = "EOD square-off";

/// Everything that changes on a fill, behind one lock.
#[derive(Debug)]
pub struct SandboxState {
    pub book: OrderBook,
    pub ledger: Ledger,
    pub trades: Vec<Trade>,
    pub last_prices: HashMap<(Symbol, Exchange), Quote>,
}

/// What one tick did to one instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub fills: usize,
    pub triggers: usize,
    pub rejections: usize,
}

/// The collaborators a sandbox is built from.
#[derive(Clone)]
pub struct SandboxDeps {
    pub store: Arc<dyn Store>,
    pub quotes: Arc<dyn QuoteSource>,
    pub policy: Arc<dyn MarginPolicy>,
    pub clock: Arc<dyn Clock>,
    pub events: EventSender,
}

/// The paper-trading account book: orders, ledger and their persistence.
///
/// Every mutation follows the same order: compute the new state on copies,
/// commit it to the store in one changeset, and only then apply it in memory.
/// A failed commit leaves memory exactly as it was.
pub struct Sandbox {
    state: Mutex<SandboxState>,
    deps: SandboxDeps,
    config: EngineConfig,
    matcher: MatchingEngine,
    pnl: PnlEngine,
}

impl Sandbox {
    /// Loads persisted state and builds the sandbox around it.
    pub async fn load(config: EngineConfig, deps: SandboxDeps) -> Result<Self> {
        let snapshot = deps.store.load().await?;
        tracing::info!(
            store = deps.store.name(),
            orders = snapshot.orders.len(),
            positions = snapshot.positions.len(),
            funds = snapshot.funds.len(),
            pending = snapshot.pending.len(),
            "Sandbox state loaded."
        );
        let state = SandboxState {
            book: OrderBook::from_orders(snapshot.orders),
            ledger: Ledger::from_parts(
                config.starting_capital,
                snapshot.positions,
                snapshot.funds,
                snapshot.pending,
            ),
            trades: snapshot.trades,
            last_prices: HashMap::new(),
        };
        Ok(Self {
            state: Mutex::new(state),
            deps,
            config,
            matcher: MatchingEngine::new(),
            pnl: PnlEngine::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.deps.store
    }

    pub fn quotes(&self) -> &Arc<dyn QuoteSource> {
        &self.deps.quotes
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    async fn commit(&self, changes: &Changeset) -> Result<()> {
        self.deps.store.commit(changes).await.map_err(|e| {
            tracing::error!(store = self.deps.store.name(), error = %e, "Store commit failed.");
            Error::from(e)
        })
    }

    // --- Order entry ---

    pub async fn place_order(&self, new: NewOrder) -> Result<Order> {
        let now = self.now();
        let mut state = self.state.lock().await;

        OrderBook::validate(&new)?;
        let fund = state.ledger.fund_or_new(&new.user_id, now);
        let reference = new
            .limit_price
            .or_else(|| {
                state
                    .last_prices
                    .get(&(new.symbol.clone(), new.exchange.clone()))
                    .map(|q| q.price)
            })
            .or(new.trigger_price);
        if let Some(price) = reference {
            if self.reduces_exposure(&state, &new) {
                tracing::debug!(user_id = %new.user_id, symbol = %new.symbol, "Skipping admission check for a reducing order.");
            } else {
                self.deps.policy.check_admission(&new, price, &fund)?;
            }
        }

        let order = state.book.prepare(new, now)?;
        let new_fund = state.ledger.fund(&order.user_id).is_none();
        let changes = Changeset {
            orders: vec![order.clone()],
            funds: if new_fund { vec![fund.clone()] } else { vec![] },
            ..Default::default()
        };
        self.commit(&changes).await?;

        state.book.insert(order.clone());
        if new_fund {
            state.ledger.upsert_fund(fund);
        }
        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.order_type,
            quantity = %order.quantity,
            "Order placed."
        );
        publish(&self.deps.events, SandboxEvent::OrderPlaced(order.clone()));
        Ok(order)
    }

    fn reduces_exposure(&self, state: &SandboxState, new: &NewOrder) -> bool {
        let key = PositionKey {
            user_id: new.user_id.clone(),
            symbol: new.symbol.clone(),
            exchange: new.exchange.clone(),
            product: new.product,
        };
        state.ledger.position(&key).is_some_and(|p| {
            !p.is_flat()
                && p.net_quantity.is_sign_positive() != new.side.sign().is_sign_positive()
                && new.quantity <= p.net_quantity.abs()
        })
    }

    pub async fn modify_order(&self, id: OrderId, user_id: &UserId, changes: OrderChanges) -> Result<Order> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let prior = state
            .book
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {}", id)))?;
        let amended = state.book.modify(id, user_id, &changes, now)?;

        let changeset = Changeset {
            orders: vec![amended.clone()],
            ..Default::default()
        };
        if let Err(e) = self.commit(&changeset).await {
            state.book.insert(prior);
            return Err(e);
        }
        tracing::info!(order_id = %id, quantity = %amended.quantity, "Order modified.");
        publish(&self.deps.events, SandboxEvent::OrderModified(amended.clone()));
        Ok(amended)
    }

    pub async fn cancel_order(&self, id: OrderId, user_id: &UserId) -> Result<Order> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let prior = state
            .book
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {}", id)))?;
        let cancelled = state.book.cancel(id, user_id, now)?;

        let changeset = Changeset {
            orders: vec![cancelled.clone()],
            ..Default::default()
        };
        if let Err(e) = self.commit(&changeset).await {
            state.book.insert(prior);
            return Err(e);
        }
        tracing::info!(order_id = %id, "Order cancelled.");
        publish(&self.deps.events, SandboxEvent::OrderCancelled(cancelled.clone()));
        Ok(cancelled)
    }

    /// Cancels every open or pending order of a user.
    pub async fn cancel_all_orders(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let priors: Vec<Order> = state
            .book
            .orders_for(user_id)
            .into_iter()
            .filter(|o| !o.status.is_terminal())
            .collect();
        let cancelled = state.book.cancel_all(user_id, "Cancelled by user", now);

        let changeset = Changeset {
            orders: cancelled.clone(),
            ..Default::default()
        };
        if let Err(e) = self.commit(&changeset).await {
            for prior in priors {
                state.book.insert(prior);
            }
            return Err(e);
        }
        tracing::info!(user_id = %user_id, count = cancelled.len(), "Cancelled all open orders.");
        for order in &cancelled {
            publish(&self.deps.events, SandboxEvent::OrderCancelled(order.clone()));
        }
        Ok(cancelled)
    }

    /// Flattens one position at the last known price with a synthetic market order.
    ///
    /// Returns `None` when the position is already flat.
    pub async fn close_position(&self, key: &PositionKey) -> Result<Option<Trade>> {
        let price = self.price_for(&key.symbol, &key.exchange).await?;
        let now = self.now();
        let mut state = self.state.lock().await;
        let Some(position) = state.ledger.position(key).filter(|p| !p.is_flat()).cloned() else {
            return Ok(None);
        };
        self.fill_synthetic(&mut state, &position, price, now, "Position closed by user")
            .await
            .map(Some)
    }

    /// Puts a user back to a fresh account: open orders cancelled, positions
    /// zeroed, fund restored to starting capital.
    pub async fn reset_user(&self, user_id: &UserId) -> Result<Fund> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let priors: Vec<Order> = state
            .book
            .orders_for(user_id)
            .into_iter()
            .filter(|o| !o.status.is_terminal())
            .collect();
        let cancelled = state.book.cancel_all(user_id, "Sandbox reset", now);
        let update = state.ledger.reset_user(user_id, now);

        let changeset = Changeset {
            orders: cancelled,
            positions: update.positions.clone(),
            funds: update.funds.clone(),
            pending_cleared: update.cleared.iter().map(|p| p.order_id).collect(),
            ..Default::default()
        };
        if let Err(e) = self.commit(&changeset).await {
            for prior in priors {
                state.book.insert(prior);
            }
            return Err(e);
        }
        let fund = update
            .funds
            .first()
            .cloned()
            .unwrap_or_else(|| Fund::new(user_id.clone(), self.config.starting_capital, now));
        state.ledger.apply_settlement(update);
        tracing::info!(user_id = %user_id, "Sandbox reset.");
        Ok(fund)
    }

    // --- Read contracts ---

    pub async fn orders(&self, user_id: &UserId) -> Vec<Order> {
        self.state.lock().await.book.orders_for(user_id)
    }

    pub async fn order(&self, id: OrderId, user_id: &UserId) -> Result<Order> {
        let state = self.state.lock().await;
        let order = state
            .book
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("order {}", id)))?;
        if &order.user_id != user_id {
            return Err(Error::Unauthorized(format!("order {} does not belong to {}", id, user_id)));
        }
        Ok(order.clone())
    }

    pub async fn open_orders(&self, symbol: Option<&Symbol>) -> Vec<Order> {
        self.state.lock().await.book.open_orders(symbol)
    }

    /// Every fill of a user, newest first.
    pub async fn trades(&self, user_id: &UserId) -> Vec<Trade> {
        let state = self.state.lock().await;
        state
            .trades
            .iter()
            .rev()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn positions(&self, user_id: &UserId) -> Vec<Position> {
        self.state.lock().await.ledger.positions_for(user_id)
    }

    pub async fn position(&self, key: &PositionKey) -> Option<Position> {
        self.state.lock().await.ledger.position(key).cloned()
    }

    /// The user's fund. A user without activity sees a fresh account.
    pub async fn fund(&self, user_id: &UserId) -> Fund {
        let now = self.now();
        self.state.lock().await.ledger.fund_or_new(user_id, now)
    }

    pub async fn day_pnl(&self, user_id: &UserId) -> PnlSummary {
        let now = self.now();
        let state = self.state.lock().await;
        let positions = state.ledger.positions_for(user_id);
        self.pnl.day_pnl_by_symbol(
            user_id,
            &positions,
            &state.trades,
            self.config.trading_date(now),
            self.config.offset,
        )
    }

    pub async fn account_summary(&self, user_id: &UserId) -> AccountSummary {
        let now = self.now();
        let state = self.state.lock().await;
        let fund = state.ledger.fund_or_new(user_id, now);
        self.pnl.account_summary(&fund, &state.ledger.positions_for(user_id))
    }

    /// Instruments the worker has to quote: anything with a live order or an
    /// open position. Sorted, so every tick walks them in the same order.
    pub async fn active_instruments(&self) -> Vec<(Symbol, Exchange)> {
        let state = self.state.lock().await;
        let mut active: BTreeSet<(Symbol, Exchange)> = state
            .book
            .open_orders(None)
            .into_iter()
            .map(|o| (o.symbol, o.exchange))
            .collect();
        active.extend(
            state
                .ledger
                .positions()
                .filter(|p| !p.is_flat())
                .map(|p| (p.symbol.clone(), p.exchange.clone())),
        );
        active.into_iter().collect()
    }

    pub async fn last_price(&self, symbol: &Symbol, exchange: &Exchange) -> Option<Quote> {
        let state = self.state.lock().await;
        state.last_prices.get(&(symbol.clone(), exchange.clone())).copied()
    }

    // --- Matching ---

    /// Runs one matching pass for one instrument.
    ///
    /// Per-order problems (rejections, terminal races) are absorbed here. Only a
    /// persistence failure is returned, and it leaves the failing order and the
    /// ledger as they were before the tick.
    pub async fn process_tick(&self, symbol: &Symbol, exchange: &Exchange, quote: Quote) -> Result<TickReport> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let tick = quote.price;

        state.last_prices.insert((symbol.clone(), exchange.clone()), quote);
        state.ledger.mark_to_market(symbol, exchange, tick);

        let candidates: Vec<Order> = state
            .book
            .open_orders(Some(symbol))
            .into_iter()
            .filter(|o| &o.exchange == exchange)
            .collect();

        let mut report = TickReport::default();
        for (order_id, decision) in self.matcher.plan(&candidates, tick) {
            match decision {
                Decision::Trigger => {
                    if self.trigger_order(&mut state, order_id, now).await? {
                        report.triggers += 1;
                    }
                }
                Decision::Fill { price } => {
                    match self.fill_order(&mut state, order_id, price, now).await? {
                        Some(_) => report.fills += 1,
                        None => report.rejections += 1,
                    }
                }
                Decision::Hold => {}
            }
        }

        if report != TickReport::default() {
            tracing::debug!(symbol = %symbol, exchange = %exchange, price = %tick, ?report, "Tick processed.");
        }
        Ok(report)
    }

    async fn trigger_order(&self, state: &mut SandboxState, id: OrderId, now: DateTime<Utc>) -> Result<bool> {
        let Some(prior) = state.book.get(id).cloned() else {
            return Ok(false);
        };
        let Some(triggered) = state.book.mark_triggered(id, now)? else {
            return Ok(false);
        };
        let changes = Changeset {
            orders: vec![triggered.clone()],
            ..Default::default()
        };
        if let Err(e) = self.commit(&changes).await {
            state.book.insert(prior);
            return Err(e);
        }
        tracing::info!(order_id = %id, trigger_price = ?triggered.trigger_price, "Stop order triggered.");
        publish(&self.deps.events, SandboxEvent::OrderTriggered(triggered));
        Ok(true)
    }

    /// Fills one resting order as a single transaction.
    ///
    /// Returns the trade, or `None` if the order was rejected by the ledger or
    /// was already terminal.
    async fn fill_order(
        &self,
        state: &mut SandboxState,
        id: OrderId,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Trade>> {
        // --- 1. Snapshot and mark ---
        let Some(prior) = state.book.get(id).cloned() else {
            return Ok(None);
        };
        let Some(filled) = state.book.mark_filled(id, price, now)? else {
            return Ok(None);
        };

        // --- 2. Ledger effect on copies ---
        let fill = Fill {
            order_id: id,
            key: filled.key(),
            side: filled.side,
            quantity: filled.quantity,
            price,
            executed_at: now,
            trade_date: self.config.trading_date(now),
        };
        let update = match state.ledger.compute_fill(&fill, self.deps.policy.as_ref()) {
            Ok(update) => update,
            Err(e) => {
                state.book.insert(prior.clone());
                self.reject_order(state, prior, &e.to_string(), now).await?;
                return Ok(None);
            }
        };

        // --- 3. One atomic commit ---
        let changes = Changeset {
            orders: vec![filled.clone()],
            positions: vec![update.position.clone()],
            funds: vec![update.fund.clone()],
            trades: vec![update.trade.clone()],
            pending_added: update.pending.clone().into_iter().collect(),
            ..Default::default()
        };
        if let Err(e) = self.commit(&changes).await {
            state.book.insert(prior);
            return Err(e);
        }

        // --- 4. Apply in memory ---
        let trade = update.trade.clone();
        state.ledger.apply(update);
        state.trades.push(trade.clone());
        tracing::info!(
            order_id = %id,
            user_id = %trade.user_id,
            symbol = %trade.symbol,
            side = %trade.side,
            price = %price,
            quantity = %trade.quantity,
            realized_pnl = %trade.realized_pnl,
            "Order filled."
        );
        publish(&self.deps.events, SandboxEvent::OrderFilled(trade.clone()));
        Ok(Some(trade))
    }

    async fn reject_order(&self, state: &mut SandboxState, prior: Order, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let id = prior.id;
        let Some(rejected) = state.book.mark_rejected(id, reason, now)? else {
            return Ok(());
        };
        let changes = Changeset {
            orders: vec![rejected.clone()],
            ..Default::default()
        };
        if let Err(e) = self.commit(&changes).await {
            state.book.insert(prior);
            return Err(e);
        }
        tracing::warn!(order_id = %id, reason = %reason, "Order rejected.");
        publish(&self.deps.events, SandboxEvent::OrderRejected(rejected));
        Ok(())
    }

    /// Books a synthetic, already-filled market order that flattens `position`.
    async fn fill_synthetic(
        &self,
        state: &mut SandboxState,
        position: &Position,
        price: Decimal,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<Trade> {
        let side = if position.net_quantity.is_sign_positive() {
            Side::Sell
        } else {
            Side::Buy
        };
        let new = NewOrder {
            user_id: position.user_id.clone(),
            symbol: position.symbol.clone(),
            exchange: position.exchange.clone(),
            side,
            order_type: OrderType::Market,
            quantity: position.net_quantity.abs(),
            limit_price: None,
            trigger_price: None,
            product: position.product,
        };
        let mut order = state.book.prepare(new, now)?;
        order.status = OrderStatus::Filled;
        order.filled_price = Some(price);
        order.filled_at = Some(now);
        order.reason = Some(reason.to_string());

        let fill = Fill {
            order_id: order.id,
            key: position.key(),
            side,
            quantity: order.quantity,
            price,
            executed_at: now,
            trade_date: self.config.trading_date(now),
        };
        let update = state.ledger.compute_fill(&fill, self.deps.policy.as_ref())?;
        let changes = Changeset {
            orders: vec![order.clone()],
            positions: vec![update.position.clone()],
            funds: vec![update.fund.clone()],
            trades: vec![update.trade.clone()],
            pending_added: update.pending.clone().into_iter().collect(),
            ..Default::default()
        };
        self.commit(&changes).await?;

        let trade = update.trade.clone();
        state.book.insert(order);
        state.ledger.apply(update);
        state.trades.push(trade.clone());
        tracing::info!(
            order_id = %trade.order_id,
            user_id = %trade.user_id,
            symbol = %trade.symbol,
            price = %price,
            realized_pnl = %trade.realized_pnl,
            reason = %reason,
            "Position closed."
        );
        publish(&self.deps.events, SandboxEvent::OrderFilled(trade.clone()));
        Ok(trade)
    }

    /// Last cached tick, or a fresh quote when the worker has not seen the symbol.
    async fn price_for(&self, symbol: &Symbol, exchange: &Exchange) -> Result<Decimal> {
        if let Some(quote) = self.last_price(symbol, exchange).await {
            return Ok(quote.price);
        }
        let quote = tokio::time::timeout(
            self.config.quote_timeout,
            self.deps.quotes.get_last_price(symbol, exchange),
        )
        .await
        .map_err(|_| Error::QuoteUnavailable {
            symbol: symbol.0.clone(),
            exchange: exchange.0.clone(),
            reason: "timed out".into(),
        })??;
        Ok(quote.price)
    }

    // --- Settlement jobs ---

    /// Closes every open INTRADAY position for trading date `date`.
    ///
    /// Open INTRADAY orders placed on or before `date` are cancelled first. The EOD-SQUAREOFF record is
    /// written only when every position was closed; otherwise the first failure
    /// is returned and the whole job is retried on the next pass.
    pub async fn square_off(&self, date: NaiveDate) -> Result<SettlementRun> {
        // --- 1. Prices, fetched without holding the lock ---
        let targets: Vec<Position> = {
            let state = self.state.lock().await;
            state
                .ledger
                .positions()
                .filter(|p| self.squares_off(p, date))
                .cloned()
                .collect()
        };
        let mut prices: HashMap<(Symbol, Exchange), Result<Decimal>> = HashMap::new();
        for position in &targets {
            let key = (position.symbol.clone(), position.exchange.clone());
            if !prices.contains_key(&key) {
                let price = self.price_for(&position.symbol, &position.exchange).await;
                prices.insert(key, price);
            }
        }

        let now = self.now();
        let mut state = self.state.lock().await;

        // --- 2. Cancel resting intraday orders ---
        let resting: Vec<OrderId> = state
            .book
            .open_orders(None)
            .into_iter()
            .filter(|o| o.product == ProductType::Intraday)
            .filter(|o| self.config.trading_date(o.created_at) <= date)
            .map(|o| o.id)
            .collect();
        for id in resting {
            let Some(prior) = state.book.get(id).cloned() else { continue };
            let Some(cancelled) = state.book.mark_cancelled(id, SQUAREOFF_REASON, now)? else {
                continue;
            };
            let changes = Changeset {
                orders: vec![cancelled.clone()],
                ..Default::default()
            };
            if let Err(e) = self.commit(&changes).await {
                state.book.insert(prior);
                return Err(e);
            }
            publish(&self.deps.events, SandboxEvent::OrderCancelled(cancelled));
        }

        // --- 3. Close positions ---
        let mut closed = 0;
        let mut realized = Decimal::ZERO;
        let mut first_error: Option<Error> = None;
        let open: Vec<Position> = state
            .ledger
            .positions()
            .filter(|p| self.squares_off(p, date))
            .cloned()
            .collect();
        for position in open {
            let key = (position.symbol.clone(), position.exchange.clone());
            let price = match prices.get(&key) {
                Some(Ok(price)) => Ok(*price),
                Some(Err(e)) => Err(e.clone()),
                None => state
                    .last_prices
                    .get(&key)
                    .map(|q| q.price)
                    .ok_or_else(|| Error::QuoteUnavailable {
                        symbol: key.0.0.clone(),
                        exchange: key.1.0.clone(),
                        reason: "no price seen".into(),
                    }),
            };
            let outcome = match price {
                Ok(price) => {
                    self.fill_synthetic(&mut state, &position, price, now, SQUAREOFF_REASON)
                        .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(trade) => {
                    closed += 1;
                    realized += trade.realized_pnl;
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %position.user_id,
                        symbol = %position.symbol,
                        date = %date,
                        error = %e,
                        "Failed to square off position."
                    );
                    let fatal = e.is_fatal();
                    first_error.get_or_insert(e);
                    if fatal {
                        break;
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        // --- 4. Record completion ---
        let record = SettlementRecord {
            trading_date: date,
            kind: SettlementKind::EodSquareoff,
            ran_at: now,
        };
        self.commit(&Changeset {
            settlement: Some(record),
            ..Default::default()
        })
        .await?;

        let run = SettlementRun {
            trading_date: date,
            kind: SettlementKind::EodSquareoff,
            ran_at: now,
            affected: closed,
            realized_pnl: realized,
        };
        tracing::info!(date = %date, closed, realized_pnl = %realized, "EOD square-off complete.");
        publish(&self.deps.events, SandboxEvent::SquareOff(run.clone()));
        Ok(run)
    }

    /// Open INTRADAY exposure that belongs to the session of `date` or earlier.
    /// A replayed past date never closes a position opened after it.
    fn squares_off(&self, position: &Position, date: NaiveDate) -> bool {
        position.product == ProductType::Intraday
            && !position.is_flat()
            && self.config.trading_date(position.updated_at) <= date
    }

    /// T+1 settlement for trading date `date`: releases pending gains from
    /// earlier dates, rolls carried positions and resets daily P&L.
    pub async fn settle(&self, date: NaiveDate) -> Result<SettlementRun> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let update = state.ledger.settle(date, self.config.offset);
        let released: Decimal = update.cleared.iter().map(|p| p.amount).sum();
        let affected = update.cleared.len();

        let changes = Changeset {
            positions: update.positions.clone(),
            funds: update.funds.clone(),
            pending_cleared: update.cleared.iter().map(|p| p.order_id).collect(),
            settlement: Some(SettlementRecord {
                trading_date: date,
                kind: SettlementKind::T1Settlement,
                ran_at: now,
            }),
            ..Default::default()
        };
        self.commit(&changes).await?;
        state.ledger.apply_settlement(update);

        let run = SettlementRun {
            trading_date: date,
            kind: SettlementKind::T1Settlement,
            ran_at: now,
            affected,
            realized_pnl: released,
        };
        tracing::info!(date = %date, settled = affected, amount = %released, "T+1 settlement complete.");
        publish(&self.deps.events, SandboxEvent::Settlement(run.clone()));
        Ok(run)
    }
}
