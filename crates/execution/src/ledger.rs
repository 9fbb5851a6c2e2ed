// In crates/execution/src/ledger.rs

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use core_types::{
    Error, Exchange, Fund, OrderId, PendingSettlement, Position, PositionKey, ProductType, Result,
    Side, Symbol, Trade, UserId,
};
use risk::MarginPolicy;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One execution to be booked against a position.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: OrderId,
    pub key: PositionKey,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
    /// Trading date the fill belongs to, in exchange-local time.
    pub trade_date: NaiveDate,
}

/// The full effect of a fill, computed on copies and not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub position: Position,
    pub fund: Fund,
    pub trade: Trade,
    pub pending: Option<PendingSettlement>,
    pub realized_pnl: Decimal,
}

/// A batch of ledger rewrites produced by a settlement run or a sandbox reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementUpdate {
    pub funds: Vec<Fund>,
    pub positions: Vec<Position>,
    /// Pending entries that leave the ledger with this batch.
    pub cleared: Vec<PendingSettlement>,
}

impl SettlementUpdate {
    pub fn is_empty(&self) -> bool {
        self.funds.is_empty() && self.positions.is_empty() && self.cleared.is_empty()
    }
}

/// Positions, funds and unsettled gains for every sandbox user.
#[derive(Debug, Clone)]
pub struct Ledger {
    starting_capital: Decimal,
    positions: BTreeMap<PositionKey, Position>,
    funds: BTreeMap<UserId, Fund>,
    pending: Vec<PendingSettlement>,
}

impl Ledger {
    pub fn new(starting_capital: Decimal) -> Self {
        Self {
            starting_capital,
            positions: BTreeMap::new(),
            funds: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Rebuilds the ledger from persisted rows.
    pub fn from_parts(
        starting_capital: Decimal,
        positions: impl IntoIterator<Item = Position>,
        funds: impl IntoIterator<Item = Fund>,
        pending: Vec<PendingSettlement>,
    ) -> Self {
        Self {
            starting_capital,
            positions: positions.into_iter().map(|p| (p.key(), p)).collect(),
            funds: funds.into_iter().map(|f| (f.user_id.clone(), f)).collect(),
            pending,
        }
    }

    pub fn starting_capital(&self) -> Decimal {
        self.starting_capital
    }

    pub fn fund(&self, user_id: &UserId) -> Option<&Fund> {
        self.funds.get(user_id)
    }

    /// The user's fund, or a fresh one at starting capital if the user is new.
    /// Nothing is stored; the caller persists and then upserts it.
    pub fn fund_or_new(&self, user_id: &UserId, now: DateTime<Utc>) -> Fund {
        self.funds
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Fund::new(user_id.clone(), self.starting_capital, now))
    }

    pub fn funds(&self) -> impl Iterator<Item = &Fund> {
        self.funds.values()
    }

    pub fn upsert_fund(&mut self, fund: Fund) {
        self.funds.insert(fund.user_id.clone(), fund);
    }

    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn positions_for(&self, user_id: &UserId) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| &p.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn upsert_position(&mut self, position: Position) {
        self.positions.insert(position.key(), position);
    }

    pub fn pending(&self) -> &[PendingSettlement] {
        &self.pending
    }

    /// Computes the effect of `fill` without touching the ledger.
    ///
    /// The fill is split into a part that reduces the current exposure and a
    /// part that opens or adds to it. The reducing part realizes P&L against
    /// the average price and releases its share of blocked margin. The adding
    /// part moves the average price and blocks fresh margin.
    ///
    /// # Errors
    ///
    /// * `NotFound` when the user has no fund.
    /// * `LedgerConsistency` when added exposure would take available cash below zero.
    pub fn compute_fill(&self, fill: &Fill, policy: &dyn MarginPolicy) -> Result<LedgerUpdate> {
        let user_id = &fill.key.user_id;
        let mut fund = self
            .funds
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no fund for user {}", user_id)))?;
        let mut position = self
            .positions
            .get(&fill.key)
            .cloned()
            .unwrap_or_else(|| Position::new(&fill.key, fill.executed_at));

        if fill.quantity <= Decimal::ZERO || fill.price <= Decimal::ZERO {
            return Err(Error::LedgerConsistency(format!(
                "fill for order {} has non-positive quantity or price",
                fill.order_id
            )));
        }

        // Every amount below is checked; an unrepresentable value rejects the fill.
        let checked = |value: Option<Decimal>| {
            value.ok_or_else(|| {
                Error::LedgerConsistency(format!("amounts for order {} are out of range", fill.order_id))
            })
        };
        let from_policy = |e: risk::Error| Error::LedgerConsistency(e.to_string());

        let signed = fill.side.sign() * fill.quantity;
        let old_net = position.net_quantity;
        let reducing = !old_net.is_zero() && old_net.is_sign_positive() != signed.is_sign_positive();

        // --- 1. Reduce the existing exposure ---
        let (closing_qty, realized, released) = if reducing {
            let closing_qty = fill.quantity.min(old_net.abs());
            let direction = if old_net.is_sign_positive() { Decimal::ONE } else { -Decimal::ONE };
            let realized = checked(
                fill.price
                    .checked_sub(position.average_price)
                    .and_then(|diff| diff.checked_mul(closing_qty)),
            )? * direction;
            let released = checked(
                position
                    .margin_blocked
                    .checked_mul(closing_qty)
                    .and_then(|m| m.checked_div(old_net.abs())),
            )?;
            (closing_qty, realized, released)
        } else {
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        };

        // --- 2. Open or add exposure with what is left ---
        let opening_qty = fill.quantity - closing_qty;
        let new_net = checked(old_net.checked_add(signed))?;
        let added_margin = if opening_qty > Decimal::ZERO {
            policy
                .required_margin(fill.key.product, fill.price, opening_qty)
                .map_err(from_policy)?
        } else {
            Decimal::ZERO
        };

        position.average_price = if new_net.is_zero() {
            Decimal::ZERO
        } else if reducing && opening_qty.is_zero() {
            position.average_price
        } else if reducing {
            // Reversal: the remainder opens at the fill price.
            fill.price
        } else {
            let held = old_net.abs().checked_mul(position.average_price);
            let added = opening_qty.checked_mul(fill.price);
            checked(
                held.zip(added)
                    .and_then(|(held, added)| held.checked_add(added))
                    .and_then(|cost| cost.checked_div(new_net.abs())),
            )?
        };
        position.net_quantity = new_net;
        position.margin_blocked = if new_net.is_zero() {
            Decimal::ZERO
        } else {
            checked(
                position
                    .margin_blocked
                    .checked_sub(released)
                    .and_then(|m| m.checked_add(added_margin)),
            )?
        };
        position.realized_pnl = checked(position.realized_pnl.checked_add(realized))?;
        position.today_realized_pnl = checked(position.today_realized_pnl.checked_add(realized))?;
        position.updated_at = fill.executed_at;
        position.mark_to_market(fill.price);

        // --- 3. Cash movement ---
        let fee = policy.fee(fill.price, fill.quantity).map_err(from_policy)?;
        fund.available_cash = checked(
            fund.available_cash
                .checked_add(released)
                .and_then(|c| c.checked_sub(added_margin))
                .and_then(|c| c.checked_sub(fee)),
        )?;
        fund.utilized_margin = checked(
            fund.utilized_margin
                .checked_add(added_margin)
                .and_then(|m| m.checked_sub(released)),
        )?;
        fund.realized_pnl = checked(fund.realized_pnl.checked_add(realized))?;
        fund.today_realized_pnl = checked(fund.today_realized_pnl.checked_add(realized))?;

        let defer = realized > Decimal::ZERO && fill.key.product != ProductType::Intraday;
        let pending = if defer {
            fund.unsettled_pnl = checked(fund.unsettled_pnl.checked_add(realized))?;
            Some(PendingSettlement {
                order_id: fill.order_id,
                user_id: user_id.clone(),
                symbol: fill.key.symbol.clone(),
                exchange: fill.key.exchange.clone(),
                product: fill.key.product,
                trade_date: fill.trade_date,
                amount: realized,
            })
        } else {
            fund.available_cash = checked(fund.available_cash.checked_add(realized))?;
            None
        };
        fund.updated_at = fill.executed_at;

        if opening_qty > Decimal::ZERO && fund.available_cash < Decimal::ZERO {
            return Err(Error::LedgerConsistency(format!(
                "Insufficient funds: order {} needs {} more than available",
                fill.order_id,
                (-fund.available_cash).round_dp(2)
            )));
        }

        let trade = Trade {
            order_id: fill.order_id,
            user_id: user_id.clone(),
            symbol: fill.key.symbol.clone(),
            exchange: fill.key.exchange.clone(),
            side: fill.side,
            product: fill.key.product,
            quantity: fill.quantity,
            price: fill.price,
            fee,
            realized_pnl: realized,
            executed_at: fill.executed_at,
        };

        Ok(LedgerUpdate {
            position,
            fund,
            trade,
            pending,
            realized_pnl: realized,
        })
    }

    /// Applies a previously computed fill. Call only after the update is persisted.
    pub fn apply(&mut self, update: LedgerUpdate) {
        self.upsert_position(update.position);
        self.upsert_fund(update.fund);
        if let Some(pending) = update.pending {
            self.pending.push(pending);
        }
    }

    /// Refreshes unrealized P&L of every open position in `symbol` on `exchange`.
    pub fn mark_to_market(&mut self, symbol: &Symbol, exchange: &Exchange, price: Decimal) {
        for position in self
            .positions
            .values_mut()
            .filter(|p| &p.symbol == symbol && &p.exchange == exchange)
        {
            position.mark_to_market(price);
        }
    }

    /// Computes the T+1 run for `date`.
    ///
    /// Pending gains with a trade date strictly before `date` move into available
    /// cash and open carried positions are stamped with `date`. Daily realized
    /// P&L is reset only where the last fill belongs to an earlier trading date
    /// (local to `offset`), so a run never wipes the counters of its own
    /// session or of a later one. `updated_at` keeps the time of the last fill.
    pub fn settle(&self, date: NaiveDate, offset: FixedOffset) -> SettlementUpdate {
        let before = |at: DateTime<Utc>| at.with_timezone(&offset).date_naive() < date;
        let mut funds = self.funds.clone();
        let cleared: Vec<PendingSettlement> = self
            .pending
            .iter()
            .filter(|p| p.trade_date < date)
            .cloned()
            .collect();

        for entry in &cleared {
            match funds.get_mut(&entry.user_id) {
                Some(fund) => {
                    fund.available_cash += entry.amount;
                    fund.unsettled_pnl -= entry.amount;
                }
                None => {
                    tracing::warn!(user_id = %entry.user_id, order_id = %entry.order_id, "Pending settlement without a fund; dropping it.");
                }
            }
        }
        for fund in funds.values_mut().filter(|f| before(f.updated_at)) {
            fund.today_realized_pnl = Decimal::ZERO;
        }

        let positions = self
            .positions
            .values()
            .filter_map(|p| {
                let roll = !p.is_flat() && p.product != ProductType::Intraday;
                let reset = !p.today_realized_pnl.is_zero() && before(p.updated_at);
                if !roll && !reset {
                    return None;
                }
                let mut p = p.clone();
                if reset {
                    p.today_realized_pnl = Decimal::ZERO;
                }
                if roll {
                    p.last_settlement_date = Some(date);
                }
                Some(p)
            })
            .collect();

        SettlementUpdate {
            funds: funds.into_values().collect(),
            positions,
            cleared,
        }
    }

    /// Computes a full reset of one user: fund back to starting capital,
    /// positions zeroed (records kept) and unsettled gains discarded.
    pub fn reset_user(&self, user_id: &UserId, now: DateTime<Utc>) -> SettlementUpdate {
        let mut fund = self.fund_or_new(user_id, now);
        fund.reset(now);
        let positions = self
            .positions
            .values()
            .filter(|p| &p.user_id == user_id)
            .map(|p| {
                let mut p = Position::new(&p.key(), now);
                p.updated_at = now;
                p
            })
            .collect();
        let cleared = self
            .pending
            .iter()
            .filter(|p| &p.user_id == user_id)
            .cloned()
            .collect();
        SettlementUpdate {
            funds: vec![fund],
            positions,
            cleared,
        }
    }

    pub fn apply_settlement(&mut self, update: SettlementUpdate) {
        for fund in update.funds {
            self.upsert_fund(fund);
        }
        for position in update.positions {
            self.upsert_position(position);
        }
        let cleared: Vec<OrderId> = update.cleared.iter().map(|p| p.order_id).collect();
        self.pending.retain(|p| !cleared.contains(&p.order_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use risk::SimpleMarginPolicy;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 5, 0, 0).unwrap()
    }

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn key(product: ProductType) -> PositionKey {
        PositionKey {
            user_id: UserId("u1".into()),
            symbol: Symbol("SBIN".into()),
            exchange: Exchange("NSE".into()),
            product,
        }
    }

    fn ledger(capital: Decimal) -> Ledger {
        let mut ledger = Ledger::new(capital);
        let fund = ledger.fund_or_new(&UserId("u1".into()), now());
        ledger.upsert_fund(fund);
        ledger
    }

    fn book(ledger: &mut Ledger, id: u64, product: ProductType, side: Side, qty: Decimal, price: Decimal) -> LedgerUpdate {
        let fill = Fill {
            order_id: OrderId(id),
            key: key(product),
            side,
            quantity: qty,
            price,
            executed_at: now(),
            trade_date: day(4),
        };
        let update = ledger
            .compute_fill(&fill, &SimpleMarginPolicy::cash_only())
            .unwrap();
        ledger.apply(update.clone());
        update
    }

    #[test]
    fn test_weighted_average_on_increasing_fills() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Intraday, Side::Buy, dec!(10), dec!(100));
        book(&mut ledger, 2, ProductType::Intraday, Side::Buy, dec!(30), dec!(120));

        let position = ledger.position(&key(ProductType::Intraday)).unwrap();
        assert_eq!(position.net_quantity, dec!(40));
        assert_eq!(position.average_price, dec!(115));
        assert_eq!(position.margin_blocked, dec!(4600));
        assert_eq!(ledger.fund(&UserId("u1".into())).unwrap().available_cash, dec!(95400));
    }

    #[rstest]
    #[case(Side::Buy, dec!(100), dec!(110), dec!(50))]
    #[case(Side::Buy, dec!(100), dec!(90), dec!(-50))]
    #[case(Side::Sell, dec!(100), dec!(90), dec!(50))]
    fn test_round_trip_realizes_price_difference(
        #[case] entry_side: Side,
        #[case] entry: Decimal,
        #[case] exit: Decimal,
        #[case] expected: Decimal,
    ) {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Intraday, entry_side, dec!(5), entry);
        let update = book(&mut ledger, 2, ProductType::Intraday, entry_side.opposite(), dec!(5), exit);

        assert_eq!(update.realized_pnl, expected);
        let position = ledger.position(&key(ProductType::Intraday)).unwrap();
        assert!(position.is_flat());
        assert_eq!(position.average_price, Decimal::ZERO);
        assert_eq!(position.margin_blocked, Decimal::ZERO);

        let fund = ledger.fund(&UserId("u1".into())).unwrap();
        assert_eq!(fund.available_cash, dec!(100000) + expected);
        assert_eq!(fund.utilized_margin, Decimal::ZERO);
    }

    #[test]
    fn test_reversal_opens_remainder_at_fill_price() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Intraday, Side::Buy, dec!(10), dec!(100));
        let update = book(&mut ledger, 2, ProductType::Intraday, Side::Sell, dec!(15), dec!(110));

        assert_eq!(update.realized_pnl, dec!(100));
        let position = ledger.position(&key(ProductType::Intraday)).unwrap();
        assert_eq!(position.net_quantity, dec!(-5));
        assert_eq!(position.average_price, dec!(110));
        assert_eq!(position.margin_blocked, dec!(550));
    }

    #[test]
    fn test_partial_reduce_keeps_average_and_releases_share_of_margin() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Intraday, Side::Buy, dec!(10), dec!(100));
        book(&mut ledger, 2, ProductType::Intraday, Side::Sell, dec!(4), dec!(105));

        let position = ledger.position(&key(ProductType::Intraday)).unwrap();
        assert_eq!(position.net_quantity, dec!(6));
        assert_eq!(position.average_price, dec!(100));
        assert_eq!(position.margin_blocked, dec!(600));
        assert_eq!(position.realized_pnl, dec!(20));
    }

    #[test]
    fn test_unaffordable_fill_is_a_ledger_violation() {
        let ledger = ledger(dec!(500));
        let fill = Fill {
            order_id: OrderId(1),
            key: key(ProductType::Delivery),
            side: Side::Buy,
            quantity: dec!(10),
            price: dec!(100),
            executed_at: now(),
            trade_date: day(4),
        };
        let err = ledger
            .compute_fill(&fill, &SimpleMarginPolicy::cash_only())
            .unwrap_err();
        assert!(matches!(err, Error::LedgerConsistency(_)));
        assert_eq!(ledger.fund(&UserId("u1".into())).unwrap().available_cash, dec!(500));
    }

    #[test]
    fn test_unknown_fund_is_not_found() {
        let ledger = Ledger::new(dec!(1000));
        let fill = Fill {
            order_id: OrderId(1),
            key: key(ProductType::Intraday),
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(10),
            executed_at: now(),
            trade_date: day(4),
        };
        assert!(matches!(
            ledger.compute_fill(&fill, &SimpleMarginPolicy::cash_only()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_carried_gain_waits_for_next_settlement() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Delivery, Side::Buy, dec!(10), dec!(100));
        let update = book(&mut ledger, 2, ProductType::Delivery, Side::Sell, dec!(10), dec!(110));
        assert!(update.pending.is_some());

        let fund = ledger.fund(&UserId("u1".into())).unwrap().clone();
        assert_eq!(fund.available_cash, dec!(100000));
        assert_eq!(fund.unsettled_pnl, dec!(100));

        // Same-day run does not release the gain.
        let same_day = ledger.settle(day(4), ist());
        assert!(same_day.cleared.is_empty());

        let next_day = ledger.settle(day(5), ist());
        assert_eq!(next_day.cleared.len(), 1);
        ledger.apply_settlement(next_day);

        let fund = ledger.fund(&UserId("u1".into())).unwrap();
        assert_eq!(fund.available_cash, dec!(100100));
        assert_eq!(fund.unsettled_pnl, Decimal::ZERO);
        assert_eq!(fund.today_realized_pnl, Decimal::ZERO);
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_settlement_rolls_open_carried_positions() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::CarryForward, Side::Buy, dec!(1), dec!(100));
        book(&mut ledger, 2, ProductType::Intraday, Side::Buy, dec!(1), dec!(100));

        let update = ledger.settle(day(5), ist());
        ledger.apply_settlement(update);

        let carried = ledger.position(&key(ProductType::CarryForward)).unwrap();
        assert_eq!(carried.last_settlement_date, Some(day(5)));
        let intraday = ledger.position(&key(ProductType::Intraday)).unwrap();
        assert_eq!(intraday.last_settlement_date, None);
    }

    #[test]
    fn test_reset_user_restores_capital_and_zeroes_positions() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Delivery, Side::Buy, dec!(10), dec!(100));
        let update = ledger.reset_user(&UserId("u1".into()), now());
        ledger.apply_settlement(update);

        let fund = ledger.fund(&UserId("u1".into())).unwrap();
        assert_eq!(fund.available_cash, dec!(100000));
        assert_eq!(fund.utilized_margin, Decimal::ZERO);
        let position = ledger.position(&key(ProductType::Delivery)).unwrap();
        assert!(position.is_flat());
    }

    #[test]
    fn test_settlement_keeps_counters_of_its_own_session() {
        let mut ledger = ledger(dec!(100000));
        book(&mut ledger, 1, ProductType::Intraday, Side::Buy, dec!(10), dec!(100));
        book(&mut ledger, 2, ProductType::Intraday, Side::Sell, dec!(5), dec!(104));

        // Fills were booked on the 4th: a run for the 4th or an earlier
        // replayed date leaves today's P&L alone.
        for date in [day(1), day(4)] {
            let update = ledger.settle(date, ist());
            ledger.apply_settlement(update);
            assert_eq!(ledger.fund(&UserId("u1".into())).unwrap().today_realized_pnl, dec!(20));
            assert_eq!(ledger.position(&key(ProductType::Intraday)).unwrap().today_realized_pnl, dec!(20));
        }

        let update = ledger.settle(day(5), ist());
        ledger.apply_settlement(update);
        assert_eq!(ledger.fund(&UserId("u1".into())).unwrap().today_realized_pnl, Decimal::ZERO);
        let position = ledger.position(&key(ProductType::Intraday)).unwrap();
        assert_eq!(position.today_realized_pnl, Decimal::ZERO);
        assert_eq!(position.realized_pnl, dec!(20));
    }

    #[test]
    fn test_oversized_fill_is_rejected_not_a_panic() {
        let ledger = ledger(dec!(100000));
        let fill = Fill {
            order_id: OrderId(9),
            key: key(ProductType::Delivery),
            side: Side::Buy,
            quantity: dec!(1000000000000),
            price: dec!(100000000000000000000),
            executed_at: now(),
            trade_date: day(4),
        };
        assert!(matches!(
            ledger.compute_fill(&fill, &SimpleMarginPolicy::cash_only()),
            Err(Error::LedgerConsistency(_))
        ));
    }
}
