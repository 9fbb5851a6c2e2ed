// In crates/execution/src/matching.rs

use core_types::{Order, OrderId, OrderStatus, OrderType, Side};
use rust_decimal::Decimal;

/// What a single tick means for a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Fill the whole order at `price`.
    Fill { price: Decimal },
    /// A pending stop order saw its trigger; it becomes OPEN and trades from the next tick.
    Trigger,
    Hold,
}

/// Stateless tick-matching rules.
///
/// Orders fill in full or not at all. A LIMIT order fills at its limit price,
/// never at a better tick. Stop orders are protective: a BUY stop triggers when
/// the tick rises to the trigger, a SELL stop when it falls to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchingEngine;

impl MatchingEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, order: &Order, tick: Decimal) -> Decision {
        match order.status {
            OrderStatus::Pending => match order.trigger_price {
                Some(trigger) if crosses_trigger(order.side, tick, trigger) => Decision::Trigger,
                _ => Decision::Hold,
            },
            OrderStatus::Open => match order.order_type {
                OrderType::Market | OrderType::Stop => Decision::Fill { price: tick },
                OrderType::Limit | OrderType::StopLimit => match order.limit_price {
                    Some(limit) if limit_reached(order.side, tick, limit) => {
                        Decision::Fill { price: limit }
                    }
                    _ => Decision::Hold,
                },
            },
            _ => Decision::Hold,
        }
    }

    /// Decisions for every order that acts on this tick, oldest order first.
    pub fn plan(&self, orders: &[Order], tick: Decimal) -> Vec<(OrderId, Decision)> {
        let mut queue: Vec<&Order> = orders.iter().collect();
        queue.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        queue
            .into_iter()
            .map(|o| (o.id, self.evaluate(o, tick)))
            .filter(|(_, d)| *d != Decision::Hold)
            .collect()
    }
}

fn crosses_trigger(side: Side, tick: Decimal, trigger: Decimal) -> bool {
    match side {
        Side::Buy => tick >= trigger,
        Side::Sell => tick <= trigger,
    }
}

fn limit_reached(side: Side, tick: Decimal, limit: Decimal) -> bool {
    match side {
        Side::Buy => tick <= limit,
        Side::Sell => tick >= limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrderBook;
    use chrono::{Duration, TimeZone, Utc};
    use core_types::{Exchange, NewOrder, ProductType, Symbol, UserId};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn order(
        side: Side,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        trigger_price: Option<Decimal>,
    ) -> Order {
        let mut book = OrderBook::new();
        let new = NewOrder {
            user_id: UserId("u1".into()),
            symbol: Symbol("SBIN".into()),
            exchange: Exchange("NSE".into()),
            side,
            order_type,
            quantity: dec!(1),
            limit_price,
            trigger_price,
            product: ProductType::Intraday,
        };
        book.prepare(new, Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap())
            .unwrap()
    }

    #[rstest]
    #[case(Side::Buy, dec!(96), Decision::Hold)]
    #[case(Side::Buy, dec!(95), Decision::Fill { price: dec!(95) })]
    #[case(Side::Buy, dec!(90), Decision::Fill { price: dec!(95) })]
    #[case(Side::Sell, dec!(94), Decision::Hold)]
    #[case(Side::Sell, dec!(99), Decision::Fill { price: dec!(95) })]
    fn test_limit_fills_at_limit_price(#[case] side: Side, #[case] tick: Decimal, #[case] expected: Decision) {
        let limit = order(side, OrderType::Limit, Some(dec!(95)), None);
        assert_eq!(MatchingEngine::new().evaluate(&limit, tick), expected);
    }

    #[test]
    fn test_market_fills_at_tick() {
        let market = order(Side::Sell, OrderType::Market, None, None);
        assert_eq!(
            MatchingEngine::new().evaluate(&market, dec!(101.5)),
            Decision::Fill { price: dec!(101.5) }
        );
    }

    #[rstest]
    #[case(Side::Buy, dec!(104), Decision::Hold)]
    #[case(Side::Buy, dec!(105), Decision::Trigger)]
    #[case(Side::Sell, dec!(106), Decision::Hold)]
    #[case(Side::Sell, dec!(105), Decision::Trigger)]
    fn test_stop_triggers_protectively(#[case] side: Side, #[case] tick: Decimal, #[case] expected: Decision) {
        let stop = order(side, OrderType::Stop, None, Some(dec!(105)));
        assert_eq!(stop.status, OrderStatus::Pending);
        assert_eq!(MatchingEngine::new().evaluate(&stop, tick), expected);
    }

    #[test]
    fn test_triggered_stop_limit_behaves_as_limit() {
        let mut stop_limit = order(Side::Buy, OrderType::StopLimit, Some(dec!(106)), Some(dec!(105)));
        stop_limit.status = OrderStatus::Open;
        stop_limit.triggered = true;

        let engine = MatchingEngine::new();
        assert_eq!(engine.evaluate(&stop_limit, dec!(107)), Decision::Hold);
        assert_eq!(
            engine.evaluate(&stop_limit, dec!(105.5)),
            Decision::Fill { price: dec!(106) }
        );
    }

    #[test]
    fn test_plan_is_fifo_and_skips_holds() {
        let mut older = order(Side::Buy, OrderType::Market, None, None);
        let mut newer = order(Side::Buy, OrderType::Market, None, None);
        let resting = order(Side::Buy, OrderType::Limit, Some(dec!(50)), None);
        older.id = OrderId(7);
        newer.id = OrderId(3);
        newer.created_at = older.created_at + Duration::seconds(1);

        let plan = MatchingEngine::new().plan(&[newer, resting, older], dec!(100));
        let ids: Vec<OrderId> = plan.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![OrderId(7), OrderId(3)]);
    }
}
