mod common;

use common::{Harness, ist, order, user};
use core_types::{OrderStatus, OrderType, ProductType, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Small deterministic generator so failures replay exactly.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn price(&mut self) -> Decimal {
        Decimal::from(90 + self.below(21))
    }
}

#[tokio::test]
async fn test_random_flow_keeps_order_and_ledger_invariants() {
    let h = Harness::at(ist(2024, 3, 4, 10, 0)).await;
    let sandbox = &h.engine.sandbox;
    let mut rng = Lcg(0x5eed);
    let users = ["u1", "u2", "u3"];

    for _ in 0..200 {
        // --- 1. A few new orders ---
        for _ in 0..rng.below(3) {
            let user_id = users[rng.below(users.len() as u64) as usize];
            let side = if rng.below(2) == 0 { Side::Buy } else { Side::Sell };
            let product = if rng.below(2) == 0 {
                ProductType::Intraday
            } else {
                ProductType::Delivery
            };
            let order_type = match rng.below(4) {
                0 => OrderType::Market,
                1 => OrderType::Limit,
                2 => OrderType::Stop,
                _ => OrderType::StopLimit,
            };
            let mut new = order(user_id, side, order_type, Decimal::from(1 + rng.below(5)), product);
            if matches!(order_type, OrderType::Limit | OrderType::StopLimit) {
                new.limit_price = Some(rng.price());
            }
            if order_type.is_stop() {
                new.trigger_price = Some(rng.price());
            }
            sandbox.place_order(new).await.unwrap();
        }

        // --- 2. One tick ---
        h.clock.advance(chrono::Duration::seconds(1));
        h.price(rng.price());
        h.tick().await.unwrap();

        // --- 3. Invariants ---
        for user_id in users {
            let orders = sandbox.orders(&user(user_id)).await;
            for o in &orders {
                assert_eq!(o.filled_price.is_some(), o.status == OrderStatus::Filled, "{:?}", o);
                if o.status == OrderStatus::Filled {
                    if let Some(limit) = o.limit_price {
                        assert_eq!(o.filled_price, Some(limit), "{:?}", o);
                    }
                }
                if o.status == OrderStatus::Pending {
                    assert!(!o.triggered);
                }
            }

            let filled = orders.iter().filter(|o| o.status == OrderStatus::Filled).count();
            assert_eq!(sandbox.trades(&user(user_id)).await.len(), filled);

            let fund = sandbox.fund(&user(user_id)).await;
            assert!(fund.utilized_margin >= dec!(0));
            assert!(fund.available_cash >= dec!(0), "{:?}", fund);
        }
    }
}
