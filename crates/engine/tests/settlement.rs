mod common;

use common::{CAPITAL, Harness, date, ist, order, sbin_key, user};
use core_types::{OrderStatus, OrderType, ProductType, SettlementKind, Side};
use database::Store;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;

fn capital() -> Decimal {
    Decimal::from_f64(CAPITAL).unwrap()
}

#[tokio::test]
async fn test_intraday_square_off_at_scheduled_time() {
    let h = Harness::at(ist(2024, 3, 4, 10, 0)).await;
    let sandbox = &h.engine.sandbox;

    sandbox
        .place_order(order("u1", Side::Buy, OrderType::Market, dec!(10), ProductType::Intraday))
        .await
        .unwrap();
    h.price(dec!(100));
    h.tick().await.unwrap();

    let mut resting = order("u1", Side::Buy, OrderType::Limit, dec!(1), ProductType::Intraday);
    resting.limit_price = Some(dec!(80));
    let resting = sandbox.place_order(resting).await.unwrap();

    h.clock.set(ist(2024, 3, 4, 15, 0));
    h.price(dec!(105));
    h.tick().await.unwrap();
    // Not due yet.
    assert!(!h.store.has_settlement_record(date(2024, 3, 4), SettlementKind::EodSquareoff).await.unwrap());

    h.clock.set(ist(2024, 3, 4, 15, 20));
    h.price(dec!(105));
    h.tick().await.unwrap();

    let position = sandbox.position(&sbin_key("u1", ProductType::Intraday)).await.unwrap();
    assert!(position.is_flat());
    assert_eq!(position.realized_pnl, dec!(50));
    assert_eq!(sandbox.fund(&user("u1")).await.available_cash, capital() + dec!(50));
    assert_eq!(
        sandbox.order(resting.id, &user("u1")).await.unwrap().status,
        OrderStatus::Cancelled
    );
    assert!(h.store.has_settlement_record(date(2024, 3, 4), SettlementKind::EodSquareoff).await.unwrap());

    // The synthetic closing order is a filled market sell.
    let closing = sandbox
        .orders(&user("u1"))
        .await
        .into_iter()
        .find(|o| o.side == Side::Sell)
        .unwrap();
    assert_eq!(closing.status, OrderStatus::Filled);
    assert_eq!(closing.filled_price, Some(dec!(105)));
}

#[tokio::test]
async fn test_carried_positions_survive_square_off() {
    let h = Harness::at(ist(2024, 3, 4, 10, 0)).await;
    let sandbox = &h.engine.sandbox;

    sandbox
        .place_order(order("u1", Side::Buy, OrderType::Market, dec!(10), ProductType::CarryForward))
        .await
        .unwrap();
    h.price(dec!(100));
    h.tick().await.unwrap();

    h.clock.set(ist(2024, 3, 4, 15, 30));
    h.price(dec!(101));
    h.tick().await.unwrap();

    let position = sandbox.position(&sbin_key("u1", ProductType::CarryForward)).await.unwrap();
    assert_eq!(position.net_quantity, dec!(10));
    assert!(h.store.has_settlement_record(date(2024, 3, 4), SettlementKind::EodSquareoff).await.unwrap());
}

#[tokio::test]
async fn test_square_off_without_price_is_retried() {
    let h = Harness::at(ist(2024, 3, 4, 10, 0)).await;
    let sandbox = &h.engine.sandbox;

    sandbox
        .place_order(order("u1", Side::Buy, OrderType::Market, dec!(10), ProductType::Intraday))
        .await
        .unwrap();
    h.price(dec!(100));
    h.tick().await.unwrap();

    // A fresh engine on the same store has no cached tick and no quote.
    let restarted = Harness::with_store(ist(2024, 3, 4, 15, 30), h.store.clone()).await;
    let report = restarted.engine.settlement.catch_up().await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, SettlementKind::EodSquareoff);
    assert!(!report.fatal);
    assert!(!restarted.store.has_settlement_record(date(2024, 3, 4), SettlementKind::EodSquareoff).await.unwrap());

    restarted.price(dec!(99));
    let report = restarted.engine.settlement.catch_up().await;
    assert!(report.failed.is_empty());
    let position = restarted
        .engine
        .sandbox
        .position(&sbin_key("u1", ProductType::Intraday))
        .await
        .unwrap();
    assert!(position.is_flat());
    assert_eq!(position.realized_pnl, dec!(-10));
}

#[tokio::test]
async fn test_catch_up_skips_weekend_and_settles_friday_gain_on_monday() {
    // Friday: buy and sell a delivery position for a gain of 100.
    let store = std::sync::Arc::new(database::MemoryStore::new());
    let friday = Harness::with_store(ist(2024, 3, 8, 10, 0), store.clone()).await;
    let sandbox = &friday.engine.sandbox;
    sandbox
        .place_order(order("u1", Side::Buy, OrderType::Market, dec!(10), ProductType::Delivery))
        .await
        .unwrap();
    friday.price(dec!(100));
    friday.tick().await.unwrap();
    sandbox
        .place_order(order("u1", Side::Sell, OrderType::Market, dec!(10), ProductType::Delivery))
        .await
        .unwrap();
    friday.price(dec!(110));
    friday.tick().await.unwrap();

    let fund = sandbox.fund(&user("u1")).await;
    assert_eq!(fund.unsettled_pnl, dec!(100));
    assert_eq!(fund.available_cash, capital());

    // Down over the weekend; back on Monday morning.
    let monday = Harness::with_store(ist(2024, 3, 11, 10, 0), store).await;
    let report = monday.engine.control.catchup_missed_settlements().await;
    assert!(report.success, "{}", report.message);

    for weekend in [date(2024, 3, 9), date(2024, 3, 10)] {
        for kind in [SettlementKind::T1Settlement, SettlementKind::EodSquareoff] {
            assert!(!monday.store.has_settlement_record(weekend, kind).await.unwrap());
        }
    }
    assert!(monday.store.has_settlement_record(date(2024, 3, 8), SettlementKind::EodSquareoff).await.unwrap());
    assert!(monday.store.has_settlement_record(date(2024, 3, 11), SettlementKind::T1Settlement).await.unwrap());
    // Monday's square-off is not due before 15:15.
    assert!(!monday.store.has_settlement_record(date(2024, 3, 11), SettlementKind::EodSquareoff).await.unwrap());

    let fund = monday.engine.sandbox.fund(&user("u1")).await;
    assert_eq!(fund.available_cash, capital() + dec!(100));
    assert_eq!(fund.unsettled_pnl, Decimal::ZERO);
    assert_eq!(fund.today_realized_pnl, Decimal::ZERO);
}

#[tokio::test]
async fn test_catch_up_is_idempotent() {
    let h = Harness::at(ist(2024, 3, 11, 16, 0)).await;

    let first = h.engine.settlement.catch_up().await;
    // Mar 4..8 and Mar 11, both kinds, weekend skipped.
    assert_eq!(first.ran.len(), 12);
    let records = h.store.settlement_records(date(2024, 3, 1), date(2024, 3, 31)).await.unwrap();

    let second = h.engine.settlement.catch_up().await;
    assert!(second.ran.is_empty());
    assert_eq!(second.already_done, 12);
    assert_eq!(
        h.store.settlement_records(date(2024, 3, 1), date(2024, 3, 31)).await.unwrap(),
        records
    );

    // A fresh process on the same store sees the records, not the memo.
    let restarted = Harness::with_store(ist(2024, 3, 11, 16, 5), h.store.clone()).await;
    let third = restarted.engine.settlement.catch_up().await;
    assert!(third.ran.is_empty());
}

#[tokio::test]
async fn test_due_checks_follow_calendar_and_clock() {
    let h = Harness::at(ist(2024, 3, 4, 10, 0)).await;
    let settlement = &h.engine.settlement;

    assert!(settlement.is_due(date(2024, 3, 1), SettlementKind::EodSquareoff));
    assert!(settlement.is_due(date(2024, 3, 4), SettlementKind::T1Settlement));
    assert!(!settlement.is_due(date(2024, 3, 4), SettlementKind::EodSquareoff));
    assert!(!settlement.is_due(date(2024, 3, 3), SettlementKind::T1Settlement));
    assert!(!settlement.is_due(date(2024, 3, 5), SettlementKind::T1Settlement));
}

#[tokio::test]
async fn test_opening_tick_settles_before_it_matches() {
    let h = Harness::at(ist(2024, 3, 4, 8, 50)).await;
    let sandbox = &h.engine.sandbox;

    sandbox
        .place_order(order("u1", Side::Buy, OrderType::Market, dec!(10), ProductType::Intraday))
        .await
        .unwrap();
    h.price(dec!(100));
    h.tick().await.unwrap();
    assert!(!h.store.has_settlement_record(date(2024, 3, 4), SettlementKind::T1Settlement).await.unwrap());

    sandbox
        .place_order(order("u1", Side::Sell, OrderType::Market, dec!(5), ProductType::Intraday))
        .await
        .unwrap();
    h.clock.set(ist(2024, 3, 4, 9, 5));
    h.price(dec!(104));
    let summary = h.tick().await.unwrap();
    assert_eq!(summary.fills, 1);
    assert!(h.store.has_settlement_record(date(2024, 3, 4), SettlementKind::T1Settlement).await.unwrap());

    let position = sandbox.position(&sbin_key("u1", ProductType::Intraday)).await.unwrap();
    assert_eq!(position.today_realized_pnl, dec!(20));
    assert_eq!(sandbox.fund(&user("u1")).await.today_realized_pnl, dec!(20));
}

#[tokio::test]
async fn test_catch_up_leaves_the_current_session_alone() {
    let h = Harness::at(ist(2024, 3, 11, 10, 0)).await;
    let sandbox = &h.engine.sandbox;

    // Today: a partial intraday close and a resting intraday order.
    sandbox
        .place_order(order("u1", Side::Buy, OrderType::Market, dec!(10), ProductType::Intraday))
        .await
        .unwrap();
    h.price(dec!(100));
    h.tick().await.unwrap();
    sandbox
        .place_order(order("u1", Side::Sell, OrderType::Market, dec!(5), ProductType::Intraday))
        .await
        .unwrap();
    h.price(dec!(104));
    h.tick().await.unwrap();
    let mut resting = order("u1", Side::Buy, OrderType::Limit, dec!(1), ProductType::Intraday);
    resting.limit_price = Some(dec!(90));
    let resting = sandbox.place_order(resting).await.unwrap();

    // Replays Mar 4..8, square-offs included.
    let report = h.engine.settlement.catch_up().await;
    assert!(report.failed.is_empty());
    assert!(h.store.has_settlement_record(date(2024, 3, 8), SettlementKind::EodSquareoff).await.unwrap());

    let current = sandbox.order(resting.id, &user("u1")).await.unwrap();
    assert_eq!(current.status, OrderStatus::Open);
    assert_eq!(current.reason, None);

    let position = sandbox.position(&sbin_key("u1", ProductType::Intraday)).await.unwrap();
    assert_eq!(position.net_quantity, dec!(5));
    assert_eq!(position.today_realized_pnl, dec!(20));
    assert_eq!(sandbox.fund(&user("u1")).await.today_realized_pnl, dec!(20));
}

#[tokio::test]
async fn test_catch_up_runs_oldest_date_first() {
    let h = Harness::at(ist(2024, 3, 11, 16, 0)).await;

    let report = h.engine.settlement.catch_up().await;
    let ran: Vec<_> = report.ran.iter().map(|job| (job.trading_date, job.kind)).collect();

    let expected: Vec<_> = [4, 5, 6, 7, 8, 11]
        .into_iter()
        .flat_map(|day| {
            [SettlementKind::T1Settlement, SettlementKind::EodSquareoff].map(|kind| (date(2024, 3, day), kind))
        })
        .collect();
    assert_eq!(ran, expected);
}
