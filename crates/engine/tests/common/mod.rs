// Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use app_config::SandboxSettings;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use core_types::{
    Clock, Exchange, ManualClock, NewOrder, OrderType, PositionKey, ProductType, Quote, Side, Symbol, UserId,
};
use database::MemoryStore;
use engine::{Engine, EngineConfig, ExecutionTask, SandboxDeps, TickSummary};
use events::EventReceiver;
use market_data::{HolidayCalendar, QuoteSource, StaticQuoteSource};
use risk::SimpleMarginPolicy;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub const CAPITAL: f64 = 1_000_000.0;

/// A UTC instant for an India-local wall time.
pub fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(330 * 60)
        .unwrap()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn user(id: &str) -> UserId {
    UserId(id.into())
}

pub fn order(user_id: &str, side: Side, order_type: OrderType, qty: Decimal, product: ProductType) -> NewOrder {
    NewOrder {
        user_id: user(user_id),
        symbol: Symbol("SBIN".into()),
        exchange: Exchange("NSE".into()),
        side,
        order_type,
        quantity: qty,
        limit_price: None,
        trigger_price: None,
        product,
    }
}

pub fn sbin_key(user_id: &str, product: ProductType) -> PositionKey {
    PositionKey {
        user_id: user(user_id),
        symbol: Symbol("SBIN".into()),
        exchange: Exchange("NSE".into()),
        product,
    }
}

/// A static feed whose requests for some symbols never answer.
#[derive(Default)]
pub struct TestQuotes {
    prices: StaticQuoteSource,
    stalled: Mutex<HashSet<String>>,
}

impl TestQuotes {
    pub fn set_price(&self, symbol: &str, exchange: &str, price: Decimal, as_of: DateTime<Utc>) {
        self.prices.set_price(symbol, exchange, price, as_of);
    }

    pub fn remove(&self, symbol: &str, exchange: &str) {
        self.prices.remove(symbol, exchange);
    }

    pub fn stall(&self, symbol: &str) {
        self.stalled.lock().unwrap().insert(symbol.to_string());
    }
}

#[async_trait]
impl QuoteSource for TestQuotes {
    fn name(&self) -> &'static str {
        "TestQuotes"
    }

    async fn get_last_price(&self, symbol: &Symbol, exchange: &Exchange) -> core_types::Result<Quote> {
        let stalled = self.stalled.lock().unwrap().contains(&symbol.0);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.prices.get_last_price(symbol, exchange).await
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub quotes: Arc<TestQuotes>,
    pub clock: ManualClock,
    pub events: EventReceiver,
}

impl Harness {
    pub async fn at(start: DateTime<Utc>) -> Self {
        Self::with_store(start, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(start: DateTime<Utc>, store: Arc<MemoryStore>) -> Self {
        let settings = SandboxSettings {
            starting_capital: CAPITAL,
            tick_interval_ms: 10,
            quote_timeout_ms: 200,
            ..Default::default()
        };
        let config = EngineConfig::try_from(&settings).unwrap();
        let quotes = Arc::new(TestQuotes::default());
        let clock = ManualClock::new(start);
        let (events_tx, events) = events::channel(events::DEFAULT_CAPACITY);
        let deps = SandboxDeps {
            store: store.clone(),
            quotes: quotes.clone(),
            policy: Arc::new(SimpleMarginPolicy::cash_only()),
            clock: Arc::new(clock.clone()),
            events: events_tx,
        };
        let engine = Engine::build(config, deps, Arc::new(HolidayCalendar::new()))
            .await
            .unwrap();
        Self {
            engine,
            store,
            quotes,
            clock,
            events,
        }
    }

    /// Publishes a fresh SBIN quote stamped with the current clock time.
    pub fn price(&self, price: Decimal) {
        self.quotes.set_price("SBIN", "NSE", price, self.clock.now());
    }

    /// Runs one worker iteration in the foreground.
    pub async fn tick(&self) -> core_types::Result<TickSummary> {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let task = ExecutionTask::new(
            self.engine.sandbox.clone(),
            self.engine.settlement.clone(),
            stop_rx,
        );
        task.tick().await
    }
}
