// In crates/market-data/src/static_source.rs

use crate::QuoteSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Exchange, Quote, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

/// An in-memory quote source.
///
/// Serves whatever prices were last pushed into it, which makes it the feed
/// for replayed market data and the quote double in tests.
#[derive(Debug, Default)]
pub struct StaticQuoteSource {
    quotes: RwLock<HashMap<(Symbol, Exchange), Quote>>,
}

impl StaticQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, exchange: &str, price: Decimal, as_of: DateTime<Utc>) {
        let mut quotes = self.quotes.write().unwrap_or_else(|e| e.into_inner());
        quotes.insert(
            (Symbol(symbol.to_string()), Exchange(exchange.to_string())),
            Quote { price, as_of },
        );
    }

    pub fn remove(&self, symbol: &str, exchange: &str) {
        let mut quotes = self.quotes.write().unwrap_or_else(|e| e.into_inner());
        quotes.remove(&(Symbol(symbol.to_string()), Exchange(exchange.to_string())));
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    fn name(&self) -> &'static str {
        "StaticQuoteSource"
    }

    async fn get_last_price(&self, symbol: &Symbol, exchange: &Exchange) -> core_types::Result<Quote> {
        let quotes = self.quotes.read().unwrap_or_else(|e| e.into_inner());
        quotes
            .get(&(symbol.clone(), exchange.clone()))
            .copied()
            .ok_or_else(|| core_types::Error::QuoteUnavailable {
                symbol: symbol.0.clone(),
                exchange: exchange.0.clone(),
                reason: "no price published".into(),
            })
    }
}
