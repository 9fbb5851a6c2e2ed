// In crates/market-data/src/http.rs

use crate::{Error, QuoteSource, Result};
use app_config::QuoteSettings;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{Exchange, Quote, Symbol};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;

/// The `data` object of a successful quote response.
#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(deserialize_with = "exact_decimal")]
    ltp: Decimal,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    data: QuoteData,
}

/// Reads a JSON number or string into a decimal with the same digits.
fn exact_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Decimal, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(serde_json::Number),
        Text(String),
    }

    let text = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    };
    Decimal::from_str(&text).map_err(serde::de::Error::custom)
}

/// Pulls last traded prices from the gateway's `/api/v1/quotes` endpoint.
#[derive(Debug, Clone)]
pub struct HttpQuoteSource {
    /// The persistent HTTP client.
    http_client: Client,
    /// The API key sent in the request body.
    api_key: String,
    /// The base URL of the gateway REST API.
    base_url: String,
}

impl HttpQuoteSource {
    /// Constructs a new source. `timeout` bounds every request end to end.
    pub fn new(settings: &QuoteSettings, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;
        Ok(Self {
            http_client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, symbol: &Symbol, exchange: &Exchange) -> Result<Quote> {
        let url = format!("{}/api/v1/quotes", self.base_url);
        let body = json!({
            "apikey": self.api_key,
            "symbol": symbol.0,
            "exchange": exchange.0,
        });

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Error::RequestFailed)?;

        let text = response.text().await.map_err(Error::RequestFailed)?;
        let value: Value = serde_json::from_str(&text).map_err(Error::DeserializationFailed)?;
        parse_quote_response(value)
    }
}

/// Extracts the last traded price from a gateway quote response.
///
/// The gateway answers `{"status": "success", "data": {"ltp": ...}}` or
/// `{"status": "error", "message": "..."}`.
pub(crate) fn parse_quote_response(value: Value) -> Result<Quote> {
    let status = value.get("status").and_then(Value::as_str).unwrap_or("error");
    if status != "success" {
        let msg = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        return Err(Error::ApiError { msg });
    }

    let response: QuoteResponse = serde_json::from_value(value).map_err(Error::DeserializationFailed)?;
    let price = response.data.ltp;
    if price <= Decimal::ZERO {
        return Err(Error::MalformedQuote(format!("non-positive ltp {}", price)));
    }

    Ok(Quote {
        price,
        as_of: Utc::now(),
    })
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn name(&self) -> &'static str {
        "HttpQuoteSource"
    }

    async fn get_last_price(&self, symbol: &Symbol, exchange: &Exchange) -> core_types::Result<Quote> {
        self.fetch(symbol, exchange).await.map_err(|e| {
            tracing::debug!(symbol = %symbol, exchange = %exchange, error = %e, "Quote request failed.");
            core_types::Error::QuoteUnavailable {
                symbol: symbol.0.clone(),
                exchange: exchange.0.clone(),
                reason: e.to_string(),
            }
        })
    }
}
