// In crates/app-config/src/types.rs

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;

use crate::{Error, Result};

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Durable storage. Without a URL the sandbox runs on the in-memory store.
    #[serde(default)]
    pub database: DatabaseSettings,
    /// The gateway endpoint that serves last traded prices.
    #[serde(default)]
    pub quotes: QuoteSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub calendar: CalendarSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.sandbox.squareoff_time()?;
        self.sandbox.settlement_time()?;
        for (field, value) in [
            ("sandbox.intraday_leverage", self.sandbox.intraday_leverage),
            ("sandbox.carryforward_leverage", self.sandbox.carryforward_leverage),
            ("sandbox.delivery_leverage", self.sandbox.delivery_leverage),
        ] {
            if value <= 0.0 {
                return Err(Error::InvalidValue {
                    field,
                    value: value.to_string(),
                });
            }
        }
        if self.sandbox.tick_interval_ms == 0 {
            return Err(Error::InvalidValue {
                field: "sandbox.tick_interval_ms",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    /// The connection URL for the PostgreSQL database.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct QuoteSettings {
    /// Base URL of the gateway REST API (e.g., "http://127.0.0.1:5000").
    pub base_url: String,
    /// API key sent with every quote request.
    #[serde(default)]
    pub api_key: String,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            api_key: String::new(),
        }
    }
}

/// Knobs of the paper-trading engine.
///
/// Money values are plain floats in the file and converted to `Decimal` once,
/// at the point where the engine is built.
#[derive(Deserialize, Debug, Clone)]
pub struct SandboxSettings {
    #[serde(default = "default_starting_capital")]
    pub starting_capital: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    /// Quotes older than this are treated as unavailable.
    #[serde(default = "default_max_quote_age_secs")]
    pub max_quote_age_secs: i64,
    /// Local exchange time at which intraday positions are closed ("HH:MM" or "HH:MM:SS").
    #[serde(default = "default_squareoff_time")]
    pub squareoff_time: String,
    /// Local exchange time at which the previous day's trades settle.
    #[serde(default = "default_settlement_time")]
    pub settlement_time: String,
    #[serde(default = "default_catchup_lookback_days")]
    pub catchup_lookback_days: u32,
    /// Offset of exchange-local time from UTC, in minutes. IST is +330.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Exchange whose calendar decides which dates are settlement days.
    #[serde(default = "default_calendar_exchange")]
    pub calendar_exchange: String,
    /// Brokerage charged on traded value (e.g., 0.0003 for 0.03%).
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default = "default_intraday_leverage")]
    pub intraday_leverage: f64,
    #[serde(default = "default_unit_leverage")]
    pub carryforward_leverage: f64,
    #[serde(default = "default_unit_leverage")]
    pub delivery_leverage: f64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            starting_capital: default_starting_capital(),
            tick_interval_ms: default_tick_interval_ms(),
            quote_timeout_ms: default_quote_timeout_ms(),
            max_quote_age_secs: default_max_quote_age_secs(),
            squareoff_time: default_squareoff_time(),
            settlement_time: default_settlement_time(),
            catchup_lookback_days: default_catchup_lookback_days(),
            utc_offset_minutes: default_utc_offset_minutes(),
            calendar_exchange: default_calendar_exchange(),
            fee_rate: 0.0,
            intraday_leverage: default_intraday_leverage(),
            carryforward_leverage: default_unit_leverage(),
            delivery_leverage: default_unit_leverage(),
        }
    }
}

impl SandboxSettings {
    pub fn squareoff_time(&self) -> Result<NaiveTime> {
        parse_time("sandbox.squareoff_time", &self.squareoff_time)
    }

    pub fn settlement_time(&self) -> Result<NaiveTime> {
        parse_time("sandbox.settlement_time", &self.settlement_time)
    }
}

/// Exchange trading-day calendar. Saturdays and Sundays are always closed.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CalendarSettings {
    /// Dates on which every exchange is closed.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    /// Additional closures for individual exchanges, keyed by exchange code.
    #[serde(default)]
    pub exchange_holidays: HashMap<String, Vec<NaiveDate>>,
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| Error::InvalidValue {
            field,
            value: value.to_string(),
        })
}

/// Helper functions for serde defaults
fn default_max_connections() -> u32 { 5 }
fn default_starting_capital() -> f64 { 10_000_000.0 }
fn default_tick_interval_ms() -> u64 { 5_000 }
fn default_quote_timeout_ms() -> u64 { 2_000 }
fn default_max_quote_age_secs() -> i64 { 120 }
fn default_squareoff_time() -> String { "15:15".into() }
fn default_settlement_time() -> String { "09:00".into() }
fn default_catchup_lookback_days() -> u32 { 7 }
fn default_utc_offset_minutes() -> i32 { 330 }
fn default_calendar_exchange() -> String { "NSE".into() }
fn default_intraday_leverage() -> f64 { 5.0 }
fn default_unit_leverage() -> f64 { 1.0 }
