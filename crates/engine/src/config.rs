// In crates/engine/src/config.rs

use app_config::SandboxSettings;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use core_types::{Error, Exchange, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::time::Duration;

/// Sandbox settings converted once into the types the engine works with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub starting_capital: Decimal,
    pub tick_interval: Duration,
    pub quote_timeout: Duration,
    pub max_quote_age: chrono::Duration,
    pub squareoff_time: NaiveTime,
    pub settlement_time: NaiveTime,
    pub catchup_lookback_days: u32,
    pub offset: FixedOffset,
    pub calendar_exchange: Exchange,
}

impl EngineConfig {
    /// Exchange-local wall time for a UTC instant.
    pub fn local_time(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.offset).naive_local()
    }

    /// The exchange-local calendar date an instant belongs to.
    pub fn trading_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_time(at).date()
    }
}

impl TryFrom<&SandboxSettings> for EngineConfig {
    type Error = Error;

    fn try_from(settings: &SandboxSettings) -> Result<Self> {
        let invalid = |e: app_config::Error| Error::Validation(e.to_string());
        let starting_capital = Decimal::from_f64(settings.starting_capital)
            .filter(|c| *c > Decimal::ZERO)
            .ok_or_else(|| Error::Validation("sandbox.starting_capital must be positive".into()))?;
        let offset = FixedOffset::east_opt(settings.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Validation(format!(
                "sandbox.utc_offset_minutes {} is out of range",
                settings.utc_offset_minutes
            ))
        })?;

        Ok(Self {
            starting_capital,
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
            quote_timeout: Duration::from_millis(settings.quote_timeout_ms),
            max_quote_age: chrono::Duration::seconds(settings.max_quote_age_secs),
            squareoff_time: settings.squareoff_time().map_err(invalid)?,
            settlement_time: settings.settlement_time().map_err(invalid)?,
            catchup_lookback_days: settings.catchup_lookback_days,
            offset,
            calendar_exchange: Exchange(settings.calendar_exchange.to_uppercase()),
        })
    }
}
