// In crates/market-data/src/calendar.rs

use app_config::CalendarSettings;
use chrono::{Datelike, NaiveDate, Weekday};
use core_types::Exchange;
use std::collections::{HashMap, HashSet};

/// Answers whether an exchange is open on a given date.
pub trait TradingCalendar: Send + Sync {
    fn is_trading_day(&self, date: NaiveDate, exchange: &Exchange) -> bool;
}

/// Weekdays minus configured holidays.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    holidays: HashSet<NaiveDate>,
    /// Keyed by upper-cased exchange code.
    exchange_holidays: HashMap<String, HashSet<NaiveDate>>,
}

impl HolidayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &CalendarSettings) -> Self {
        let mut calendar = Self::new();
        calendar.holidays.extend(settings.holidays.iter().copied());
        for (exchange, dates) in &settings.exchange_holidays {
            calendar
                .exchange_holidays
                .entry(exchange.to_uppercase())
                .or_default()
                .extend(dates.iter().copied());
        }
        calendar
    }

    /// Closes every exchange on `date`.
    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    /// Closes one exchange on `date`.
    pub fn with_exchange_holiday(mut self, exchange: &str, date: NaiveDate) -> Self {
        self.exchange_holidays
            .entry(exchange.to_uppercase())
            .or_default()
            .insert(date);
        self
    }
}

impl TradingCalendar for HolidayCalendar {
    fn is_trading_day(&self, date: NaiveDate, exchange: &Exchange) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.holidays.contains(&date) {
            return false;
        }
        !self
            .exchange_holidays
            .get(&exchange.0.to_uppercase())
            .is_some_and(|dates| dates.contains(&date))
    }
}
