// In crates/engine/src/settlement.rs

use crate::sandbox::Sandbox;
use chrono::{Days, NaiveDate, NaiveTime};
use core_types::{Error, Result, SettlementKind};
use market_data::TradingCalendar;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One settlement job for one trading date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub trading_date: NaiveDate,
    pub kind: SettlementKind,
    /// `None` when the job ran or was already recorded.
    pub error: Option<String>,
}

/// What a catch-up scan (or a due check) did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpReport {
    pub ran: Vec<JobOutcome>,
    pub already_done: usize,
    pub failed: Vec<JobOutcome>,
    /// A storage failure was hit; the worker should stop.
    pub fatal: bool,
}

impl CatchUpReport {
    fn merge(&mut self, other: CatchUpReport) {
        self.ran.extend(other.ran);
        self.already_done += other.already_done;
        self.failed.extend(other.failed);
        self.fatal |= other.fatal;
    }
}

/// Runs EOD square-off and T+1 settlement at their scheduled local times, and
/// replays any run that was missed while the process was down.
///
/// A (date, kind) pair runs at most once: the settlement record in the store is
/// the source of truth, and a local memo avoids asking the store on every tick.
pub struct SettlementProcessor {
    sandbox: Arc<Sandbox>,
    calendar: Arc<dyn TradingCalendar>,
    completed: Mutex<HashSet<(NaiveDate, SettlementKind)>>,
}

impl SettlementProcessor {
    pub fn new(sandbox: Arc<Sandbox>, calendar: Arc<dyn TradingCalendar>) -> Self {
        Self {
            sandbox,
            calendar,
            completed: Mutex::new(HashSet::new()),
        }
    }

    fn scheduled_time(&self, kind: SettlementKind) -> NaiveTime {
        let config = self.sandbox.config();
        match kind {
            SettlementKind::T1Settlement => config.settlement_time,
            SettlementKind::EodSquareoff => config.squareoff_time,
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.calendar
            .is_trading_day(date, &self.sandbox.config().calendar_exchange)
    }

    /// Whether `kind` should have run for `date` by now.
    ///
    /// Past trading days are always due; today is due once local time passes the
    /// scheduled time; future dates and non-trading days never are.
    pub fn is_due(&self, date: NaiveDate, kind: SettlementKind) -> bool {
        if !self.is_trading_day(date) {
            return false;
        }
        let local = self.sandbox.config().local_time(self.sandbox.now());
        match date.cmp(&local.date()) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => local.time() >= self.scheduled_time(kind),
            std::cmp::Ordering::Greater => false,
        }
    }

    /// Scheduled runs for today. Called by the worker after every tick.
    pub async fn run_due(&self) -> CatchUpReport {
        let today = self.sandbox.config().trading_date(self.sandbox.now());
        self.process_date(today).await
    }

    /// Replays every missing run over the lookback window, oldest date first.
    pub async fn catch_up(&self) -> CatchUpReport {
        let today = self.sandbox.config().trading_date(self.sandbox.now());
        let lookback = self.sandbox.config().catchup_lookback_days;
        let start = today
            .checked_sub_days(Days::new(u64::from(lookback)))
            .unwrap_or(today);

        tracing::info!(from = %start, to = %today, "Starting settlement catch-up.");
        let mut report = CatchUpReport::default();
        let mut date = start;
        while date <= today {
            report.merge(self.process_date(date).await);
            if report.fatal {
                break;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        tracing::info!(
            ran = report.ran.len(),
            already_done = report.already_done,
            failed = report.failed.len(),
            "Settlement catch-up finished."
        );
        report
    }

    async fn process_date(&self, date: NaiveDate) -> CatchUpReport {
        let mut report = CatchUpReport::default();
        if !self.is_trading_day(date) {
            return report;
        }
        // Settlement of D comes before the square-off of D.
        for kind in [SettlementKind::T1Settlement, SettlementKind::EodSquareoff] {
            if !self.is_due(date, kind) {
                continue;
            }
            match self.run_job(date, kind).await {
                Ok(true) => report.ran.push(JobOutcome {
                    trading_date: date,
                    kind,
                    error: None,
                }),
                Ok(false) => report.already_done += 1,
                Err(e) => {
                    tracing::error!(date = %date, kind = %kind, error = %e, "Settlement job failed.");
                    report.fatal |= e.is_fatal();
                    report.failed.push(JobOutcome {
                        trading_date: date,
                        kind,
                        error: Some(e.to_string()),
                    });
                    if report.fatal {
                        break;
                    }
                }
            }
        }
        report
    }

    /// Runs one job unless it is already recorded. Returns whether it ran.
    ///
    /// The memo lock is held for the whole job, so the worker and a manual
    /// catch-up never run the same job twice.
    pub async fn run_job(&self, date: NaiveDate, kind: SettlementKind) -> Result<bool> {
        let mut completed = self.completed.lock().await;
        if completed.contains(&(date, kind)) {
            return Ok(false);
        }
        let recorded = self
            .sandbox
            .store()
            .has_settlement_record(date, kind)
            .await
            .map_err(Error::from)?;
        if !recorded {
            match kind {
                SettlementKind::T1Settlement => self.sandbox.settle(date).await?,
                SettlementKind::EodSquareoff => self.sandbox.square_off(date).await?,
            };
        }
        completed.insert((date, kind));
        Ok(!recorded)
    }
}
