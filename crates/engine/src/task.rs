// In crates/engine/src/task.rs

use crate::sandbox::Sandbox;
use crate::settlement::SettlementProcessor;
use core_types::{Error, Exchange, Quote, Result, Symbol};
use futures::future;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Counters for one pass of the worker loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub instruments: usize,
    pub quoted: usize,
    pub fills: usize,
    pub triggers: usize,
    pub rejections: usize,
}

/// The background worker: run whatever settlement is due, then quote and match.
pub struct ExecutionTask {
    sandbox: Arc<Sandbox>,
    settlement: Arc<SettlementProcessor>,
    stop_rx: watch::Receiver<bool>,
}

impl ExecutionTask {
    pub fn new(
        sandbox: Arc<Sandbox>,
        settlement: Arc<SettlementProcessor>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sandbox,
            settlement,
            stop_rx,
        }
    }

    /// The main, long-running loop. Returns `Ok` when asked to stop and `Err`
    /// on an unrecoverable storage failure.
    pub async fn run(mut self) -> Result<()> {
        let interval = self.sandbox.config().tick_interval;
        tracing::info!(interval_ms = interval.as_millis() as u64, "Execution task started.");

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Execution task stopping after an unrecoverable error.");
                return Err(e);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        // The supervisor is gone; nobody can stop us any more.
                        break;
                    }
                }
            }
        }

        tracing::info!("Execution task stopped.");
        Ok(())
    }

    /// One full iteration. Per-symbol problems are logged and skipped.
    pub async fn tick(&self) -> Result<TickSummary> {
        // --- 1. Due settlement, ahead of this tick's fills ---
        let settled = self.settlement.run_due().await;
        if settled.fatal {
            let detail = settled
                .failed
                .last()
                .and_then(|f| f.error.clone())
                .unwrap_or_default();
            return Err(Error::Persistence(detail));
        }

        let instruments = self.sandbox.active_instruments().await;
        let mut summary = TickSummary {
            instruments: instruments.len(),
            ..Default::default()
        };

        // --- 2. Quotes, concurrently and outside the state lock ---
        let quotes = future::join_all(
            instruments
                .iter()
                .map(|(symbol, exchange)| self.fetch_quote(symbol, exchange)),
        )
        .await;

        // --- 3. Matching, in a fixed instrument order ---
        for ((symbol, exchange), quote) in instruments.iter().zip(quotes) {
            let Some(quote) = quote else { continue };
            summary.quoted += 1;
            let report = self.sandbox.process_tick(symbol, exchange, quote).await?;
            summary.fills += report.fills;
            summary.triggers += report.triggers;
            summary.rejections += report.rejections;
        }

        Ok(summary)
    }

    async fn fetch_quote(&self, symbol: &Symbol, exchange: &Exchange) -> Option<Quote> {
        let config = self.sandbox.config();
        let source = self.sandbox.quotes();
        let quote = match tokio::time::timeout(
            config.quote_timeout,
            source.get_last_price(symbol, exchange),
        )
        .await
        {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => {
                tracing::warn!(symbol = %symbol, exchange = %exchange, source = source.name(), error = %e, "Quote unavailable; skipping symbol this tick.");
                return None;
            }
            Err(_) => {
                tracing::warn!(symbol = %symbol, exchange = %exchange, source = source.name(), "Quote request timed out; skipping symbol this tick.");
                return None;
            }
        };

        let age = self.sandbox.now() - quote.as_of;
        if age > config.max_quote_age {
            tracing::warn!(symbol = %symbol, exchange = %exchange, age_secs = age.num_seconds(), "Stale quote; skipping symbol this tick.");
            return None;
        }
        Some(quote)
    }
}
