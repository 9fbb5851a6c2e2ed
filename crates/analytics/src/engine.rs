use crate::types::{AccountSummary, PnlSummary, SymbolPnl};
use chrono::{FixedOffset, NaiveDate};
use core_types::{Exchange, Fund, Position, Symbol, Trade, UserId};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

/// The engine responsible for turning ledger state into P&L reports.
#[derive(Default)]
pub struct PnlEngine;

impl PnlEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Day P&L per symbol for one user.
    ///
    /// Realized figures come from the positions' daily counters (reset by the
    /// T+1 run), open P&L from their last mark. Trade counts and fees are taken
    /// from fills whose exchange-local date equals `trading_date`.
    pub fn day_pnl_by_symbol(
        &self,
        user_id: &UserId,
        positions: &[Position],
        trades: &[Trade],
        trading_date: NaiveDate,
        offset: FixedOffset,
    ) -> PnlSummary {
        let mut by_symbol: BTreeMap<(Symbol, Exchange), SymbolPnl> = BTreeMap::new();

        // --- 1. Position counters ---
        for position in positions.iter().filter(|p| &p.user_id == user_id) {
            let row = row_for(&mut by_symbol, &position.symbol, &position.exchange);
            row.net_quantity += position.net_quantity;
            row.realized_pnl += position.today_realized_pnl;
            row.unrealized_pnl += position.unrealized_pnl;
        }

        // --- 2. Today's fills ---
        for trade in trades
            .iter()
            .filter(|t| &t.user_id == user_id)
            .filter(|t| t.executed_at.with_timezone(&offset).date_naive() == trading_date)
        {
            let row = row_for(&mut by_symbol, &trade.symbol, &trade.exchange);
            row.trades += 1;
            row.fees += trade.fee;
        }

        let symbols: Vec<SymbolPnl> = by_symbol
            .into_values()
            .map(|mut row| {
                row.total_pnl = row.realized_pnl + row.unrealized_pnl;
                row
            })
            .collect();
        let total_realized: Decimal = symbols.iter().map(|s| s.realized_pnl).sum();
        let total_unrealized: Decimal = symbols.iter().map(|s| s.unrealized_pnl).sum();

        PnlSummary {
            user_id: user_id.clone(),
            trading_date,
            symbols,
            total_realized,
            total_unrealized,
            total_pnl: total_realized + total_unrealized,
        }
    }

    /// Summarises one user's fund and open exposure.
    pub fn account_summary(&self, fund: &Fund, positions: &[Position]) -> AccountSummary {
        let own: Vec<&Position> = positions.iter().filter(|p| p.user_id == fund.user_id).collect();
        let unrealized_pnl: Decimal = own.iter().map(|p| p.unrealized_pnl).sum();
        let equity = fund.available_cash + fund.utilized_margin + fund.unsettled_pnl + unrealized_pnl;
        let return_percentage = if fund.starting_capital > dec!(0) {
            ((equity - fund.starting_capital) / fund.starting_capital)
                .to_f64()
                .unwrap_or(0.0)
                * 100.0
        } else {
            0.0
        };

        AccountSummary {
            user_id: fund.user_id.clone(),
            starting_capital: fund.starting_capital,
            available_cash: fund.available_cash,
            utilized_margin: fund.utilized_margin,
            unsettled_pnl: fund.unsettled_pnl,
            realized_pnl: fund.realized_pnl,
            today_realized_pnl: fund.today_realized_pnl,
            unrealized_pnl,
            equity,
            return_percentage,
            open_positions: own.iter().filter(|p| !p.is_flat()).count() as u32,
        }
    }
}

fn row_for<'a>(
    map: &'a mut BTreeMap<(Symbol, Exchange), SymbolPnl>,
    symbol: &Symbol,
    exchange: &Exchange,
) -> &'a mut SymbolPnl {
    map.entry((symbol.clone(), exchange.clone()))
        .or_insert_with(|| SymbolPnl {
            symbol: symbol.clone(),
            exchange: exchange.clone(),
            net_quantity: dec!(0),
            realized_pnl: dec!(0),
            unrealized_pnl: dec!(0),
            total_pnl: dec!(0),
            trades: 0,
            fees: dec!(0),
        })
}
