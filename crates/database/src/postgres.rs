// In crates/database/src/postgres.rs

use crate::rows::{FundRow, OrderRow, PendingRow, PositionRow, SettlementRow, TradeRow, db_id};
use crate::{Changeset, Error, Result, Snapshot, Store};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{Fund, Order, PendingSettlement, Position, SettlementKind, SettlementRecord, Trade};
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};

const ANALYZE_MODE_KEY: &str = "analyze_mode";

/// A wrapper around the `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct PgStore(PgPool);

impl PgStore {
    /// Establishes a connection pool to the PostgreSQL database and runs migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        // Run database migrations. This ensures the database schema is up-to-date.
        sqlx::migrate!("../../migrations").run(&pool).await?;

        Ok(Self(pool))
    }

    async fn upsert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandbox_orders (id, user_id, symbol, exchange, side, order_type, quantity,
                limit_price, trigger_price, product, status, filled_price, triggered, reason,
                created_at, updated_at, filled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                limit_price = EXCLUDED.limit_price,
                trigger_price = EXCLUDED.trigger_price,
                status = EXCLUDED.status,
                filled_price = EXCLUDED.filled_price,
                triggered = EXCLUDED.triggered,
                reason = EXCLUDED.reason,
                updated_at = EXCLUDED.updated_at,
                filled_at = EXCLUDED.filled_at
            "#,
        )
        .bind(db_id(order.id)?)
        .bind(&order.user_id.0)
        .bind(&order.symbol.0)
        .bind(&order.exchange.0)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.quantity)
        .bind(order.limit_price)
        .bind(order.trigger_price)
        .bind(order.product.as_str())
        .bind(order.status.as_str())
        .bind(order.filled_price)
        .bind(order.triggered)
        .bind(&order.reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.filled_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(())
    }

    async fn upsert_position(tx: &mut Transaction<'_, Postgres>, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandbox_positions (user_id, symbol, exchange, product, net_quantity,
                average_price, realized_pnl, today_realized_pnl, unrealized_pnl, margin_blocked,
                last_settlement_date, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id, symbol, exchange, product) DO UPDATE SET
                net_quantity = EXCLUDED.net_quantity,
                average_price = EXCLUDED.average_price,
                realized_pnl = EXCLUDED.realized_pnl,
                today_realized_pnl = EXCLUDED.today_realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                margin_blocked = EXCLUDED.margin_blocked,
                last_settlement_date = EXCLUDED.last_settlement_date,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&position.user_id.0)
        .bind(&position.symbol.0)
        .bind(&position.exchange.0)
        .bind(position.product.as_str())
        .bind(position.net_quantity)
        .bind(position.average_price)
        .bind(position.realized_pnl)
        .bind(position.today_realized_pnl)
        .bind(position.unrealized_pnl)
        .bind(position.margin_blocked)
        .bind(position.last_settlement_date)
        .bind(position.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(())
    }

    async fn upsert_fund(tx: &mut Transaction<'_, Postgres>, fund: &Fund) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandbox_funds (user_id, starting_capital, available_cash, collateral,
                utilized_margin, realized_pnl, today_realized_pnl, unsettled_pnl, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE SET
                available_cash = EXCLUDED.available_cash,
                collateral = EXCLUDED.collateral,
                utilized_margin = EXCLUDED.utilized_margin,
                realized_pnl = EXCLUDED.realized_pnl,
                today_realized_pnl = EXCLUDED.today_realized_pnl,
                unsettled_pnl = EXCLUDED.unsettled_pnl,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&fund.user_id.0)
        .bind(fund.starting_capital)
        .bind(fund.available_cash)
        .bind(fund.collateral)
        .bind(fund.utilized_margin)
        .bind(fund.realized_pnl)
        .bind(fund.today_realized_pnl)
        .bind(fund.unsettled_pnl)
        .bind(fund.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(())
    }

    async fn insert_trade(tx: &mut Transaction<'_, Postgres>, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandbox_trades (order_id, user_id, symbol, exchange, side, product,
                quantity, price, fee, realized_pnl, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(db_id(trade.order_id)?)
        .bind(&trade.user_id.0)
        .bind(&trade.symbol.0)
        .bind(&trade.exchange.0)
        .bind(trade.side.as_str())
        .bind(trade.product.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.fee)
        .bind(trade.realized_pnl)
        .bind(trade.executed_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(())
    }

    async fn insert_pending(tx: &mut Transaction<'_, Postgres>, pending: &PendingSettlement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandbox_pending_settlements (order_id, user_id, symbol, exchange, product,
                trade_date, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(db_id(pending.order_id)?)
        .bind(&pending.user_id.0)
        .bind(&pending.symbol.0)
        .bind(&pending.exchange.0)
        .bind(pending.product.as_str())
        .bind(pending.trade_date)
        .bind(pending.amount)
        .execute(&mut **tx)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    fn name(&self) -> &'static str {
        "PgStore"
    }

    async fn load(&self) -> Result<Snapshot> {
        let orders = sqlx::query_as::<_, OrderRow>("SELECT * FROM sandbox_orders ORDER BY id")
            .fetch_all(&self.0)
            .await
            .map_err(Error::OperationFailed)?
            .into_iter()
            .map(Order::try_from)
            .collect::<Result<Vec<_>>>()?;
        let positions = sqlx::query_as::<_, PositionRow>("SELECT * FROM sandbox_positions")
            .fetch_all(&self.0)
            .await
            .map_err(Error::OperationFailed)?
            .into_iter()
            .map(Position::try_from)
            .collect::<Result<Vec<_>>>()?;
        let funds = sqlx::query_as::<_, FundRow>("SELECT * FROM sandbox_funds")
            .fetch_all(&self.0)
            .await
            .map_err(Error::OperationFailed)?
            .into_iter()
            .map(Fund::from)
            .collect();
        let trades = sqlx::query_as::<_, TradeRow>(
            "SELECT order_id, user_id, symbol, exchange, side, product, quantity, price, fee, \
             realized_pnl, executed_at FROM sandbox_trades ORDER BY executed_at, order_id",
        )
        .fetch_all(&self.0)
        .await
        .map_err(Error::OperationFailed)?
        .into_iter()
        .map(Trade::try_from)
        .collect::<Result<Vec<_>>>()?;
        let pending = sqlx::query_as::<_, PendingRow>(
            "SELECT * FROM sandbox_pending_settlements ORDER BY trade_date, order_id",
        )
        .fetch_all(&self.0)
        .await
        .map_err(Error::OperationFailed)?
        .into_iter()
        .map(PendingSettlement::try_from)
        .collect::<Result<Vec<_>>>()?;
        let settlements = sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM sandbox_settlements ORDER BY trading_date, kind",
        )
        .fetch_all(&self.0)
        .await
        .map_err(Error::OperationFailed)?
        .into_iter()
        .map(SettlementRecord::try_from)
        .collect::<Result<Vec<_>>>()?;

        Ok(Snapshot {
            orders,
            positions,
            funds,
            trades,
            pending,
            settlements,
        })
    }

    async fn commit(&self, changes: &Changeset) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tx = self.0.begin().await.map_err(Error::OperationFailed)?;

        for order in &changes.orders {
            Self::upsert_order(&mut tx, order).await?;
        }
        for position in &changes.positions {
            Self::upsert_position(&mut tx, position).await?;
        }
        for fund in &changes.funds {
            Self::upsert_fund(&mut tx, fund).await?;
        }
        for trade in &changes.trades {
            Self::insert_trade(&mut tx, trade).await?;
        }
        for pending in &changes.pending_added {
            Self::insert_pending(&mut tx, pending).await?;
        }
        if !changes.pending_cleared.is_empty() {
            let ids = changes
                .pending_cleared
                .iter()
                .map(|id| db_id(*id))
                .collect::<Result<Vec<i64>>>()?;
            sqlx::query("DELETE FROM sandbox_pending_settlements WHERE order_id = ANY($1)")
                .bind(ids)
                .execute(&mut *tx)
                .await
                .map_err(Error::OperationFailed)?;
        }
        if let Some(record) = &changes.settlement {
            sqlx::query(
                r#"
                INSERT INTO sandbox_settlements (trading_date, kind, ran_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (trading_date, kind) DO NOTHING
                "#,
            )
            .bind(record.trading_date)
            .bind(record.kind.as_str())
            .bind(record.ran_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::OperationFailed)?;
        }

        tx.commit().await.map_err(Error::OperationFailed)?;
        Ok(())
    }

    async fn has_settlement_record(&self, date: NaiveDate, kind: SettlementKind) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sandbox_settlements WHERE trading_date = $1 AND kind = $2)",
        )
        .bind(date)
        .bind(kind.as_str())
        .fetch_one(&self.0)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(exists)
    }

    async fn settlement_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SettlementRecord>> {
        sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM sandbox_settlements WHERE trading_date BETWEEN $1 AND $2 \
             ORDER BY trading_date, kind",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.0)
        .await
        .map_err(Error::OperationFailed)?
        .into_iter()
        .map(SettlementRecord::try_from)
        .collect()
    }

    async fn get_analyze_mode(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sandbox_config WHERE key = $1")
                .bind(ANALYZE_MODE_KEY)
                .fetch_optional(&self.0)
                .await
                .map_err(Error::OperationFailed)?;
        Ok(value.as_deref() == Some("true"))
    }

    async fn set_analyze_mode(&self, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandbox_config (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(ANALYZE_MODE_KEY)
        .bind(enabled.to_string())
        .execute(&self.0)
        .await
        .map_err(Error::OperationFailed)?;
        Ok(())
    }
}
