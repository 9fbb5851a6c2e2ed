// In crates/engine/src/control.rs

use crate::sandbox::Sandbox;
use crate::settlement::{CatchUpReport, SettlementProcessor};
use crate::supervisor::EngineSupervisor;
use analytics::{AccountSummary, PnlSummary};
use core_types::{
    Error, Exchange, Fund, NewOrder, Order, OrderChanges, OrderId, Position, PositionKey,
    ProductType, Result, Symbol, Trade, UserId,
};
use serde::Serialize;
use std::sync::Arc;

/// The uniform envelope every control call answers with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
    pub code: u16,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            code: 200,
        }
    }

    pub fn error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            message: err.to_string(),
            code: err.code(),
        }
    }

    fn from_result(result: Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data, message),
            Err(e) => Self::error(&e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub analyze_mode: bool,
}

/// The narrow surface the gateway calls into. Nothing here returns an error;
/// failures come back as `success == false` with a code and message.
pub struct ControlSurface {
    sandbox: Arc<Sandbox>,
    supervisor: Arc<EngineSupervisor>,
    settlement: Arc<SettlementProcessor>,
}

impl ControlSurface {
    pub fn new(
        sandbox: Arc<Sandbox>,
        supervisor: Arc<EngineSupervisor>,
        settlement: Arc<SettlementProcessor>,
    ) -> Self {
        Self {
            sandbox,
            supervisor,
            settlement,
        }
    }

    async fn analyze_mode(&self) -> Result<bool> {
        Ok(self.sandbox.store().get_analyze_mode().await?)
    }

    // --- Engine lifecycle ---

    pub async fn start_execution_engine(&self) -> ApiResponse<EngineStatus> {
        match self.analyze_mode().await {
            Ok(true) => {
                let message = self.supervisor.start().await;
                ApiResponse::ok(self.status(true).await, message)
            }
            Ok(false) => ApiResponse::error(&Error::SchedulerState(
                "Analyze mode is off; the sandbox engine only runs in analyze mode".into(),
            )),
            Err(e) => ApiResponse::error(&e),
        }
    }

    pub async fn stop_execution_engine(&self) -> ApiResponse<EngineStatus> {
        let message = self.supervisor.stop().await;
        match self.analyze_mode().await {
            Ok(analyze_mode) => ApiResponse::ok(self.status(analyze_mode).await, message),
            Err(e) => {
                tracing::warn!(error = %e, "Engine stopped, but analyze mode could not be read.");
                ApiResponse::error(&e)
            }
        }
    }

    pub async fn engine_status(&self) -> ApiResponse<EngineStatus> {
        match self.analyze_mode().await {
            Ok(analyze_mode) => ApiResponse::ok(self.status(analyze_mode).await, "Engine status"),
            Err(e) => ApiResponse::error(&e),
        }
    }

    async fn status(&self, analyze_mode: bool) -> EngineStatus {
        EngineStatus {
            running: self.supervisor.is_running().await,
            analyze_mode,
        }
    }

    pub async fn catchup_missed_settlements(&self) -> ApiResponse<CatchUpReport> {
        let report = self.settlement.catch_up().await;
        if report.failed.is_empty() {
            let message = format!("Catch-up complete: {} job(s) run", report.ran.len());
            ApiResponse::ok(report, message)
        } else {
            ApiResponse {
                success: false,
                message: format!("Catch-up finished with {} failed job(s)", report.failed.len()),
                code: if report.fatal { 500 } else { 409 },
                data: Some(report),
            }
        }
    }

    pub async fn get_analyze_mode(&self) -> ApiResponse<bool> {
        ApiResponse::from_result(self.analyze_mode().await, "Analyze mode")
    }

    /// Switches analyze mode. Turning it on starts the engine and replays
    /// missed settlements; turning it off stops the engine.
    pub async fn set_analyze_mode(&self, enabled: bool) -> ApiResponse<EngineStatus> {
        if let Err(e) = self.sandbox.store().set_analyze_mode(enabled).await {
            return ApiResponse::error(&Error::from(e));
        }
        tracing::info!(enabled, "Analyze mode changed.");
        if enabled {
            self.supervisor.start().await;
            let report = self.settlement.catch_up().await;
            if !report.failed.is_empty() {
                tracing::warn!(failed = report.failed.len(), "Catch-up after enabling analyze mode had failures.");
            }
            ApiResponse::ok(self.status(true).await, "Analyze mode enabled")
        } else {
            self.supervisor.stop().await;
            ApiResponse::ok(self.status(false).await, "Analyze mode disabled")
        }
    }

    // --- Orders ---

    pub async fn place_order(&self, order: NewOrder) -> ApiResponse<Order> {
        ApiResponse::from_result(self.sandbox.place_order(order).await, "Order placed")
    }

    pub async fn modify_order(&self, user_id: &UserId, order_id: OrderId, changes: OrderChanges) -> ApiResponse<Order> {
        ApiResponse::from_result(
            self.sandbox.modify_order(order_id, user_id, changes).await,
            "Order modified",
        )
    }

    pub async fn cancel_order(&self, user_id: &UserId, order_id: OrderId) -> ApiResponse<Order> {
        ApiResponse::from_result(self.sandbox.cancel_order(order_id, user_id).await, "Order cancelled")
    }

    pub async fn cancel_all_orders(&self, user_id: &UserId) -> ApiResponse<Vec<Order>> {
        match self.sandbox.cancel_all_orders(user_id).await {
            Ok(orders) => {
                let message = format!("{} order(s) cancelled", orders.len());
                ApiResponse::ok(orders, message)
            }
            Err(e) => ApiResponse::error(&e),
        }
    }

    pub async fn close_position(
        &self,
        user_id: &UserId,
        symbol: Symbol,
        exchange: Exchange,
        product: ProductType,
    ) -> ApiResponse<Option<Trade>> {
        let key = PositionKey {
            user_id: user_id.clone(),
            symbol,
            exchange,
            product,
        };
        match self.sandbox.close_position(&key).await {
            Ok(Some(trade)) => ApiResponse::ok(Some(trade), "Position closed"),
            Ok(None) => ApiResponse::ok(None, "No open position"),
            Err(e) => ApiResponse::error(&e),
        }
    }

    pub async fn reset_sandbox(&self, user_id: &UserId) -> ApiResponse<Fund> {
        ApiResponse::from_result(self.sandbox.reset_user(user_id).await, "Sandbox reset")
    }

    // --- Books and reports ---

    pub async fn order_book(&self, user_id: &UserId) -> ApiResponse<Vec<Order>> {
        ApiResponse::ok(self.sandbox.orders(user_id).await, "Order book")
    }

    pub async fn order_status(&self, user_id: &UserId, order_id: OrderId) -> ApiResponse<Order> {
        ApiResponse::from_result(self.sandbox.order(order_id, user_id).await, "Order status")
    }

    pub async fn trade_book(&self, user_id: &UserId) -> ApiResponse<Vec<Trade>> {
        ApiResponse::ok(self.sandbox.trades(user_id).await, "Trade book")
    }

    pub async fn positions(&self, user_id: &UserId) -> ApiResponse<Vec<Position>> {
        ApiResponse::ok(self.sandbox.positions(user_id).await, "Positions")
    }

    pub async fn funds(&self, user_id: &UserId) -> ApiResponse<AccountSummary> {
        ApiResponse::ok(self.sandbox.account_summary(user_id).await, "Funds")
    }

    pub async fn day_pnl(&self, user_id: &UserId) -> ApiResponse<PnlSummary> {
        ApiResponse::ok(self.sandbox.day_pnl(user_id).await, "Day P&L by symbol")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::Validation("quantity".into()), 400)]
    #[case(Error::Unauthorized("order 7".into()), 403)]
    #[case(Error::NotFound("order 7".into()), 404)]
    #[case(Error::SchedulerState("analyze mode".into()), 409)]
    #[case(Error::Persistence("disk".into()), 500)]
    fn test_error_envelope_carries_code(#[case] err: Error, #[case] code: u16) {
        let response: ApiResponse<Order> = ApiResponse::error(&err);
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.code, code);
        assert_eq!(response.message, err.to_string());
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let response = ApiResponse::ok(
            EngineStatus {
                running: true,
                analyze_mode: true,
            },
            "Engine status",
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["code"], 200);
        assert_eq!(json["data"]["running"], true);
        assert_eq!(json["message"], "Engine status");
    }
}
