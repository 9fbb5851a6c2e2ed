// In crates/engine/src/lib.rs

pub mod config;
pub mod control;
pub mod sandbox;
pub mod settlement;
pub mod supervisor;
pub mod task;

pub use config::EngineConfig;
pub use control::{ApiResponse, ControlSurface, EngineStatus};
pub use sandbox::{Sandbox, SandboxDeps, TickReport};
pub use settlement::{CatchUpReport, JobOutcome, SettlementProcessor};
pub use supervisor::EngineSupervisor;
pub use task::{ExecutionTask, TickSummary};

use core_types::Result;
use market_data::TradingCalendar;
use std::sync::Arc;

/// The assembled sandbox: shared state, settlement, the worker supervisor and
/// the control surface on top of them.
pub struct Engine {
    pub sandbox: Arc<Sandbox>,
    pub settlement: Arc<SettlementProcessor>,
    pub supervisor: Arc<EngineSupervisor>,
    pub control: Arc<ControlSurface>,
}

impl Engine {
    /// Loads persisted state and wires every component. Nothing is started.
    pub async fn build(
        config: EngineConfig,
        deps: SandboxDeps,
        calendar: Arc<dyn TradingCalendar>,
    ) -> Result<Self> {
        tracing::info!(
            store = deps.store.name(),
            quotes = deps.quotes.name(),
            policy = deps.policy.name(),
            "Initializing sandbox engine..."
        );
        let events = deps.events.clone();
        let sandbox = Arc::new(Sandbox::load(config, deps).await?);
        let settlement = Arc::new(SettlementProcessor::new(sandbox.clone(), calendar));
        let supervisor = Arc::new(EngineSupervisor::new(
            sandbox.clone(),
            settlement.clone(),
            events,
        ));
        let control = Arc::new(ControlSurface::new(
            sandbox.clone(),
            supervisor.clone(),
            settlement.clone(),
        ));
        Ok(Self {
            sandbox,
            settlement,
            supervisor,
            control,
        })
    }
}
