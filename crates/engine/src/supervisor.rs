// In crates/engine/src/supervisor.rs

use crate::sandbox::Sandbox;
use crate::settlement::SettlementProcessor;
use crate::task::ExecutionTask;
use core_types::Result;
use events::{EngineState, EventSender, SandboxEvent, publish};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

enum WorkerState {
    Stopped,
    Running {
        stop_tx: watch::Sender<bool>,
        handle: JoinHandle<Result<()>>,
    },
}

/// Owns the single execution worker and its STOPPED/RUNNING lifecycle.
///
/// `start` and `stop` are idempotent and safe to call concurrently.
pub struct EngineSupervisor {
    sandbox: Arc<Sandbox>,
    settlement: Arc<SettlementProcessor>,
    events: EventSender,
    state: Mutex<WorkerState>,
}

impl EngineSupervisor {
    pub fn new(sandbox: Arc<Sandbox>, settlement: Arc<SettlementProcessor>, events: EventSender) -> Self {
        Self {
            sandbox,
            settlement,
            events,
            state: Mutex::new(WorkerState::Stopped),
        }
    }

    /// Spawns the worker unless one is already running.
    pub async fn start(&self) -> &'static str {
        let mut state = self.state.lock().await;
        if let WorkerState::Running { handle, .. } = &*state {
            if !handle.is_finished() {
                return "Execution engine is already running";
            }
            tracing::warn!("Previous execution worker had exited; starting a new one.");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = ExecutionTask::new(self.sandbox.clone(), self.settlement.clone(), stop_rx);
        let handle = tokio::spawn(task.run());
        *state = WorkerState::Running { stop_tx, handle };

        tracing::info!("Execution engine started.");
        self.announce(true, "Execution engine started");
        "Execution engine started"
    }

    /// Signals the worker and waits for its in-flight iteration to finish.
    pub async fn stop(&self) -> &'static str {
        let mut state = self.state.lock().await;
        let WorkerState::Running { stop_tx, handle } =
            std::mem::replace(&mut *state, WorkerState::Stopped)
        else {
            return "Execution engine is already stopped";
        };

        let _ = stop_tx.send(true);
        match handle.await {
            Ok(Ok(())) => tracing::info!("Execution engine stopped."),
            Ok(Err(e)) => tracing::warn!(error = %e, "Execution worker had already exited with an error."),
            Err(e) => tracing::error!(error = %e, "Execution worker panicked."),
        }
        self.announce(false, "Execution engine stopped");
        "Execution engine stopped"
    }

    /// True while the worker is alive. A worker that died on its own counts as stopped.
    pub async fn is_running(&self) -> bool {
        match &*self.state.lock().await {
            WorkerState::Running { handle, .. } => !handle.is_finished(),
            WorkerState::Stopped => false,
        }
    }

    fn announce(&self, running: bool, message: &str) {
        publish(
            &self.events,
            SandboxEvent::EngineState(EngineState {
                running,
                message: message.to_string(),
            }),
        );
    }
}
