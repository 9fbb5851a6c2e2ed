// In app/src/main.rs

use anyhow::Result;
use app_config::Settings;
use clap::{Parser, Subcommand, ValueEnum};
use core_types::{SystemClock, UserId};
use engine::{Engine, EngineConfig, SandboxDeps};
use events::{EventReceiver, SandboxEvent};
use market_data::{HolidayCalendar, HttpQuoteSource};
use risk::{MarginSettings, SimpleMarginPolicy};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::prelude::*;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "Paper-trading sandbox: simulated order execution, positions and settlement.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the sandbox engine until Ctrl-C.
    Run,

    /// Replays any missed EOD square-off and T+1 settlement runs, then exits.
    Catchup,

    /// Turns analyze mode on or off.
    AnalyzeMode {
        #[arg(value_enum)]
        mode: Toggle,
    },

    /// Prints funds, positions and day P&L for one user.
    Status {
        /// The sandbox user id.
        #[arg(short, long)]
        user: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let settings = app_config::load_settings()?;
    init_tracing(&settings);

    let cli = Cli::parse();
    tracing::info!(environment = %settings.app.environment, "Starting sandbox application");

    let (engine, events) = build_engine(&settings).await?;

    match cli.command {
        Commands::Run => run_engine(engine, events).await?,
        Commands::Catchup => {
            let response = engine.control.catchup_missed_settlements().await;
            print_json(&response)?;
            if !response.success {
                anyhow::bail!(response.message);
            }
        }
        Commands::AnalyzeMode { mode } => {
            let response = engine
                .control
                .set_analyze_mode(matches!(mode, Toggle::On))
                .await;
            // A one-shot command must not leave the worker behind.
            engine.supervisor.stop().await;
            print_json(&response)?;
        }
        Commands::Status { user } => {
            let user_id = UserId(user);
            print_json(&engine.control.funds(&user_id).await)?;
            print_json(&engine.control.positions(&user_id).await)?;
            print_json(&engine.control.day_pnl(&user_id).await)?;
        }
    }

    tracing::info!("Sandbox application has finished successfully.");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let level = settings
        .app
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::Targets::new()
            .with_target("sqlx::query", tracing::Level::WARN) // Disable sqlx query debug logs
            .with_default(level),
    );
    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Wires the store, quote source, margin policy and calendar into an engine.
async fn build_engine(settings: &Settings) -> Result<(Engine, EventReceiver)> {
    // --- 1. Infrastructure ---
    let store = database::open_store(&settings.database).await?;
    let config = EngineConfig::try_from(&settings.sandbox)?;
    let quotes = Arc::new(HttpQuoteSource::new(&settings.quotes, config.quote_timeout)?);
    let policy = Arc::new(SimpleMarginPolicy::new(&MarginSettings::from(&settings.sandbox))?);
    let calendar = Arc::new(HolidayCalendar::from_settings(&settings.calendar));

    // --- 2. Engine ---
    let (events_tx, events_rx) = events::channel(events::DEFAULT_CAPACITY);
    let deps = SandboxDeps {
        store,
        quotes,
        policy,
        clock: Arc::new(SystemClock),
        events: events_tx,
    };
    let engine = Engine::build(config, deps, calendar).await?;
    tracing::info!("Sandbox engine assembled.");
    Ok((engine, events_rx))
}

// --- "Run" Subcommand Logic ---

async fn run_engine(engine: Engine, events: EventReceiver) -> Result<()> {
    tokio::spawn(log_events(events));

    let report = engine.control.catchup_missed_settlements().await;
    if !report.success {
        tracing::warn!(message = %report.message, "Startup catch-up did not complete.");
    }

    let started = engine.control.start_execution_engine().await;
    if started.success {
        tracing::info!(message = %started.message, "Execution engine is live.");
    } else {
        tracing::warn!(message = %started.message, "Execution engine not started.");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received.");
    let stopped = engine.control.stop_execution_engine().await;
    tracing::info!(message = %stopped.message, "Execution engine shut down.");
    Ok(())
}

/// Mirrors engine events into the log until the channel closes.
async fn log_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(SandboxEvent::OrderFilled(trade)) => {
                tracing::debug!(order_id = %trade.order_id, symbol = %trade.symbol, price = %trade.price, "Event: order filled.");
            }
            Ok(SandboxEvent::EngineState(state)) => {
                tracing::debug!(running = state.running, message = %state.message, "Event: engine state.");
            }
            Ok(event) => tracing::trace!(?event, "Event."),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind.");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
