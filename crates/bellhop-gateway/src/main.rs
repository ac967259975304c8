use std::net::SocketAddr;
use std::sync::Arc;

use bellhop_core::{config::BellhopConfig, AppointmentId, Clock};
use bellhop_queue::JobQueue;
use clap::{Parser, Subcommand};
use tracing::info;

mod app;
mod http;

/// Appointment reminder scheduler: HTTP hooks, worker pool and operator CLI.
#[derive(Parser)]
#[command(name = "bellhop-gateway", version, about)]
struct Cli {
    /// Config file (default: $BELLHOP_CONFIG, then ~/.bellhop/bellhop.toml)
    #[arg(long, short)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// HTTP API plus the reminder worker pool (default)
    Serve,
    /// Worker pool only
    Worker,
    /// Print queue counters and the next pending reminders as JSON
    Stats {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Schedule reminders for a stored appointment
    Schedule { id: String },
    /// Cancel pending reminders for an appointment
    Cancel { id: String },
    /// Cancel and re-schedule using the stored appointment's current times
    Reschedule { id: String },
    /// Delete fired and discarded jobs last touched before the cutoff
    Purge {
        #[arg(long)]
        older_than_hours: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bellhop_gateway=info,bellhop_reminders=info,bellhop_queue=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > BELLHOP_CONFIG env > ~/.bellhop/bellhop.toml
    let config_path = cli.config.or_else(|| std::env::var("BELLHOP_CONFIG").ok());
    let config = BellhopConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        BellhopConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    // WAL lets workers and HTTP handlers on separate connections proceed
    // concurrently; the pragma persists in the file.
    let db = app::open_connection(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    drop(db);

    let state = Arc::new(app::AppState::open(config, &db_path)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await?,
        Command::Worker => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let pool = tokio::spawn(state.executor()?.run(shutdown_rx));
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            pool.await?;
        }
        Command::Stats { limit } => {
            let stats = state.monitor.stats(limit)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Schedule { id } => {
            let appointment = stored_appointment(&state, &id)?;
            let result = state.scheduler.schedule(&appointment)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Cancel { id } => {
            let result = state.canceller.cancel(&AppointmentId(id))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Reschedule { id } => {
            let appointment = stored_appointment(&state, &id)?;
            let result = state.rescheduler.reschedule(&appointment)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Purge { older_than_hours } => {
            let cutoff = chrono::Duration::try_hours(older_than_hours)
                .and_then(|age| state.clock.now().checked_sub_signed(age))
                .ok_or_else(|| anyhow::anyhow!("--older-than-hours out of range: {older_than_hours}"))?;
            let purged = state.queue.purge_finished(cutoff)?;
            println!("purged {purged} finished reminder jobs");
        }
    }
    Ok(())
}

/// HTTP server and worker pool until Ctrl-C.
async fn serve(state: Arc<app::AppState>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let pool = tokio::spawn(state.executor()?.run(shutdown_rx));

    let addr: SocketAddr =
        format!("{}:{}", state.config.gateway.bind, state.config.gateway.port).parse()?;
    info!("Bellhop gateway listening on {}", addr);

    let router = app::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // signal the worker pool to stop and wait for in-flight jobs
    let _ = shutdown_tx.send(true);
    pool.await?;
    Ok(())
}

fn stored_appointment(
    state: &app::AppState,
    id: &str,
) -> anyhow::Result<bellhop_core::Appointment> {
    state
        .store
        .load(&AppointmentId::from(id))?
        .ok_or_else(|| bellhop_core::BellhopError::AppointmentNotFound { id: id.to_string() }.into())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
