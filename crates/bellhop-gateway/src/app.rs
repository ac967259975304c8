use std::sync::Arc;

use axum::{
    routing::{get, put},
    Router,
};
use bellhop_core::{config::BellhopConfig, Clock, SystemClock};
use bellhop_queue::SqliteJobQueue;
use bellhop_reminders::{
    Canceller, Executor, ExecutorConfig, LogSender, Monitor, NotificationSender, Rescheduler,
    Scheduler, SqliteAppointmentStore, WebhookSender,
};
use rusqlite::Connection;
use tracing::info;

/// Shared state handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub config: BellhopConfig,
    pub clock: Arc<dyn Clock>,
    pub queue: Arc<SqliteJobQueue>,
    pub store: Arc<SqliteAppointmentStore>,
    pub scheduler: Scheduler,
    pub canceller: Canceller,
    pub rescheduler: Rescheduler,
    pub monitor: Monitor,
}

impl AppState {
    pub fn new(
        config: BellhopConfig,
        clock: Arc<dyn Clock>,
        queue: Arc<SqliteJobQueue>,
        store: Arc<SqliteAppointmentStore>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(queue.clone(), clock.clone()),
            canceller: Canceller::new(queue.clone()),
            rescheduler: Rescheduler::new(
                Canceller::new(queue.clone()),
                Scheduler::new(queue.clone(), clock.clone()),
            ),
            monitor: Monitor::new(queue.clone()),
            config,
            clock,
            queue,
            store,
        }
    }

    /// Open the queue and the appointment store on `db_path`, each with its
    /// own connection. Rejects worker settings the executor could not honour.
    pub fn open(config: BellhopConfig, db_path: &str) -> anyhow::Result<Self> {
        config.worker.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let visibility = config.worker.visibility_timeout()?;
        let queue = Arc::new(SqliteJobQueue::new(
            open_connection(db_path)?,
            clock.clone(),
            visibility,
        )?);
        let store = Arc::new(SqliteAppointmentStore::new(open_connection(db_path)?)?);
        Ok(Self::new(config, clock, queue, store))
    }

    /// Worker pool wired to the configured notification sender.
    pub fn executor(&self) -> anyhow::Result<Executor> {
        let config = ExecutorConfig::try_from(&self.config.worker)?;
        let sender: Arc<dyn NotificationSender> = match &self.config.sender.webhook_url {
            Some(url) => {
                info!(url = %url, "reminders delivered via webhook");
                Arc::new(WebhookSender::new(
                    url.clone(),
                    self.config.sender.webhook_key.clone(),
                ))
            }
            None => {
                info!("no sender.webhook_url configured, reminders are only logged");
                Arc::new(LogSender)
            }
        };
        Ok(Executor::new(
            self.queue.clone(),
            self.store.clone(),
            sender,
            self.clock.clone(),
            config,
        ))
    }
}

/// Several connections share one database file; wait for locks instead of
/// failing with SQLITE_BUSY.
pub fn open_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/stats", get(crate::http::stats::stats_handler))
        .route(
            "/appointments/{id}",
            put(crate::http::appointments::put_appointment),
        )
        .route(
            "/appointments/{id}/reminders",
            get(crate::http::appointments::list_reminders)
                .post(crate::http::appointments::schedule_reminders)
                .put(crate::http::appointments::reschedule_reminders)
                .delete(crate::http::appointments::cancel_reminders),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_send_timeout_longer_than_lease() {
        let mut config = BellhopConfig::default();
        config.worker.send_timeout_secs = 600;
        let err = AppState::open(config, ":memory:").err().unwrap();
        assert!(err.to_string().contains("send_timeout_secs"));

        let state = AppState::open(BellhopConfig::default(), ":memory:").unwrap();
        assert!(state.executor().is_ok());
    }

    #[test]
    fn executor_rejects_out_of_range_backoff() {
        let mut state = AppState::open(BellhopConfig::default(), ":memory:").unwrap();
        state.config.worker.backoff_max_secs = u64::MAX;
        assert!(state.executor().is_err());
    }
}
