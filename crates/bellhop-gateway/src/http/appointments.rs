//! Appointment lifecycle hooks.
//!
//! The booking side calls these after its own change commits:
//!
//! | Route                                  | Effect                          |
//! |----------------------------------------|---------------------------------|
//! | `PUT    /appointments/{id}`            | store the appointment only      |
//! | `POST   /appointments/{id}/reminders`  | store, then schedule reminders  |
//! | `PUT    /appointments/{id}/reminders`  | store, then reschedule          |
//! | `DELETE /appointments/{id}/reminders`  | cancel pending reminders        |
//! | `GET    /appointments/{id}/reminders`  | list the appointment's jobs     |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bellhop_core::{Appointment, AppointmentId};
use bellhop_reminders::{CancelResult, ReminderError, RescheduleResult, ScheduleResult, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

/// PUT /appointments/{id}
pub async fn put_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(appointment): Json<Appointment>,
) -> Result<Json<Value>, ApiError> {
    store(&state, &id, &appointment)?;
    Ok(Json(json!({ "stored": appointment.id })))
}

/// GET /appointments/{id}/reminders
pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let appointment_id = AppointmentId(id);
    let jobs = state
        .monitor
        .jobs_for(&appointment_id)
        .map_err(reminder_error)?;
    Ok(Json(json!({
        "appointment_id": appointment_id,
        "jobs": jobs,
    })))
}

/// POST /appointments/{id}/reminders
pub async fn schedule_reminders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(appointment): Json<Appointment>,
) -> Result<Json<ScheduleResult>, ApiError> {
    store(&state, &id, &appointment)?;
    state
        .scheduler
        .schedule(&appointment)
        .map(Json)
        .map_err(reminder_error)
}

/// PUT /appointments/{id}/reminders
pub async fn reschedule_reminders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(appointment): Json<Appointment>,
) -> Result<Json<RescheduleResult>, ApiError> {
    store(&state, &id, &appointment)?;
    state
        .rescheduler
        .reschedule(&appointment)
        .map(Json)
        .map_err(reminder_error)
}

/// DELETE /appointments/{id}/reminders
pub async fn cancel_reminders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResult>, ApiError> {
    state
        .canceller
        .cancel(&AppointmentId(id))
        .map(Json)
        .map_err(reminder_error)
}

/// Persist the body so the executor re-reads what the caller committed.
fn store(state: &AppState, path_id: &str, appointment: &Appointment) -> Result<(), ApiError> {
    if appointment.id.as_str() != path_id {
        warn!(path_id, body_id = %appointment.id, "appointment id mismatch");
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": format!("path id {path_id} does not match body id {}", appointment.id),
                "code": "INVALID_INPUT",
            })),
        ));
    }
    state.store.upsert(appointment).map_err(store_error)
}

pub fn reminder_error(e: ReminderError) -> ApiError {
    let status = match &e {
        ReminderError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReminderError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ReminderError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "reminder operation failed");
    }
    (
        status,
        Json(json!({ "error": e.to_string(), "code": e.code() })),
    )
}

fn store_error(e: StoreError) -> ApiError {
    error!(error = %e, "appointment store write failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string(), "code": "STORE_UNAVAILABLE" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use bellhop_core::{config::BellhopConfig, Clock, ManualClock, ReminderKind};
    use bellhop_queue::SqliteJobQueue;
    use bellhop_reminders::{JobOutcome, SqliteAppointmentStore};
    use chrono::{Duration, TimeZone, Utc};
    use rusqlite::Connection;
    use tower::ServiceExt;

    fn app() -> (axum::Router, Arc<ManualClock>) {
        let (state, clock) = state();
        (crate::app::build_router(state), clock)
    }

    fn state() -> (Arc<AppState>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap(),
        ));
        let queue = Arc::new(
            SqliteJobQueue::new(
                Connection::open_in_memory().unwrap(),
                clock.clone(),
                Duration::minutes(5),
            )
            .unwrap(),
        );
        let store =
            Arc::new(SqliteAppointmentStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let state = Arc::new(AppState::new(
            BellhopConfig::default(),
            clock.clone(),
            queue,
            store,
        ));
        (state, clock)
    }

    fn body_for(id: &str, clock: &ManualClock, lead: Duration) -> String {
        let start = clock.now() + lead;
        json!({
            "id": id,
            "start_time": start,
            "end_time": start + Duration::hours(1),
            "status": "SCHEDULED",
            "recipient_contact": "lee@example.com",
        })
        .to_string()
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(b) => {
                req = req.header("content-type", "application/json");
                Body::from(b)
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn schedule_list_and_cancel() {
        let (app, clock) = app();
        let body = body_for("appt-1", &clock, Duration::hours(30));

        let (status, value) = call(&app, "POST", "/appointments/appt-1/reminders", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["scheduled"].as_array().unwrap().len(), 3);

        let (status, value) = call(&app, "GET", "/appointments/appt-1/reminders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["jobs"].as_array().unwrap().len(), 3);

        let (status, value) = call(&app, "GET", "/stats?limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["pending"], 3);
        assert_eq!(value["next_pending"].as_array().unwrap().len(), 2);

        let (status, value) = call(&app, "DELETE", "/appointments/appt-1/reminders", None).await;
        assert_eq!(status, StatusCode::OK);
        let outcomes: Vec<_> = value["reminders"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["outcome"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(outcomes, vec!["removed", "removed", "removed"]);
    }

    #[tokio::test]
    async fn reschedule_replaces_jobs() {
        let (app, clock) = app();
        let first = body_for("appt-2", &clock, Duration::hours(30));
        call(&app, "POST", "/appointments/appt-2/reminders", Some(first)).await;

        let moved = body_for("appt-2", &clock, Duration::minutes(45));
        let (status, value) = call(&app, "PUT", "/appointments/appt-2/reminders", Some(moved)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["cancelled"]["reminders"].as_array().unwrap().len(), 3);
        assert_eq!(value["scheduled"]["scheduled"].as_array().unwrap().len(), 1);
        assert_eq!(value["scheduled"]["scheduled"][0]["kind"], "at_time");
    }

    #[tokio::test]
    async fn posted_reminders_are_delivered() {
        let (state, clock) = state();
        let app = crate::app::build_router(state.clone());
        let body = json!({
            "id": "appt-5",
            "start_time": "2026-05-05T16:00:00.123456Z",
            "end_time": "2026-05-05T17:00:00.123456Z",
            "status": "SCHEDULED",
            "recipient_contact": "lee@example.com",
        })
        .to_string();
        let (status, _) = call(&app, "POST", "/appointments/appt-5/reminders", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let executor = state.executor().unwrap();
        let start = "2026-05-05T16:00:00.123456Z".parse().unwrap();
        for kind in ReminderKind::ALL {
            clock.set(kind.fire_at(start));
            assert_eq!(executor.drain_due().await.unwrap(), vec![JobOutcome::Sent]);
        }

        let (_, value) = call(&app, "GET", "/stats", None).await;
        assert_eq!(value["fired"], 3);
        assert_eq!(value["outcomes"]["sent"], 3);
    }

    #[tokio::test]
    async fn invalid_input_is_422() {
        let (app, clock) = app();

        let past = body_for("appt-3", &clock, Duration::hours(-1));
        let (status, value) = call(&app, "POST", "/appointments/appt-3/reminders", Some(past)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(value["code"], "INVALID_INPUT");

        let other = body_for("appt-4", &clock, Duration::hours(5));
        let (status, _) = call(&app, "POST", "/appointments/appt-3/reminders", Some(other)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn health_reports_next_fire_time() {
        let (app, clock) = app();
        let (_, value) = call(&app, "GET", "/health", None).await;
        assert_eq!(value["status"], "ok");
        assert!(value["next_fire_at"].is_null());

        let body = body_for("appt-5", &clock, Duration::minutes(30));
        call(&app, "PUT", "/appointments/appt-5", Some(body.clone())).await;
        call(&app, "POST", "/appointments/appt-5/reminders", Some(body)).await;
        let (_, value) = call(&app, "GET", "/health", None).await;
        assert!(value["next_fire_at"].is_string());
    }
}
