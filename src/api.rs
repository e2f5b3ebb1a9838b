//! HTTP surface for the attendance engine.
//!
//! Authentication happens upstream: requests reaching this router already
//! carry a verified bearer identity.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::calendar::{self, parse_date};
use crate::enroll::EnrollmentService;
use crate::error::{AttendanceError, Result};
use crate::models::{Cohort, PersonType};
use crate::query::QueryService;

#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub enrollment: EnrollmentService,
    /// Body limit for enrollment uploads.
    pub max_enroll_bytes: usize,
}

impl IntoResponse for AttendanceError {
    fn into_response(self) -> Response {
        let status = match &self {
            AttendanceError::NotFound(_) => StatusCode::NOT_FOUND,
            AttendanceError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            AttendanceError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AttendanceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AttendanceError::UpstreamUnavailable(_) | AttendanceError::Database(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        if self.is_upstream() {
            warn!(error = %self, "upstream failure while serving request");
        }
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceParams {
    pub date: Option<String>,
    pub batch: Option<String>,
    pub person_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryParams {
    pub batch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub images: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl AttendanceParams {
    fn date(&self, query: &QueryService) -> Result<NaiveDate> {
        match non_empty(&self.date) {
            Some(value) => parse_date(value),
            None => Ok(calendar::today(query.utc_offset())),
        }
    }

    fn cohort(&self) -> Result<Option<Cohort>> {
        non_empty(&self.batch)
            .map(str::parse::<Cohort>)
            .transpose()
    }
}

/// GET /api/attendance - raw recognition records for a day.
pub async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<AttendanceParams>,
) -> Result<Json<serde_json::Value>> {
    let date = params.date(&state.query)?;
    let cohort = params.cohort()?;
    let records = state
        .query
        .get_records(date, cohort, non_empty(&params.person_id))
        .await?;
    Ok(Json(json!({ "records": records })))
}

/// GET /api/attendance/report - aggregated attendance for a day.
pub async fn attendance_report(
    State(state): State<AppState>,
    Query(params): Query<AttendanceParams>,
) -> Result<Json<serde_json::Value>> {
    let date = params.date(&state.query)?;
    let cohort = params.cohort()?;
    let report = state.query.get_report(date, cohort).await?;
    Ok(Json(json!({ "report": report })))
}

/// GET /api/students - student directory, optionally for one batch.
pub async fn list_students(
    State(state): State<AppState>,
    Query(params): Query<DirectoryParams>,
) -> Result<Json<serde_json::Value>> {
    let cohort = non_empty(&params.batch)
        .map(str::parse::<Cohort>)
        .transpose()?;
    let students = state
        .query
        .list_people(PersonType::Student, cohort)
        .await?;
    Ok(Json(json!({ "count": students.len(), "students": students })))
}

/// GET /api/faculty - faculty directory.
pub async fn list_faculty(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let faculty = state.query.list_people(PersonType::Faculty, None).await?;
    Ok(Json(json!({ "count": faculty.len(), "faculty": faculty })))
}

/// GET /api/persons/:person_id - direct directory lookup.
pub async fn get_person(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let person = state.query.get_person(&person_id).await?;
    Ok(Json(json!({ "person": person })))
}

/// POST /api/enroll/:person_id - enroll 1 to 10 face images.
pub async fn enroll(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
    body: std::result::Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let Json(request) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AttendanceError::PayloadTooLarge(format!(
                "enrollment upload exceeds {} bytes",
                state.max_enroll_bytes
            ))
        } else {
            AttendanceError::ValidationFailed(rejection.body_text())
        }
    })?;
    let receipt = state.enrollment.enroll(&person_id, request.images).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("enrolled {} images", receipt.images_stored),
            "enrollment": receipt,
        })),
    ))
}

/// DELETE /api/enroll/:person_id - remove every face template.
pub async fn remove_enrollment(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let receipt = state.enrollment.remove(&person_id).await?;
    Ok(Json(json!({ "removal": receipt })))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let enroll_limit = DefaultBodyLimit::max(state.max_enroll_bytes);
    Router::new()
        .route("/health", get(health))
        .route("/api/attendance", get(list_records))
        .route("/api/attendance/report", get(attendance_report))
        .route("/api/students", get(list_students))
        .route("/api/faculty", get(list_faculty))
        .route("/api/persons/:person_id", get(get_person))
        .route(
            "/api/enroll/:person_id",
            post(enroll)
                .delete(remove_enrollment)
                .layer(enroll_limit),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "attendance API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down attendance API");
        })
        .await?;
    Ok(())
}
