use crate::errors::Error;
use crate::job::{JobOutcome, ReadingProcessorJob};
use crate::model::{AlertReportResponse, AlertState};
use crate::report::compute_alert_reports;
use crate::store::ReadingStore;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_PAGE: usize = 1;
const MAX_PAGE_SIZE: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub job: Arc<ReadingProcessorJob>,
    pub shutdown: CancellationToken,
}

/// Paging and filtering for the alert report endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReportQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    state: Option<String>,
}

impl AlertReportQuery {
    /// 1-based page; anything below 1 becomes 1.
    pub fn page(&self) -> usize {
        match self.page {
            Some(p) if p >= 1 => usize::try_from(p).unwrap_or(DEFAULT_PAGE),
            _ => DEFAULT_PAGE,
        }
    }

    pub fn page_size(&self) -> usize {
        effective_page_size(self.page_size)
    }

    /// `None` means every state. Missing defaults to `New`, `Any` disables
    /// the filter.
    pub fn state(&self) -> Result<Option<AlertState>, String> {
        match self.state.as_deref() {
            None => Ok(Some(AlertState::New)),
            Some(s) if s.eq_ignore_ascii_case("any") => Ok(None),
            Some(s) => AlertState::ALL
                .iter()
                .copied()
                .find(|state| state.as_str().eq_ignore_ascii_case(s))
                .map(Some)
                .ok_or_else(|| format!("Unknown alert state '{}'", s)),
        }
    }
}

/// Page size within `1..=50`; missing, non-positive or oversized values
/// become 50.
pub fn effective_page_size(requested: Option<i64>) -> usize {
    match requested {
        Some(size) if (1..=MAX_PAGE_SIZE as i64).contains(&size) => size as usize,
        _ => MAX_PAGE_SIZE,
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/devices/:serial_number/alerts",
            get(get_alert_reports),
        )
        .route("/api/v1/jobs/reading-processor/run", post(run_reading_processor))
        .route("/health", get(health))
        .with_state(state)
}

async fn get_alert_reports(
    State(state): State<AppState>,
    Path(serial_number): Path<String>,
    Query(params): Query<AlertReportQuery>,
) -> Result<Response, AppError> {
    let filter = match params.state() {
        Ok(filter) => filter,
        Err(message) => return Ok((StatusCode::BAD_REQUEST, message).into_response()),
    };
    let page = params.page();
    let page_size = params.page_size();

    let reports = match compute_alert_reports(
        state.store.as_ref(),
        &serial_number,
        filter,
        &state.shutdown,
    )
    .await
    {
        Ok(reports) => reports,
        Err(Error::Canceled) => {
            return Ok((StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response())
        }
        Err(e) => return Err(e.into()),
    };

    let total = reports.len();
    let data = reports
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    Ok(Json(AlertReportResponse {
        data,
        total,
        page,
        page_size,
    })
    .into_response())
}

async fn run_reading_processor(State(state): State<AppState>) -> Response {
    info!("Manual reading processor invocation requested");
    let outcome = state.job.run_once(&state.shutdown).await;

    let status = match &outcome {
        JobOutcome::Skipped => StatusCode::CONFLICT,
        JobOutcome::Faulted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        JobOutcome::Canceled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(outcome)).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
