//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::blocking;
use crate::context::ActorContext;
use crate::report::{DateRange, FilterSet, ReportFormat, ReportRequest, ReportType};
use crate::scheduler::ScheduleInput;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_PREVIEW_HOURS: u64 = 24;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/reports/{report_type}", get(generate_report))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/dry-run", get(schedule_dry_run))
        .route(
            "/schedules/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/schedules/{id}/toggle", post(toggle_schedule))
        .route("/schedules/{id}/run", post(run_schedule))
        .route("/schedules/{id}/executions", get(list_executions))
}

fn envelope(data: Value, meta: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta }))
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, ApiError> {
    serde_json::to_value(v).map_err(|e| ApiError::Report(e.into()))
}

async fn health() -> Json<Value> {
    envelope(
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        }),
        json!({
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }),
    )
}

// ---------------------------------------------------------------------------
// Ad-hoc reports
// ---------------------------------------------------------------------------

async fn generate_report(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(report_type): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    // Type and format are checked before any query work.
    let report_type: ReportType = report_type.parse()?;
    let format = match params.iter().find(|(k, _)| k == "format").map(|(_, v)| v.trim()) {
        Some(f) if !f.is_empty() => f.parse()?,
        _ => ReportFormat::default(),
    };

    let filters = FilterSet::from_pairs(
        params
            .iter()
            .filter(|(k, _)| k != "format")
            .map(|(k, v)| (k.as_str(), v.as_str())),
    )?;
    let now = Utc::now();
    let date_range = match filters.date_range() {
        Some(_) => None,
        None => Some(DateRange::month_of(now.with_timezone(&state.reports.offset()).date_naive())),
    };
    let request = ReportRequest {
        report_type,
        filters,
        format,
        date_range,
    };

    let reports = state.reports.clone();
    let artifact = blocking(move || reports.generate(&actor, &request, now)).await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.filename))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(artifact.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

async fn list_schedules(State(state): State<AppState>, actor: ActorContext) -> Result<Json<Value>, ApiError> {
    let scheduler = state.scheduler.clone();
    let schedules = blocking(move || scheduler.list(&actor)).await?;
    Ok(envelope(to_value(&schedules)?, json!({ "total": schedules.len() })))
}

async fn create_schedule(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(input): Json<ScheduleInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let scheduler = state.scheduler.clone();
    let schedule = blocking(move || scheduler.create(&actor, &input, Utc::now())).await?;
    Ok((StatusCode::CREATED, envelope(to_value(&schedule)?, json!({}))))
}

async fn get_schedule(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let scheduler = state.scheduler.clone();
    let schedule = blocking(move || scheduler.get(&actor, id)).await?;
    Ok(envelope(to_value(&schedule)?, json!({})))
}

async fn update_schedule(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<i64>,
    Json(input): Json<ScheduleInput>,
) -> Result<Json<Value>, ApiError> {
    let scheduler = state.scheduler.clone();
    let schedule = blocking(move || scheduler.update(&actor, id, &input, Utc::now())).await?;
    Ok(envelope(to_value(&schedule)?, json!({})))
}

async fn delete_schedule(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let scheduler = state.scheduler.clone();
    blocking(move || scheduler.delete(&actor, id)).await?;
    Ok(envelope(json!({ "deleted": id }), json!({})))
}

async fn toggle_schedule(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let scheduler = state.scheduler.clone();
    let schedule = blocking(move || scheduler.toggle(&actor, id, Utc::now())).await?;
    Ok(envelope(to_value(&schedule)?, json!({})))
}

async fn run_schedule(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let record = state.runner.run_one(&actor, id, Utc::now()).await?;
    Ok(envelope(to_value(&record)?, json!({})))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn list_executions(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let scheduler = state.scheduler.clone();
    let records = blocking(move || scheduler.executions(&actor, id, limit)).await?;
    Ok(envelope(to_value(&records)?, json!({ "total": records.len(), "limit": limit })))
}

#[derive(Debug, Deserialize)]
struct DryRunParams {
    hours: Option<u64>,
}

async fn schedule_dry_run(
    State(state): State<AppState>,
    actor: ActorContext,
    Query(params): Query<DryRunParams>,
) -> Result<Json<Value>, ApiError> {
    let hours = params.hours.unwrap_or(DEFAULT_PREVIEW_HOURS);
    let scheduler = state.scheduler.clone();
    let upcoming = blocking(move || scheduler.preview(&actor, hours, Utc::now())).await?;
    let upcoming: Vec<Value> = upcoming
        .into_iter()
        .map(|(at, name, report_type)| json!({ "at": at, "name": name, "report_type": report_type }))
        .collect();
    Ok(envelope(json!({ "upcoming": upcoming }), json!({ "hours": hours })))
}
