//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ReportError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    BadRequest(String),
    Report(ReportError),
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        ApiError::Report(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Report(e) => match e {
                ReportError::UnknownReportType(_) | ReportError::UnknownFormat(_) | ReportError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                ReportError::ScheduleNotFound(_) => StatusCode::NOT_FOUND,
                ReportError::AlreadyRunning(_) => StatusCode::CONFLICT,
                ReportError::Forbidden(_) => StatusCode::FORBIDDEN,
                ReportError::DeliveryFailure(_) => StatusCode::BAD_GATEWAY,
                ReportError::QueryExecution { .. } | ReportError::Render(_) | ReportError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Unauthorized(msg) => msg.to_string(),
            ApiError::BadRequest(msg) => msg,
            ApiError::Report(e) if e.is_user_facing() => e.to_string(),
            ApiError::Report(e) => {
                tracing::error!(error = %e, "internal error");
                "an internal error occurred while processing the request".to_string()
            }
        };

        (
            status,
            Json(json!({
                "data": null,
                "meta": { "error": message, "status": status.as_u16() }
            })),
        )
            .into_response()
    }
}
