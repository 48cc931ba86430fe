use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::scheduling::error::SchedulingError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    /// Field-level errors the form can show inline.
    Invalid(JsonValue),
    /// Slot already taken; details carry the patient/machine flags.
    Conflict(JsonValue),
    Internal(String),
}

impl ApiError {
    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    fn to_error_response(code: &str, message: &str, details: Option<JsonValue>) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
                details,
            },
        })
    }
}

impl From<SchedulingError> for ApiError {
    fn from(e: SchedulingError) -> Self {
        match e {
            SchedulingError::Validation(report) => {
                ApiError::Invalid(serde_json::json!({ "errors": report.errors }))
            }
            SchedulingError::Conflict(report) => ApiError::Conflict(serde_json::json!({
                "patient_conflict": report.patient_conflict,
                "machine_conflict": report.machine_conflict,
                "conflicting_appointment_ids": report.conflicting_appointment_ids,
                "errors": report.messages(),
            })),
            SchedulingError::NotFound(what) => {
                ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
            }
            // cause already logged by the service
            SchedulingError::Persistence(_) => ApiError::Internal("could not save, try again".into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => (
                StatusCode::UNAUTHORIZED,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Forbidden(code, msg) => (
                StatusCode::FORBIDDEN,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::BadRequest(code, msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::NotFound(code, msg) => (
                StatusCode::NOT_FOUND,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Invalid(details) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response(
                    "VALIDATION_ERROR",
                    "Please correct the highlighted fields",
                    Some(details),
                ),
            )
                .into_response(),
            ApiError::Conflict(details) => (
                StatusCode::CONFLICT,
                ApiError::to_error_response(
                    "SCHEDULE_CONFLICT",
                    "This time is already booked",
                    Some(details),
                ),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg, None),
            )
                .into_response(),
        }
    }
}
