// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, Appointment, AppointmentCandidate, AppointmentFilter, AppointmentStatus},
    scheduling::service::CheckOutcome,
};

const MAX_LIST_DAYS: i64 = 31;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/check", post(check_appointment))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).patch(update_appointment),
        )
        .route("/appointments/{appointment_id}/confirm", post(confirm_appointment))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/appointments/{appointment_id}/start", post(start_session))
        .route("/appointments/{appointment_id}/complete", post(complete_session))
        .route("/appointments/{appointment_id}/no_show", post(mark_no_show))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    // YYYY-MM-DD; either `date` or a `from`/`to` range
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub patient_id: Option<Uuid>,
    pub machine_id: Option<Uuid>,
    pub shift_id: Option<Uuid>,
    // comma separated, e.g. "scheduled,confirmed"
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(flatten)]
    pub appointment: AppointmentCandidate,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub(crate) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest("VALIDATION_ERROR", format!("{field} must be YYYY-MM-DD"))
    })
}

fn parse_statuses(raw: &str) -> Result<Vec<AppointmentStatus>, ApiError> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            AppointmentStatus::parse(s).ok_or_else(|| {
                ApiError::BadRequest("VALIDATION_ERROR", format!("unknown status: {}", s.trim()))
            })
        })
        .collect()
}

fn build_filter(q: &ListQuery) -> Result<AppointmentFilter, ApiError> {
    let (from, to) = match (&q.date, &q.from, &q.to) {
        (Some(d), None, None) => {
            let d = parse_date("date", d)?;
            (d, d)
        }
        (None, Some(f), Some(t)) => (parse_date("from", f)?, parse_date("to", t)?),
        _ => {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "provide either date or both from and to".into(),
            ));
        }
    };

    let days = (to - from).num_days() + 1;
    if !(1..=MAX_LIST_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("range must cover 1 to {MAX_LIST_DAYS} days"),
        ));
    }

    Ok(AppointmentFilter {
        date_from: Some(from),
        date_to: Some(to),
        patient_id: q.patient_id,
        machine_id: q.machine_id,
        shift_id: q.shift_id,
        statuses: q.status.as_deref().map(parse_statuses).transpose()?,
    })
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<Appointment>>>, ApiError> {
    auth.ensure_staff()?;
    let filter = build_filter(&q)?;
    let data = state.scheduler.list(auth.clinic_id, &filter).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_staff()?;
    let data = state.scheduler.get(auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

/// Dry run for the booking form: field errors and conflicts, no write.
pub async fn check_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CheckRequest>,
) -> Result<Json<ApiOk<CheckOutcome>>, ApiError> {
    auth.ensure_manage()?;
    let data = state
        .scheduler
        .check(auth.clinic_id, &req.appointment, req.exclude_appointment_id)
        .await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Writes
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<AppointmentCandidate>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_manage()?;
    let data = state.scheduler.create(auth.clinic_id, &req).await?;
    tracing::debug!(user_id = %auth.user_id, appointment_id = %data.appointment_id, "created via api");
    Ok(Json(ApiOk { data }))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<AppointmentCandidate>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_manage()?;
    let data = state
        .scheduler
        .update(auth.clinic_id, appointment_id, &req)
        .await?;
    Ok(Json(ApiOk { data }))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_manage()?;
    let reason = req.reason.unwrap_or_default();
    let data = state
        .scheduler
        .cancel(auth.clinic_id, appointment_id, &reason)
        .await?;
    Ok(Json(ApiOk { data }))
}

pub async fn confirm_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_manage()?;
    let data = state.scheduler.confirm(auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn start_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_session_staff()?;
    let data = state.scheduler.start(auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn complete_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_session_staff()?;
    let data = state.scheduler.complete(auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.ensure_session_staff()?;
    let data = state
        .scheduler
        .mark_no_show(auth.clinic_id, appointment_id)
        .await?;
    Ok(Json(ApiOk { data }))
}
