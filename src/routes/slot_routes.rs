// src/routes/slot_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
    routes::appointment_routes::{parse_date, ApiOk},
    scheduling::slots::Slot,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/slots", get(list_available_slots))
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: String,
    pub shift_id: Uuid,
    // comma separated; empty or missing = all active machines
    pub machine_ids: Option<String>,
}

fn parse_machine_ids(raw: Option<&str>) -> Result<Vec<Uuid>, ApiError> {
    let Some(raw) = raw else {
        return Ok(vec![]);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|_| {
                ApiError::BadRequest("VALIDATION_ERROR", format!("invalid machine id: {s}"))
            })
        })
        .collect()
}

pub async fn list_available_slots(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SlotQuery>,
) -> Result<Json<ApiOk<Vec<Slot>>>, ApiError> {
    auth.ensure_staff()?;
    let date = parse_date("date", &q.date)?;
    let machine_ids = parse_machine_ids(q.machine_ids.as_deref())?;

    let data = state
        .scheduler
        .available_slots(auth.clinic_id, date, q.shift_id, &machine_ids)
        .await?;
    Ok(Json(ApiOk { data }))
}
