use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod slot_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            appointment_routes::router().merge(slot_routes::router()),
        )
        .with_state(state)
}
