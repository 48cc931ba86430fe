use std::sync::Arc;

use hdcms_scheduler::{
    config::Config,
    db,
    models::AppState,
    routes,
    scheduling::AppointmentService,
    store::PgScheduleStore,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;
    if cfg.run_migrations {
        db::migrate(&pool).await?;
    }

    // One adapter serves both ports: appointments and reference data.
    let store = Arc::new(PgScheduleStore::new(pool.clone()));
    let scheduler = AppointmentService::new(store.clone(), store).with_rules(cfg.rules.clone());

    let state = AppState {
        db: pool,
        scheduler: Arc::new(scheduler),
    };

    // DEV ONLY: allow browser/WebView clients to call the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
