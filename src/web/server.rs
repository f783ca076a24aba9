use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::api_doc::ApiDoc;
use super::{handlers, ws, AppState};

pub async fn run_server(
    state: AppState,
    bind: &str,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/status", get(handlers::status))
        .route("/api/version", get(handlers::version))
        .route("/api/satellites", get(handlers::satellites))
        .route("/api/config", get(handlers::get_config))
        .route("/api/config/profiles", get(handlers::config_profiles))
        .route("/api/passes", get(handlers::passes))
        .route("/api/next-pass", get(handlers::next_pass))
        .route(
            "/api/captures",
            get(handlers::list_captures).delete(handlers::delete_capture),
        )
        .route("/api/tle-info", get(handlers::tle_info))
        .route("/api/system", get(handlers::system))
        .route("/api/logs", get(handlers::logs))
        .route("/api/stats", get(handlers::stats))
        .route("/api/trigger", post(handlers::trigger))
        .route("/api/tle-refresh", post(handlers::tle_refresh))
        .route("/api/pause", post(handlers::pause))
        .route("/api/resume", post(handlers::resume))
        .route("/api/skip", post(handlers::skip))
        .route("/api/cancel", post(handlers::cancel))
        .route("/api/reload", post(handlers::reload))
        .route("/ws", get(ws::ws_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    log::info!("listening on http://{bind}");

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
