/// HTTP server setup and routing.
use crate::{context::AppContext, error::BingoResult, lookup, metrics};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Build the main application router.
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/lookup", get(lookup::lookup))
        .route("/bulkLookup", post(lookup::bulk_lookup))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .with_state(ctx)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

async fn metrics_handler() -> Response {
    let metrics_text = metrics::render_metrics();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
        .body(metrics_text.into())
        .unwrap()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness(axum::extract::State(ctx): axum::extract::State<AppContext>) -> Response {
    if ctx.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not ready" }))).into_response()
    }
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "endpoint not found"
        })),
    )
}

/// Start the HTTP server, serving until `ctx.cancel` fires, then draining for
/// up to `ctx.config.tuning.shutdown_grace` (spec.md §6).
pub async fn serve(ctx: AppContext) -> BingoResult<()> {
    let addr = format!("0.0.0.0:{}", ctx.config.port);
    let grace = ctx.config.tuning.shutdown_grace;
    let cancel = ctx.cancel.clone();

    info!(%addr, "bingo lookup service listening");

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::BingoError::Internal(format!("failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!(grace_secs = grace.as_secs(), "shutting down, draining in-flight requests");
        })
        .await
        .map_err(|e| crate::error::BingoError::Internal(format!("server error: {e}")))?;

    Ok(())
}
