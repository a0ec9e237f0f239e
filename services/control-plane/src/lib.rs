pub mod http;
pub mod session;
pub mod state;
pub mod ws_state;

pub use state::AppState;

use axum::{
    response::{Html, IntoResponse},
    routing::{get, post},
    Router,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/state", get(ws_state::ws_state_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/session/claim", post(http::engine::claim))
        .route("/api/v1/engine/start", post(http::engine::start))
        .route("/api/v1/engine/pause", post(http::engine::pause))
        .route("/api/v1/engine/resume", post(http::engine::resume))
        .route("/api/v1/engine/stop", post(http::engine::stop))
        .route("/api/v1/engine/seek", post(http::engine::seek))
        .route("/api/v1/engine/step", post(http::engine::step))
        .route("/api/v1/engine/apply", post(http::engine::apply))
        .route("/api/v1/engine/status", get(http::engine::status))
        .route("/api/v1/engine/range", get(http::engine::range))
        .fallback(fallback_404)
        .with_state(state)
}

async fn fallback_404() -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        Html("<!DOCTYPE html><html><body><h1>404 Not Found</h1></body></html>"),
    )
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
