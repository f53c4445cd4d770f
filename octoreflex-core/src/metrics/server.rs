// HTTP exposition, grounded on `kratos-dns-seed/src/api/routes.rs`'s
// `run_api_server`: an axum `Router` with `/health`, `/metrics`,
// `/metrics/json`.

use super::Metrics;
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub struct MetricsState {
    pub metrics: Arc<Metrics>,
}

pub async fn run_metrics_server(port: u16, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let state = Arc::new(MetricsState { metrics });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "metrics server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

async fn get_metrics_prometheus(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

async fn get_metrics_json(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
