//! HTTP surface: order actions, provider webhooks and health.

pub mod orders;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::services::settlement::SettlementOrchestrator;

/// Shared handler state.
pub struct ApiState {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub pool: PgPool,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/orders", post(orders::create_order))
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/cancel", post(orders::cancel_order))
        .route("/api/orders/{id}/events", post(orders::order_event))
        .route("/api/orders/{id}/retry-payment", post(orders::retry_payment))
        .route("/api/orders/{id}/rating", post(orders::rate_order))
        // VNPay's IPN arrives as a GET with query parameters; the others
        // POST JSON bodies.
        .route(
            "/webhooks/{provider}",
            post(webhooks::handle_webhook).get(webhooks::handle_webhook),
        )
        .with_state(state)
}

async fn health(State(state): State<Arc<ApiState>>) -> Response {
    let status = crate::health::check(&state.pool).await;
    let code = if status.status == crate::health::HealthState::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}
