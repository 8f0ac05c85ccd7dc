//! Health check and fallback

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;

use super::AVAILABLE_ENDPOINTS;
use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::state::AppState;
use crate::store::AccessStore;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub database: &'static str,
    pub payment: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health<S, P, N>(State(state): State<Arc<AppState<S, P, N>>>) -> Json<HealthResponse>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let database = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "disconnected"
        }
    };

    let payment = if !state.provider.is_configured() {
        "not_configured"
    } else {
        match state.provider.check_connection().await {
            Ok(()) => "configured",
            Err(e) => {
                tracing::warn!(error = %e, "Payment provider health check failed");
                "error"
            }
        }
    };

    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        database,
        payment,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Fallback for unmatched routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint no encontrado",
            "availableEndpoints": AVAILABLE_ENDPOINTS,
        })),
    )
}
