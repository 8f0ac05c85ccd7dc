//! Client-driven payment verification

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ClientIp;
use crate::error::ServerError;
use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::reconcile::process_completed_payment;
use crate::state::AppState;
use crate::store::AccessStore;

const VERIFY_FAILED: &str = "Error al verificar el pago";

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// POST /verify-payment
///
/// Re-reads the session from the provider and reconciles it when paid.
/// Calling it again for the same session returns the same code.
pub async fn verify_payment<S, P, N>(
    State(state): State<Arc<AppState<S, P, N>>>,
    client_ip: ClientIp,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<Value>, ServerError>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let Json(req) = payload?;
    let session_id = req
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServerError::Validation("Session ID requerido".to_string()))?;

    let session = state
        .provider
        .retrieve_checkout_session(&session_id)
        .await
        .map_err(|e| e.with_public_message(VERIFY_FAILED))?;

    if !session.is_paid() {
        tracing::info!(
            session_id = %session_id,
            payment_status = ?session.payment_status,
            "Verification for unpaid session"
        );
        return Ok(Json(json!({
            "success": false,
            "error": "Pago no completado",
            "status": session.payment_status,
        })));
    }

    let outcome = process_completed_payment(&*state, &session, client_ip.as_deref())
        .await
        .map_err(|e| e.with_public_message(VERIFY_FAILED))?;

    Ok(Json(json!({
        "success": true,
        "email": outcome.email,
        "accessCode": outcome.code,
        "expirationDate": outcome.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    })))
}
