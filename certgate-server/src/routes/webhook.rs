//! Payment provider webhook receiver

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use certgate_core::signature::verify_signature;
use certgate_core::WebhookEvent;
use serde_json::{json, Value};

use super::ClientIp;
use crate::error::ServerError;
use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::reconcile::process_completed_payment;
use crate::state::AppState;
use crate::store::{AccessStore, NewWebhookEvent};

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /webhook/stripe
///
/// Only authenticated deliveries are looked at. Once authenticated the
/// delivery is always acknowledged, even when processing fails.
pub async fn stripe_webhook<S, P, N>(
    State(state): State<Arc<AppState<S, P, N>>>,
    client_ip: ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServerError>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let secret = state
        .config
        .stripe
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ServerError::Signature("webhook secret not configured".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Signature("missing signature header".to_string()))?;

    verify_signature(&body, signature, secret)?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServerError::Validation(format!("Evento inválido: {e}")))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

    let logged = state
        .store
        .log_webhook_event(NewWebhookEvent {
            provider: "stripe".to_string(),
            event_type: event.event_type.clone(),
            event_id: event.id.clone(),
            payload: String::from_utf8_lossy(&body).into_owned(),
            source_ip: client_ip.0.clone(),
        })
        .await;
    if let Err(e) = logged {
        tracing::warn!(event_id = %event.id, error = %e, "Failed to log webhook event");
    }

    match event.checkout_session() {
        Ok(Some(session)) if session.payment_status.is_some() && !session.is_paid() => {
            tracing::info!(
                session_id = %session.id,
                payment_status = ?session.payment_status,
                "Checkout completed without payment, not provisioning"
            );
        }
        Ok(Some(session)) => {
            if let Err(e) = process_completed_payment(&*state, &session, None).await {
                tracing::error!(session_id = %session.id, error = %e, "Failed to process payment from webhook");
            }
        }
        Ok(None) => {
            tracing::debug!(event_type = %event.event_type, "Ignoring webhook event");
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "Malformed checkout session in webhook");
        }
    }

    Ok(Json(json!({ "received": true })))
}
