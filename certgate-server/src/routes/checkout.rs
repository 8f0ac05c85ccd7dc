//! Checkout session endpoints

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{ORIGIN, REFERER};
use axum::http::{HeaderMap, HeaderName};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::notify::Notifier;
use crate::provider::{CheckoutRequest, PaymentProvider};
use crate::state::AppState;
use crate::store::AccessStore;

#[derive(Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Serialize)]
pub struct CreateCheckoutResponse {
    pub success: bool,
    pub id: String,
    pub url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Where the provider sends the customer back to
///
/// The `Origin` header, else the `Referer` without its trailing slash, else
/// the configured frontend URL.
fn redirect_origin(headers: &HeaderMap, fallback: &str) -> String {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header(ORIGIN)
        .map(str::to_string)
        .or_else(|| header(REFERER).map(|r| r.trim_end_matches('/').to_string()))
        .unwrap_or_else(|| fallback.trim_end_matches('/').to_string())
}

/// POST /create-checkout-session
pub async fn create_checkout_session<S, P, N>(
    State(state): State<Arc<AppState<S, P, N>>>,
    headers: HeaderMap,
    payload: Result<Json<CreateCheckoutRequest>, JsonRejection>,
) -> Result<Json<CreateCheckoutResponse>, ServerError>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let Json(req) = payload?;
    let email = non_empty(req.email).ok_or(ServerError::MissingEmail)?;
    if !email.contains('@') {
        return Err(ServerError::Validation("Email inválido".to_string()));
    }

    let origin = redirect_origin(&headers, &state.config.frontend_url);

    let request = CheckoutRequest {
        email,
        name: non_empty(req.name),
        phone: non_empty(req.phone),
        success_url: format!("{origin}/?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{origin}/?canceled=true"),
        product: state.config.product.clone(),
    };

    let session = state
        .provider
        .create_checkout_session(&request)
        .await
        .map_err(|e| e.with_public_message("No se pudo crear la sesión de pago"))?;

    Ok(Json(CreateCheckoutResponse {
        success: true,
        id: session.id,
        url: session.url,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStatusResponse {
    pub id: String,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub email: Option<String>,
    pub total_amount: Option<i64>,
    pub currency: Option<String>,
}

/// GET /checkout-session/:session_id
///
/// Read-only status lookup; never reconciles.
pub async fn get_checkout_session<S, P, N>(
    State(state): State<Arc<AppState<S, P, N>>>,
    Path(session_id): Path<String>,
) -> Result<Json<CheckoutStatusResponse>, ServerError>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let session = state
        .provider
        .retrieve_checkout_session(&session_id)
        .await
        .map_err(|e| e.with_public_message("No se pudo obtener la sesión de pago"))?;

    Ok(Json(CheckoutStatusResponse {
        email: session.email(),
        id: session.id,
        status: session.status,
        payment_status: session.payment_status,
        total_amount: session.amount_total,
        currency: session.currency.map(|c| c.to_uppercase()),
    }))
}
