//! HTTP routes for the access service

mod auth;
mod checkout;
mod health;
mod verify;
mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::Extension;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::state::AppState;
use crate::store::AccessStore;

/// Routes advertised by the 404 handler
pub const AVAILABLE_ENDPOINTS: [&str; 6] = [
    "GET /health",
    "POST /create-checkout-session",
    "GET /checkout-session/:session_id",
    "POST /verify-payment",
    "POST /login",
    "POST /webhook/stripe",
];

/// Create the router with all routes
pub fn create_router<S, P, N>(state: Arc<AppState<S, P, N>>) -> Router
where
    S: AccessStore + 'static,
    P: PaymentProvider + 'static,
    N: Notifier + 'static,
{
    let cors = cors_layer(&state.config.allowed_origin);
    let proxy = ProxyTrust(state.config.trust_proxy);

    Router::new()
        .route("/health", get(health::health))
        .route("/create-checkout-session", post(checkout::create_checkout_session))
        .route("/checkout-session/:session_id", get(checkout::get_checkout_session))
        .route("/verify-payment", post(verify::verify_payment))
        .route("/login", post(auth::login))
        .route("/webhook/stripe", post(webhook::stripe_webhook))
        .fallback(health::not_found)
        .layer(Extension(proxy))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let origin = match allowed_origin.parse::<HeaderValue>() {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => {
            tracing::warn!(origin = %allowed_origin, "Invalid ALLOWED_ORIGIN, CORS disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("stripe-signature"),
        ])
}

/// Whether forwarding headers come from a trusted reverse proxy
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyTrust(pub bool);

/// Best-effort client address
///
/// Behind a trusted proxy this is the first `X-Forwarded-For` hop, then
/// `X-Real-IP`. Otherwise, and as a fallback, it is the socket peer when the
/// server was started with connect info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trusted = parts
            .extensions
            .get::<ProxyTrust>()
            .is_some_and(|ProxyTrust(trusted)| *trusted);

        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let forwarded = if trusted {
            header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .or_else(|| header("x-real-ip"))
        } else {
            None
        };

        let ip = forwarded.map(str::to_string).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(ClientIp(ip))
    }
}
