//! Stripe REST client
//!
//! Talks to the form-encoded `/v1` API directly with reqwest. Only the
//! checkout-session and balance endpoints are used.

use std::time::Duration;

use async_trait::async_trait;
use certgate_core::CheckoutSession;
use serde::Deserialize;

use super::{CheckoutRequest, PaymentProvider};
use crate::config::StripeSettings;
use crate::error::ServerError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: Option<String>,
    api_base: String,
}

impl StripeClient {
    pub fn new(settings: &StripeSettings) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServerError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            secret_key: settings.secret_key.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn secret_key(&self) -> Result<&str, ServerError> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| ServerError::Upstream("Stripe secret key is not configured".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Read a response body, turning API errors into [`ServerError::Upstream`]
    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServerError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(parsed) => format!(
                    "{} ({})",
                    parsed.error.message.unwrap_or_default(),
                    parsed.error.kind.unwrap_or_else(|| "unknown".to_string())
                ),
                Err(_) => body,
            };
            return Err(ServerError::Upstream(format!(
                "status {}: {}",
                status.as_u16(),
                detail
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| ServerError::Upstream(format!("invalid response: {e}")))
    }
}

/// Form fields of a checkout-session create call
pub fn checkout_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
    let product = &request.product;
    vec![
        ("payment_method_types[0]", "card".to_string()),
        ("mode", "payment".to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        ("line_items[0][price_data][currency]", product.currency.clone()),
        (
            "line_items[0][price_data][unit_amount]",
            product.price_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            product.name.clone(),
        ),
        (
            "line_items[0][price_data][product_data][description]",
            product.description.clone(),
        ),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("customer_email", request.email.clone()),
        ("metadata[email]", request.email.clone()),
        (
            "metadata[nombre]",
            request.name.clone().unwrap_or_default(),
        ),
        (
            "metadata[telefono]",
            request.phone.clone().unwrap_or_default(),
        ),
    ]
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl PaymentProvider for StripeClient {
    fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServerError> {
        let key = self.secret_key()?;

        let response = self
            .http
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(key)
            .form(&checkout_form(request))
            .send()
            .await?;

        let session: CheckoutSession = Self::read_json(response).await?;
        tracing::info!(session_id = %session.id, email = %request.email, "Checkout session created");
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServerError> {
        let key = self.secret_key()?;

        if !is_valid_session_id(session_id) {
            return Err(ServerError::Validation("Session ID inválido".to_string()));
        }

        let response = self
            .http
            .get(self.url(&format!("/v1/checkout/sessions/{session_id}")))
            .bearer_auth(key)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn check_connection(&self) -> Result<(), ServerError> {
        let key = self.secret_key()?;

        let response = self
            .http
            .get(self.url("/v1/balance"))
            .bearer_auth(key)
            .send()
            .await?;

        Self::read_json::<serde_json::Value>(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProductConfig;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            email: "buyer@example.com".to_string(),
            name: Some("Ana".to_string()),
            phone: None,
            success_url: "http://localhost:8080/?session_id={CHECKOUT_SESSION_ID}".to_string(),
            cancel_url: "http://localhost:8080/?canceled=true".to_string(),
            product: ProductConfig::default(),
        }
    }

    #[test]
    fn test_checkout_form_fields() {
        let form = checkout_form(&request());
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("99900"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("mxn"));
        assert_eq!(get("metadata[nombre]"), Some("Ana"));
        assert_eq!(get("metadata[telefono]"), Some(""));
        assert_eq!(get("customer_email"), Some("buyer@example.com"));
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("cs_test_a1B2c3"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("cs_test/../../v1/balance"));
        assert!(!is_valid_session_id("cs test"));
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_upstream() {
        let client = StripeClient::new(&StripeSettings::default()).unwrap();
        assert!(!client.is_configured());

        let err = client.retrieve_checkout_session("cs_1").await.unwrap_err();
        assert!(matches!(err, ServerError::Upstream(_)));
    }
}
