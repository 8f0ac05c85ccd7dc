//! Payment provider abstraction

pub mod stripe;

pub use stripe::StripeClient;

use std::sync::Arc;

use async_trait::async_trait;
use certgate_core::CheckoutSession;

use crate::config::ProductConfig;
use crate::error::ServerError;

/// Parameters of a hosted checkout for the single product
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub product: ProductConfig,
}

/// Trait for the hosted-checkout payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Whether credentials are present
    fn is_configured(&self) -> bool;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServerError>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServerError>;

    /// Cheap authenticated call used by the health check
    async fn check_connection(&self) -> Result<(), ServerError>;
}

#[async_trait]
impl<T: PaymentProvider + ?Sized> PaymentProvider for Arc<T> {
    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServerError> {
        (**self).create_checkout_session(request).await
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServerError> {
        (**self).retrieve_checkout_session(session_id).await
    }

    async fn check_connection(&self) -> Result<(), ServerError> {
        (**self).check_connection().await
    }
}
