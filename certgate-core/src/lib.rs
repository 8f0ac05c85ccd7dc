//! certgate Core Library
//!
//! Domain logic for payment-gated course access:
//! - Short access codes are issued once a checkout session is paid
//! - Provider webhooks are authenticated with a shared-secret HMAC
//! - Logins produce signed session tokens with a fixed lifetime
//! - Course modules unlock one after another from locally stored progress

pub mod access_code;
pub mod checkout;
pub mod error;
pub mod progress;
pub mod signature;
pub mod token;

pub use access_code::{
    generate_access_code, normalize_access_code, CodeGenerator, RandomCodeGenerator,
    SeededCodeGenerator,
};
pub use checkout::{CheckoutSession, PaymentDetails, WebhookEvent};
pub use error::Error;
pub use token::SessionClaims;

/// Result type for certgate-core operations
pub type Result<T> = std::result::Result<T, Error>;
