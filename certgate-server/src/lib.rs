//! certgate access service
//!
//! Sells course access through a hosted checkout, turns paid sessions into
//! access codes (from the provider webhook or from client verification,
//! whichever comes first) and lets customers log in with email and code.

pub mod config;
pub mod error;
pub mod notify;
pub mod provider;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::ServerError;
pub use notify::{ConsoleNotifier, Notifier, SmtpConfig, SmtpNotifier};
pub use provider::{CheckoutRequest, PaymentProvider, StripeClient};
pub use state::AppState;
pub use store::{AccessStore, InMemoryStore, SqliteStore};
