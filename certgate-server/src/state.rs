//! Application state shared by all handlers

use certgate_core::{CodeGenerator, RandomCodeGenerator};

use crate::config::Config;
use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::store::AccessStore;

/// Application state
pub struct AppState<S, P, N>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    pub config: Config,
    pub store: S,
    pub provider: P,
    pub notifier: N,
    /// Source of new access codes
    pub codes: Box<dyn CodeGenerator>,
}

impl<S, P, N> AppState<S, P, N>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    pub fn new(config: Config, store: S, provider: P, notifier: N) -> Self {
        Self {
            config,
            store,
            provider,
            notifier,
            codes: Box::new(RandomCodeGenerator),
        }
    }

    /// Replace the code generator (deterministic codes in tests)
    pub fn with_code_generator(mut self, codes: impl CodeGenerator + 'static) -> Self {
        self.codes = Box::new(codes);
        self
    }

    /// Access period granted by one payment
    pub fn access_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.config.access_days)
    }
}
