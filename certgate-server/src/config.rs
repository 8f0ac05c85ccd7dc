//! Server configuration
//!
//! Everything is read from the environment (after `.env` is loaded) and
//! every setting has a usable default for local development.

use std::fmt;

use rand::RngCore;

/// Default port to listen on
pub const DEFAULT_PORT: u16 = 3000;

/// Default Stripe REST endpoint
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Days of access granted by one payment
pub const DEFAULT_ACCESS_DAYS: i64 = 90;

/// Default price of the product, in cents
pub const DEFAULT_PRICE_CENTS: i64 = 99_900;

fn get_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match get_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

/// Payment provider settings
#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

impl Default for StripeSettings {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            api_base: DEFAULT_STRIPE_API_BASE.to_string(),
        }
    }
}

impl fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeSettings")
            .field("secret_key", &redact(&self.secret_key))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// The single product sold at checkout
#[derive(Debug, Clone)]
pub struct ProductConfig {
    pub name: String,
    pub description: String,
    /// Unit price in minor currency units
    pub price_cents: i64,
    /// Lower-case ISO currency code, as the provider expects it
    pub currency: String,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            name: "Acceso SkillsCert EC0301".to_string(),
            description: format!("Sistema completo - {DEFAULT_ACCESS_DAYS} días de acceso"),
            price_cents: DEFAULT_PRICE_CENTS,
            currency: "mxn".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// SQLite database URL; the in-memory store is used when unset
    pub database_url: Option<String>,

    pub db_max_connections: u32,

    /// Browser origin allowed by CORS
    pub allowed_origin: String,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_proxy: bool,

    /// Base URL used for checkout redirects when the request has no origin
    pub frontend_url: String,

    /// HMAC key for session tokens
    pub session_secret: String,

    pub access_days: i64,

    pub stripe: StripeSettings,

    pub product: ProductConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let allowed_origin = get_env("ALLOWED_ORIGIN").unwrap_or(defaults.allowed_origin);
        let frontend_url = get_env("FRONTEND_URL").unwrap_or_else(|| allowed_origin.clone());

        let session_secret = get_env("SESSION_SECRET").unwrap_or_else(|| {
            tracing::warn!("SESSION_SECRET not set, sessions will not survive a restart");
            random_secret()
        });

        let access_days = parse_env("ACCESS_DAYS", DEFAULT_ACCESS_DAYS);

        let product = ProductConfig {
            name: get_env("PRODUCT_NAME").unwrap_or(defaults.product.name),
            description: get_env("PRODUCT_DESCRIPTION").unwrap_or_else(|| {
                format!("Sistema completo - {access_days} días de acceso")
            }),
            price_cents: parse_env("PRICE_CENTS", DEFAULT_PRICE_CENTS),
            currency: get_env("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.product.currency),
        };

        Self {
            port: parse_env("PORT", DEFAULT_PORT),
            database_url: get_env("DATABASE_URL"),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            allowed_origin,
            trust_proxy: parse_env("TRUST_PROXY", false),
            frontend_url,
            session_secret,
            access_days,
            stripe: StripeSettings {
                secret_key: get_env("STRIPE_SECRET_KEY"),
                webhook_secret: get_env("STRIPE_WEBHOOK_SECRET"),
                api_base: get_env("STRIPE_API_BASE")
                    .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            },
            product,
        }
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: 10,
            allowed_origin: "http://localhost:8080".to_string(),
            trust_proxy: false,
            frontend_url: "http://localhost:8080".to_string(),
            session_secret: random_secret(),
            access_days: DEFAULT_ACCESS_DAYS,
            stripe: StripeSettings::default(),
            product: ProductConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("db_max_connections", &self.db_max_connections)
            .field("allowed_origin", &self.allowed_origin)
            .field("trust_proxy", &self.trust_proxy)
            .field("frontend_url", &self.frontend_url)
            .field("session_secret", &"<redacted>")
            .field("access_days", &self.access_days)
            .field("stripe", &self.stripe)
            .field("product", &self.product)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config {
            session_secret: "super-secret".to_string(),
            stripe: StripeSettings {
                secret_key: Some("sk_test_abc".to_string()),
                webhook_secret: None,
                ..Default::default()
            },
            ..Default::default()
        };

        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("sk_test_abc"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("<unset>"));
    }

    #[test]
    fn test_random_secrets_differ() {
        let a = random_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, random_secret());
    }
}
