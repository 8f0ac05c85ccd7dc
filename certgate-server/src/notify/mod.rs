//! Access-code notifications

pub mod console;
pub mod smtp;

pub use console::ConsoleNotifier;
pub use smtp::{SmtpConfig, SmtpNotifier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::NotificationChannel;

/// Name used in greetings when the customer gave none
pub const DEFAULT_RECIPIENT_NAME: &str = "Usuario";

/// Subject of the access-code email
pub const ACCESS_CODE_SUBJECT: &str = "Tu código de acceso SkillsCert";

/// Trait for delivering access codes to customers
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name recorded as the delivery provider
    fn provider_name(&self, channel: NotificationChannel) -> &'static str;

    /// Whether this notifier can deliver over `channel`
    fn supports(&self, channel: NotificationChannel) -> bool;

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;

    async fn send_whatsapp(&self, phone: &str, message: &str) -> Result<(), String>;
}

/// Allow using Box<dyn Notifier> as a Notifier
#[async_trait]
impl Notifier for Box<dyn Notifier> {
    fn provider_name(&self, channel: NotificationChannel) -> &'static str {
        (**self).provider_name(channel)
    }

    fn supports(&self, channel: NotificationChannel) -> bool {
        (**self).supports(channel)
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        (**self).send_email(to, subject, body).await
    }

    async fn send_whatsapp(&self, phone: &str, message: &str) -> Result<(), String> {
        (**self).send_whatsapp(phone, message).await
    }
}

fn greeting_name(name: Option<&str>) -> &str {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_RECIPIENT_NAME)
}

/// Body of the access-code email
pub fn access_code_email(name: Option<&str>, code: &str, expires_at: DateTime<Utc>) -> String {
    format!(
        "Hola {},\n\n\
         Tu código de acceso es: {}\n\n\
         Úsalo junto con tu correo para entrar al sistema. \
         Tu acceso es válido hasta el {}.\n\n\
         Si no realizaste esta compra, contacta a soporte.",
        greeting_name(name),
        code,
        expires_at.format("%d/%m/%Y"),
    )
}

/// Text of the access-code WhatsApp message
pub fn access_code_whatsapp(name: Option<&str>, code: &str) -> String {
    format!(
        "Hola {}, tu código de acceso SkillsCert es: {}",
        greeting_name(name),
        code
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_email_body() {
        let expires = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let body = access_code_email(Some("Ana"), "ABCD2345", expires);
        assert!(body.starts_with("Hola Ana,"));
        assert!(body.contains("ABCD2345"));
        assert!(body.contains("01/03/2026"));
    }

    #[test]
    fn test_blank_name_uses_default() {
        let message = access_code_whatsapp(Some("  "), "ZZZZ9999");
        assert_eq!(
            message,
            "Hola Usuario, tu código de acceso SkillsCert es: ZZZZ9999"
        );
    }
}
