//! Console-based notifier for development

use async_trait::async_trait;

use super::Notifier;
use crate::store::NotificationChannel;

/// Notifier that logs to console (for development)
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn provider_name(&self, _channel: NotificationChannel) -> &'static str {
        "console"
    }

    fn supports(&self, _channel: NotificationChannel) -> bool {
        true
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        println!();
        println!("========================================");
        println!("  EMAIL TO: {}", to);
        println!("  SUBJECT: {}", subject);
        println!("----------------------------------------");
        println!("{}", body);
        println!("========================================");
        println!();

        tracing::info!(to = %to, "Access code email written to console");

        Ok(())
    }

    async fn send_whatsapp(&self, phone: &str, message: &str) -> Result<(), String> {
        println!();
        println!("========================================");
        println!("  WHATSAPP TO: {}", phone);
        println!("  {}", message);
        println!("========================================");
        println!();

        tracing::info!(phone = %phone, "Access code WhatsApp written to console");

        Ok(())
    }
}
