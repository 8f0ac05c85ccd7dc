//! Data models for access storage

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use certgate_core::PaymentDetails;

/// Activity tag for a completed payment
pub const ACTION_PAYMENT: &str = "pago";

/// Activity tag for a rejected login
pub const ACTION_LOGIN_FAILED: &str = "login_fallido";

/// Activity tag for a successful login
pub const ACTION_LOGIN_SUCCEEDED: &str = "login_exitoso";

/// Origin recorded for codes issued after a provider payment
pub const CODE_ORIGIN_PAYMENT: &str = "stripe_payment";

/// Payment status stored on a user once paid
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Status of a recorded transaction
pub const TRANSACTION_COMPLETED: &str = "completed";

/// Kind of a recorded transaction
pub const TRANSACTION_INITIAL_PURCHASE: &str = "initial_purchase";

/// Unique user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// A customer with access to the course
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    /// Stored lower-case
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// Current access code
    pub access_code: String,
    pub payment_status: String,
    /// Sum of every payment, in cents
    pub amount_paid_cents: i64,
    pub currency: String,
    pub paid_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub blocked: bool,
    pub failed_login_attempts: i64,
    pub last_access_at: Option<DateTime<Utc>>,
    pub last_access_ip: Option<String>,
    pub registration_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// One issued access code
#[derive(Debug, Clone)]
pub struct AccessCodeRecord {
    pub id: i64,
    pub user_id: UserId,
    pub email: String,
    pub code: String,
    pub origin: String,
    pub issued_at: DateTime<Utc>,
    pub first_used_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub use_count: i64,
    /// Only the latest code of a user is active
    pub active: bool,
    pub issued_ip: Option<String>,
}

/// A completed payment
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: UserId,
    pub email: String,
    pub provider_session_id: String,
    pub payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub ip: Option<String>,
}

/// Severity of an activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Info,
    Warning,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Info => "info",
            ActivityLevel::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(ActivityLevel::Info),
            "warning" => Some(ActivityLevel::Warning),
            _ => None,
        }
    }
}

/// An activity entry to append
#[derive(Debug, Clone)]
pub struct NewActivity {
    /// None for anonymous failures
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub action: String,
    pub description: String,
    pub ip: Option<String>,
    pub level: ActivityLevel,
}

impl NewActivity {
    pub fn info(action: &str, description: impl Into<String>) -> Self {
        Self {
            user_id: None,
            email: None,
            action: action.to_string(),
            description: description.into(),
            ip: None,
            level: ActivityLevel::Info,
        }
    }

    pub fn warning(action: &str, description: impl Into<String>) -> Self {
        Self {
            level: ActivityLevel::Warning,
            ..Self::info(action, description)
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip = ip.map(str::to_string);
        self
    }
}

/// A stored activity entry
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub action: String,
    pub description: String,
    pub ip: Option<String>,
    pub level: ActivityLevel,
    pub created_at: DateTime<Utc>,
}

/// Delivery channel of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Email,
    WhatsApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::WhatsApp => "whatsapp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(NotificationChannel::Email),
            "whatsapp" => Some(NotificationChannel::WhatsApp),
            _ => None,
        }
    }
}

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }
}

/// A notification to record
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: UserId,
    pub channel: NotificationChannel,
    /// Email address or phone number
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
    pub status: NotificationStatus,
    pub provider: String,
    pub attempts: u32,
}

/// A recorded notification
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: i64,
    pub user_id: UserId,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
    pub status: NotificationStatus,
    pub provider: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// A verified webhook delivery to record
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub provider: String,
    pub event_type: String,
    pub event_id: String,
    /// Raw request body as received
    pub payload: String,
    pub source_ip: Option<String>,
}

/// A recorded webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookEventRecord {
    pub id: i64,
    pub provider: String,
    pub event_type: String,
    pub event_id: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub source_ip: Option<String>,
}

/// A paid checkout session ready to be turned into access
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub details: PaymentDetails,
    /// Freshly generated code, used only if the payment is new
    pub code: String,
    pub ip: Option<String>,
    /// Access granted from the moment of payment
    pub access_period: Duration,
}

/// Result of reconciling a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub user_id: UserId,
    pub email: String,
    /// The user's stored access code
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Name and phone after merging with what was already stored
    pub name: Option<String>,
    pub phone: Option<String>,
    /// False when the session had already been reconciled
    pub newly_recorded: bool,
}

/// State of a user after a failed login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginFailure {
    pub attempts: i64,
    pub blocked: bool,
}
