//! Checkout sessions and webhook events as reported by the payment provider
//!
//! Only the fields the access flow reads are modelled; unknown fields are
//! ignored so provider API upgrades do not break parsing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// Event type emitted when a hosted checkout finishes
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// `payment_status` value of a settled checkout session
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Currency assumed when the provider omits one
pub const DEFAULT_CURRENCY: &str = "MXN";

/// Customer details collected by the hosted checkout page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A reference the provider may return either as a bare id or expanded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

/// A provider checkout session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    /// Total in minor currency units (cents)
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<Expandable>,
}

/// Everything reconciliation needs from a paid checkout session
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub session_id: String,
    pub payment_intent_id: Option<String>,
    /// Lower-cased customer email
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub amount_cents: i64,
    /// Upper-case ISO currency code
    pub currency: String,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl CheckoutSession {
    /// Whether the provider reports the session as paid
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some(PAYMENT_STATUS_PAID)
    }

    fn metadata_value(&self, key: &str) -> Option<String> {
        non_empty(self.metadata.as_ref().and_then(|m| m.get(key)))
    }

    /// Customer email, preferring what the customer entered at checkout
    pub fn email(&self) -> Option<String> {
        let details = self.customer_details.as_ref();
        non_empty(details.and_then(|d| d.email.as_ref()))
            .or_else(|| non_empty(self.customer_email.as_ref()))
            .or_else(|| self.metadata_value("email"))
            .map(|e| e.to_lowercase())
    }

    /// Display name: our own metadata first, then the provider's customer details
    pub fn customer_name(&self) -> Option<String> {
        self.metadata_value("nombre").or_else(|| {
            non_empty(self.customer_details.as_ref().and_then(|d| d.name.as_ref()))
        })
    }

    /// Phone number: our own metadata first, then the provider's customer details
    pub fn customer_phone(&self) -> Option<String> {
        self.metadata_value("telefono").or_else(|| {
            non_empty(self.customer_details.as_ref().and_then(|d| d.phone.as_ref()))
        })
    }

    /// Extract the data reconciliation works with
    ///
    /// Fails with [`Error::MissingEmail`] when no email can be found anywhere
    /// on the session.
    pub fn payment_details(&self) -> Result<PaymentDetails> {
        let email = self.email().ok_or(Error::MissingEmail)?;

        Ok(PaymentDetails {
            session_id: self.id.clone(),
            payment_intent_id: self.payment_intent.as_ref().map(|p| p.id().to_string()),
            email,
            name: self.customer_name(),
            phone: self.customer_phone(),
            amount_cents: self.amount_total.unwrap_or(0),
            currency: self
                .currency
                .as_deref()
                .map(str::to_uppercase)
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        })
    }
}

/// Payload wrapper of a webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// A webhook event delivered by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

impl WebhookEvent {
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }

    /// The embedded checkout session, for `checkout.session.completed` events
    pub fn checkout_session(&self) -> Result<Option<CheckoutSession>> {
        if !self.is_checkout_completed() {
            return Ok(None);
        }
        let session = serde_json::from_value(self.data.object.clone())?;
        Ok(Some(session))
    }
}
