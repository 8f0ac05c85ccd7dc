//! In-memory storage implementation

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AccessCodeRecord, AccessStore, ActivityEntry, LoginFailure, NewActivity, NewNotification,
    NewPayment, NewWebhookEvent, Notification, ReconcileOutcome, StoreResult, TransactionRecord,
    User, UserId, WebhookEventRecord, ACTION_PAYMENT, CODE_ORIGIN_PAYMENT, PAYMENT_STATUS_PAID,
    TRANSACTION_COMPLETED, TRANSACTION_INITIAL_PURCHASE,
};
use crate::error::ServerError;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    access_codes: Vec<AccessCodeRecord>,
    transactions: Vec<TransactionRecord>,
    activity: Vec<ActivityEntry>,
    notifications: Vec<Notification>,
    webhook_events: Vec<WebhookEventRecord>,
}

impl Tables {
    fn user(&self, user_id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    fn user_mut(&mut self, user_id: UserId) -> StoreResult<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| ServerError::NotFound(format!("user {}", user_id.0)))
    }

    fn push_activity(&mut self, entry: NewActivity, now: DateTime<Utc>) {
        let id = self.activity.len() as i64 + 1;
        self.activity.push(ActivityEntry {
            id,
            user_id: entry.user_id,
            email: entry.email,
            action: entry.action,
            description: entry.description,
            ip: entry.ip,
            level: entry.level,
            created_at: now,
        });
    }
}

/// In-memory store; every operation takes one lock over all tables
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| ServerError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ServerError::Storage("store lock poisoned".to_string()))
    }

    /// Set a user's expiration (for testing purposes)
    pub fn set_expires_at(&self, user_id: UserId, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.write()?.user_mut(user_id)?.expires_at = expires_at;
        Ok(())
    }

    /// Deactivate a user (for testing purposes)
    pub fn set_active(&self, user_id: UserId, active: bool) -> StoreResult<()> {
        self.write()?.user_mut(user_id)?.active = active;
        Ok(())
    }
}

#[async_trait]
impl AccessStore for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.user(user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let normalized = email.trim().to_lowercase();
        Ok(self
            .read()?
            .users
            .iter()
            .find(|u| u.email == normalized)
            .cloned())
    }

    async fn reconcile_payment(&self, payment: &NewPayment) -> StoreResult<ReconcileOutcome> {
        let details = &payment.details;
        let mut tables = self.write()?;

        if let Some(existing) = tables
            .transactions
            .iter()
            .find(|t| t.provider_session_id == details.session_id)
        {
            let user_id = existing.user_id;
            let user = tables
                .user(user_id)
                .ok_or_else(|| ServerError::Storage(format!("transaction without user {}", user_id.0)))?;
            return Ok(ReconcileOutcome {
                user_id,
                email: user.email.clone(),
                code: user.access_code.clone(),
                expires_at: user.expires_at,
                name: user.name.clone(),
                phone: user.phone.clone(),
                newly_recorded: false,
            });
        }

        let now = Utc::now();
        let expires_at = now + payment.access_period;

        let existing_id = tables
            .users
            .iter()
            .find(|u| u.email == details.email)
            .map(|u| u.id);

        let user_id = match existing_id {
            Some(user_id) => {
                let user = tables.user_mut(user_id)?;
                if details.name.is_some() {
                    user.name = details.name.clone();
                }
                if details.phone.is_some() {
                    user.phone = details.phone.clone();
                }
                user.access_code = payment.code.clone();
                user.payment_status = PAYMENT_STATUS_PAID.to_string();
                user.amount_paid_cents += details.amount_cents;
                user.currency = details.currency.clone();
                user.paid_at = now;
                user.expires_at = expires_at;
                user.active = true;

                for record in tables.access_codes.iter_mut().filter(|c| c.user_id == user_id) {
                    record.active = false;
                }
                user_id
            }
            None => {
                let user_id = UserId(tables.users.len() as i64 + 1);
                tables.users.push(User {
                    id: user_id,
                    email: details.email.clone(),
                    name: details.name.clone(),
                    phone: details.phone.clone(),
                    access_code: payment.code.clone(),
                    payment_status: PAYMENT_STATUS_PAID.to_string(),
                    amount_paid_cents: details.amount_cents,
                    currency: details.currency.clone(),
                    paid_at: now,
                    expires_at,
                    active: true,
                    blocked: false,
                    failed_login_attempts: 0,
                    last_access_at: None,
                    last_access_ip: None,
                    registration_ip: payment.ip.clone(),
                    created_at: now,
                });
                user_id
            }
        };

        let code_id = tables.access_codes.len() as i64 + 1;
        tables.access_codes.push(AccessCodeRecord {
            id: code_id,
            user_id,
            email: details.email.clone(),
            code: payment.code.clone(),
            origin: CODE_ORIGIN_PAYMENT.to_string(),
            issued_at: now,
            first_used_at: None,
            last_used_at: None,
            use_count: 0,
            active: true,
            issued_ip: payment.ip.clone(),
        });

        let transaction_id = tables.transactions.len() as i64 + 1;
        tables.transactions.push(TransactionRecord {
            id: transaction_id,
            user_id,
            email: details.email.clone(),
            provider_session_id: details.session_id.clone(),
            payment_intent_id: details.payment_intent_id.clone(),
            amount_cents: details.amount_cents,
            currency: details.currency.clone(),
            status: TRANSACTION_COMPLETED.to_string(),
            kind: TRANSACTION_INITIAL_PURCHASE.to_string(),
            created_at: now,
            completed_at: now,
            ip: payment.ip.clone(),
        });

        tables.push_activity(
            NewActivity::info(ACTION_PAYMENT, format!("Pago completado: {}", details.session_id))
                .user(user_id)
                .email(&details.email)
                .ip(payment.ip.as_deref()),
            now,
        );

        let user = tables.user_mut(user_id)?;
        Ok(ReconcileOutcome {
            user_id,
            email: user.email.clone(),
            code: user.access_code.clone(),
            expires_at: user.expires_at,
            name: user.name.clone(),
            phone: user.phone.clone(),
            newly_recorded: true,
        })
    }

    async fn record_login_failure(
        &self,
        user_id: UserId,
        threshold: i64,
    ) -> StoreResult<LoginFailure> {
        let mut tables = self.write()?;
        let user = tables.user_mut(user_id)?;
        user.failed_login_attempts += 1;
        if user.failed_login_attempts >= threshold {
            user.blocked = true;
        }
        Ok(LoginFailure {
            attempts: user.failed_login_attempts,
            blocked: user.blocked,
        })
    }

    async fn record_login_success(
        &self,
        user_id: UserId,
        code: &str,
        ip: Option<&str>,
    ) -> StoreResult<()> {
        let now = Utc::now();
        let mut tables = self.write()?;

        let user = tables.user_mut(user_id)?;
        user.failed_login_attempts = 0;
        user.last_access_at = Some(now);
        user.last_access_ip = ip.map(str::to_string);

        for record in tables
            .access_codes
            .iter_mut()
            .filter(|c| c.user_id == user_id && c.code == code)
        {
            record.use_count += 1;
            record.first_used_at.get_or_insert(now);
            record.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn log_activity(&self, entry: NewActivity) -> StoreResult<()> {
        self.write()?.push_activity(entry, Utc::now());
        Ok(())
    }

    async fn log_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<()> {
        let mut tables = self.write()?;
        let id = tables.webhook_events.len() as i64 + 1;
        tables.webhook_events.push(WebhookEventRecord {
            id,
            provider: event.provider,
            event_type: event.event_type,
            event_id: event.event_id,
            payload: event.payload,
            received_at: Utc::now(),
            source_ip: event.source_ip,
        });
        Ok(())
    }

    async fn record_notification(&self, notification: NewNotification) -> StoreResult<()> {
        let mut tables = self.write()?;
        let id = tables.notifications.len() as i64 + 1;
        tables.notifications.push(Notification {
            id,
            user_id: notification.user_id,
            channel: notification.channel,
            recipient: notification.recipient,
            subject: notification.subject,
            message: notification.message,
            status: notification.status,
            provider: notification.provider,
            attempts: notification.attempts,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_access_codes(&self, user_id: UserId) -> StoreResult<Vec<AccessCodeRecord>> {
        Ok(self
            .read()?
            .access_codes
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_transactions(&self, user_id: UserId) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_activity(&self) -> StoreResult<Vec<ActivityEntry>> {
        Ok(self.read()?.activity.clone())
    }

    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        Ok(self
            .read()?
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_webhook_events(&self) -> StoreResult<Vec<WebhookEventRecord>> {
        Ok(self.read()?.webhook_events.clone())
    }
}
