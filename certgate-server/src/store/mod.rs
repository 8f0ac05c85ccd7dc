//! Storage abstractions for access provisioning

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServerError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, ServerError>;

/// Users, codes, transactions and the append-only logs around them
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Check that the backing database answers
    async fn ping(&self) -> StoreResult<()>;

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>>;

    /// Get a user by (case-insensitive) email
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Turn a paid session into durable access, atomically
    ///
    /// Upserts the user with the new code, supersedes earlier codes, records
    /// the transaction and logs the payment. If the session was already
    /// reconciled nothing is written and the user's current code is
    /// returned with `newly_recorded == false`.
    async fn reconcile_payment(&self, payment: &NewPayment) -> StoreResult<ReconcileOutcome>;

    /// Count a wrong code; blocks the user once `threshold` is reached
    async fn record_login_failure(&self, user_id: UserId, threshold: i64)
        -> StoreResult<LoginFailure>;

    /// Reset the failure counter and record use of `code`
    async fn record_login_success(
        &self,
        user_id: UserId,
        code: &str,
        ip: Option<&str>,
    ) -> StoreResult<()>;

    async fn log_activity(&self, entry: NewActivity) -> StoreResult<()>;

    async fn log_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<()>;

    async fn record_notification(&self, notification: NewNotification) -> StoreResult<()>;

    /// Codes issued to a user, oldest first
    async fn list_access_codes(&self, user_id: UserId) -> StoreResult<Vec<AccessCodeRecord>>;

    /// Transactions of a user, oldest first
    async fn list_transactions(&self, user_id: UserId) -> StoreResult<Vec<TransactionRecord>>;

    /// Activity entries, oldest first
    async fn list_activity(&self) -> StoreResult<Vec<ActivityEntry>>;

    /// Notifications sent to a user, oldest first
    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>>;

    /// Webhook deliveries, oldest first
    async fn list_webhook_events(&self) -> StoreResult<Vec<WebhookEventRecord>>;
}

/// Allow sharing one store between the app and whoever inspects it
#[async_trait]
impl<T: AccessStore + ?Sized> AccessStore for Arc<T> {
    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        (**self).get_user(user_id).await
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        (**self).get_user_by_email(email).await
    }

    async fn reconcile_payment(&self, payment: &NewPayment) -> StoreResult<ReconcileOutcome> {
        (**self).reconcile_payment(payment).await
    }

    async fn record_login_failure(
        &self,
        user_id: UserId,
        threshold: i64,
    ) -> StoreResult<LoginFailure> {
        (**self).record_login_failure(user_id, threshold).await
    }

    async fn record_login_success(
        &self,
        user_id: UserId,
        code: &str,
        ip: Option<&str>,
    ) -> StoreResult<()> {
        (**self).record_login_success(user_id, code, ip).await
    }

    async fn log_activity(&self, entry: NewActivity) -> StoreResult<()> {
        (**self).log_activity(entry).await
    }

    async fn log_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<()> {
        (**self).log_webhook_event(event).await
    }

    async fn record_notification(&self, notification: NewNotification) -> StoreResult<()> {
        (**self).record_notification(notification).await
    }

    async fn list_access_codes(&self, user_id: UserId) -> StoreResult<Vec<AccessCodeRecord>> {
        (**self).list_access_codes(user_id).await
    }

    async fn list_transactions(&self, user_id: UserId) -> StoreResult<Vec<TransactionRecord>> {
        (**self).list_transactions(user_id).await
    }

    async fn list_activity(&self) -> StoreResult<Vec<ActivityEntry>> {
        (**self).list_activity().await
    }

    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        (**self).list_notifications(user_id).await
    }

    async fn list_webhook_events(&self) -> StoreResult<Vec<WebhookEventRecord>> {
        (**self).list_webhook_events().await
    }
}
