//! Turning a paid checkout session into access
//!
//! Shared by the webhook receiver and the verification endpoint. Whichever
//! arrives first records the payment; the other sees the stored outcome.

use std::future::Future;
use std::time::Duration;

use certgate_core::CheckoutSession;

use crate::error::ServerError;
use crate::notify::{self, Notifier, ACCESS_CODE_SUBJECT};
use crate::provider::PaymentProvider;
use crate::state::AppState;
use crate::store::{
    AccessStore, NewNotification, NewPayment, NotificationChannel, NotificationStatus,
    ReconcileOutcome,
};

/// Delivery attempts per notification
pub const SEND_ATTEMPTS: u32 = 2;

/// Pause between delivery attempts
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Reconcile a paid session and notify the customer on first recording
pub async fn process_completed_payment<S, P, N>(
    state: &AppState<S, P, N>,
    session: &CheckoutSession,
    ip: Option<&str>,
) -> Result<ReconcileOutcome, ServerError>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let details = session.payment_details()?;

    let payment = NewPayment {
        details,
        code: state.codes.generate(),
        ip: ip.map(str::to_string),
        access_period: state.access_period(),
    };

    let outcome = state.store.reconcile_payment(&payment).await?;

    if outcome.newly_recorded {
        tracing::info!(
            session_id = %session.id,
            user_id = outcome.user_id.0,
            email = %outcome.email,
            "Payment recorded"
        );
        dispatch_notifications(&state.store, &state.notifier, &outcome).await;
    } else {
        tracing::info!(session_id = %session.id, "Session already processed");
    }

    Ok(outcome)
}

/// Send the access code by email, and by WhatsApp when a phone is known
///
/// Never fails: delivery and bookkeeping problems are logged.
pub async fn dispatch_notifications<S, N>(store: &S, notifier: &N, outcome: &ReconcileOutcome)
where
    S: AccessStore,
    N: Notifier,
{
    let name = outcome.name.as_deref();

    let body = notify::access_code_email(name, &outcome.code, outcome.expires_at);
    let (result, attempts) =
        send_with_retry(|| notifier.send_email(&outcome.email, ACCESS_CODE_SUBJECT, &body)).await;
    record(
        store,
        NewNotification {
            user_id: outcome.user_id,
            channel: NotificationChannel::Email,
            recipient: outcome.email.clone(),
            subject: Some(ACCESS_CODE_SUBJECT.to_string()),
            message: body.clone(),
            status: status_of(&result),
            provider: notifier.provider_name(NotificationChannel::Email).to_string(),
            attempts,
        },
    )
    .await;
    if let Err(e) = result {
        tracing::warn!(email = %outcome.email, error = %e, "Access code email not delivered");
    }

    let Some(phone) = outcome.phone.as_deref().filter(|p| !p.trim().is_empty()) else {
        return;
    };
    if !notifier.supports(NotificationChannel::WhatsApp) {
        tracing::debug!(user_id = outcome.user_id.0, "WhatsApp delivery unavailable, skipping");
        return;
    }

    let message = notify::access_code_whatsapp(name, &outcome.code);
    let (result, attempts) = send_with_retry(|| notifier.send_whatsapp(phone, &message)).await;
    record(
        store,
        NewNotification {
            user_id: outcome.user_id,
            channel: NotificationChannel::WhatsApp,
            recipient: phone.to_string(),
            subject: None,
            message: message.clone(),
            status: status_of(&result),
            provider: notifier
                .provider_name(NotificationChannel::WhatsApp)
                .to_string(),
            attempts,
        },
    )
    .await;
    if let Err(e) = result {
        tracing::warn!(phone = %phone, error = %e, "Access code WhatsApp not delivered");
    }
}

async fn send_with_retry<F, Fut>(send: F) -> (Result<(), String>, u32)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut attempt = 1;
    loop {
        match send().await {
            Ok(()) => return (Ok(()), attempt),
            Err(e) if attempt >= SEND_ATTEMPTS => return (Err(e), attempt),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Delivery failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
                attempt += 1;
            }
        }
    }
}

fn status_of(result: &Result<(), String>) -> NotificationStatus {
    match result {
        Ok(()) => NotificationStatus::Sent,
        Err(_) => NotificationStatus::Failed,
    }
}

async fn record<S: AccessStore>(store: &S, notification: NewNotification) {
    if let Err(e) = store.record_notification(notification).await {
        tracing::warn!(error = %e, "Failed to record notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let (result, attempts) = send_with_retry(move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("transient".to_string())
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = send_with_retry(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(attempts, SEND_ATTEMPTS);
        assert_eq!(counter.load(Ordering::SeqCst), SEND_ATTEMPTS);
    }
}
