//! Common test utilities for server integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestResponse, TestServer};
use certgate_core::checkout::CustomerDetails;
use certgate_core::signature::sign_payload;
use certgate_core::{CheckoutSession, SeededCodeGenerator};
use certgate_server::config::StripeSettings;
use certgate_server::store::NotificationChannel;
use certgate_server::{
    routes, AppState, CheckoutRequest, Config, InMemoryStore, Notifier, PaymentProvider,
    ServerError,
};
use serde_json::{json, Value};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const SESSION_SECRET: &str = "test-session-secret";

/// A message captured by [`MockNotifier`]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel: NotificationChannel,
    pub recipient: String,
    pub body: String,
}

/// Mock notifier that captures messages
#[derive(Default, Clone)]
pub struct MockNotifier {
    pub sent: Arc<RwLock<Vec<SentMessage>>>,
    /// Number of upcoming sends that fail
    pub failures: Arc<AtomicU32>,
    pub whatsapp_enabled: Arc<AtomicBool>,
    /// Simulated delivery latency, in milliseconds
    pub latency_ms: Arc<AtomicU64>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            whatsapp_enabled: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.read().unwrap().clone()
    }

    pub fn messages_to(&self, recipient: &str) -> Vec<SentMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.recipient == recipient)
            .collect()
    }

    async fn deliver(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        body: &str,
    ) -> Result<(), String> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err("simulated delivery failure".to_string());
        }
        self.sent.write().unwrap().push(SentMessage {
            channel,
            recipient: recipient.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn provider_name(&self, _channel: NotificationChannel) -> &'static str {
        "mock"
    }

    fn supports(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::Email => true,
            NotificationChannel::WhatsApp => self.whatsapp_enabled.load(Ordering::SeqCst),
        }
    }

    async fn send_email(&self, to: &str, _subject: &str, body: &str) -> Result<(), String> {
        self.deliver(NotificationChannel::Email, to, body).await
    }

    async fn send_whatsapp(&self, phone: &str, message: &str) -> Result<(), String> {
        self.deliver(NotificationChannel::WhatsApp, phone, message).await
    }
}

/// In-process stand-in for the payment provider
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub sessions: Arc<RwLock<HashMap<String, CheckoutSession>>>,
    pub requests: Arc<RwLock<Vec<CheckoutRequest>>>,
    pub fail: Arc<AtomicBool>,
    counter: Arc<AtomicU32>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.requests.read().unwrap().last().cloned()
    }

    /// Insert a session directly
    pub fn insert(&self, session: CheckoutSession) {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Mark a known session as paid, the way the hosted checkout would
    pub fn mark_paid(&self, session_id: &str) -> CheckoutSession {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown session");
        session.status = Some("complete".to_string());
        session.payment_status = Some("paid".to_string());
        session.amount_total = Some(99_900);
        session.currency = Some("mxn".to_string());
        session.payment_intent = None;
        session.clone()
    }

    fn check_failure(&self) -> Result<(), ServerError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ServerError::Upstream("fake provider is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn is_configured(&self) -> bool {
        true
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServerError> {
        self.check_failure()?;
        self.requests.write().unwrap().push(request.clone());

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");

        let mut metadata = BTreeMap::new();
        metadata.insert("email".to_string(), request.email.clone());
        metadata.insert("nombre".to_string(), request.name.clone().unwrap_or_default());
        metadata.insert("telefono".to_string(), request.phone.clone().unwrap_or_default());

        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.example.com/pay/{id}")),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            customer_email: Some(request.email.clone()),
            customer_details: None,
            metadata: Some(metadata),
            amount_total: None,
            currency: None,
            payment_intent: None,
        };
        self.insert(session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServerError> {
        self.check_failure()?;
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServerError::Upstream(format!("No such checkout.session: {session_id}")))
    }

    async fn check_connection(&self) -> Result<(), ServerError> {
        self.check_failure()
    }
}

/// Everything a test needs to drive and inspect the service
pub struct TestContext {
    pub server: TestServer,
    pub store: Arc<InMemoryStore>,
    pub provider: FakeProvider,
    pub notifier: MockNotifier,
}

pub fn test_config() -> Config {
    Config {
        session_secret: SESSION_SECRET.to_string(),
        stripe: StripeSettings {
            secret_key: Some("sk_test_fake".to_string()),
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Create a test server backed by the in-memory store and fakes
pub fn create_test_context() -> TestContext {
    create_test_context_with(test_config())
}

/// Same as [`create_test_context`] with a custom configuration
pub fn create_test_context_with(config: Config) -> TestContext {
    let store = Arc::new(InMemoryStore::new());
    let provider = FakeProvider::new();
    let notifier = MockNotifier::new();

    let state = Arc::new(
        AppState::new(
            config,
            Arc::clone(&store),
            provider.clone(),
            notifier.clone(),
        )
        .with_code_generator(SeededCodeGenerator::new(7)),
    );

    let app = routes::create_router(state);
    let server = TestServer::new(app).expect("Failed to create test server");

    TestContext {
        server,
        store,
        provider,
        notifier,
    }
}

/// A completed, paid checkout session as the provider would embed it in an event
pub fn paid_session(session_id: &str, email: &str, phone: Option<&str>) -> CheckoutSession {
    let mut metadata = BTreeMap::new();
    metadata.insert("email".to_string(), email.to_string());
    metadata.insert("nombre".to_string(), "Ana".to_string());
    metadata.insert("telefono".to_string(), phone.unwrap_or_default().to_string());

    CheckoutSession {
        id: session_id.to_string(),
        url: None,
        status: Some("complete".to_string()),
        payment_status: Some("paid".to_string()),
        customer_email: Some(email.to_string()),
        customer_details: Some(CustomerDetails {
            email: Some(email.to_string()),
            name: Some("Ana Checkout".to_string()),
            phone: None,
        }),
        metadata: Some(metadata),
        amount_total: Some(99_900),
        currency: Some("mxn".to_string()),
        payment_intent: None,
    }
}

/// Raw `checkout.session.completed` event body
pub fn completed_event(session: &CheckoutSession) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", session.id),
        "object": "event",
        "type": "checkout.session.completed",
        "created": chrono::Utc::now().timestamp(),
        "data": { "object": session },
    }))
    .unwrap()
}

/// Signature header for `payload` signed now with the test secret
pub fn sign(payload: &[u8]) -> String {
    sign_payload(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap()
}

/// Deliver a webhook with the given signature header
pub async fn post_webhook(server: &TestServer, payload: Vec<u8>, signature: &str) -> TestResponse {
    server
        .post("/webhook/stripe")
        .add_header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        )
        .add_header(
            HeaderName::from_static("stripe-signature"),
            HeaderValue::from_str(signature).unwrap(),
        )
        .bytes(Bytes::from(payload))
        .await
}

/// Deliver a correctly signed webhook
pub async fn post_signed_webhook(server: &TestServer, payload: Vec<u8>) -> TestResponse {
    let signature = sign(&payload);
    post_webhook(server, payload, &signature).await
}

/// Log in and return the parsed response body alongside the status
pub async fn login(server: &TestServer, email: &str, code: &str) -> (u16, Value) {
    let response = server
        .post("/login")
        .json(&json!({ "email": email, "accessCode": code }))
        .await;
    (response.status_code().as_u16(), response.json())
}

/// Create a checkout through the API, mark it paid and verify it
///
/// Returns the issued access code.
pub async fn purchase(ctx: &TestContext, email: &str) -> String {
    let response = ctx
        .server
        .post("/create-checkout-session")
        .json(&json!({ "email": email, "name": "Ana" }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    let session_id = body["id"].as_str().unwrap().to_string();

    ctx.provider.mark_paid(&session_id);

    let response = ctx
        .server
        .post("/verify-payment")
        .json(&json!({ "sessionId": session_id }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    body["accessCode"].as_str().unwrap().to_string()
}
