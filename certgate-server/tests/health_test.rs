//! Tests for the health check and unmatched routes

mod common;

use common::create_test_context;
use serde_json::Value;

/// Test: health reports database and payment provider status
#[tokio::test]
async fn test_health() {
    let ctx = create_test_context();

    let response = ctx.server.get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["payment"], "configured");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

/// Test: a failing provider is reported, not fatal
#[tokio::test]
async fn test_health_provider_error() {
    let ctx = create_test_context();
    ctx.provider.set_failing(true);

    let response = ctx.server.get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["payment"], "error");
}

/// Test: unknown routes list the available endpoints
#[tokio::test]
async fn test_not_found() {
    let ctx = create_test_context();

    let response = ctx.server.get("/nope").await;

    assert_eq!(response.status_code(), 404);
    let body: Value = response.json();
    assert_eq!(body["error"], "Endpoint no encontrado");
    let endpoints = body["availableEndpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 6);
    assert!(endpoints.iter().any(|e| e == "POST /webhook/stripe"));
    assert!(endpoints
        .iter()
        .any(|e| e == "GET /checkout-session/:session_id"));
}
