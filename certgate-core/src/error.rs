//! Error types for certgate-core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Checkout session has no customer email")]
    MissingEmail,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Webhook timestamp outside tolerance")]
    SignatureExpired,

    #[error("Invalid session token: {0}")]
    InvalidToken(String),

    #[error("Session token expired")]
    TokenExpired,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unknown form field: {0}")]
    UnknownField(String),

    #[error("Index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}
