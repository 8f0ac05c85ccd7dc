//! Server error types

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Checkout session has no customer email")]
    MissingEmail,

    #[error("Payment provider error: {0}")]
    Upstream(String),

    #[error("Webhook signature rejected: {0}")]
    Signature(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account blocked")]
    AccountBlocked,

    #[error("Access expired")]
    AccessExpired,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A 500 with an endpoint-specific message; `detail` is only logged
    #[error("{message}: {detail}")]
    Failed {
        message: &'static str,
        detail: String,
    },
}

impl ServerError {
    /// Replace the generic 500 message of upstream and storage failures
    pub fn with_public_message(self, message: &'static str) -> Self {
        match self {
            ServerError::Upstream(detail)
            | ServerError::Storage(detail)
            | ServerError::Internal(detail) => ServerError::Failed { message, detail },
            other => other,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            ServerError::MissingEmail => (StatusCode::BAD_REQUEST, "Email requerido"),
            ServerError::Upstream(detail) => {
                tracing::error!(detail = %detail, "Payment provider call failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error al comunicarse con el proveedor de pagos",
                )
            }
            ServerError::Signature(detail) => {
                tracing::warn!(detail = %detail, "Rejected webhook delivery");
                (StatusCode::BAD_REQUEST, "Firma de webhook inválida")
            }
            ServerError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Credenciales inválidas"),
            ServerError::AccountBlocked => (
                StatusCode::UNAUTHORIZED,
                "Usuario bloqueado. Contacta a soporte.",
            ),
            ServerError::AccessExpired => (StatusCode::UNAUTHORIZED, "Acceso expirado"),
            ServerError::Storage(detail) => {
                tracing::error!(detail = %detail, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error del servidor")
            }
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            ServerError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "Error del servidor")
            }
            ServerError::Failed { message, detail } => {
                tracing::error!(detail = %detail, "{}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, *message)
            }
        };

        let body = json!({ "success": false, "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<certgate_core::Error> for ServerError {
    fn from(err: certgate_core::Error) -> Self {
        use certgate_core::Error;

        match err {
            Error::MissingEmail => ServerError::MissingEmail,
            Error::InvalidSignature(_) | Error::SignatureExpired => {
                ServerError::Signature(err.to_string())
            }
            Error::InvalidToken(_) | Error::TokenExpired => ServerError::InvalidCredentials,
            Error::Storage(msg) => ServerError::Storage(msg),
            Error::InvalidData(_) | Error::UnknownField(_) | Error::IndexOutOfRange { .. } => {
                ServerError::Validation(err.to_string())
            }
            Error::Json(e) => ServerError::Validation(format!("Malformed JSON: {e}")),
            Error::Jwt(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        ServerError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::Upstream(err.to_string())
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(
            status = %rejection.status(),
            detail = %rejection.body_text(),
            "Rejected request body"
        );
        ServerError::Validation("Cuerpo de la solicitud inválido".to_string())
    }
}
