//! Login with email and access code

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use certgate_core::token::{issue_session_token, SessionClaims};
use certgate_core::normalize_access_code;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::ClientIp;
use crate::error::ServerError;
use crate::notify::Notifier;
use crate::provider::PaymentProvider;
use crate::state::AppState;
use crate::store::{
    AccessStore, NewActivity, ACTION_LOGIN_FAILED, ACTION_LOGIN_SUCCEEDED,
};

/// Wrong codes tolerated before the account is blocked
pub const MAX_FAILED_LOGINS: i64 = 4;

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "accessCode")]
    pub access_code: Option<String>,
}

#[derive(Serialize)]
pub struct LoginUser {
    pub id: i64,
    pub email: String,
    pub nombre: Option<String>,
    #[serde(rename = "expirationDate")]
    pub expiration_date: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: LoginUser,
}

async fn log_activity<S: AccessStore>(store: &S, entry: NewActivity) {
    if let Err(e) = store.log_activity(entry).await {
        tracing::warn!(error = %e, "Failed to log activity");
    }
}

/// POST /login
pub async fn login<S, P, N>(
    State(state): State<Arc<AppState<S, P, N>>>,
    client_ip: ClientIp,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ServerError>
where
    S: AccessStore,
    P: PaymentProvider,
    N: Notifier,
{
    let Json(req) = payload?;
    let email = req.email.as_deref().map(str::trim).unwrap_or_default();
    let code = req
        .access_code
        .as_deref()
        .map(normalize_access_code)
        .unwrap_or_default();

    if email.is_empty() || code.is_empty() {
        return Err(ServerError::Validation(
            "Email y código requeridos".to_string(),
        ));
    }

    let email = email.to_lowercase();
    let ip = client_ip.as_deref();

    let user = match state.store.get_user_by_email(&email).await? {
        Some(user) if user.active => user,
        _ => {
            log_activity(
                &state.store,
                NewActivity::warning(ACTION_LOGIN_FAILED, "Usuario no encontrado")
                    .email(&email)
                    .ip(ip),
            )
            .await;
            return Err(ServerError::InvalidCredentials);
        }
    };

    if user.blocked {
        tracing::info!(user_id = user.id.0, "Login attempt on blocked account");
        return Err(ServerError::AccountBlocked);
    }

    if user.access_code != code {
        let failure = state
            .store
            .record_login_failure(user.id, MAX_FAILED_LOGINS)
            .await?;
        if failure.blocked {
            tracing::warn!(user_id = user.id.0, attempts = failure.attempts, "Account blocked");
        }
        log_activity(
            &state.store,
            NewActivity::warning(ACTION_LOGIN_FAILED, "Código incorrecto")
                .user(user.id)
                .email(&email)
                .ip(ip),
        )
        .await;
        return Err(ServerError::InvalidCredentials);
    }

    if user.is_expired_at(Utc::now()) {
        return Err(ServerError::AccessExpired);
    }

    state.store.record_login_success(user.id, &code, ip).await?;

    log_activity(
        &state.store,
        NewActivity::info(
            ACTION_LOGIN_SUCCEEDED,
            format!("Login desde {}", ip.unwrap_or("desconocida")),
        )
        .user(user.id)
        .email(&email)
        .ip(ip),
    )
    .await;

    let claims = SessionClaims::for_user(user.id.0, &user.email);
    let token = issue_session_token(&claims, state.config.session_secret.as_bytes())?;

    tracing::info!(user_id = user.id.0, "Login succeeded");

    Ok(Json(LoginResponse {
        success: true,
        token,
        user: LoginUser {
            id: user.id.0,
            email: user.email,
            nombre: user.name,
            expiration_date: user.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        },
    }))
}
