//! Registration and login

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use http::header::AUTHORIZATION;
use serde::Serialize;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::Credentials;

use crate::error::LedgerError;
use crate::state::AppState;
use crate::utils::password::{hash_password, verify_password};

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

fn read_credentials(payload: Result<Json<Credentials>, JsonRejection>) -> AppResult<Credentials> {
    let Json(creds) = payload.map_err(|e| AppError::invalid_request(e.body_text()))?;
    if !creds.is_complete() {
        return Err(AppError::with_message(
            ErrorCode::RequiredField,
            "login and password are required",
        ));
    }
    Ok(creds)
}

/// Token in both the `Authorization` header and the body
fn token_response(state: &AppState, login: &str) -> AppResult<Response> {
    let token = state.jwt.generate_token(login).map_err(|e| {
        tracing::error!(error = %e, "JWT creation failed");
        AppError::new(ErrorCode::InternalError)
    })?;

    Ok((
        [(AUTHORIZATION, format!("Bearer {token}"))],
        Json(TokenResponse { token }),
    )
        .into_response())
}

/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<Response> {
    let creds = read_credentials(payload)?;
    let login = creds.login.trim();

    let hash = hash_password(&creds.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        AppError::new(ErrorCode::InternalError)
    })?;

    state
        .ledger
        .add_user(login, &hash)
        .await
        .map_err(|e| match e {
            LedgerError::Conflict(_) => AppError::new(ErrorCode::LoginTaken),
            e => AppError::from(e),
        })?;

    tracing::info!(login = %login, "User registered");
    token_response(&state, login)
}

/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<Response> {
    let creds = read_credentials(payload)?;
    let login = creds.login.trim();

    let user = state.ledger.get_user(login).await.map_err(|e| match e {
        LedgerError::NotFound(_) => AppError::invalid_credentials(),
        e => AppError::from(e),
    })?;

    if !verify_password(&creds.password, &user.password_hash) {
        tracing::debug!(login = %login, "Password mismatch");
        return Err(AppError::invalid_credentials());
    }

    token_response(&state, &user.login)
}
