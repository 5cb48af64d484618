//! Order upload and listing

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::luhn::{self, LuhnError};

use crate::auth::CurrentUser;
use crate::state::AppState;

/// Luhn problems as API errors: malformed input is 400, a bad checksum 422
pub(crate) fn check_order_number(number: &str) -> AppResult<()> {
    luhn::validate(number).map_err(|e| match e {
        LuhnError::Empty | LuhnError::NonDigit => {
            AppError::with_message(ErrorCode::InvalidFormat, e.to_string())
        }
        LuhnError::Checksum => AppError::new(ErrorCode::OrderNumberInvalid),
    })
}

/// POST /api/user/orders (plain-text order number)
///
/// 202 newly accepted, 200 already uploaded by the caller, 409 uploaded by
/// someone else.
pub async fn upload_order(
    State(state): State<AppState>,
    user: CurrentUser,
    body: String,
) -> AppResult<StatusCode> {
    let number = body.trim();
    check_order_number(number)?;

    let owner = state.ledger.add_order(number, &user.login).await?;

    if owner.created {
        tracing::info!(order = %number, login = %user.login, "Order uploaded");
        Ok(StatusCode::ACCEPTED)
    } else if owner.owner == user.login {
        Ok(StatusCode::OK)
    } else {
        tracing::info!(order = %number, login = %user.login, "Order already uploaded by another user");
        Err(AppError::new(ErrorCode::OrderOwnedByAnotherUser))
    }
}

/// GET /api/user/orders
pub async fn list_orders(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let orders = state.ledger.get_orders(&user.login).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(orders).into_response())
}
