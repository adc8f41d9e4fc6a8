//! Wallet handlers: balance, ledger and wallet orders.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{Page, PaginationParams};
use crate::api::extract::UserId;
use crate::app_state::AppState;
use crate::domain::{Wallet, WalletOrder, WalletTransaction};
use crate::error::{ErrorResponse, ShopError};
use crate::service::WalletOrderRequest;

/// `GET /wallet`: The caller's wallet.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/wallet",
    tag = "Wallet",
    summary = "Get wallet",
    description = "Returns the caller's balance. A wallet is created at zero on first access.",
    responses((status = 200, description = "Wallet", body = Wallet))
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, ShopError> {
    let wallet = state.wallets.get_wallet(user_id).await?;
    Ok(Json(wallet))
}

/// `GET /wallet/transactions`: Ledger entries, newest first.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/wallet/transactions",
    tag = "Wallet",
    summary = "List ledger entries",
    params(PaginationParams),
    responses((status = 200, description = "Ledger page", body = Page<WalletTransaction>))
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .wallets
        .list_transactions(user_id, params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// `POST /wallet/orders`: File a top-up, withdrawal or refund request.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for a non-positive amount and
/// [`ShopError::InsufficientBalance`] for an uncovered withdrawal.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/orders",
    tag = "Wallet",
    summary = "Create a wallet order",
    request_body = WalletOrderRequest,
    responses(
        (status = 201, description = "Wallet order filed", body = WalletOrder),
        (status = 400, description = "Invalid amount", body = ErrorResponse),
        (status = 409, description = "Balance too low", body = ErrorResponse),
    )
)]
pub async fn create_wallet_order(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<WalletOrderRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let order = state.wallets.create_order(user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /wallet/orders`: The caller's wallet orders.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/wallet/orders",
    tag = "Wallet",
    summary = "List wallet orders",
    params(PaginationParams),
    responses((status = 200, description = "Wallet orders", body = Page<WalletOrder>))
)]
pub async fn list_wallet_orders(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .wallets
        .list_orders(Some(user_id), params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// Wallet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(get_wallet))
        .route("/wallet/transactions", get(list_transactions))
        .route(
            "/wallet/orders",
            get(list_wallet_orders).post(create_wallet_order),
        )
}
