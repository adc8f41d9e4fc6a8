//! Payment handlers: customer submission, provider checkout, and the
//! provider and automation callbacks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::AutomationReport;
use crate::api::extract::UserId;
use crate::app_state::AppState;
use crate::collaborator::PaymentInstructions;
use crate::domain::{OrderPayment, VpsInstance};
use crate::error::{ErrorResponse, ShopError};
use crate::service::PaymentRequest;

/// `POST /orders/{id}/payments`: Pay from the wallet or record an
/// offline payment.
///
/// # Errors
///
/// Returns [`ShopError::InsufficientBalance`] for an uncovered balance
/// payment and [`ShopError::InvalidInput`] for a wrong amount.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payments",
    tag = "Payments",
    summary = "Submit a payment",
    description = "`balance` debits the wallet and settles the order at once. Any other method is queued for manual review.",
    params(("id" = i64, Path, description = "Order id")),
    request_body = PaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = OrderPayment),
        (status = 400, description = "Amount or method invalid", body = ErrorResponse),
        (status = 409, description = "Order not payable or balance too low", body = ErrorResponse),
    )
)]
pub async fn submit_payment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(req): Json<PaymentRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let payment = state.orders.submit_payment(user_id, id, &req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// `POST /orders/{id}/payments/start`: Open a provider payment.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] unless the order awaits payment.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payments/start",
    tag = "Payments",
    summary = "Start a provider payment",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "What the payer should do next", body = PaymentInstructions),
        (status = 409, description = "Order not payable", body = ErrorResponse),
    )
)]
pub async fn start_payment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let instructions = state.orders.start_payment(user_id, id).await?;
    Ok(Json(instructions))
}

/// `POST /callbacks/payment`: Payment provider notification.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for an unreadable payload and
/// [`ShopError::NotFound`] for an unknown payment.
#[utoipa::path(
    post,
    path = "/api/v1/callbacks/payment",
    tag = "Callbacks",
    summary = "Payment provider callback",
    description = "Idempotent: a redelivered notification for an approved payment changes nothing.",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Payment after the callback", body = OrderPayment),
        (status = 404, description = "Unknown payment", body = ErrorResponse),
    )
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ShopError> {
    let payment = state.orders.handle_payment_callback(&payload).await?;
    Ok(Json(payment))
}

/// `POST /callbacks/automation`: Instance status pushed by the
/// automation backend.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for an unknown instance.
#[utoipa::path(
    post,
    path = "/api/v1/callbacks/automation",
    tag = "Callbacks",
    summary = "Automation status callback",
    description = "Records the reported status and reconciles the owning order item and order.",
    request_body = AutomationReport,
    responses(
        (status = 200, description = "Instance after the report", body = VpsInstance),
        (status = 404, description = "Unknown instance", body = ErrorResponse),
    )
)]
pub async fn automation_callback(
    State(state): State<AppState>,
    Json(report): Json<AutomationReport>,
) -> Result<impl IntoResponse, ShopError> {
    let outcome = state
        .vps
        .update_status(report.vps_id, report.status, report.automation_state)
        .await?;
    Ok(Json(outcome.instance))
}

/// Payment and callback routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/payments", post(submit_payment))
        .route("/orders/{id}/payments/start", post(start_payment))
        .route("/callbacks/payment", post(payment_callback))
        .route("/callbacks/automation", post(automation_callback))
}
