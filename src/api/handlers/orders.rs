//! Customer order handlers: checkout, listing, cancel, coupon preview and
//! the VPS action orders (renew, emergency renew, resize, refund).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{CouponPreviewRequest, OrderFilter, Page, PaginationParams, PendingActions};
use crate::api::extract::UserId;
use crate::app_state::AppState;
use crate::domain::Order;
use crate::error::{ErrorResponse, ShopError};
use crate::service::{CheckoutRequest, CouponQuote, OrderDetail, RefundRequest, RenewRequest, ResizeRequest};

/// `POST /orders/checkout`: Turn the cart into an order.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for an empty cart or an unusable
/// coupon and [`ShopError::Forbidden`] for a disabled account.
#[utoipa::path(
    post,
    path = "/api/v1/orders/checkout",
    tag = "Orders",
    summary = "Check out the cart",
    description = "Prices the cart, applies an optional coupon and creates a `pending_payment` order with one item per instance. Repeating an idempotency key returns the first order.",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = OrderDetail),
        (status = 400, description = "Empty cart or invalid coupon", body = ErrorResponse),
        (status = 403, description = "Account disabled", body = ErrorResponse),
    )
)]
pub async fn checkout(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.checkout(user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `GET /orders`: The caller's orders.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    tag = "Orders",
    summary = "List own orders",
    params(PaginationParams, OrderFilter),
    responses((status = 200, description = "Orders, newest first", body = Page<Order>))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<OrderFilter>,
) -> Result<impl IntoResponse, ShopError> {
    let orders = state
        .orders
        .list_orders(Some(user_id), filter.status, params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(orders)))
}

/// `GET /orders/{id}`: One order with items, payments and events.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for foreign or unknown orders.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "Orders",
    summary = "Get order details",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order details", body = OrderDetail),
        (status = 404, description = "Order not found", body = ErrorResponse),
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.get_order(Some(user_id), id).await?;
    Ok(Json(detail))
}

/// `POST /orders/{id}/cancel`: Cancel an unpaid order.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] once the order has left
/// `pending_payment` or `pending_review`.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    tag = "Orders",
    summary = "Cancel an order",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order canceled", body = OrderDetail),
        (status = 409, description = "Order can no longer be canceled", body = ErrorResponse),
    )
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.cancel(user_id, id).await?;
    Ok(Json(detail))
}

/// `POST /coupons/preview`: Discount a code would give on the cart.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] when the code does not apply.
#[utoipa::path(
    post,
    path = "/api/v1/coupons/preview",
    tag = "Orders",
    summary = "Preview a coupon",
    request_body = CouponPreviewRequest,
    responses(
        (status = 200, description = "Discount on the current cart", body = CouponQuote),
        (status = 400, description = "Coupon does not apply", body = ErrorResponse),
    )
)]
pub async fn preview_coupon(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CouponPreviewRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let quote = state.orders.preview_coupon(user_id, &req.code).await?;
    Ok(Json(quote))
}

/// `GET /vps/{id}/pending`: Open action orders on an instance.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for foreign or unknown instances.
#[utoipa::path(
    get,
    path = "/api/v1/vps/{id}/pending",
    tag = "VPS",
    summary = "Open action orders",
    params(("id" = i64, Path, description = "VPS id")),
    responses((status = 200, description = "Which actions are open", body = PendingActions))
)]
pub async fn pending_actions(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let vps = state.vps.get(Some(user_id), id).await?;
    let pending = PendingActions {
        renew: state.orders.has_pending_renew_order(user_id, vps.id).await?,
        resize: state.orders.has_pending_resize_order(user_id, vps.id).await?,
        refund: state.orders.has_pending_refund_order(user_id, vps.id).await?,
    };
    Ok(Json(pending))
}

/// `POST /vps/{id}/renew`: Paid renewal order.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] while another action order is open.
#[utoipa::path(
    post,
    path = "/api/v1/vps/{id}/renew",
    tag = "VPS",
    summary = "Order a renewal",
    params(("id" = i64, Path, description = "VPS id")),
    request_body = RenewRequest,
    responses(
        (status = 201, description = "Renewal order created", body = OrderDetail),
        (status = 409, description = "Another action order is open", body = ErrorResponse),
    )
)]
pub async fn renew(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(req): Json<RenewRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.create_renew_order(user_id, id, &req).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `POST /vps/{id}/emergency-renew`: Free short renewal near expiry.
///
/// # Errors
///
/// Returns [`ShopError::Forbidden`] when the policy is off and
/// [`ShopError::Conflict`] outside the window or inside the cool-down.
#[utoipa::path(
    post,
    path = "/api/v1/vps/{id}/emergency-renew",
    tag = "VPS",
    summary = "Emergency renewal",
    description = "Extends an instance that is about to expire by the configured number of days, at no charge, at most once per cool-down interval.",
    params(("id" = i64, Path, description = "VPS id")),
    responses(
        (status = 201, description = "Emergency order created and settled", body = OrderDetail),
        (status = 403, description = "Emergency renewal disabled", body = ErrorResponse),
        (status = 409, description = "Outside the renewal window", body = ErrorResponse),
    )
)]
pub async fn emergency_renew(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.create_emergency_renew_order(user_id, id).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `POST /vps/{id}/resize`: Resize order.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for a shrinking disk or unchanged
/// spec and [`ShopError::ResizeInProgress`] while a task is queued.
#[utoipa::path(
    post,
    path = "/api/v1/vps/{id}/resize",
    tag = "VPS",
    summary = "Order a resize",
    params(("id" = i64, Path, description = "VPS id")),
    request_body = ResizeRequest,
    responses(
        (status = 201, description = "Resize order created", body = OrderDetail),
        (status = 400, description = "Invalid target", body = ErrorResponse),
        (status = 409, description = "Resize already in progress", body = ErrorResponse),
    )
)]
pub async fn resize(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(req): Json<ResizeRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.create_resize_order(user_id, id, &req).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `POST /vps/{id}/refund`: Refund request.
///
/// # Errors
///
/// Returns [`ShopError::Forbidden`] when nothing is refundable.
#[utoipa::path(
    post,
    path = "/api/v1/vps/{id}/refund",
    tag = "VPS",
    summary = "Request a refund",
    params(("id" = i64, Path, description = "VPS id")),
    request_body = RefundRequest,
    responses(
        (status = 201, description = "Refund order created", body = OrderDetail),
        (status = 403, description = "Nothing to refund", body = ErrorResponse),
    )
)]
pub async fn refund(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(req): Json<RefundRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.create_refund_order(user_id, id, &req).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Order routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/checkout", post(checkout))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/coupons/preview", post(preview_coupon))
        .route("/vps/{id}/pending", get(pending_actions))
        .route("/vps/{id}/renew", post(renew))
        .route("/vps/{id}/emergency-renew", post(emergency_renew))
        .route("/vps/{id}/resize", post(resize))
        .route("/vps/{id}/refund", post(refund))
}
