//! Back-office handlers: order review, fulfilment retries, wallets,
//! coupons and instance administration.
//!
//! Every handler requires `X-Admin-Id`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use crate::api::dto::{
    ActiveToggle, AdminStatusRequest, OrderFilter, OwnerFilter, Page, PaginationParams,
    ReviewRequest, WalletReviewRequest,
};
use crate::api::extract::AdminId;
use crate::app_state::AppState;
use crate::domain::{
    AutomationLog, Coupon, CouponProductGroup, NewCoupon, NewCouponProductGroup, Order,
    OrderPayment, VpsInstance, Wallet, WalletOrder,
};
use crate::error::{ErrorResponse, ShopError};
use crate::service::{
    AccessUpdate, AdminAdjustRequest, GenerateCouponsRequest, MarkPaidRequest, OrderDetail,
};

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// `GET /admin/orders`: All orders.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    tag = "Admin",
    summary = "List orders",
    params(PaginationParams, OrderFilter, OwnerFilter),
    responses((status = 200, description = "Orders, newest first", body = Page<Order>))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<OrderFilter>,
    Query(owner): Query<OwnerFilter>,
) -> Result<impl IntoResponse, ShopError> {
    let orders = state
        .orders
        .list_orders(owner.user_id, filter.status, params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(orders)))
}

/// `GET /admin/orders/{id}`: Any order.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown orders.
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}",
    tag = "Admin",
    summary = "Get any order",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order details", body = OrderDetail),
        (status = 404, description = "Order not found", body = ErrorResponse),
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.get_order(None, id).await?;
    Ok(Json(detail))
}

/// `GET /admin/payments/review`: Payments waiting for review.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/payments/review",
    tag = "Admin",
    summary = "Payment review queue",
    params(PaginationParams),
    responses((status = 200, description = "Pending payments, oldest first", body = Page<OrderPayment>))
)]
pub async fn review_queue(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .orders
        .review_queue(params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// `POST /admin/orders/{id}/approve`: Approve a reviewed order.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] unless the order is `pending_review`
/// and [`ShopError::ResizeInProgress`] for a clashing resize.
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/approve",
    tag = "Admin",
    summary = "Approve an order",
    description = "Approves the order, its items and pending payments, then fulfils it: provisioning jobs, resize tasks, renewals and refunds.",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order after fulfilment", body = OrderDetail),
        (status = 409, description = "Order not pending review", body = ErrorResponse),
    )
)]
pub async fn approve_order(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.approve(Some(admin_id), id).await?;
    Ok(Json(detail))
}

/// `POST /admin/orders/{id}/reject`: Reject an order.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] unless the order awaits payment or
/// review.
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/reject",
    tag = "Admin",
    summary = "Reject an order",
    params(("id" = i64, Path, description = "Order id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Order rejected", body = OrderDetail),
        (status = 409, description = "Order already settled", body = ErrorResponse),
    )
)]
pub async fn reject_order(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.reject(admin_id, id, &req.reason).await?;
    Ok(Json(detail))
}

/// `POST /admin/orders/{id}/mark-paid`: Confirm an offline payment.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] unless the order is `pending_payment`.
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/mark-paid",
    tag = "Admin",
    summary = "Mark an order paid",
    params(("id" = i64, Path, description = "Order id")),
    request_body = MarkPaidRequest,
    responses(
        (status = 200, description = "Order after fulfilment", body = OrderDetail),
        (status = 409, description = "Order not awaiting payment", body = ErrorResponse),
    )
)]
pub async fn mark_paid(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(id): Path<i64>,
    Json(req): Json<MarkPaidRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.mark_paid(admin_id, id, &req).await?;
    Ok(Json(detail))
}

/// `POST /admin/orders/{id}/retry-provision`: Requeue failed creates.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown orders and
/// [`ShopError::Conflict`] when nothing is retryable.
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/retry-provision",
    tag = "Admin",
    summary = "Retry provisioning",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with requeued jobs", body = OrderDetail),
        (status = 409, description = "Nothing to retry", body = ErrorResponse),
    )
)]
pub async fn retry_provision(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let detail = state.orders.retry_provision(admin_id, id).await?;
    Ok(Json(detail))
}

/// `DELETE /admin/orders/{id}`: Delete an order and its children.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown orders.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/orders/{id}",
    tag = "Admin",
    summary = "Delete an order",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "Order not found", body = ErrorResponse),
    )
)]
pub async fn delete_order(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    state.orders.delete(admin_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/orders/{id}/logs`: Automation calls for an order.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}/logs",
    tag = "Admin",
    summary = "Automation log",
    params(("id" = i64, Path, description = "Order id")),
    responses((status = 200, description = "Calls in order", body = [AutomationLog]))
)]
pub async fn automation_logs(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let logs = state.orders.automation_logs(id).await?;
    Ok(Json(logs))
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

/// `POST /admin/wallets/{user_id}/adjust`: Credit or debit a wallet.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for a zero delta and
/// [`ShopError::InsufficientBalance`] for an overdraw.
#[utoipa::path(
    post,
    path = "/api/v1/admin/wallets/{user_id}/adjust",
    tag = "Admin",
    summary = "Adjust a wallet",
    params(("user_id" = i64, Path, description = "Wallet owner")),
    request_body = AdminAdjustRequest,
    responses(
        (status = 200, description = "Wallet after the change", body = Wallet),
        (status = 409, description = "Balance too low", body = ErrorResponse),
    )
)]
pub async fn adjust_wallet(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(user_id): Path<i64>,
    Json(req): Json<AdminAdjustRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let wallet = state.wallets.admin_adjust(admin_id, user_id, &req).await?;
    Ok(Json(wallet))
}

/// `GET /admin/wallet-orders`: Wallet orders of everyone or one user.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/wallet-orders",
    tag = "Admin",
    summary = "List wallet orders",
    params(PaginationParams, OwnerFilter),
    responses((status = 200, description = "Wallet orders", body = Page<WalletOrder>))
)]
pub async fn list_wallet_orders(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Query(params): Query<PaginationParams>,
    Query(owner): Query<OwnerFilter>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .wallets
        .list_orders(owner.user_id, params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// `POST /admin/wallet-orders/{id}/review`: Approve or reject.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] for an already reviewed order.
#[utoipa::path(
    post,
    path = "/api/v1/admin/wallet-orders/{id}/review",
    tag = "Admin",
    summary = "Review a wallet order",
    params(("id" = i64, Path, description = "Wallet order id")),
    request_body = WalletReviewRequest,
    responses(
        (status = 200, description = "Reviewed wallet order", body = WalletOrder),
        (status = 409, description = "Already reviewed or balance too low", body = ErrorResponse),
    )
)]
pub async fn review_wallet_order(
    State(state): State<AppState>,
    AdminId(admin_id): AdminId,
    Path(id): Path<i64>,
    Json(req): Json<WalletReviewRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let order = state
        .wallets
        .review_order(admin_id, id, req.approve, &req.reason)
        .await?;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// Coupons
// ---------------------------------------------------------------------------

/// `GET /admin/coupon-groups`: Product groups.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/coupon-groups",
    tag = "Coupons",
    summary = "List product groups",
    responses((status = 200, description = "Groups", body = [CouponProductGroup]))
)]
pub async fn list_groups(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
) -> Result<impl IntoResponse, ShopError> {
    Ok(Json(state.coupons.list_groups().await?))
}

/// `POST /admin/coupon-groups`: Create a product group.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for malformed rules.
#[utoipa::path(
    post,
    path = "/api/v1/admin/coupon-groups",
    tag = "Coupons",
    summary = "Create a product group",
    request_body = NewCouponProductGroup,
    responses(
        (status = 201, description = "Group created", body = CouponProductGroup),
        (status = 400, description = "Invalid rules", body = ErrorResponse),
    )
)]
pub async fn create_group(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Json(req): Json<NewCouponProductGroup>,
) -> Result<impl IntoResponse, ShopError> {
    let group = state.coupons.create_group(&req).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// `DELETE /admin/coupon-groups/{id}`: Delete an unused group.
///
/// # Errors
///
/// Returns [`ShopError::Conflict`] while coupons reference the group.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/coupon-groups/{id}",
    tag = "Coupons",
    summary = "Delete a product group",
    params(("id" = i64, Path, description = "Group id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 409, description = "Group in use", body = ErrorResponse),
    )
)]
pub async fn delete_group(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    state.coupons.delete_group(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/coupons`: Coupons, newest first.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons",
    tag = "Coupons",
    summary = "List coupons",
    params(PaginationParams),
    responses((status = 200, description = "Coupons", body = Page<Coupon>))
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .coupons
        .list_coupons(params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// `POST /admin/coupons`: Create one coupon.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for invalid settings and a 409 for
/// a taken code.
#[utoipa::path(
    post,
    path = "/api/v1/admin/coupons",
    tag = "Coupons",
    summary = "Create a coupon",
    request_body = NewCoupon,
    responses(
        (status = 201, description = "Coupon created", body = Coupon),
        (status = 400, description = "Invalid settings", body = ErrorResponse),
        (status = 409, description = "Code taken", body = ErrorResponse),
    )
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Json(req): Json<NewCoupon>,
) -> Result<impl IntoResponse, ShopError> {
    let coupon = state.coupons.create_coupon(&req).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// `POST /admin/coupons/batch`: Generate random codes.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for a count outside 1..=5000.
#[utoipa::path(
    post,
    path = "/api/v1/admin/coupons/batch",
    tag = "Coupons",
    summary = "Generate coupons",
    description = "Creates up to `count` coupons sharing the template settings. Codes that collide with existing ones are skipped.",
    request_body = GenerateCouponsRequest,
    responses(
        (status = 201, description = "Coupons created", body = [Coupon]),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn generate_coupons(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Json(req): Json<GenerateCouponsRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let coupons = state.coupons.generate_batch(&req).await?;
    Ok((StatusCode::CREATED, Json(coupons)))
}

/// `PUT /admin/coupons/{id}/active`: Enable or disable a coupon.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown coupons.
#[utoipa::path(
    put,
    path = "/api/v1/admin/coupons/{id}/active",
    tag = "Coupons",
    summary = "Toggle a coupon",
    params(("id" = i64, Path, description = "Coupon id")),
    request_body = ActiveToggle,
    responses(
        (status = 204, description = "Coupon updated"),
        (status = 404, description = "Coupon not found", body = ErrorResponse),
    )
)]
pub async fn set_coupon_active(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
    Json(req): Json<ActiveToggle>,
) -> Result<impl IntoResponse, ShopError> {
    state.coupons.set_active(id, req.active).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /admin/coupons/{id}`: Delete a coupon.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown coupons.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/coupons/{id}",
    tag = "Coupons",
    summary = "Delete a coupon",
    params(("id" = i64, Path, description = "Coupon id")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found", body = ErrorResponse),
    )
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    state.coupons.delete_coupon(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// `GET /admin/vps`: Instances of everyone or one user.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/admin/vps",
    tag = "Admin",
    summary = "List instances",
    params(PaginationParams, OwnerFilter),
    responses((status = 200, description = "Instances", body = Page<VpsInstance>))
)]
pub async fn list_vps(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Query(params): Query<PaginationParams>,
    Query(owner): Query<OwnerFilter>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .vps
        .list(owner.user_id, params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// `PUT /admin/vps/{id}/admin-status`: Set the administrative flag.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown instances.
#[utoipa::path(
    put,
    path = "/api/v1/admin/vps/{id}/admin-status",
    tag = "Admin",
    summary = "Set admin status",
    params(("id" = i64, Path, description = "VPS id")),
    request_body = AdminStatusRequest,
    responses(
        (status = 200, description = "Instance", body = VpsInstance),
        (status = 404, description = "Instance not found", body = ErrorResponse),
    )
)]
pub async fn set_admin_status(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
    Json(req): Json<AdminStatusRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let vps = state.vps.set_admin_status(id, req.admin_status).await?;
    Ok(Json(vps))
}

/// `PUT /admin/vps/{id}/access`: Store panel link and login details.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown instances.
#[utoipa::path(
    put,
    path = "/api/v1/admin/vps/{id}/access",
    tag = "Admin",
    summary = "Update access details",
    params(("id" = i64, Path, description = "VPS id")),
    request_body = AccessUpdate,
    responses(
        (status = 200, description = "Instance", body = VpsInstance),
        (status = 404, description = "Instance not found", body = ErrorResponse),
    )
)]
pub async fn update_access(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
    Json(req): Json<AccessUpdate>,
) -> Result<impl IntoResponse, ShopError> {
    let vps = state.vps.update_access(id, &req).await?;
    Ok(Json(vps))
}

/// `POST /admin/vps/{id}/refresh`: Poll any instance.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown instances and backend
/// errors.
#[utoipa::path(
    post,
    path = "/api/v1/admin/vps/{id}/refresh",
    tag = "Admin",
    summary = "Refresh any instance",
    params(("id" = i64, Path, description = "VPS id")),
    responses((status = 200, description = "Instance after the poll", body = VpsInstance))
)]
pub async fn refresh_vps(
    State(state): State<AppState>,
    AdminId(_admin): AdminId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let vps = state.vps.refresh(None, id).await?;
    Ok(Json(vps))
}

/// Back-office routes, mounted under `/admin`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/{id}", get(get_order).delete(delete_order))
        .route("/orders/{id}/approve", post(approve_order))
        .route("/orders/{id}/reject", post(reject_order))
        .route("/orders/{id}/mark-paid", post(mark_paid))
        .route("/orders/{id}/retry-provision", post(retry_provision))
        .route("/orders/{id}/logs", get(automation_logs))
        .route("/payments/review", get(review_queue))
        .route("/wallets/{user_id}/adjust", post(adjust_wallet))
        .route("/wallet-orders", get(list_wallet_orders))
        .route("/wallet-orders/{id}/review", post(review_wallet_order))
        .route("/coupon-groups", get(list_groups).post(create_group))
        .route("/coupon-groups/{id}", delete(delete_group))
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/batch", post(generate_coupons))
        .route("/coupons/{id}", delete(delete_coupon))
        .route("/coupons/{id}/active", put(set_coupon_active))
        .route("/vps", get(list_vps))
        .route("/vps/{id}/admin-status", put(set_admin_status))
        .route("/vps/{id}/access", put(update_access))
        .route("/vps/{id}/refresh", post(refresh_vps))
}
