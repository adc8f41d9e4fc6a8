//! Cart handlers: list, add, replace, remove, clear.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};

use crate::api::extract::UserId;
use crate::app_state::AppState;
use crate::domain::CartItem;
use crate::error::{ErrorResponse, ShopError};
use crate::service::CartItemRequest;

/// `GET /cart`: The caller's cart.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    tag = "Cart",
    summary = "List cart lines",
    description = "Returns the caller's cart lines, each priced against the catalog at its last change.",
    responses(
        (status = 200, description = "Cart lines", body = [CartItem]),
        (status = 403, description = "Missing caller identity", body = ErrorResponse),
    )
)]
pub async fn list_cart(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, ShopError> {
    let items = state.carts.list(user_id).await?;
    Ok(Json(items))
}

/// `POST /cart`: Add a line.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for unknown packages or out-of-range
/// addons.
#[utoipa::path(
    post,
    path = "/api/v1/cart",
    tag = "Cart",
    summary = "Add a cart line",
    description = "Prices the package, image and addons and stores the line.",
    request_body = CartItemRequest,
    responses(
        (status = 201, description = "Line added", body = CartItem),
        (status = 400, description = "Invalid package or addons", body = ErrorResponse),
    )
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CartItemRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let item = state.carts.add_item(user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// `PUT /cart/{id}`: Replace a line.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for foreign or unknown lines.
#[utoipa::path(
    put,
    path = "/api/v1/cart/{id}",
    tag = "Cart",
    summary = "Replace a cart line",
    params(("id" = i64, Path, description = "Cart line id")),
    request_body = CartItemRequest,
    responses(
        (status = 200, description = "Line re-priced", body = CartItem),
        (status = 404, description = "Line not found", body = ErrorResponse),
    )
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(req): Json<CartItemRequest>,
) -> Result<impl IntoResponse, ShopError> {
    let item = state.carts.update_item(user_id, id, &req).await?;
    Ok(Json(item))
}

/// `DELETE /cart/{id}`: Remove a line.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for foreign or unknown lines.
#[utoipa::path(
    delete,
    path = "/api/v1/cart/{id}",
    tag = "Cart",
    summary = "Remove a cart line",
    params(("id" = i64, Path, description = "Cart line id")),
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "Line not found", body = ErrorResponse),
    )
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    state.carts.remove_item(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /cart`: Empty the cart.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    tag = "Cart",
    summary = "Clear the cart",
    responses((status = 204, description = "Cart emptied"))
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, ShopError> {
    state.carts.clear(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cart routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(list_cart).post(add_cart_item).delete(clear_cart))
        .route("/cart/{id}", put(update_cart_item).delete(remove_cart_item))
}
