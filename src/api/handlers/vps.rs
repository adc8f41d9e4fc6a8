//! Customer instance handlers: list, get, refresh.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{Page, PaginationParams};
use crate::api::extract::UserId;
use crate::app_state::AppState;
use crate::domain::VpsInstance;
use crate::error::{ErrorResponse, ShopError};

/// `GET /vps`: The caller's instances.
///
/// # Errors
///
/// Returns [`ShopError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/vps",
    tag = "VPS",
    summary = "List own instances",
    params(PaginationParams),
    responses((status = 200, description = "Instances", body = Page<VpsInstance>))
)]
pub async fn list_vps(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ShopError> {
    let rows = state
        .vps
        .list(Some(user_id), params.limit(), params.offset())
        .await?;
    Ok(Json(params.page(rows)))
}

/// `GET /vps/{id}`: One instance.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for foreign or unknown instances.
#[utoipa::path(
    get,
    path = "/api/v1/vps/{id}",
    tag = "VPS",
    summary = "Get an instance",
    params(("id" = i64, Path, description = "VPS id")),
    responses(
        (status = 200, description = "Instance", body = VpsInstance),
        (status = 404, description = "Instance not found", body = ErrorResponse),
    )
)]
pub async fn get_vps(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let vps = state.vps.get(Some(user_id), id).await?;
    Ok(Json(vps))
}

/// `POST /vps/{id}/refresh`: Poll the automation backend now.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for foreign or unknown instances and
/// backend errors.
#[utoipa::path(
    post,
    path = "/api/v1/vps/{id}/refresh",
    tag = "VPS",
    summary = "Refresh instance status",
    params(("id" = i64, Path, description = "VPS id")),
    responses(
        (status = 200, description = "Instance after the poll", body = VpsInstance),
        (status = 404, description = "Instance not found", body = ErrorResponse),
    )
)]
pub async fn refresh_vps(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ShopError> {
    let vps = state.vps.refresh(Some(user_id), id).await?;
    Ok(Json(vps))
}

/// Instance routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vps", get(list_vps))
        .route("/vps/{id}", get(get_vps))
        .route("/vps/{id}/refresh", post(refresh_vps))
}
