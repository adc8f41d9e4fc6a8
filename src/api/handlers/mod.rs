//! REST endpoint handlers organized by resource.

pub mod admin;
pub mod cart;
pub mod orders;
pub mod payments;
pub mod system;
pub mod vps;
pub mod wallet;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(cart::routes())
        .merge(orders::routes())
        .merge(payments::routes())
        .merge(vps::routes())
        .merge(wallet::routes())
        .nest("/admin", admin::routes())
}
