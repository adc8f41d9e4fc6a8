//! OpenAPI document served at `/api-docs/openapi.json`.

use axum::Json;
use axum::Router;
use axum::routing::get;
use utoipa::OpenApi;

use super::handlers::{admin, cart, orders, payments, system, vps, wallet};
use crate::app_state::AppState;

/// Every annotated handler. Schemas are collected from the paths.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "vps-storefront", description = "Order, payment and provisioning API of the VPS storefront."),
    paths(
        system::health_handler,
        cart::list_cart,
        cart::add_cart_item,
        cart::update_cart_item,
        cart::remove_cart_item,
        cart::clear_cart,
        orders::checkout,
        orders::list_orders,
        orders::get_order,
        orders::cancel_order,
        orders::preview_coupon,
        orders::pending_actions,
        orders::renew,
        orders::emergency_renew,
        orders::resize,
        orders::refund,
        payments::submit_payment,
        payments::start_payment,
        payments::payment_callback,
        payments::automation_callback,
        vps::list_vps,
        vps::get_vps,
        vps::refresh_vps,
        wallet::get_wallet,
        wallet::list_transactions,
        wallet::create_wallet_order,
        wallet::list_wallet_orders,
        admin::list_orders,
        admin::get_order,
        admin::review_queue,
        admin::approve_order,
        admin::reject_order,
        admin::mark_paid,
        admin::retry_provision,
        admin::delete_order,
        admin::automation_logs,
        admin::adjust_wallet,
        admin::list_wallet_orders,
        admin::review_wallet_order,
        admin::list_groups,
        admin::create_group,
        admin::delete_group,
        admin::list_coupons,
        admin::create_coupon,
        admin::generate_coupons,
        admin::set_coupon_active,
        admin::delete_coupon,
        admin::list_vps,
        admin::set_admin_status,
        admin::update_access,
        admin::refresh_vps,
    ),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Cart", description = "Shopping cart"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Payment submission"),
        (name = "Callbacks", description = "Provider and automation notifications"),
        (name = "VPS", description = "Instances and their action orders"),
        (name = "Wallet", description = "Balance and wallet orders"),
        (name = "Coupons", description = "Coupon administration"),
        (name = "Admin", description = "Back office"),
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Route serving the generated document.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}
