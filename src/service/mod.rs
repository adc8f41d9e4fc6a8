//! Service layer: business logic orchestration.
//!
//! Services hold an `Arc<dyn EntityStore>` plus the collaborators they
//! call, run each state change through one store composite, and publish
//! the committed result on the [`crate::domain::EventBus`].
//!
//! [`OrderService`] owns the order state machine and fulfilment,
//! [`VpsService`] the lifecycle coordinator entry point, [`CouponService`]
//! and [`WalletService`] their ledgers, and [`Scheduler`] the background
//! workers.

pub mod cart_service;
pub mod coupon_service;
pub mod order_service;
pub mod policy;
pub mod pricing;
pub mod scheduler;
pub mod vps_service;
pub mod wallet_service;

use std::future::Future;
use std::time::Duration;

pub use cart_service::{CartItemRequest, CartService};
pub use coupon_service::{CouponQuote, CouponService, GenerateCouponsRequest};
pub use order_service::{
    CheckoutRequest, MarkPaidRequest, OrderDetail, OrderService, PaymentRequest, RefundRequest,
    RenewRequest, ResizeRequest,
};
pub use scheduler::Scheduler;
pub use vps_service::{AccessUpdate, VpsService};
pub use wallet_service::{AdminAdjustRequest, WalletOrderRequest, WalletService};

use crate::error::{ShopError, ShopResult};

/// Bounds a composite store call or collaborator call.
///
/// Dropping the inner future rolls back any transaction it had open.
///
/// # Errors
///
/// Returns [`ShopError::Timeout`] naming `what` when `limit` elapses, or
/// the inner error.
pub(crate) async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> ShopResult<T>
where
    F: Future<Output = ShopResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(what, limit_secs = limit.as_secs(), "operation timed out");
            Err(ShopError::Timeout(what.to_string()))
        }
    }
}

/// Trims a client-supplied idempotency key; blank keys count as absent.
pub(crate) fn idempotency_key(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}
