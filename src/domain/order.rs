//! Cart rows, orders, order items and payments.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ItemAction, OrderItemSpec, OrderItemStatus, OrderStatus, PaymentStatus};
use crate::error::ShopError;

/// One line in a user's cart.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct CartItem {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Package to buy.
    pub package_id: i64,
    /// OS image to install.
    pub system_id: i64,
    /// Serialised [`super::CartSpec`].
    pub spec_json: String,
    /// Number of instances.
    pub qty: i64,
    /// Line amount (unit price × qty).
    pub amount: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert command for [`CartItem`].
#[derive(Debug, Clone)]
pub struct NewCartItem {
    /// Owner.
    pub user_id: i64,
    /// Package to buy.
    pub package_id: i64,
    /// OS image to install.
    pub system_id: i64,
    /// Serialised [`super::CartSpec`].
    pub spec_json: String,
    /// Number of instances.
    pub qty: i64,
    /// Line amount.
    pub amount: i64,
}

/// An order header.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct Order {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Globally unique human-facing number.
    pub order_no: String,
    /// Current status.
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    /// Sum of item amount × qty at creation.
    pub total_amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Client-chosen key, unique per user when present.
    pub idempotency_key: Option<String>,
    /// Coupon applied at checkout.
    pub coupon_id: Option<i64>,
    /// Normalised coupon code, empty when none.
    pub coupon_code: String,
    /// Total discount granted by the coupon.
    pub coupon_discount: i64,
    /// Why the order waits for review.
    pub pending_reason: String,
    /// Admin who approved the order.
    pub approved_by: Option<i64>,
    /// Approval time.
    pub approved_at: Option<DateTime<Utc>>,
    /// Why the order was rejected.
    pub rejected_reason: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert command for [`Order`].
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Owner.
    pub user_id: i64,
    /// Globally unique number.
    pub order_no: String,
    /// Initial status.
    pub status: OrderStatus,
    /// ISO currency code.
    pub currency: String,
    /// Client-chosen key.
    pub idempotency_key: Option<String>,
    /// Coupon applied at checkout.
    pub coupon_id: Option<i64>,
    /// Normalised coupon code.
    pub coupon_code: String,
    /// Total coupon discount.
    pub coupon_discount: i64,
    /// Why the order waits for review.
    pub pending_reason: String,
}

impl NewOrder {
    /// An order with no coupon and no idempotency key.
    #[must_use]
    pub fn plain(user_id: i64, order_no: String, status: OrderStatus, currency: &str) -> Self {
        Self {
            user_id,
            order_no,
            status,
            currency: currency.to_string(),
            idempotency_key: None,
            coupon_id: None,
            coupon_code: String::new(),
            coupon_discount: 0,
            pending_reason: String::new(),
        }
    }
}

/// One purchasable line inside an order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct OrderItem {
    /// Row id.
    pub id: i64,
    /// Parent order.
    pub order_id: i64,
    /// Package for create items.
    pub package_id: Option<i64>,
    /// OS image for create items.
    pub system_id: Option<i64>,
    /// Serialised [`OrderItemSpec`].
    pub spec_json: String,
    /// Quantity.
    pub qty: i64,
    /// Unit amount after discount.
    pub amount: i64,
    /// Current status.
    #[sqlx(try_from = "String")]
    pub status: OrderItemStatus,
    /// Goods type for collaborator routing.
    pub goods_type_id: i64,
    /// Provider handle once provisioned.
    pub automation_instance_id: Option<String>,
    /// What the item does.
    #[sqlx(try_from = "String")]
    pub action: ItemAction,
    /// Term in months.
    pub duration_months: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl OrderItem {
    /// Decodes the typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Serialization`] for malformed payloads.
    pub fn spec(&self) -> Result<OrderItemSpec, ShopError> {
        OrderItemSpec::from_json(&self.spec_json)
    }
}

/// Insert command for [`OrderItem`].
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    /// Package for create items.
    pub package_id: Option<i64>,
    /// OS image for create items.
    pub system_id: Option<i64>,
    /// Typed payload; also determines the action.
    pub spec: OrderItemSpec,
    /// Quantity.
    pub qty: i64,
    /// Unit amount after discount.
    pub amount: i64,
    /// Initial status.
    pub status: OrderItemStatus,
    /// Goods type.
    pub goods_type_id: i64,
    /// Term in months.
    pub duration_months: i64,
}

impl NewOrderItem {
    /// A single-quantity item acting on an existing VPS.
    #[must_use]
    pub const fn for_vps(spec: OrderItemSpec, amount: i64, goods_type_id: i64, months: i64) -> Self {
        Self {
            package_id: None,
            system_id: None,
            spec,
            qty: 1,
            amount,
            status: OrderItemStatus::PendingPayment,
            goods_type_id,
            duration_months: months,
        }
    }
}

/// A payment attempt against an order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct OrderPayment {
    /// Row id.
    pub id: i64,
    /// Paid order.
    pub order_id: i64,
    /// Payer.
    pub user_id: i64,
    /// Payment method, e.g. `balance` or `bank_transfer`.
    pub method: String,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Globally unique trade number (real or `pending-*`).
    pub trade_no: String,
    /// Free text from the payer.
    pub note: String,
    /// Uploaded proof of payment.
    pub screenshot_url: Option<String>,
    /// Review status.
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    /// Client-chosen key, unique per order when present.
    pub idempotency_key: Option<String>,
    /// Reviewing admin.
    pub reviewed_by: Option<i64>,
    /// Review comment.
    pub review_reason: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl OrderPayment {
    /// Returns `true` while the trade number is a synthetic placeholder.
    #[must_use]
    pub fn has_placeholder_trade_no(&self) -> bool {
        self.trade_no.starts_with("pending-")
    }
}

/// Insert command for [`OrderPayment`].
#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Paid order.
    pub order_id: i64,
    /// Payer.
    pub user_id: i64,
    /// Payment method.
    pub method: String,
    /// Amount.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Provider trade number; empty gets a placeholder.
    pub trade_no: String,
    /// Free text.
    pub note: String,
    /// Proof of payment.
    pub screenshot_url: Option<String>,
    /// Initial status.
    pub status: PaymentStatus,
    /// Client-chosen key.
    pub idempotency_key: Option<String>,
}

/// Synthetic trade number used until the provider reports the real one.
#[must_use]
pub fn placeholder_trade_no(order_id: i64, now: DateTime<Utc>) -> String {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
    format!("pending-{order_id}-{nanos}")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_format() {
        let now = Utc::now();
        let trade_no = placeholder_trade_no(42, now);
        let Some(digits) = trade_no.strip_prefix("pending-42-") else {
            panic!("unexpected prefix: {trade_no}");
        };
        assert!(!digits.is_empty());
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }
}
