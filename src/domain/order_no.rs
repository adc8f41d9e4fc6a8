//! Human-readable order numbers.
//!
//! [`OrderNo`] wraps the string stored in `orders.order_no`. The random
//! suffix is taken from a UUID v4 so concurrent checkouts by the same user
//! within one second still get distinct numbers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemAction;

/// Leading tag of an order number, one per kind of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    /// Checkout from the cart.
    Checkout,
    /// Paid renewal.
    Renew,
    /// Free emergency renewal.
    EmergencyRenew,
    /// Resize.
    Resize,
    /// Refund.
    Refund,
}

impl OrderKind {
    /// The prefix written into the number.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Checkout => "ORD",
            Self::Renew => "REN",
            Self::EmergencyRenew => "EMR",
            Self::Resize => "UPG",
            Self::Refund => "REF",
        }
    }
}

impl From<ItemAction> for OrderKind {
    fn from(action: ItemAction) -> Self {
        match action {
            ItemAction::Create => Self::Checkout,
            ItemAction::Renew => Self::Renew,
            ItemAction::EmergencyRenew => Self::EmergencyRenew,
            ItemAction::Resize => Self::Resize,
            ItemAction::Refund => Self::Refund,
        }
    }
}

/// Globally unique order number `<PREFIX>-<user>-<unix secs>-<8 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNo(String);

impl OrderNo {
    /// Generates a fresh number.
    #[must_use]
    pub fn generate(kind: OrderKind, user_id: i64, now: DateTime<Utc>) -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        let suffix = simple.get(..8).unwrap_or(&simple);
        Self(format!(
            "{}-{user_id}-{}-{suffix}",
            kind.prefix(),
            now.timestamp()
        ))
    }

    /// Returns the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<OrderNo> for String {
    fn from(no: OrderNo) -> Self {
        no.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_yields_unique_numbers() {
        let now = Utc::now();
        let a = OrderNo::generate(OrderKind::Checkout, 1, now);
        let b = OrderNo::generate(OrderKind::Checkout, 1, now);
        assert_ne!(a, b);
    }

    #[test]
    fn layout_has_prefix_user_and_suffix() {
        let now = Utc::now();
        let no = OrderNo::generate(OrderKind::Resize, 42, now);
        let parts: Vec<&str> = no.as_str().split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.first().copied(), Some("UPG"));
        assert_eq!(parts.get(1).copied(), Some("42"));
        assert_eq!(parts.get(2).copied(), Some(now.timestamp().to_string().as_str()));
        assert_eq!(parts.get(3).map(|s| s.len()), Some(8));
    }

    #[test]
    fn kind_follows_item_action() {
        assert_eq!(OrderKind::from(ItemAction::EmergencyRenew).prefix(), "EMR");
        assert_eq!(OrderKind::from(ItemAction::Refund).prefix(), "REF");
    }
}
