//! Order event rows and the in-process events broadcast on the bus.
//!
//! Every order transition appends an [`OrderEvent`] inside its transaction.
//! After commit the service layer publishes a [`ShopEvent`] through the
//! [`super::EventBus`] so background workers can react without polling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{OrderTransition, VpsStatus};

/// A persisted, per-order sequenced event.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct OrderEvent {
    /// Row id.
    pub id: i64,
    /// Owning order.
    pub order_id: i64,
    /// Dense sequence number starting at 1.
    pub seq: i64,
    /// Transition name.
    pub event_type: String,
    /// JSON payload.
    pub data_json: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Domain event emitted after every committed state mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ShopEvent {
    /// An order moved to a new status.
    OrderTransitioned {
        /// Order id.
        order_id: i64,
        /// Event sequence number.
        seq: i64,
        /// Transition name.
        transition: String,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// A VPS reported a new status.
    VpsStatusChanged {
        /// VPS id.
        vps_id: i64,
        /// New status.
        status: VpsStatus,
        /// Raw automation state.
        automation_state: i64,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// A wallet balance changed.
    WalletAdjusted {
        /// Wallet owner.
        user_id: i64,
        /// Signed change.
        delta: i64,
        /// Balance after the change.
        balance: i64,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },
}

impl ShopEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::OrderTransitioned { .. } => "order_transitioned",
            Self::VpsStatusChanged { .. } => "vps_status_changed",
            Self::WalletAdjusted { .. } => "wallet_adjusted",
        }
    }

    /// Returns the order id for order events.
    #[must_use]
    pub const fn order_id(&self) -> Option<i64> {
        match self {
            Self::OrderTransitioned { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }

    /// Returns `true` for transitions that create provisioning work.
    #[must_use]
    pub fn wakes_provisioning(&self) -> bool {
        match self {
            Self::OrderTransitioned { transition, .. } => {
                transition == OrderTransition::Approved.as_str()
                    || transition == OrderTransition::Provisioning.as_str()
            }
            _ => false,
        }
    }
}

impl From<&OrderEvent> for ShopEvent {
    fn from(event: &OrderEvent) -> Self {
        Self::OrderTransitioned {
            order_id: event.order_id,
            seq: event.seq,
            transition: event.event_type.clone(),
            timestamp: event.created_at,
        }
    }
}
