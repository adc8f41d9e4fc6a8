//! Status and kind enums stored as lowercase strings.
//!
//! Every enum here round-trips through its `as_str` form, which is also the
//! value persisted in the database and the serde representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A stored string did not match any variant of the named enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseStatusError {
    /// Name of the enum that failed to parse.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $s:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $s)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Returns the persisted string form.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $s ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $s => Ok(Self::$variant), )+
                    other => Err(ParseStatusError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseStatusError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

string_enum! {
    /// Lifecycle of an order.
    OrderStatus {
        /// Waiting for the user to pay.
        PendingPayment => "pending_payment",
        /// Payment submitted, waiting for an admin.
        PendingReview => "pending_review",
        /// Paid and approved; fulfilment not yet started.
        Approved => "approved",
        /// Provision jobs are running.
        Provisioning => "provisioning",
        /// Every create item is active.
        Active => "active",
        /// At least one item failed.
        Failed => "failed",
        /// Canceled by the user before payment was approved.
        Canceled => "canceled",
        /// Rejected by an admin during review.
        Rejected => "rejected",
    }
}

impl OrderStatus {
    /// Statuses in which an order still blocks other actions on its VPS.
    pub const IN_PROGRESS: &'static [Self] = &[
        Self::PendingPayment,
        Self::PendingReview,
        Self::Approved,
        Self::Provisioning,
    ];

    /// Statuses in which item reconciliation may move the order.
    pub const RECOMPUTABLE: &'static [Self] =
        &[Self::Approved, Self::Provisioning, Self::Active, Self::Failed];

    /// Statuses that count as a successful purchase.
    pub const SUCCESSFUL: &'static [Self] = &[Self::Approved, Self::Provisioning, Self::Active];

    /// Returns `true` while the user may still cancel the order.
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        matches!(self, Self::PendingPayment | Self::PendingReview)
    }
}

string_enum! {
    /// Name of an order transition, stored as the `OrderEvent` type.
    OrderTransition {
        /// Order inserted.
        Created => "created",
        /// Payment submitted for review.
        PendingReview => "pending_review",
        /// Payment confirmed or review passed.
        Approved => "approved",
        /// Provision jobs scheduled.
        Provisioning => "provisioning",
        /// All items fulfilled.
        Active => "active",
        /// An item failed.
        Failed => "failed",
        /// Canceled by the user.
        Canceled => "canceled",
        /// Rejected by review.
        Rejected => "rejected",
    }
}

impl OrderTransition {
    /// The transition that leads into `status`.
    #[must_use]
    pub const fn into_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::PendingPayment => Self::Created,
            OrderStatus::PendingReview => Self::PendingReview,
            OrderStatus::Approved => Self::Approved,
            OrderStatus::Provisioning => Self::Provisioning,
            OrderStatus::Active => Self::Active,
            OrderStatus::Failed => Self::Failed,
            OrderStatus::Canceled => Self::Canceled,
            OrderStatus::Rejected => Self::Rejected,
        }
    }
}

string_enum! {
    /// Lifecycle of a single order item.
    OrderItemStatus {
        /// Waiting for payment or review of the parent order.
        PendingPayment => "pending_payment",
        /// Approved; fulfilment pending.
        Approved => "approved",
        /// External work is running.
        Provisioning => "provisioning",
        /// Fulfilled.
        Active => "active",
        /// Fulfilment failed.
        Failed => "failed",
        /// Canceled with its order.
        Canceled => "canceled",
        /// Rejected with its order.
        Rejected => "rejected",
    }
}

impl OrderItemStatus {
    /// Terminal item statuses; everything else counts as pending.
    pub const TERMINAL: &'static [Self] = &[Self::Active, Self::Failed, Self::Canceled, Self::Rejected];

    /// Returns `true` if the item will not change status any more on its own.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::Failed | Self::Canceled | Self::Rejected
        )
    }
}

string_enum! {
    /// Lifecycle of a payment row.
    PaymentStatus {
        /// Created, not yet confirmed.
        PendingPayment => "pending_payment",
        /// Waiting for manual review.
        PendingReview => "pending_review",
        /// Confirmed.
        Approved => "approved",
        /// Refused by review.
        Rejected => "rejected",
    }
}

string_enum! {
    /// What an order item does.
    ItemAction {
        /// Buys a new VPS.
        Create => "create",
        /// Extends an existing VPS.
        Renew => "renew",
        /// Free short extension within the expiry window.
        EmergencyRenew => "emergency_renew",
        /// Changes the VPS size.
        Resize => "resize",
        /// Refunds the remaining period and destroys the VPS.
        Refund => "refund",
    }
}

impl ItemAction {
    /// Actions that reference an existing VPS through `spec_json.vps_id`.
    pub const VPS_ACTIONS: &'static [Self] =
        &[Self::Renew, Self::EmergencyRenew, Self::Resize, Self::Refund];
}

string_enum! {
    /// Status reported for a VPS instance.
    VpsStatus {
        /// Being created or queued.
        Provisioning => "provisioning",
        /// Powered on.
        Running => "running",
        /// Powered off.
        Stopped => "stopped",
        /// OS reinstall running.
        Reinstalling => "reinstalling",
        /// OS reinstall failed.
        ReinstallFailed => "reinstall_failed",
        /// Locked after expiry.
        ExpiredLocked => "expired_locked",
        /// Booted into rescue mode.
        Rescue => "rescue",
        /// Password reset running.
        CrackingPassword => "cracking_password",
        /// Locked by the provider.
        Locked => "locked",
        /// Provider state not recognised.
        Unknown => "unknown",
    }
}

/// Partition of VPS statuses used by the lifecycle coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpsStatusClass {
    /// The instance exists and is usable.
    Ready,
    /// The instance could not be brought up.
    Failed,
    /// Still converging.
    Transient,
}

impl VpsStatus {
    /// Classifies the status into ready, failed, or transient.
    #[must_use]
    pub const fn class(&self) -> VpsStatusClass {
        match self {
            Self::Running | Self::Stopped | Self::Rescue | Self::Locked | Self::ExpiredLocked => {
                VpsStatusClass::Ready
            }
            Self::ReinstallFailed => VpsStatusClass::Failed,
            _ => VpsStatusClass::Transient,
        }
    }

    /// Maps a numeric automation state to a status.
    #[must_use]
    pub const fn from_automation_state(state: i64) -> Self {
        match state {
            0 | 1 | 13 => Self::Provisioning,
            2 => Self::Running,
            3 => Self::Stopped,
            4 => Self::Reinstalling,
            5 => Self::ReinstallFailed,
            10 => Self::Locked,
            _ => Self::Unknown,
        }
    }

    /// Parses a provider status string, falling back to [`VpsStatus::Unknown`].
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        raw.trim().to_ascii_lowercase().parse().unwrap_or(Self::Unknown)
    }
}

string_enum! {
    /// Administrative flag on a VPS.
    VpsAdminStatus {
        /// No restriction.
        Normal => "normal",
        /// Suspended for abuse.
        Abuse => "abuse",
        /// Suspended for fraud.
        Fraud => "fraud",
        /// Locked by an admin.
        Locked => "locked",
    }
}

string_enum! {
    /// Lifecycle of a resize task.
    ResizeTaskStatus {
        /// Waiting for its schedule.
        Pending => "pending",
        /// Picked by the worker.
        Running => "running",
        /// Completed.
        Done => "done",
        /// Gave up.
        Failed => "failed",
    }
}

string_enum! {
    /// Lifecycle of a provision job.
    ProvisionJobStatus {
        /// Created, never attempted.
        Pending => "pending",
        /// Waiting for the next attempt.
        Retry => "retry",
        /// Picked by the worker.
        Running => "running",
        /// Instance is ready.
        Done => "done",
        /// Gave up.
        Failed => "failed",
    }
}

impl ProvisionJobStatus {
    /// Statuses the scheduler picks when due.
    pub const DUE: &'static [Self] = &[Self::Pending, Self::Retry, Self::Running];
}

string_enum! {
    /// Lifecycle of a coupon redemption.
    RedemptionStatus {
        /// Reserved by an unpaid order.
        Applied => "applied",
        /// The order was fulfilled.
        Confirmed => "confirmed",
        /// The order was canceled.
        Canceled => "canceled",
    }
}

impl RedemptionStatus {
    /// Redemptions that count against coupon limits.
    pub const COUNTED: &'static [Self] = &[Self::Applied, Self::Confirmed];
}

string_enum! {
    /// Coupon rule scope.
    CouponScope {
        /// Base price of every item.
        All => "all",
        /// Addon part of every item.
        AllAddons => "all_addons",
        /// Items of one goods type.
        GoodsType => "goods_type",
        /// Items of one goods type in one region.
        GoodsTypeRegion => "goods_type_region",
        /// Items of one plan group.
        PlanGroup => "plan_group",
        /// Items of one package.
        Package => "package",
        /// Selected addon parts of one plan group.
        AddonConfig => "addon_config",
    }
}

string_enum! {
    /// Kind of wallet order.
    WalletOrderType {
        /// Top-up request.
        Recharge => "recharge",
        /// Payout request.
        Withdraw => "withdraw",
        /// Refund credited to the wallet.
        Refund => "refund",
    }
}

string_enum! {
    /// Review status of a wallet order.
    WalletOrderStatus {
        /// Waiting for an admin.
        PendingReview => "pending_review",
        /// Approved and applied to the balance.
        Approved => "approved",
        /// Refused.
        Rejected => "rejected",
    }
}

string_enum! {
    /// Account role.
    UserRole {
        /// Customer.
        User => "user",
        /// Back-office operator.
        Admin => "admin",
    }
}

string_enum! {
    /// Account status.
    UserStatus {
        /// May log in and order.
        Active => "active",
        /// Blocked.
        Disabled => "disabled",
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn order_status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            let Ok(parsed) = status.as_str().parse::<OrderStatus>() else {
                panic!("failed to parse {status}");
            };
            assert_eq!(parsed, *status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "paid".parse::<OrderStatus>();
        let Err(err) = err else {
            panic!("expected parse failure");
        };
        assert_eq!(err.kind, "OrderStatus");
        assert_eq!(err.value, "paid");
    }

    #[test]
    fn serde_uses_stored_form() {
        let json = serde_json::to_string(&ItemAction::EmergencyRenew).unwrap_or_default();
        assert_eq!(json, "\"emergency_renew\"");
    }

    #[test]
    fn vps_status_partitions() {
        assert_eq!(VpsStatus::Running.class(), VpsStatusClass::Ready);
        assert_eq!(VpsStatus::ExpiredLocked.class(), VpsStatusClass::Ready);
        assert_eq!(VpsStatus::ReinstallFailed.class(), VpsStatusClass::Failed);
        assert_eq!(VpsStatus::Provisioning.class(), VpsStatusClass::Transient);
        assert_eq!(VpsStatus::CrackingPassword.class(), VpsStatusClass::Transient);
    }

    #[test]
    fn automation_state_mapping() {
        assert_eq!(VpsStatus::from_automation_state(13), VpsStatus::Provisioning);
        assert_eq!(VpsStatus::from_automation_state(2), VpsStatus::Running);
        assert_eq!(VpsStatus::from_automation_state(5), VpsStatus::ReinstallFailed);
        assert_eq!(VpsStatus::from_automation_state(99), VpsStatus::Unknown);
    }

    #[test]
    fn lenient_parse_falls_back_to_unknown() {
        assert_eq!(VpsStatus::parse_lenient(" RUNNING "), VpsStatus::Running);
        assert_eq!(VpsStatus::parse_lenient("exploded"), VpsStatus::Unknown);
    }

    #[test]
    fn item_terminal_set() {
        assert!(OrderItemStatus::Canceled.is_terminal());
        assert!(!OrderItemStatus::Provisioning.is_terminal());
        assert_eq!(OrderItemStatus::TERMINAL.len(), 4);
    }
}
