//! Typed payloads carried in `spec_json` columns.
//!
//! Cart rows store a [`CartSpec`]. Order items store an [`OrderItemSpec`],
//! an internally tagged enum with one variant per [`ItemAction`]; it is
//! serialised to compact JSON at the persistence boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemAction;
use crate::error::ShopError;

/// Addon selection and billing choice for a cart line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct CartSpec {
    /// Extra vCPU cores.
    pub add_cores: i64,
    /// Extra memory in GB.
    pub add_mem_gb: i64,
    /// Extra disk in GB.
    pub add_disk_gb: i64,
    /// Extra bandwidth in Mbps.
    pub add_bw_mbps: i64,
    /// Billing cycle to apply, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_cycle_id: Option<i64>,
    /// Number of billing cycles.
    pub cycle_qty: i64,
    /// Resolved term in months.
    pub duration_months: i64,
}

impl CartSpec {
    /// Parses a stored cart spec; an empty string yields the default.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] when the JSON is malformed or
    /// any addon amount is negative.
    pub fn parse(raw: &str) -> Result<Self, ShopError> {
        let spec: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_json::from_str(raw)
                .map_err(|e| ShopError::InvalidInput(format!("invalid cart spec: {e}")))?
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Rejects negative quantities.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for any negative field.
    pub fn validate(&self) -> Result<(), ShopError> {
        if self.add_cores < 0 || self.add_mem_gb < 0 || self.add_disk_gb < 0 || self.add_bw_mbps < 0
        {
            return Err(ShopError::InvalidInput("addon values must be >= 0".to_string()));
        }
        if self.cycle_qty < 0 || self.duration_months < 0 {
            return Err(ShopError::InvalidInput("term values must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Payload of a `create` item: what to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSpec {
    /// Addons and term chosen in the cart.
    pub cart: CartSpec,
    /// Plan group of the package.
    pub plan_group_id: i64,
    /// Region of the plan group.
    pub region_id: i64,
    /// Network line of the plan group.
    pub line_id: i64,
}

/// Payload of a `renew` or `emergency_renew` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewSpec {
    /// Target VPS.
    pub vps_id: i64,
    /// Days added to the expiry.
    pub renew_days: i64,
    /// Months paid for.
    pub duration_months: i64,
}

/// Payload of a `resize` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeSpec {
    /// Target VPS.
    pub vps_id: i64,
    /// Addons after the resize.
    pub spec: CartSpec,
    /// Package after the resize.
    pub target_package_id: i64,
    /// Resulting vCPU count.
    pub target_cpu: i64,
    /// Resulting memory in GB.
    pub target_mem_gb: i64,
    /// Resulting disk in GB.
    pub target_disk_gb: i64,
    /// Resulting bandwidth in Mbps.
    pub target_bw_mbps: i64,
    /// Monthly price after the resize.
    pub target_monthly: i64,
    /// Monthly price before the resize.
    pub current_monthly: i64,
    /// Amount charged for the remaining period.
    pub charge_amount: i64,
    /// Earliest execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Payload of a `refund` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundSpec {
    /// Target VPS.
    pub vps_id: i64,
    /// Amount credited to the wallet.
    pub refund_amount: i64,
    /// User-supplied reason.
    pub reason: String,
    /// Destroy the VPS once the refund is approved.
    pub delete_on_approve: bool,
}

/// Per-action payload stored in `order_items.spec_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderItemSpec {
    /// Buy a new VPS.
    Create(CreateSpec),
    /// Paid renewal.
    Renew(RenewSpec),
    /// Free short renewal.
    EmergencyRenew(RenewSpec),
    /// Resize an existing VPS.
    Resize(ResizeSpec),
    /// Refund and destroy an existing VPS.
    Refund(RefundSpec),
}

impl OrderItemSpec {
    /// The action column value for this payload.
    #[must_use]
    pub const fn action(&self) -> ItemAction {
        match self {
            Self::Create(_) => ItemAction::Create,
            Self::Renew(_) => ItemAction::Renew,
            Self::EmergencyRenew(_) => ItemAction::EmergencyRenew,
            Self::Resize(_) => ItemAction::Resize,
            Self::Refund(_) => ItemAction::Refund,
        }
    }

    /// The VPS this item acts on, for every action except `create`.
    #[must_use]
    pub const fn vps_id(&self) -> Option<i64> {
        match self {
            Self::Create(_) => None,
            Self::Renew(s) | Self::EmergencyRenew(s) => Some(s.vps_id),
            Self::Resize(s) => Some(s.vps_id),
            Self::Refund(s) => Some(s.vps_id),
        }
    }

    /// Serialises to the compact JSON stored in the database.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, ShopError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Serialization`] if the JSON does not describe a
    /// known variant.
    pub fn from_json(raw: &str) -> Result<Self, ShopError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Extracts `vps_id` from any stored item payload.
///
/// Used to re-verify rows found by a substring prefilter; payloads written
/// before the tagged format only need a top-level numeric `vps_id`.
#[must_use]
pub fn spec_vps_id(raw: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("vps_id")?.as_i64()
}
