//! Catalog rows: goods types, regions, plan groups, packages, system images
//! and billing cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level product family (e.g. "cloud VPS").
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
#[serde(default)]
pub struct GoodsType {
    /// Row id.
    pub id: i64,
    /// Short code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Listing order.
    pub sort_order: i64,
    /// Whether the family is sold.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Data-center region within a goods type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
#[serde(default)]
pub struct Region {
    /// Row id.
    pub id: i64,
    /// Owning goods type.
    pub goods_type_id: i64,
    /// Short code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Whether the region is sold.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Addon resource kinds priced per unit by a plan group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddonKind {
    /// vCPU cores.
    Core,
    /// Memory in GB.
    Mem,
    /// Disk in GB.
    Disk,
    /// Bandwidth in Mbps.
    Bandwidth,
}

/// Allowed range of one addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddonRange {
    /// Lower bound; `-1` disables the addon.
    pub min: i64,
    /// Upper bound; `-1` disables the addon.
    pub max: i64,
    /// Granularity.
    pub step: i64,
}

impl AddonRange {
    /// Returns `true` when no non-zero amount may be ordered.
    #[must_use]
    pub const fn is_disallowed(&self) -> bool {
        self.min == -1 || self.max == -1 || (self.min == 0 && self.max == 0)
    }

    /// Checks one requested addon amount against the range.
    #[must_use]
    pub const fn accepts(&self, value: i64) -> bool {
        if value == 0 {
            return true;
        }
        if value < 0 || self.is_disallowed() {
            return false;
        }
        if self.min > 0 && value < self.min {
            return false;
        }
        if self.max > 0 && value > self.max {
            return false;
        }
        let step = if self.step <= 0 { 1 } else { self.step };
        value % step == 0
    }
}

/// A priced group of packages on one network line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
#[serde(default)]
pub struct PlanGroup {
    /// Row id.
    pub id: i64,
    /// Owning goods type.
    pub goods_type_id: i64,
    /// Owning region.
    pub region_id: i64,
    /// Display name.
    pub name: String,
    /// Network line; system images are joined per line.
    pub line_id: i64,
    /// Monthly price per extra core.
    pub unit_core: i64,
    /// Monthly price per extra GB memory.
    pub unit_mem: i64,
    /// Monthly price per extra GB disk.
    pub unit_disk: i64,
    /// Monthly price per extra Mbps.
    pub unit_bw: i64,
    /// Minimum extra cores.
    pub add_core_min: i64,
    /// Maximum extra cores.
    pub add_core_max: i64,
    /// Core step.
    pub add_core_step: i64,
    /// Minimum extra memory.
    pub add_mem_min: i64,
    /// Maximum extra memory.
    pub add_mem_max: i64,
    /// Memory step.
    pub add_mem_step: i64,
    /// Minimum extra disk.
    pub add_disk_min: i64,
    /// Maximum extra disk.
    pub add_disk_max: i64,
    /// Disk step.
    pub add_disk_step: i64,
    /// Minimum extra bandwidth.
    pub add_bw_min: i64,
    /// Maximum extra bandwidth.
    pub add_bw_max: i64,
    /// Bandwidth step.
    pub add_bw_step: i64,
    /// Whether the group is sold.
    pub active: bool,
    /// Whether the group is listed.
    pub visible: bool,
    /// Listing order.
    pub sort_order: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl PlanGroup {
    /// Allowed range for an addon.
    #[must_use]
    pub const fn addon_range(&self, kind: AddonKind) -> AddonRange {
        match kind {
            AddonKind::Core => AddonRange {
                min: self.add_core_min,
                max: self.add_core_max,
                step: self.add_core_step,
            },
            AddonKind::Mem => AddonRange {
                min: self.add_mem_min,
                max: self.add_mem_max,
                step: self.add_mem_step,
            },
            AddonKind::Disk => AddonRange {
                min: self.add_disk_min,
                max: self.add_disk_max,
                step: self.add_disk_step,
            },
            AddonKind::Bandwidth => AddonRange {
                min: self.add_bw_min,
                max: self.add_bw_max,
                step: self.add_bw_step,
            },
        }
    }

    /// Monthly unit price of an addon.
    #[must_use]
    pub const fn unit_price(&self, kind: AddonKind) -> i64 {
        match kind {
            AddonKind::Core => self.unit_core,
            AddonKind::Mem => self.unit_mem,
            AddonKind::Disk => self.unit_disk,
            AddonKind::Bandwidth => self.unit_bw,
        }
    }
}

/// A sellable VPS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
#[serde(default)]
pub struct Package {
    /// Row id.
    pub id: i64,
    /// Owning goods type.
    pub goods_type_id: i64,
    /// Owning plan group.
    pub plan_group_id: i64,
    /// Provider product id.
    pub product_id: i64,
    /// Display name.
    pub name: String,
    /// vCPU cores.
    pub cores: i64,
    /// Memory in GB.
    pub memory_gb: i64,
    /// Disk in GB.
    pub disk_gb: i64,
    /// Bandwidth in Mbps.
    pub bandwidth_mbps: i64,
    /// Number of forwarded ports.
    pub port_num: i64,
    /// Monthly price in minor units.
    pub monthly_price: i64,
    /// Whether the package is sold.
    pub active: bool,
    /// Whether the package is listed.
    pub visible: bool,
    /// Listing order.
    pub sort_order: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// An installable OS image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
#[serde(default)]
pub struct SystemImage {
    /// Row id.
    pub id: i64,
    /// Provider image id.
    pub image_id: i64,
    /// Display name.
    pub name: String,
    /// Family, e.g. `linux`.
    pub image_type: String,
    /// Whether the image may be ordered.
    pub enabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A purchasable term, priced by a multiplier in permille.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
#[serde(default)]
pub struct BillingCycle {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Months per cycle.
    pub months: i64,
    /// Price multiplier in permille (1000 = list price).
    pub multiplier_permille: i64,
    /// Minimum cycles per order, 0 for none.
    pub min_qty: i64,
    /// Maximum cycles per order, 0 for none.
    pub max_qty: i64,
    /// Whether the cycle may be chosen.
    pub active: bool,
    /// Listing order.
    pub sort_order: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_range_disallows_addon() {
        let range = AddonRange { min: 0, max: 0, step: 1 };
        assert!(range.is_disallowed());
        assert!(range.accepts(0));
        assert!(!range.accepts(1));
    }

    #[test]
    fn negative_bound_disallows_addon() {
        let range = AddonRange { min: -1, max: 8, step: 1 };
        assert!(!range.accepts(2));
    }

    #[test]
    fn step_and_bounds_are_enforced() {
        let range = AddonRange { min: 2, max: 8, step: 2 };
        assert!(range.accepts(4));
        assert!(!range.accepts(3));
        assert!(!range.accepts(1));
        assert!(!range.accepts(10));
    }

    #[test]
    fn open_upper_bound() {
        let range = AddonRange { min: 1, max: 0, step: 0 };
        assert!(!range.is_disallowed());
        assert!(range.accepts(1000));
    }
}
