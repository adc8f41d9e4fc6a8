//! Catalog pricing: addon validation, billing terms and per-unit quotes.
//!
//! All amounts are integer minor units. A term price is
//! `round(monthly × months × multiplier_permille / 1000)`, rounding half
//! away from zero, and every component of a [`QuoteItem`] is scaled the same
//! way so coupon rules see consistent figures.

use chrono::{DateTime, Utc};

use crate::domain::money::round_div;
use crate::domain::{
    AddonKind, BillingCycle, CartSpec, Package, PlanGroup, QuoteItem, SystemImage,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::EntityStore;

/// Monthly price of each addon of a spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddonMonthly {
    /// Extra cores.
    pub core: i64,
    /// Extra memory.
    pub mem: i64,
    /// Extra disk.
    pub disk: i64,
    /// Extra bandwidth.
    pub bw: i64,
}

impl AddonMonthly {
    /// Sum of all addons.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.core
            .saturating_add(self.mem)
            .saturating_add(self.disk)
            .saturating_add(self.bw)
    }
}

/// A priced cart line.
#[derive(Debug, Clone)]
pub struct LinePrice {
    /// Package bought.
    pub package: Package,
    /// Its plan group.
    pub group: PlanGroup,
    /// Image to install.
    pub image: SystemImage,
    /// Spec with `duration_months` resolved.
    pub spec: CartSpec,
    /// Resolved term.
    pub months: i64,
    /// Per-unit breakdown with `qty = 1`.
    pub quote: QuoteItem,
}

fn addon_values(spec: &CartSpec) -> [(AddonKind, i64); 4] {
    [
        (AddonKind::Core, spec.add_cores),
        (AddonKind::Mem, spec.add_mem_gb),
        (AddonKind::Disk, spec.add_disk_gb),
        (AddonKind::Bandwidth, spec.add_bw_mbps),
    ]
}

/// Checks every addon of `spec` against the plan group's ranges.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] naming the first rejected addon.
pub fn validate_addons(group: &PlanGroup, spec: &CartSpec) -> ShopResult<()> {
    spec.validate()?;
    for (kind, value) in addon_values(spec) {
        let range = group.addon_range(kind);
        if !range.accepts(value) {
            return Err(ShopError::InvalidInput(format!(
                "{kind:?} addon {value} outside {}..={} step {}",
                range.min, range.max, range.step
            )));
        }
    }
    Ok(())
}

/// Monthly addon prices of `spec` in `group`.
#[must_use]
pub fn addon_monthly(group: &PlanGroup, spec: &CartSpec) -> AddonMonthly {
    let price = |kind: AddonKind, value: i64| value.saturating_mul(group.unit_price(kind));
    AddonMonthly {
        core: price(AddonKind::Core, spec.add_cores),
        mem: price(AddonKind::Mem, spec.add_mem_gb),
        disk: price(AddonKind::Disk, spec.add_disk_gb),
        bw: price(AddonKind::Bandwidth, spec.add_bw_mbps),
    }
}

/// Resolves the term in months and the price multiplier.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for an inactive cycle or a cycle
/// quantity outside its bounds.
pub fn resolve_term(cycle: Option<&BillingCycle>, spec: &CartSpec) -> ShopResult<(i64, i64)> {
    let Some(cycle) = cycle else {
        return Ok((spec.duration_months.max(1), 1000));
    };
    if !cycle.active {
        return Err(ShopError::InvalidInput(format!("billing cycle {} is inactive", cycle.id)));
    }
    let qty = if spec.cycle_qty <= 0 { 1 } else { spec.cycle_qty };
    if (cycle.min_qty > 0 && qty < cycle.min_qty) || (cycle.max_qty > 0 && qty > cycle.max_qty) {
        return Err(ShopError::InvalidInput(format!(
            "cycle quantity {qty} outside {}..={}",
            cycle.min_qty, cycle.max_qty
        )));
    }
    let months = cycle.months.max(1).saturating_mul(qty);
    let permille = if cycle.multiplier_permille <= 0 {
        1000
    } else {
        cycle.multiplier_permille
    };
    Ok((months, permille))
}

/// `round(monthly × months × permille / 1000)`.
#[must_use]
pub fn term_amount(monthly: i64, months: i64, permille: i64) -> i64 {
    round_div(
        i128::from(monthly) * i128::from(months) * i128::from(permille),
        1000,
    )
}

/// Per-unit quote for one package with addons over a term.
#[must_use]
pub fn unit_quote(
    package: &Package,
    group: &PlanGroup,
    spec: &CartSpec,
    months: i64,
    permille: i64,
) -> QuoteItem {
    let addons = addon_monthly(group, spec);
    let scale = |monthly: i64| term_amount(monthly, months, permille);
    QuoteItem {
        package_id: package.id,
        goods_type_id: package.goods_type_id,
        region_id: group.region_id,
        plan_group_id: group.id,
        unit_base: scale(package.monthly_price),
        unit_addon: scale(addons.total()),
        unit_addon_core: scale(addons.core),
        unit_addon_mem: scale(addons.mem),
        unit_addon_disk: scale(addons.disk),
        unit_addon_bw: scale(addons.bw),
        unit_total: scale(package.monthly_price.saturating_add(addons.total())),
        qty: 1,
    }
}

/// Whole days left until `expire_at`, rounded up; 0 when unset or past.
#[must_use]
pub fn remaining_days(expire_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let Some(expire_at) = expire_at else {
        return 0;
    };
    let secs = (expire_at - now).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs + 86_399) / 86_400
}

/// Loads and prices one cart line.
///
/// # Errors
///
/// Returns [`ShopError::NotFound`] for unknown catalog rows and
/// [`ShopError::InvalidInput`] when the package, group or image is not for
/// sale or the addons are out of range.
pub async fn price_line(
    store: &dyn EntityStore,
    package_id: i64,
    system_id: i64,
    spec: &CartSpec,
) -> ShopResult<LinePrice> {
    let package = store.get_package(package_id).await?;
    if !package.active {
        return Err(ShopError::InvalidInput(format!("package {package_id} is not for sale")));
    }
    let group = store.get_plan_group(package.plan_group_id).await?;
    if !group.active {
        return Err(ShopError::InvalidInput(format!("plan group {} is inactive", group.id)));
    }
    let image = store.get_system_image(system_id).await?;
    if !image.enabled {
        return Err(ShopError::InvalidInput(format!("system image {system_id} is disabled")));
    }
    let joined = store.list_line_system_images(group.line_id).await?;
    if !joined.is_empty() && !joined.contains(&image.id) {
        return Err(ShopError::InvalidInput(format!(
            "system image {system_id} is not offered on line {}",
            group.line_id
        )));
    }
    validate_addons(&group, spec)?;
    let cycle = match spec.billing_cycle_id.filter(|id| *id > 0) {
        Some(id) => Some(store.get_billing_cycle(id).await?),
        None => None,
    };
    let (months, permille) = resolve_term(cycle.as_ref(), spec)?;
    let quote = unit_quote(&package, &group, spec, months, permille);
    Ok(LinePrice {
        spec: CartSpec {
            duration_months: months,
            ..spec.clone()
        },
        package,
        group,
        image,
        months,
        quote,
    })
}
