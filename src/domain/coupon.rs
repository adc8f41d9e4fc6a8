//! Coupon rows and the pure rule-matching functions of the coupon engine.
//!
//! A product group holds a list of [`CouponProductRule`]s. For each quoted
//! item every rule is asked for a discountable amount; the matching rule
//! with the highest [`specificity`] wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money::apply_permille;
use super::{CouponScope, RedemptionStatus};
use crate::error::ShopError;

/// Named set of rules that coupons point at.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct CouponProductGroup {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Legacy single-rule scope.
    #[sqlx(try_from = "String")]
    pub scope: CouponScope,
    /// JSON list of rules; empty means "use the legacy fields".
    pub rules_json: String,
    /// Legacy goods type filter.
    pub goods_type_id: i64,
    /// Legacy region filter.
    pub region_id: i64,
    /// Legacy plan group filter.
    pub plan_group_id: i64,
    /// Legacy package filter.
    pub package_id: i64,
    /// Legacy flag: core addon discounted when > 0.
    pub addon_core: i64,
    /// Legacy flag: memory addon discounted when > 0.
    pub addon_mem_gb: i64,
    /// Legacy flag: disk addon discounted when > 0.
    pub addon_disk_gb: i64,
    /// Legacy flag: bandwidth addon discounted when > 0.
    pub addon_bw_mbps: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert command for [`CouponProductGroup`].
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct NewCouponProductGroup {
    /// Display name.
    pub name: String,
    /// Legacy scope; defaults to `all`.
    pub scope: Option<CouponScope>,
    /// Rules.
    pub rules: Vec<CouponProductRule>,
    /// Legacy goods type filter.
    pub goods_type_id: i64,
    /// Legacy region filter.
    pub region_id: i64,
    /// Legacy plan group filter.
    pub plan_group_id: i64,
    /// Legacy package filter.
    pub package_id: i64,
    /// Legacy core flag.
    pub addon_core: i64,
    /// Legacy memory flag.
    pub addon_mem_gb: i64,
    /// Legacy disk flag.
    pub addon_disk_gb: i64,
    /// Legacy bandwidth flag.
    pub addon_bw_mbps: i64,
}

/// One applicability rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CouponProductRule {
    /// What the rule matches.
    pub scope: CouponScope,
    /// Goods type constraint, 0 = any.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub goods_type_id: i64,
    /// Region constraint, 0 = any.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub region_id: i64,
    /// Plan group constraint, 0 = any.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub plan_group_id: i64,
    /// Package constraint, 0 = any.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub package_id: i64,
    /// Discount the core addon (addon_config only).
    #[serde(default, skip_serializing_if = "is_false")]
    pub addon_core_enabled: bool,
    /// Discount the memory addon.
    #[serde(default, skip_serializing_if = "is_false")]
    pub addon_mem_enabled: bool,
    /// Discount the disk addon.
    #[serde(default, skip_serializing_if = "is_false")]
    pub addon_disk_enabled: bool,
    /// Discount the bandwidth addon.
    #[serde(default, skip_serializing_if = "is_false")]
    pub addon_bw_enabled: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(v: &bool) -> bool {
    !*v
}

impl CouponProductRule {
    /// A rule with only a scope set.
    #[must_use]
    pub const fn scoped(scope: CouponScope) -> Self {
        Self {
            scope,
            goods_type_id: 0,
            region_id: 0,
            plan_group_id: 0,
            package_id: 0,
            addon_core_enabled: false,
            addon_mem_enabled: false,
            addon_disk_enabled: false,
            addon_bw_enabled: false,
        }
    }

    /// Checks the ids each scope needs.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] naming the missing id.
    pub fn validate(&self) -> Result<(), ShopError> {
        let missing = |what: &str| {
            Err(ShopError::InvalidInput(format!(
                "{} rule requires {what}",
                self.scope
            )))
        };
        match self.scope {
            CouponScope::All | CouponScope::AllAddons => Ok(()),
            CouponScope::GoodsType if self.goods_type_id <= 0 => missing("goods_type_id"),
            CouponScope::GoodsTypeRegion if self.goods_type_id <= 0 || self.region_id <= 0 => {
                missing("goods_type_id and region_id")
            }
            CouponScope::PlanGroup | CouponScope::AddonConfig if self.plan_group_id <= 0 => {
                missing("plan_group_id")
            }
            CouponScope::Package if self.package_id <= 0 => missing("package_id"),
            _ => Ok(()),
        }
    }
}

/// Selection weight of a rule scope; the most specific match wins.
#[must_use]
pub const fn specificity(scope: CouponScope) -> i32 {
    match scope {
        CouponScope::Package => 60,
        CouponScope::PlanGroup | CouponScope::AddonConfig => 50,
        CouponScope::GoodsTypeRegion => 40,
        CouponScope::GoodsType => 30,
        CouponScope::AllAddons => 20,
        CouponScope::All => 10,
    }
}

/// Trims and upper-cases a coupon code.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Deserialize)]
struct StoredRule {
    #[serde(default)]
    scope: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl CouponProductGroup {
    /// The effective rule list.
    ///
    /// Entries with an empty scope are skipped. When nothing remains, one
    /// rule is synthesised from the legacy scalar columns.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for malformed JSON or an unknown
    /// scope.
    pub fn rules(&self) -> Result<Vec<CouponProductRule>, ShopError> {
        let parsed = parse_rules(&self.rules_json)?;
        if !parsed.is_empty() {
            return Ok(parsed);
        }
        Ok(vec![CouponProductRule {
            scope: self.scope,
            goods_type_id: self.goods_type_id,
            region_id: self.region_id,
            plan_group_id: self.plan_group_id,
            package_id: self.package_id,
            addon_core_enabled: self.addon_core > 0,
            addon_mem_enabled: self.addon_mem_gb > 0,
            addon_disk_enabled: self.addon_disk_gb > 0,
            addon_bw_enabled: self.addon_bw_mbps > 0,
        }])
    }
}

/// Parses a stored `rules_json` list, skipping entries without a scope.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for malformed JSON or an unknown
/// scope.
pub fn parse_rules(raw: &str) -> Result<Vec<CouponProductRule>, ShopError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let stored: Vec<StoredRule> = serde_json::from_str(raw)
        .map_err(|e| ShopError::InvalidInput(format!("invalid coupon rules: {e}")))?;
    let mut rules = Vec::with_capacity(stored.len());
    for entry in stored {
        if entry.scope.trim().is_empty() {
            continue;
        }
        let mut obj = entry.rest;
        obj.insert("scope".to_string(), serde_json::Value::String(entry.scope));
        let rule: CouponProductRule = serde_json::from_value(serde_json::Value::Object(obj))
            .map_err(|e| ShopError::InvalidInput(format!("invalid coupon rule: {e}")))?;
        rules.push(rule);
    }
    Ok(rules)
}

/// A coupon code.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct Coupon {
    /// Row id.
    pub id: i64,
    /// Upper-case unique code.
    pub code: String,
    /// Discount in permille, 1..=1000.
    pub discount_permille: i64,
    /// Group whose rules apply.
    pub product_group_id: i64,
    /// Max counted redemptions, -1 = unlimited.
    pub total_limit: i64,
    /// Max counted redemptions per user, -1 = unlimited.
    pub per_user_limit: i64,
    /// Valid from.
    pub starts_at: Option<DateTime<Utc>>,
    /// Valid until.
    pub ends_at: Option<DateTime<Utc>>,
    /// Only users without successful orders.
    pub new_user_only: bool,
    /// Usable at all.
    pub active: bool,
    /// Admin note.
    pub note: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Whether `now` lies in `[starts_at, ends_at]`.
    #[must_use]
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.is_none_or(|s| now >= s) && self.ends_at.is_none_or(|e| now <= e)
    }
}

/// Insert command for [`Coupon`].
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct NewCoupon {
    /// Code; normalised before insert.
    #[serde(default)]
    pub code: String,
    /// Discount in permille.
    pub discount_permille: i64,
    /// Group whose rules apply.
    pub product_group_id: i64,
    /// Max counted redemptions.
    #[serde(default = "unlimited")]
    pub total_limit: i64,
    /// Max counted redemptions per user.
    #[serde(default = "unlimited")]
    pub per_user_limit: i64,
    /// Valid from.
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Valid until.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Only users without successful orders.
    #[serde(default)]
    pub new_user_only: bool,
    /// Usable at all.
    #[serde(default = "enabled")]
    pub active: bool,
    /// Admin note.
    #[serde(default)]
    pub note: String,
}

const fn unlimited() -> i64 {
    -1
}

const fn enabled() -> bool {
    true
}

impl NewCoupon {
    /// Static checks; the product group's existence is checked by the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] on the first violated rule.
    pub fn validate(&self) -> Result<(), ShopError> {
        if normalize_code(&self.code).is_empty() {
            return Err(ShopError::InvalidInput("coupon code is empty".to_string()));
        }
        if !(1..=1000).contains(&self.discount_permille) {
            return Err(ShopError::InvalidInput(
                "discount_permille must be within 1..=1000".to_string(),
            ));
        }
        if self.product_group_id <= 0 {
            return Err(ShopError::InvalidInput("product_group_id required".to_string()));
        }
        if self.total_limit < -1 || self.per_user_limit < -1 {
            return Err(ShopError::InvalidInput("limits must be >= -1".to_string()));
        }
        if let (Some(s), Some(e)) = (self.starts_at, self.ends_at) {
            if s > e {
                return Err(ShopError::InvalidInput("starts_at after ends_at".to_string()));
            }
        }
        Ok(())
    }
}

/// Usage record of a coupon by an order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct CouponRedemption {
    /// Row id.
    pub id: i64,
    /// Coupon used.
    pub coupon_id: i64,
    /// Order it was used on.
    pub order_id: i64,
    /// User who used it.
    pub user_id: i64,
    /// Redemption status.
    #[sqlx(try_from = "String")]
    pub status: RedemptionStatus,
    /// Total discount granted.
    pub discount_amount: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// One item to price under a coupon, with per-unit amounts broken down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteItem {
    /// Package.
    pub package_id: i64,
    /// Goods type.
    pub goods_type_id: i64,
    /// Region.
    pub region_id: i64,
    /// Plan group.
    pub plan_group_id: i64,
    /// Package price for the term.
    pub unit_base: i64,
    /// All addons for the term.
    pub unit_addon: i64,
    /// Core addon for the term.
    pub unit_addon_core: i64,
    /// Memory addon for the term.
    pub unit_addon_mem: i64,
    /// Disk addon for the term.
    pub unit_addon_disk: i64,
    /// Bandwidth addon for the term.
    pub unit_addon_bw: i64,
    /// Price of one unit.
    pub unit_total: i64,
    /// Units.
    pub qty: i64,
}

/// Amount of `item` a single rule would discount, or `None` if the rule
/// does not match.
#[must_use]
pub fn rule_discountable_amount(rule: &CouponProductRule, item: &QuoteItem) -> Option<i64> {
    let opt_eq = |want: i64, got: i64| want <= 0 || want == got;
    let amount = match rule.scope {
        CouponScope::All => item.unit_base,
        CouponScope::AllAddons => item.unit_addon,
        CouponScope::GoodsType => {
            if rule.goods_type_id <= 0 || rule.goods_type_id != item.goods_type_id {
                return None;
            }
            item.unit_total
        }
        CouponScope::GoodsTypeRegion => {
            if rule.goods_type_id != item.goods_type_id || rule.region_id != item.region_id {
                return None;
            }
            item.unit_total
        }
        CouponScope::PlanGroup => {
            if rule.plan_group_id <= 0
                || rule.plan_group_id != item.plan_group_id
                || !opt_eq(rule.goods_type_id, item.goods_type_id)
                || !opt_eq(rule.region_id, item.region_id)
            {
                return None;
            }
            item.unit_total
        }
        CouponScope::Package => {
            if rule.package_id <= 0
                || rule.package_id != item.package_id
                || !opt_eq(rule.plan_group_id, item.plan_group_id)
                || !opt_eq(rule.region_id, item.region_id)
                || !opt_eq(rule.goods_type_id, item.goods_type_id)
            {
                return None;
            }
            item.unit_total
        }
        CouponScope::AddonConfig => {
            if rule.plan_group_id <= 0
                || rule.plan_group_id != item.plan_group_id
                || !opt_eq(rule.region_id, item.region_id)
                || !opt_eq(rule.goods_type_id, item.goods_type_id)
            {
                return None;
            }
            let flags = [
                (rule.addon_core_enabled, item.unit_addon_core),
                (rule.addon_mem_enabled, item.unit_addon_mem),
                (rule.addon_disk_enabled, item.unit_addon_disk),
                (rule.addon_bw_enabled, item.unit_addon_bw),
            ];
            if flags.iter().any(|(on, _)| *on) {
                flags.iter().filter(|(on, _)| *on).map(|(_, v)| *v).sum()
            } else {
                item.unit_addon
            }
        }
    };
    (amount > 0).then_some(amount)
}

/// Discountable amount under the most specific matching rule.
#[must_use]
pub fn group_discountable_amount(rules: &[CouponProductRule], item: &QuoteItem) -> Option<i64> {
    rules
        .iter()
        .filter_map(|rule| {
            rule_discountable_amount(rule, item).map(|amount| (specificity(rule.scope), amount))
        })
        // first rule wins ties
        .fold(None, |best: Option<(i32, i64)>, cur| match best {
            Some(b) if b.0 >= cur.0 => Some(b),
            _ => Some(cur),
        })
        .map(|(_, amount)| amount)
}

/// Per-unit discount, clamped to `[0, unit_total]`.
#[must_use]
pub fn unit_discount(discountable: i64, permille: i64, unit_total: i64) -> i64 {
    apply_permille(discountable, permille).clamp(0, unit_total.max(0))
}

/// Per-item unit discounts and their quantity-weighted total.
#[must_use]
pub fn quote_discounts(
    rules: &[CouponProductRule],
    permille: i64,
    items: &[QuoteItem],
) -> (Vec<i64>, i64) {
    let mut total = 0_i64;
    let units = items
        .iter()
        .map(|item| {
            let disc = group_discountable_amount(rules, item)
                .map_or(0, |amount| unit_discount(amount, permille, item.unit_total));
            total = total.saturating_add(disc.saturating_mul(item.qty.max(1)));
            disc
        })
        .collect();
    (units, total)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn item() -> QuoteItem {
        QuoteItem {
            package_id: 10,
            goods_type_id: 1,
            region_id: 2,
            plan_group_id: 3,
            unit_base: 10000,
            unit_addon: 3000,
            unit_addon_core: 1000,
            unit_addon_mem: 2000,
            unit_total: 13000,
            qty: 1,
            ..QuoteItem::default()
        }
    }

    #[test]
    fn package_rule_beats_all_addons() {
        let rules = vec![CouponProductRule::scoped(CouponScope::AllAddons), CouponProductRule {
            package_id: 10,
            ..CouponProductRule::scoped(CouponScope::Package)
        }];
        let it = item();
        assert_eq!(group_discountable_amount(&rules, &it), Some(13000));
        assert_eq!(unit_discount(13000, 100, it.unit_total), 1300);
        let (units, total) = quote_discounts(&rules, 100, &[it]);
        assert_eq!(units, vec![1300]);
        assert_eq!(total, 1300);
    }

    #[test]
    fn package_rule_with_other_package_falls_back() {
        let rules = vec![CouponProductRule::scoped(CouponScope::AllAddons), CouponProductRule {
            package_id: 11,
            ..CouponProductRule::scoped(CouponScope::Package)
        }];
        assert_eq!(group_discountable_amount(&rules, &item()), Some(3000));
    }

    #[test]
    fn addon_config_sums_enabled_parts() {
        let mut rule = CouponProductRule {
            plan_group_id: 3,
            ..CouponProductRule::scoped(CouponScope::AddonConfig)
        };
        assert_eq!(rule_discountable_amount(&rule, &item()), Some(3000));
        rule.addon_mem_enabled = true;
        assert_eq!(rule_discountable_amount(&rule, &item()), Some(2000));
        rule.addon_mem_enabled = false;
        rule.addon_disk_enabled = true;
        assert_eq!(rule_discountable_amount(&rule, &item()), None);
    }

    #[test]
    fn goods_type_region_needs_both() {
        let rule = CouponProductRule {
            goods_type_id: 1,
            region_id: 9,
            ..CouponProductRule::scoped(CouponScope::GoodsTypeRegion)
        };
        assert_eq!(rule_discountable_amount(&rule, &item()), None);
    }

    #[test]
    fn full_discount_is_clamped_to_unit_total() {
        assert_eq!(unit_discount(13000, 1000, 13000), 13000);
        assert_eq!(unit_discount(20000, 1000, 13000), 13000);
    }

    #[test]
    fn rules_json_skips_empty_scope_and_rejects_unknown() {
        let Ok(rules) = parse_rules(r#"[{"scope":""},{"scope":"package","package_id":10}]"#) else {
            panic!("parse failed");
        };
        assert_eq!(rules.len(), 1);
        assert!(parse_rules(r#"[{"scope":"bogus"}]"#).is_err());
        assert!(parse_rules("not json").is_err());
    }

    #[test]
    fn rule_validation_requires_ids() {
        assert!(CouponProductRule::scoped(CouponScope::All).validate().is_ok());
        assert!(CouponProductRule::scoped(CouponScope::Package).validate().is_err());
        assert!(CouponProductRule::scoped(CouponScope::GoodsTypeRegion).validate().is_err());
        let ok = CouponProductRule {
            plan_group_id: 3,
            ..CouponProductRule::scoped(CouponScope::PlanGroup)
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn code_is_normalised() {
        assert_eq!(normalize_code("  spring10 "), "SPRING10");
    }
}
