//! Coupon service: product groups, coupon administration, batch
//! generation and checkout quotes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::coupon::{normalize_code, quote_discounts};
use crate::domain::{
    Coupon, CouponProductGroup, NewCoupon, NewCouponProductGroup, QuoteItem, RedemptionStatus,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::EntityStore;

/// Alphabet for generated codes; no `I`, `O`, `0` or `1`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_BATCH: i64 = 5000;
const DEFAULT_CODE_LEN: usize = 8;
const MAX_CODE_LEN: usize = 32;

/// Batch generation request. Every coupon copies `template` except for
/// its code.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct GenerateCouponsRequest {
    /// Number of codes, 1..=5000.
    pub count: i64,
    /// Random part length; 0 means 8.
    #[serde(default)]
    pub length: usize,
    /// Fixed prefix, upper-cased.
    #[serde(default)]
    pub prefix: String,
    /// Shared coupon settings.
    pub template: NewCoupon,
}

/// Discount a coupon grants on a set of items.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CouponQuote {
    /// The coupon.
    pub coupon: Coupon,
    /// Discount per unit, aligned with the quoted items.
    pub unit_discounts: Vec<i64>,
    /// Quantity-weighted total.
    pub total_discount: i64,
}

/// Coupon administration and the checkout quote.
#[derive(Debug, Clone)]
pub struct CouponService {
    store: Arc<dyn EntityStore>,
}

impl CouponService {
    /// Creates a new `CouponService`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Creates a product group.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for an empty name or an invalid
    /// rule.
    pub async fn create_group(&self, group: &NewCouponProductGroup) -> ShopResult<CouponProductGroup> {
        if group.name.trim().is_empty() {
            return Err(ShopError::InvalidInput("group name is required".to_string()));
        }
        let row = self.store.create_coupon_group(group).await?;
        tracing::info!(group_id = row.id, "coupon group created");
        Ok(row)
    }

    /// Lists product groups.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_groups(&self) -> ShopResult<Vec<CouponProductGroup>> {
        self.store.list_coupon_groups().await
    }

    /// Deletes a product group.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown group.
    pub async fn delete_group(&self, id: i64) -> ShopResult<()> {
        self.store.delete_coupon_group(id).await
    }

    /// Creates one coupon.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for invalid fields,
    /// [`ShopError::NotFound`] for an unknown product group and a
    /// duplicate-key database error for a taken code.
    pub async fn create_coupon(&self, coupon: &NewCoupon) -> ShopResult<Coupon> {
        coupon.validate()?;
        self.store.get_coupon_group(coupon.product_group_id).await?;
        let normalized = NewCoupon {
            code: normalize_code(&coupon.code),
            ..coupon.clone()
        };
        let row = self.store.create_coupon(&normalized).await?;
        tracing::info!(coupon_id = row.id, code = %row.code, "coupon created");
        Ok(row)
    }

    /// Creates up to `count` coupons with random codes. Codes that collide
    /// with existing ones are skipped, so fewer may be returned.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a count or length out of
    /// range or an invalid template.
    pub async fn generate_batch(&self, req: &GenerateCouponsRequest) -> ShopResult<Vec<Coupon>> {
        if !(1..=MAX_BATCH).contains(&req.count) {
            return Err(ShopError::InvalidInput(format!("count must be within 1..={MAX_BATCH}")));
        }
        let length = if req.length == 0 { DEFAULT_CODE_LEN } else { req.length };
        if length > MAX_CODE_LEN {
            return Err(ShopError::InvalidInput(format!("length must be at most {MAX_CODE_LEN}")));
        }
        let prefix = normalize_code(&req.prefix);
        let codes: HashSet<String> = (0..req.count)
            .map(|_| format!("{prefix}{}", random_code(length)))
            .collect();

        let first = NewCoupon {
            code: prefix.clone() + "X",
            ..req.template.clone()
        };
        first.validate()?;
        self.store.get_coupon_group(req.template.product_group_id).await?;

        let mut created = Vec::with_capacity(codes.len());
        for code in codes {
            let coupon = NewCoupon {
                code,
                ..req.template.clone()
            };
            match self.store.create_coupon(&coupon).await {
                Ok(row) => created.push(row),
                Err(e) if e.is_unique_violation() => {
                    tracing::debug!(code = %coupon.code, "generated code collided");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(requested = req.count, created = created.len(), "coupon batch generated");
        Ok(created)
    }

    /// Lists coupons, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_coupons(&self, limit: i64, offset: i64) -> ShopResult<Vec<Coupon>> {
        self.store.list_coupons(limit, offset).await
    }

    /// Enables or disables a coupon.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown coupon.
    pub async fn set_active(&self, id: i64, active: bool) -> ShopResult<()> {
        self.store.set_coupon_active(id, active).await
    }

    /// Deletes a coupon.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown coupon.
    pub async fn delete_coupon(&self, id: i64) -> ShopResult<()> {
        self.store.delete_coupon(id).await
    }

    /// Prices `items` under `code` for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for an empty code,
    /// [`ShopError::NotFound`] for an unknown one and [`ShopError::Conflict`]
    /// when the coupon is inactive, out of its window, used up, limited to
    /// new users, or discounts nothing.
    pub async fn quote(
        &self,
        user_id: i64,
        code: &str,
        items: &[QuoteItem],
        now: DateTime<Utc>,
    ) -> ShopResult<CouponQuote> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ShopError::InvalidInput("coupon code is empty".to_string()));
        }
        let coupon = self.store.get_coupon_by_code(&code).await?;
        if !coupon.active {
            return Err(ShopError::Conflict(format!("coupon {code} is inactive")));
        }
        if !coupon.in_window(now) {
            return Err(ShopError::Conflict(format!("coupon {code} is not valid now")));
        }
        if coupon.total_limit >= 0 {
            let used = self
                .store
                .count_coupon_redemptions(coupon.id, None, RedemptionStatus::COUNTED)
                .await?;
            if used >= coupon.total_limit {
                return Err(ShopError::Conflict(format!("coupon {code} is used up")));
            }
        }
        if coupon.per_user_limit >= 0 {
            let used = self
                .store
                .count_coupon_redemptions(coupon.id, Some(user_id), RedemptionStatus::COUNTED)
                .await?;
            if used >= coupon.per_user_limit {
                return Err(ShopError::Conflict(format!(
                    "coupon {code} already used by this account"
                )));
            }
        }
        if coupon.new_user_only && self.store.count_successful_orders(user_id).await? > 0 {
            return Err(ShopError::Conflict(format!("coupon {code} is for new users only")));
        }
        let group = self.store.get_coupon_group(coupon.product_group_id).await?;
        let rules = group.rules()?;
        let (unit_discounts, total_discount) =
            quote_discounts(&rules, coupon.discount_permille, items);
        if total_discount <= 0 {
            return Err(ShopError::Conflict(format!(
                "coupon {code} does not apply to these items"
            )));
        }
        Ok(CouponQuote {
            coupon,
            unit_discounts,
            total_discount,
        })
    }
}

fn random_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .filter_map(|_| CODE_ALPHABET.get(rng.gen_range(0..CODE_ALPHABET.len())))
        .map(|b| char::from(*b))
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{CouponScope, NewOrder, OrderStatus};
    use crate::persistence::test_support;

    pub(crate) fn template(group_id: i64, permille: i64) -> NewCoupon {
        NewCoupon {
            code: String::new(),
            discount_permille: permille,
            product_group_id: group_id,
            total_limit: -1,
            per_user_limit: -1,
            starts_at: None,
            ends_at: None,
            new_user_only: false,
            active: true,
            note: String::new(),
        }
    }

    pub(crate) async fn all_group(store: &Arc<dyn EntityStore>) -> CouponProductGroup {
        let Ok(group) = store
            .create_coupon_group(&NewCouponProductGroup {
                name: "everything".to_string(),
                scope: Some(CouponScope::All),
                ..NewCouponProductGroup::default()
            })
            .await
        else {
            panic!("create group failed");
        };
        group
    }

    fn item(unit_total: i64, qty: i64) -> QuoteItem {
        QuoteItem {
            package_id: 1,
            goods_type_id: 1,
            unit_base: unit_total,
            unit_total,
            qty,
            ..QuoteItem::default()
        }
    }

    #[test]
    fn random_codes_use_alphabet() {
        let code = random_code(12);
        assert_eq!(code.len(), 12);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn quote_applies_permille_per_unit() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let group = all_group(&store).await;
        let coupons = CouponService::new(Arc::clone(&store));
        let Ok(_) = coupons
            .create_coupon(&NewCoupon {
                code: " save10 ".to_string(),
                ..template(group.id, 100)
            })
            .await
        else {
            panic!("create failed");
        };
        let Ok(quote) = coupons
            .quote(alice.id, "SAVE10", &[item(13000, 2)], Utc::now())
            .await
        else {
            panic!("quote failed");
        };
        assert_eq!(quote.unit_discounts, vec![1300]);
        assert_eq!(quote.total_discount, 2600);
    }

    #[tokio::test]
    async fn limits_and_windows_are_enforced() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let group = all_group(&store).await;
        let coupons = CouponService::new(Arc::clone(&store));
        let Ok(once) = coupons
            .create_coupon(&NewCoupon {
                code: "ONCE".to_string(),
                per_user_limit: 1,
                ..template(group.id, 500)
            })
            .await
        else {
            panic!("create failed");
        };
        let Ok(created) = store
            .create_order_with_items(
                &NewOrder::plain(alice.id, "ORD-X".to_string(), OrderStatus::PendingPayment, "CNY"),
                &[],
            )
            .await
        else {
            panic!("order failed");
        };
        tokio_test::assert_ok!(
            store
                .create_coupon_redemption(once.id, created.order.id, alice.id, 10)
                .await
        );
        let Err(ShopError::Conflict(_)) = coupons.quote(alice.id, "once", &[item(100, 1)], Utc::now()).await
        else {
            panic!("per-user limit ignored");
        };

        let Ok(_) = coupons
            .create_coupon(&NewCoupon {
                code: "LATER".to_string(),
                starts_at: Some(Utc::now() + chrono::Duration::days(1)),
                ..template(group.id, 500)
            })
            .await
        else {
            panic!("create failed");
        };
        let Err(ShopError::Conflict(_)) = coupons.quote(alice.id, "LATER", &[item(100, 1)], Utc::now()).await
        else {
            panic!("future coupon accepted");
        };
        let Err(ShopError::NotFound(_)) = coupons.quote(alice.id, "NOPE", &[item(100, 1)], Utc::now()).await
        else {
            panic!("unknown coupon accepted");
        };
    }

    #[tokio::test]
    async fn coupon_needs_existing_group() {
        let store = test_support::store().await;
        let coupons = CouponService::new(store);
        let Err(ShopError::NotFound(_)) = coupons
            .create_coupon(&NewCoupon {
                code: "X".to_string(),
                ..template(999, 100)
            })
            .await
        else {
            panic!("dangling group accepted");
        };
    }

    #[tokio::test]
    async fn batch_generation_bounds_and_prefix() {
        let store = test_support::store().await;
        let group = all_group(&store).await;
        let coupons = CouponService::new(Arc::clone(&store));
        let bad = GenerateCouponsRequest {
            count: 0,
            length: 0,
            prefix: String::new(),
            template: template(group.id, 100),
        };
        tokio_test::assert_err!(coupons.generate_batch(&bad).await);
        let too_long = GenerateCouponsRequest {
            count: 1,
            length: 33,
            ..bad.clone()
        };
        tokio_test::assert_err!(coupons.generate_batch(&too_long).await);

        let Ok(batch) = coupons
            .generate_batch(&GenerateCouponsRequest {
                count: 5,
                length: 6,
                prefix: "vip".to_string(),
                template: template(group.id, 100),
            })
            .await
        else {
            panic!("batch failed");
        };
        assert!(!batch.is_empty());
        for coupon in &batch {
            assert!(coupon.code.starts_with("VIP"));
            assert_eq!(coupon.code.len(), 9);
        }
    }
}
