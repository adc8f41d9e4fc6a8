//! `CouponStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::tx::quoted;
use super::{CouponStore, SqlStore, found, touched};
use crate::domain::{
    Coupon, CouponProductGroup, CouponRedemption, CouponScope, NewCoupon, NewCouponProductGroup,
    RedemptionStatus,
};
use crate::domain::coupon::normalize_code;
use crate::error::ShopResult;

/// Validates the rules and renders the stored `(scope, rules_json)` pair.
///
/// An empty rule list is stored as an empty string so the legacy columns
/// stay authoritative.
fn stored_rules(group: &NewCouponProductGroup) -> ShopResult<(CouponScope, String)> {
    for rule in &group.rules {
        rule.validate()?;
    }
    let scope = group
        .scope
        .or_else(|| group.rules.first().map(|r| r.scope))
        .unwrap_or(CouponScope::All);
    let json = if group.rules.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&group.rules)?
    };
    Ok((scope, json))
}

macro_rules! impl_coupon_store {
    ($db:ty) => {
        #[async_trait]
        impl CouponStore for SqlStore<$db> {
            async fn create_coupon_group(
                &self,
                group: &NewCouponProductGroup,
            ) -> ShopResult<CouponProductGroup> {
                let (scope, rules_json) = stored_rules(group)?;
                let row = sqlx::query_as(
                    "INSERT INTO coupon_product_groups (name, scope, rules_json, goods_type_id, \
                     region_id, plan_group_id, package_id, addon_core, addon_mem_gb, addon_disk_gb, \
                     addon_bw_mbps, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12) RETURNING *",
                )
                .bind(group.name.trim())
                .bind(scope.as_str())
                .bind(rules_json)
                .bind(group.goods_type_id)
                .bind(group.region_id)
                .bind(group.plan_group_id)
                .bind(group.package_id)
                .bind(group.addon_core)
                .bind(group.addon_mem_gb)
                .bind(group.addon_disk_gb)
                .bind(group.addon_bw_mbps)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn get_coupon_group(&self, id: i64) -> ShopResult<CouponProductGroup> {
                let row = sqlx::query_as("SELECT * FROM coupon_product_groups WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "coupon product group", id)
            }

            async fn list_coupon_groups(&self) -> ShopResult<Vec<CouponProductGroup>> {
                let rows = sqlx::query_as("SELECT * FROM coupon_product_groups ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn delete_coupon_group(&self, id: i64) -> ShopResult<()> {
                let done = sqlx::query("DELETE FROM coupon_product_groups WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "coupon product group", id)
            }

            async fn create_coupon(&self, coupon: &NewCoupon) -> ShopResult<Coupon> {
                let row = sqlx::query_as(
                    "INSERT INTO coupons (code, discount_permille, product_group_id, total_limit, \
                     per_user_limit, starts_at, ends_at, new_user_only, active, note, created_at, \
                     updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) RETURNING *",
                )
                .bind(normalize_code(&coupon.code))
                .bind(coupon.discount_permille)
                .bind(coupon.product_group_id)
                .bind(coupon.total_limit)
                .bind(coupon.per_user_limit)
                .bind(coupon.starts_at)
                .bind(coupon.ends_at)
                .bind(coupon.new_user_only)
                .bind(coupon.active)
                .bind(&coupon.note)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn get_coupon(&self, id: i64) -> ShopResult<Coupon> {
                let row = sqlx::query_as("SELECT * FROM coupons WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "coupon", id)
            }

            async fn get_coupon_by_code(&self, code: &str) -> ShopResult<Coupon> {
                let code = normalize_code(code);
                let row = sqlx::query_as("SELECT * FROM coupons WHERE code = $1")
                    .bind(&code)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "coupon", code)
            }

            async fn list_coupons(&self, limit: i64, offset: i64) -> ShopResult<Vec<Coupon>> {
                let rows = sqlx::query_as("SELECT * FROM coupons ORDER BY id DESC LIMIT $1 OFFSET $2")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn set_coupon_active(&self, id: i64, active: bool) -> ShopResult<()> {
                let done = sqlx::query("UPDATE coupons SET active = $1, updated_at = $2 WHERE id = $3")
                    .bind(active)
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "coupon", id)
            }

            async fn delete_coupon(&self, id: i64) -> ShopResult<()> {
                let done = sqlx::query("DELETE FROM coupons WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "coupon", id)
            }

            async fn count_coupon_redemptions(
                &self,
                coupon_id: i64,
                user_id: Option<i64>,
                statuses: &[RedemptionStatus],
            ) -> ShopResult<i64> {
                if statuses.is_empty() {
                    return Ok(0);
                }
                let in_list = quoted(statuses.iter().map(|s| s.as_str()));
                let n: i64 = match user_id {
                    Some(user_id) => {
                        let sql = format!(
                            "SELECT COUNT(*) FROM coupon_redemptions \
                             WHERE coupon_id = $1 AND user_id = $2 AND status IN ({in_list})"
                        );
                        sqlx::query_scalar(&sql)
                            .bind(coupon_id)
                            .bind(user_id)
                            .fetch_one(&self.pool)
                            .await?
                    }
                    None => {
                        let sql = format!(
                            "SELECT COUNT(*) FROM coupon_redemptions \
                             WHERE coupon_id = $1 AND status IN ({in_list})"
                        );
                        sqlx::query_scalar(&sql)
                            .bind(coupon_id)
                            .fetch_one(&self.pool)
                            .await?
                    }
                };
                Ok(n)
            }

            async fn create_coupon_redemption(
                &self,
                coupon_id: i64,
                order_id: i64,
                user_id: i64,
                discount_amount: i64,
            ) -> ShopResult<CouponRedemption> {
                let row = sqlx::query_as(
                    "INSERT INTO coupon_redemptions (coupon_id, order_id, user_id, status, \
                     discount_amount, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $6) \
                     RETURNING *",
                )
                .bind(coupon_id)
                .bind(order_id)
                .bind(user_id)
                .bind(RedemptionStatus::Applied.as_str())
                .bind(discount_amount)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn update_redemptions_for_order(
                &self,
                order_id: i64,
                from: RedemptionStatus,
                to: RedemptionStatus,
            ) -> ShopResult<u64> {
                let done = sqlx::query(
                    "UPDATE coupon_redemptions SET status = $1, updated_at = $2 \
                     WHERE order_id = $3 AND status = $4",
                )
                .bind(to.as_str())
                .bind(Utc::now())
                .bind(order_id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;
                Ok(done.rows_affected())
            }

            async fn list_redemptions_for_order(&self, order_id: i64) -> ShopResult<Vec<CouponRedemption>> {
                let rows = sqlx::query_as("SELECT * FROM coupon_redemptions WHERE order_id = $1 ORDER BY id")
                    .bind(order_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }
        }
    };
}

impl_coupon_store!(sqlx::Sqlite);
impl_coupon_store!(sqlx::Postgres);
