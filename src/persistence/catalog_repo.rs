//! `CatalogStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::{CatalogStore, SqlStore, found};
use crate::domain::{BillingCycle, GoodsType, Package, PlanGroup, Region, SystemImage};
use crate::error::ShopResult;

/// Removes repeated ids, keeping first occurrences.
fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(ids.len());
    for id in ids {
        if *id > 0 && !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

macro_rules! impl_catalog_store {
    ($db:ty) => {
        #[async_trait]
        impl CatalogStore for SqlStore<$db> {
            async fn create_goods_type(&self, row: &GoodsType) -> ShopResult<GoodsType> {
                let out = sqlx::query_as(
                    "INSERT INTO goods_types (code, name, sort_order, active, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $5) RETURNING *",
                )
                .bind(&row.code)
                .bind(&row.name)
                .bind(row.sort_order)
                .bind(row.active)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(out)
            }

            async fn list_goods_types(&self) -> ShopResult<Vec<GoodsType>> {
                let rows = sqlx::query_as("SELECT * FROM goods_types ORDER BY sort_order, id")
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn create_region(&self, row: &Region) -> ShopResult<Region> {
                let out = sqlx::query_as(
                    "INSERT INTO regions (goods_type_id, code, name, active, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $5) RETURNING *",
                )
                .bind(row.goods_type_id)
                .bind(&row.code)
                .bind(&row.name)
                .bind(row.active)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(out)
            }

            async fn get_region(&self, id: i64) -> ShopResult<Region> {
                let row = sqlx::query_as("SELECT * FROM regions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "region", id)
            }

            async fn create_plan_group(&self, row: &PlanGroup) -> ShopResult<PlanGroup> {
                let out = sqlx::query_as(
                    "INSERT INTO plan_groups (goods_type_id, region_id, name, line_id, \
                     unit_core, unit_mem, unit_disk, unit_bw, \
                     add_core_min, add_core_max, add_core_step, add_mem_min, add_mem_max, add_mem_step, \
                     add_disk_min, add_disk_max, add_disk_step, add_bw_min, add_bw_max, add_bw_step, \
                     active, visible, sort_order, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22, $23, $24, $24) RETURNING *",
                )
                .bind(row.goods_type_id)
                .bind(row.region_id)
                .bind(&row.name)
                .bind(row.line_id)
                .bind(row.unit_core)
                .bind(row.unit_mem)
                .bind(row.unit_disk)
                .bind(row.unit_bw)
                .bind(row.add_core_min)
                .bind(row.add_core_max)
                .bind(row.add_core_step)
                .bind(row.add_mem_min)
                .bind(row.add_mem_max)
                .bind(row.add_mem_step)
                .bind(row.add_disk_min)
                .bind(row.add_disk_max)
                .bind(row.add_disk_step)
                .bind(row.add_bw_min)
                .bind(row.add_bw_max)
                .bind(row.add_bw_step)
                .bind(row.active)
                .bind(row.visible)
                .bind(row.sort_order)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(out)
            }

            async fn get_plan_group(&self, id: i64) -> ShopResult<PlanGroup> {
                let row = sqlx::query_as("SELECT * FROM plan_groups WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "plan group", id)
            }

            async fn list_plan_groups(&self) -> ShopResult<Vec<PlanGroup>> {
                let rows = sqlx::query_as("SELECT * FROM plan_groups ORDER BY sort_order, id")
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn create_package(&self, row: &Package) -> ShopResult<Package> {
                let out = sqlx::query_as(
                    "INSERT INTO packages (goods_type_id, plan_group_id, product_id, name, cores, \
                     memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price, active, visible, \
                     sort_order, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14) \
                     RETURNING *",
                )
                .bind(row.goods_type_id)
                .bind(row.plan_group_id)
                .bind(row.product_id)
                .bind(&row.name)
                .bind(row.cores)
                .bind(row.memory_gb)
                .bind(row.disk_gb)
                .bind(row.bandwidth_mbps)
                .bind(row.port_num)
                .bind(row.monthly_price)
                .bind(row.active)
                .bind(row.visible)
                .bind(row.sort_order)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(out)
            }

            async fn get_package(&self, id: i64) -> ShopResult<Package> {
                let row = sqlx::query_as("SELECT * FROM packages WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "package", id)
            }

            async fn list_packages(&self, plan_group_id: Option<i64>) -> ShopResult<Vec<Package>> {
                let rows = match plan_group_id {
                    Some(group) => {
                        sqlx::query_as(
                            "SELECT * FROM packages WHERE plan_group_id = $1 ORDER BY sort_order, id",
                        )
                        .bind(group)
                        .fetch_all(&self.pool)
                        .await?
                    }
                    None => {
                        sqlx::query_as("SELECT * FROM packages ORDER BY sort_order, id")
                            .fetch_all(&self.pool)
                            .await?
                    }
                };
                Ok(rows)
            }

            async fn create_system_image(&self, row: &SystemImage) -> ShopResult<SystemImage> {
                let out = sqlx::query_as(
                    "INSERT INTO system_images (image_id, name, image_type, enabled, created_at, \
                     updated_at) VALUES ($1, $2, $3, $4, $5, $5) RETURNING *",
                )
                .bind(row.image_id)
                .bind(&row.name)
                .bind(&row.image_type)
                .bind(row.enabled)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(out)
            }

            async fn get_system_image(&self, id: i64) -> ShopResult<SystemImage> {
                let row = sqlx::query_as("SELECT * FROM system_images WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "system image", id)
            }

            async fn set_line_system_images(&self, line_id: i64, image_ids: &[i64]) -> ShopResult<()> {
                let mut tx = self.pool.begin().await?;
                sqlx::query("DELETE FROM line_system_images WHERE line_id = $1")
                    .bind(line_id)
                    .execute(&mut *tx)
                    .await?;
                let now = Utc::now();
                for image_id in dedup_ids(image_ids) {
                    sqlx::query(
                        "INSERT INTO line_system_images (line_id, system_image_id, created_at) \
                         VALUES ($1, $2, $3)",
                    )
                    .bind(line_id)
                    .bind(image_id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                Ok(())
            }

            async fn list_line_system_images(&self, line_id: i64) -> ShopResult<Vec<i64>> {
                let ids = sqlx::query_scalar(
                    "SELECT system_image_id FROM line_system_images WHERE line_id = $1 ORDER BY id",
                )
                .bind(line_id)
                .fetch_all(&self.pool)
                .await?;
                Ok(ids)
            }

            async fn create_billing_cycle(&self, row: &BillingCycle) -> ShopResult<BillingCycle> {
                let out = sqlx::query_as(
                    "INSERT INTO billing_cycles (name, months, multiplier_permille, min_qty, max_qty, \
                     active, sort_order, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING *",
                )
                .bind(&row.name)
                .bind(row.months)
                .bind(row.multiplier_permille)
                .bind(row.min_qty)
                .bind(row.max_qty)
                .bind(row.active)
                .bind(row.sort_order)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(out)
            }

            async fn get_billing_cycle(&self, id: i64) -> ShopResult<BillingCycle> {
                let row = sqlx::query_as("SELECT * FROM billing_cycles WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "billing cycle", id)
            }

            async fn list_billing_cycles(&self) -> ShopResult<Vec<BillingCycle>> {
                let rows = sqlx::query_as("SELECT * FROM billing_cycles ORDER BY sort_order, id")
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }
        }
    };
}

impl_catalog_store!(sqlx::Sqlite);
impl_catalog_store!(sqlx::Postgres);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;

    #[test]
    fn dedup_keeps_first_positive_ids() {
        assert_eq!(dedup_ids(&[3, 1, 3, 0, -2, 1, 5]), vec![3, 1, 5]);
    }

    #[tokio::test]
    async fn line_images_are_replaced_and_deduplicated() {
        let store = test_support::store().await;
        let (group, _, image) = test_support::catalog(&store).await;
        let Ok(second) = store
            .create_system_image(&SystemImage {
                name: "ubuntu-24".to_string(),
                enabled: true,
                ..SystemImage::default()
            })
            .await
        else {
            panic!("create image failed");
        };

        let Ok(()) = store
            .set_line_system_images(group.line_id, &[second.id, image.id, second.id])
            .await
        else {
            panic!("set images failed");
        };
        let Ok(ids) = store.list_line_system_images(group.line_id).await else {
            panic!("list images failed");
        };
        assert_eq!(ids, vec![second.id, image.id]);

        let Ok(()) = store.set_line_system_images(group.line_id, &[]).await else {
            panic!("clear images failed");
        };
        let Ok(ids) = store.list_line_system_images(group.line_id).await else {
            panic!("list images failed");
        };
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn packages_filter_by_plan_group() {
        let store = test_support::store().await;
        let (group, package, _) = test_support::catalog(&store).await;
        let Ok(in_group) = store.list_packages(Some(group.id)).await else {
            panic!("list failed");
        };
        assert_eq!(in_group.len(), 1);
        assert_eq!(in_group.first().map(|p| p.id), Some(package.id));
        let Ok(none) = store.list_packages(Some(group.id + 100)).await else {
            panic!("list failed");
        };
        assert!(none.is_empty());
    }
}
