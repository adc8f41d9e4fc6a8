//! `VpsStore` over SQL, including the status reconciliation composite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{SqlStore, VpsStore, found, touched};
use crate::domain::{
    ItemAction, NewVpsInstance, OrderItem, OrderItemStatus, VpsAdminStatus, VpsInstance,
    VpsReconciliation, VpsSnapshot, VpsStatus, VpsStatusClass,
};
use crate::error::ShopResult;

/// Item status implied by a VPS status, for create items still waiting.
fn item_status_for(item: &OrderItem, status: VpsStatus) -> Option<OrderItemStatus> {
    if item.action != ItemAction::Create
        || !matches!(item.status, OrderItemStatus::Approved | OrderItemStatus::Provisioning)
    {
        return None;
    }
    match status.class() {
        VpsStatusClass::Ready => Some(OrderItemStatus::Active),
        VpsStatusClass::Failed => Some(OrderItemStatus::Failed),
        VpsStatusClass::Transient => None,
    }
}

macro_rules! impl_vps_store {
    ($db:ty) => {
        #[async_trait]
        impl VpsStore for SqlStore<$db> {
            async fn create_instance(&self, vps: &NewVpsInstance) -> ShopResult<VpsInstance> {
                let snap = &vps.snapshot;
                let row = sqlx::query_as(
                    "INSERT INTO vps_instances (user_id, order_item_id, automation_instance_id, \
                     goods_type_id, name, region, region_id, line_id, package_id, package_name, cpu, \
                     memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price, spec_json, system_id, \
                     status, automation_state, admin_status, expire_at, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, 0, $20, $21, $22, $22) RETURNING *",
                )
                .bind(vps.user_id)
                .bind(vps.order_item_id)
                .bind(&vps.automation_instance_id)
                .bind(vps.goods_type_id)
                .bind(&vps.name)
                .bind(&vps.region)
                .bind(vps.region_id)
                .bind(vps.line_id)
                .bind(snap.package_id)
                .bind(&snap.package_name)
                .bind(snap.cpu)
                .bind(snap.memory_gb)
                .bind(snap.disk_gb)
                .bind(snap.bandwidth_mbps)
                .bind(snap.port_num)
                .bind(snap.monthly_price)
                .bind(&snap.spec_json)
                .bind(vps.system_id)
                .bind(vps.status.as_str())
                .bind(VpsAdminStatus::Normal.as_str())
                .bind(vps.expire_at)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn get_instance(&self, id: i64) -> ShopResult<VpsInstance> {
                let row = sqlx::query_as("SELECT * FROM vps_instances WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "vps", id)
            }

            async fn get_instance_by_order_item(&self, item_id: i64) -> ShopResult<Option<VpsInstance>> {
                let row = sqlx::query_as(
                    "SELECT * FROM vps_instances WHERE order_item_id = $1 ORDER BY id LIMIT 1",
                )
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_instances(
                &self,
                user_id: Option<i64>,
                limit: i64,
                offset: i64,
            ) -> ShopResult<Vec<VpsInstance>> {
                let rows = match user_id {
                    Some(user_id) => {
                        sqlx::query_as(
                            "SELECT * FROM vps_instances WHERE user_id = $1 ORDER BY id DESC \
                             LIMIT $2 OFFSET $3",
                        )
                        .bind(user_id)
                        .bind(limit)
                        .bind(offset)
                        .fetch_all(&self.pool)
                        .await?
                    }
                    None => {
                        sqlx::query_as("SELECT * FROM vps_instances ORDER BY id DESC LIMIT $1 OFFSET $2")
                            .bind(limit)
                            .bind(offset)
                            .fetch_all(&self.pool)
                            .await?
                    }
                };
                Ok(rows)
            }

            async fn update_instance_status(
                &self,
                id: i64,
                status: VpsStatus,
                automation_state: i64,
            ) -> ShopResult<VpsReconciliation> {
                let mut tx = self.pool.begin().await?;
                let done = sqlx::query(
                    "UPDATE vps_instances SET status = $1, automation_state = $2, updated_at = $3 \
                     WHERE id = $4",
                )
                .bind(status.as_str())
                .bind(automation_state)
                .bind(Utc::now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                touched(done.rows_affected(), "vps", id)?;
                let instance: VpsInstance = sqlx::query_as("SELECT * FROM vps_instances WHERE id = $1")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;

                let mut item_status = None;
                let mut order_event = None;
                if instance.order_item_id > 0 {
                    let item: Option<OrderItem> = sqlx::query_as("SELECT * FROM order_items WHERE id = $1")
                        .bind(instance.order_item_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                    if let Some(item) = item {
                        if let Some(next) = item_status_for(&item, status) {
                            sqlx::query("UPDATE order_items SET status = $1, updated_at = $2 WHERE id = $3")
                                .bind(next.as_str())
                                .bind(Utc::now())
                                .bind(item.id)
                                .execute(&mut *tx)
                                .await?;
                            item_status = Some(next);
                        }
                        if item.action == ItemAction::Create {
                            order_event = Self::recompute_order_status_tx(&mut tx, item.order_id)
                                .await?
                                .map(|outcome| outcome.event);
                        }
                    }
                }
                tx.commit().await?;
                Ok(VpsReconciliation {
                    instance,
                    item_status,
                    order_event,
                })
            }

            async fn update_instance_expire_at(
                &self,
                id: i64,
                expire_at: Option<DateTime<Utc>>,
            ) -> ShopResult<()> {
                let done =
                    sqlx::query("UPDATE vps_instances SET expire_at = $1, updated_at = $2 WHERE id = $3")
                        .bind(expire_at)
                        .bind(Utc::now())
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                touched(done.rows_affected(), "vps", id)
            }

            async fn update_instance_snapshot(&self, id: i64, snapshot: &VpsSnapshot) -> ShopResult<()> {
                let done = sqlx::query(
                    "UPDATE vps_instances SET package_id = $1, package_name = $2, cpu = $3, \
                     memory_gb = $4, disk_gb = $5, bandwidth_mbps = $6, port_num = $7, \
                     monthly_price = $8, spec_json = $9, updated_at = $10 WHERE id = $11",
                )
                .bind(snapshot.package_id)
                .bind(&snapshot.package_name)
                .bind(snapshot.cpu)
                .bind(snapshot.memory_gb)
                .bind(snapshot.disk_gb)
                .bind(snapshot.bandwidth_mbps)
                .bind(snapshot.port_num)
                .bind(snapshot.monthly_price)
                .bind(&snapshot.spec_json)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
                touched(done.rows_affected(), "vps", id)
            }

            async fn update_instance_emergency_renew_at(
                &self,
                id: i64,
                at: DateTime<Utc>,
            ) -> ShopResult<()> {
                let done = sqlx::query(
                    "UPDATE vps_instances SET last_emergency_renew_at = $1, updated_at = $2 WHERE id = $3",
                )
                .bind(at)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
                touched(done.rows_affected(), "vps", id)
            }

            async fn update_instance_admin_status(
                &self,
                id: i64,
                status: VpsAdminStatus,
            ) -> ShopResult<()> {
                let done =
                    sqlx::query("UPDATE vps_instances SET admin_status = $1, updated_at = $2 WHERE id = $3")
                        .bind(status.as_str())
                        .bind(Utc::now())
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                touched(done.rows_affected(), "vps", id)
            }

            async fn update_instance_access(
                &self,
                id: i64,
                panel_url: Option<&str>,
                access_info_json: Option<&str>,
            ) -> ShopResult<()> {
                let done = sqlx::query(
                    "UPDATE vps_instances SET panel_url_cache = COALESCE($1, panel_url_cache), \
                     access_info_json = COALESCE($2, access_info_json), updated_at = $3 WHERE id = $4",
                )
                .bind(panel_url)
                .bind(access_info_json)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
                touched(done.rows_affected(), "vps", id)
            }

            async fn delete_instance(&self, id: i64) -> ShopResult<()> {
                let done = sqlx::query("DELETE FROM vps_instances WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "vps", id)
            }

            async fn list_instances_expiring(&self, before: DateTime<Utc>) -> ShopResult<Vec<VpsInstance>> {
                let rows = sqlx::query_as(
                    "SELECT * FROM vps_instances WHERE expire_at IS NOT NULL AND expire_at <= $1 \
                     ORDER BY expire_at, id",
                )
                .bind(before)
                .fetch_all(&self.pool)
                .await?;
                Ok(rows)
            }
        }
    };
}

impl_vps_store!(sqlx::Sqlite);
impl_vps_store!(sqlx::Postgres);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::OrderStatus;
    use crate::persistence::test_support;

    #[tokio::test]
    async fn running_vps_activates_item_and_order() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Provisioning,
            OrderItemStatus::Provisioning,
            99_900,
            None,
        )
        .await;

        let Ok(first) = store.update_instance_status(vps.id, VpsStatus::Running, 2).await else {
            panic!("status update failed");
        };
        assert_eq!(first.instance.status, VpsStatus::Running);
        assert_eq!(first.instance.automation_state, 2);
        assert_eq!(first.item_status, Some(OrderItemStatus::Active));
        let Some(event) = first.order_event else {
            panic!("order did not transition");
        };
        assert_eq!(event.event_type, "active");

        let Ok(item) = store.get_order_item(vps.order_item_id).await else {
            panic!("item missing");
        };
        assert_eq!(item.status, OrderItemStatus::Active);
        let Ok(order) = store.get_order(item.order_id).await else {
            panic!("order missing");
        };
        assert_eq!(order.status, OrderStatus::Active);

        // replay changes nothing but the timestamp
        let Ok(again) = store.update_instance_status(vps.id, VpsStatus::Running, 2).await else {
            panic!("replay failed");
        };
        assert_eq!(again.item_status, None);
        assert!(again.order_event.is_none());
        assert!(again.instance.updated_at >= first.instance.updated_at);
    }

    #[tokio::test]
    async fn failed_vps_fails_order() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Provisioning,
            OrderItemStatus::Provisioning,
            99_900,
            None,
        )
        .await;
        let Ok(rec) = store.update_instance_status(vps.id, VpsStatus::ReinstallFailed, 5).await else {
            panic!("status update failed");
        };
        assert_eq!(rec.item_status, Some(OrderItemStatus::Failed));
        assert_eq!(rec.order_event.map(|e| e.event_type), Some("failed".to_string()));
    }

    #[tokio::test]
    async fn canceled_order_is_never_downgraded() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Canceled,
            OrderItemStatus::Provisioning,
            99_900,
            None,
        )
        .await;
        let Ok(rec) = store.update_instance_status(vps.id, VpsStatus::Running, 2).await else {
            panic!("status update failed");
        };
        assert!(rec.order_event.is_none());
        let Ok(item) = store.get_order_item(vps.order_item_id).await else {
            panic!("item missing");
        };
        let Ok(order) = store.get_order(item.order_id).await else {
            panic!("order missing");
        };
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn transient_status_leaves_item_alone() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Provisioning,
            OrderItemStatus::Provisioning,
            99_900,
            None,
        )
        .await;
        let Ok(rec) = store.update_instance_status(vps.id, VpsStatus::Provisioning, 13).await else {
            panic!("status update failed");
        };
        assert_eq!(rec.item_status, None);
        assert!(rec.order_event.is_none());
    }

    #[tokio::test]
    async fn expiring_includes_exact_now() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let now = Utc::now();
        let due = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            1,
            Some(now),
        )
        .await;
        let _later = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            1,
            Some(now + Duration::days(3)),
        )
        .await;
        let Ok(rows) = store.list_instances_expiring(now).await else {
            panic!("list failed");
        };
        assert_eq!(rows.iter().map(|v| v.id).collect::<Vec<_>>(), vec![due.id]);
    }

    #[tokio::test]
    async fn expiring_keeps_locked_instances() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let now = Utc::now();
        let locked = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            1,
            Some(now - Duration::days(2)),
        )
        .await;
        let Ok(_) = store
            .update_instance_status(locked.id, VpsStatus::ExpiredLocked, 2)
            .await
        else {
            panic!("lock failed");
        };
        let fresh = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            1,
            Some(now - Duration::days(1)),
        )
        .await;
        let Ok(rows) = store.list_instances_expiring(now).await else {
            panic!("list failed");
        };
        assert_eq!(rows.iter().map(|v| v.id).collect::<Vec<_>>(), vec![locked.id, fresh.id]);
    }

    #[tokio::test]
    async fn access_update_keeps_missing_fields() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            1,
            None,
        )
        .await;
        let Ok(()) = store
            .update_instance_access(vps.id, Some("https://panel/1"), Some(r#"{"user":"root"}"#))
            .await
        else {
            panic!("access update failed");
        };
        let Ok(()) = store.update_instance_access(vps.id, None, Some("{}")).await else {
            panic!("access update failed");
        };
        let Ok(reloaded) = store.get_instance(vps.id).await else {
            panic!("reload failed");
        };
        assert_eq!(reloaded.panel_url_cache.as_deref(), Some("https://panel/1"));
        assert_eq!(reloaded.access_info_json.as_deref(), Some("{}"));
    }
}
