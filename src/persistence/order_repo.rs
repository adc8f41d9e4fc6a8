//! `OrderStore` and `EventStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::tx::quoted;
use super::{
    EventStore, OrderCreated, OrderFilter, OrderStore, OrderTransitionCmd, ResizeApproval, SqlStore,
    TransitionOutcome, found, touched,
};
use crate::domain::spec::spec_vps_id;
use crate::domain::{
    ItemAction, NewOrder, NewOrderItem, NewResizeTask, Order, OrderEvent, OrderItem,
    OrderItemStatus, OrderStatus, OrderTransition,
};
use crate::error::{ShopError, ShopResult};

/// `Σ amount × qty` over the items.
fn order_total(items: &[NewOrderItem]) -> ShopResult<i64> {
    items.iter().try_fold(0i64, |acc, item| {
        item.amount
            .checked_mul(item.qty)
            .and_then(|line| acc.checked_add(line))
            .ok_or_else(|| ShopError::InvalidInput("order total overflows".to_string()))
    })
}

/// Substring prefilters for a `vps_id` inside stored JSON, compact and
/// pretty-printed.
fn vps_id_patterns(vps_id: i64) -> (String, String) {
    (
        format!("%\"vps_id\":{vps_id}%"),
        format!("%\"vps_id\": {vps_id}%"),
    )
}

macro_rules! impl_order_store {
    ($db:ty) => {
        impl SqlStore<$db> {
            async fn insert_order_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                order: &NewOrder,
                items: &[NewOrderItem],
            ) -> ShopResult<OrderCreated> {
                let total = order_total(items)?;
                let now = Utc::now();
                let row: Order = sqlx::query_as(
                    "INSERT INTO orders (user_id, order_no, status, total_amount, currency, \
                     idempotency_key, coupon_id, coupon_code, coupon_discount, pending_reason, \
                     rejected_reason, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, '', $11, $11) RETURNING *",
                )
                .bind(order.user_id)
                .bind(&order.order_no)
                .bind(order.status.as_str())
                .bind(total)
                .bind(&order.currency)
                .bind(order.idempotency_key.as_deref())
                .bind(order.coupon_id)
                .bind(&order.coupon_code)
                .bind(order.coupon_discount)
                .bind(&order.pending_reason)
                .bind(now)
                .fetch_one(&mut **tx)
                .await?;

                let mut inserted = Vec::with_capacity(items.len());
                for item in items {
                    let item_row: OrderItem = sqlx::query_as(
                        "INSERT INTO order_items (order_id, package_id, system_id, spec_json, qty, \
                         amount, status, goods_type_id, action, duration_months, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) RETURNING *",
                    )
                    .bind(row.id)
                    .bind(item.package_id)
                    .bind(item.system_id)
                    .bind(item.spec.to_json()?)
                    .bind(item.qty)
                    .bind(item.amount)
                    .bind(item.status.as_str())
                    .bind(item.goods_type_id)
                    .bind(item.spec.action().as_str())
                    .bind(item.duration_months)
                    .bind(now)
                    .fetch_one(&mut **tx)
                    .await?;
                    inserted.push(item_row);
                }

                let data = serde_json::json!({
                    "order_no": row.order_no,
                    "status": row.status.as_str(),
                    "total_amount": total,
                    "items": inserted.len(),
                });
                let event =
                    Self::append_event_tx(tx, row.id, OrderTransition::Created.as_str(), &data).await?;
                Ok(OrderCreated {
                    order: row,
                    items: inserted,
                    event,
                })
            }
        }

        #[async_trait]
        impl OrderStore for SqlStore<$db> {
            async fn create_order_from_cart(
                &self,
                order: &NewOrder,
                items: &[NewOrderItem],
            ) -> ShopResult<OrderCreated> {
                let mut tx = self.pool.begin().await?;
                let created = Self::insert_order_tx(&mut tx, order, items).await?;
                sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
                    .bind(order.user_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(created)
            }

            async fn create_order_with_items(
                &self,
                order: &NewOrder,
                items: &[NewOrderItem],
            ) -> ShopResult<OrderCreated> {
                let mut tx = self.pool.begin().await?;
                let created = Self::insert_order_tx(&mut tx, order, items).await?;
                tx.commit().await?;
                Ok(created)
            }

            async fn get_order(&self, id: i64) -> ShopResult<Order> {
                let row = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "order", id)
            }

            async fn get_order_by_no(&self, order_no: &str) -> ShopResult<Order> {
                let row = sqlx::query_as("SELECT * FROM orders WHERE order_no = $1")
                    .bind(order_no)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "order", order_no)
            }

            async fn get_order_by_idempotency_key(
                &self,
                user_id: i64,
                key: &str,
            ) -> ShopResult<Option<Order>> {
                let row = sqlx::query_as(
                    "SELECT * FROM orders WHERE user_id = $1 AND idempotency_key = $2",
                )
                .bind(user_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_orders(
                &self,
                filter: &OrderFilter,
                limit: i64,
                offset: i64,
            ) -> ShopResult<Vec<Order>> {
                let mut clauses = Vec::new();
                let mut next = 1;
                if filter.user_id.is_some() {
                    clauses.push(format!("user_id = ${next}"));
                    next += 1;
                }
                if filter.status.is_some() {
                    clauses.push(format!("status = ${next}"));
                    next += 1;
                }
                let where_sql = if clauses.is_empty() {
                    String::new()
                } else {
                    format!(" WHERE {}", clauses.join(" AND "))
                };
                let sql = format!(
                    "SELECT * FROM orders{where_sql} ORDER BY id DESC LIMIT ${next} OFFSET ${}",
                    next + 1
                );
                let mut query = sqlx::query_as::<_, Order>(&sql);
                if let Some(user_id) = filter.user_id {
                    query = query.bind(user_id);
                }
                if let Some(status) = filter.status {
                    query = query.bind(status.as_str());
                }
                let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
                Ok(rows)
            }

            async fn list_order_items(&self, order_id: i64) -> ShopResult<Vec<OrderItem>> {
                let rows = sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
                    .bind(order_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn get_order_item(&self, id: i64) -> ShopResult<OrderItem> {
                let row = sqlx::query_as("SELECT * FROM order_items WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "order item", id)
            }

            async fn delete_order(&self, id: i64) -> ShopResult<()> {
                let mut tx = self.pool.begin().await?;
                Self::lock_order(&mut tx, id).await?;
                let owned_items = "SELECT id FROM order_items WHERE order_id = $1";
                let statements = [
                    format!("DELETE FROM vps_instances WHERE order_item_id IN ({owned_items})"),
                    format!(
                        "DELETE FROM provision_jobs WHERE order_id = $1 OR order_item_id IN ({owned_items})"
                    ),
                    "DELETE FROM resize_tasks WHERE order_id = $1".to_string(),
                    "DELETE FROM automation_logs WHERE order_id = $1".to_string(),
                    "DELETE FROM order_events WHERE order_id = $1".to_string(),
                    "DELETE FROM order_payments WHERE order_id = $1".to_string(),
                    "DELETE FROM coupon_redemptions WHERE order_id = $1".to_string(),
                    "DELETE FROM order_items WHERE order_id = $1".to_string(),
                    "DELETE FROM orders WHERE id = $1".to_string(),
                ];
                for sql in &statements {
                    sqlx::query(sql).bind(id).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                tracing::info!(order_id = id, "order deleted with dependents");
                Ok(())
            }

            async fn has_pending_action_order(&self, user_id: i64, vps_id: i64) -> ShopResult<bool> {
                let sql = format!(
                    "SELECT oi.spec_json FROM order_items oi JOIN orders o ON o.id = oi.order_id \
                     WHERE o.user_id = $1 AND oi.action IN ({}) AND o.status IN ({}) \
                     AND (oi.spec_json LIKE $2 OR oi.spec_json LIKE $3)",
                    quoted(ItemAction::VPS_ACTIONS.iter().map(|a| a.as_str())),
                    quoted(OrderStatus::IN_PROGRESS.iter().map(|s| s.as_str())),
                );
                let (compact, spaced) = vps_id_patterns(vps_id);
                let specs: Vec<String> = sqlx::query_scalar(&sql)
                    .bind(user_id)
                    .bind(compact)
                    .bind(spaced)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(specs.iter().any(|raw| spec_vps_id(raw) == Some(vps_id)))
            }

            async fn transition_order(&self, cmd: &OrderTransitionCmd) -> ShopResult<TransitionOutcome> {
                let mut tx = self.pool.begin().await?;
                let outcome = Self::transition_tx(&mut tx, cmd).await?;
                tx.commit().await?;
                Ok(outcome)
            }

            async fn approve_resize_order_with_tasks(
                &self,
                cmd: &OrderTransitionCmd,
                tasks: &[NewResizeTask],
            ) -> ShopResult<ResizeApproval> {
                let cmd = cmd.clone().with_resize_tasks(tasks.to_vec());
                let mut tx = self.pool.begin().await?;
                let (outcome, inserted) = Self::transition_with_tasks_tx(&mut tx, &cmd).await?;
                tx.commit().await?;
                Ok(ResizeApproval {
                    order: outcome.order,
                    event: outcome.event,
                    tasks: inserted,
                })
            }

            async fn update_order_item_status(&self, id: i64, status: OrderItemStatus) -> ShopResult<()> {
                let done =
                    sqlx::query("UPDATE order_items SET status = $1, updated_at = $2 WHERE id = $3")
                        .bind(status.as_str())
                        .bind(Utc::now())
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                touched(done.rows_affected(), "order item", id)
            }

            async fn set_order_item_automation_id(&self, id: i64, instance_id: &str) -> ShopResult<()> {
                let done = sqlx::query(
                    "UPDATE order_items SET automation_instance_id = $1, updated_at = $2 WHERE id = $3",
                )
                .bind(instance_id)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
                touched(done.rows_affected(), "order item", id)
            }

            async fn recompute_order_status(&self, order_id: i64) -> ShopResult<Option<TransitionOutcome>> {
                let mut tx = self.pool.begin().await?;
                let outcome = Self::recompute_order_status_tx(&mut tx, order_id).await?;
                tx.commit().await?;
                Ok(outcome)
            }

            async fn count_successful_orders(&self, user_id: i64) -> ShopResult<i64> {
                let sql = format!(
                    "SELECT COUNT(*) FROM orders WHERE user_id = $1 AND status IN ({})",
                    quoted(OrderStatus::SUCCESSFUL.iter().map(|s| s.as_str()))
                );
                let n: i64 = sqlx::query_scalar(&sql)
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(n)
            }
        }

        #[async_trait]
        impl EventStore for SqlStore<$db> {
            async fn append_event(
                &self,
                order_id: i64,
                event_type: &str,
                data: &serde_json::Value,
            ) -> ShopResult<OrderEvent> {
                let mut tx = self.pool.begin().await?;
                Self::lock_order(&mut tx, order_id).await?;
                let event = Self::append_event_tx(&mut tx, order_id, event_type, data).await?;
                tx.commit().await?;
                Ok(event)
            }

            async fn list_events(&self, order_id: i64) -> ShopResult<Vec<OrderEvent>> {
                let rows = sqlx::query_as("SELECT * FROM order_events WHERE order_id = $1 ORDER BY seq")
                    .bind(order_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }
        }
    };
}

impl_order_store!(sqlx::Sqlite);
impl_order_store!(sqlx::Postgres);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{
        CartSpec, CreateSpec, NewCartItem, OrderItemSpec, RenewSpec, ResizeSpec,
    };
    use crate::persistence::{EntityStore, PaymentReview, test_support};
    use std::sync::Arc;

    fn create_item(amount: i64) -> NewOrderItem {
        let spec = OrderItemSpec::Create(CreateSpec {
            cart: CartSpec {
                duration_months: 1,
                ..CartSpec::default()
            },
            plan_group_id: 1,
            region_id: 1,
            line_id: 7,
        });
        NewOrderItem {
            package_id: Some(10),
            system_id: Some(1),
            ..NewOrderItem::for_vps(spec, amount, 1, 1)
        }
    }

    fn resize_item(vps_id: i64) -> NewOrderItem {
        let spec = OrderItemSpec::Resize(ResizeSpec {
            vps_id,
            spec: CartSpec::default(),
            target_package_id: 11,
            target_cpu: 4,
            target_mem_gb: 8,
            target_disk_gb: 80,
            target_bw_mbps: 10,
            target_monthly: 150_000,
            current_monthly: 99_900,
            charge_amount: 0,
            scheduled_at: None,
        });
        NewOrderItem::for_vps(spec, 0, 1, 0)
    }

    async fn order_with(
        store: &Arc<dyn EntityStore>,
        user_id: i64,
        status: OrderStatus,
        items: &[NewOrderItem],
    ) -> OrderCreated {
        let order = NewOrder::plain(
            user_id,
            format!("T-{}", uuid::Uuid::new_v4().simple()),
            status,
            "CNY",
        );
        let Ok(created) = store.create_order_with_items(&order, items).await else {
            panic!("create order failed");
        };
        created
    }

    #[tokio::test]
    async fn checkout_clears_cart_and_records_created_event() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let Ok(_) = store
            .add_cart_item(&NewCartItem {
                user_id: alice.id,
                package_id: 10,
                system_id: 1,
                spec_json: r#"{"duration_months":1}"#.to_string(),
                qty: 1,
                amount: 99_900,
            })
            .await
        else {
            panic!("add cart failed");
        };

        let order = NewOrder::plain(alice.id, "ORD-1".to_string(), OrderStatus::PendingPayment, "CNY");
        let Ok(created) = store.create_order_from_cart(&order, &[create_item(99_900)]).await else {
            panic!("checkout failed");
        };
        assert_eq!(created.order.total_amount, 99_900);
        assert_eq!(created.order.status, OrderStatus::PendingPayment);
        assert_eq!(created.items.len(), 1);
        assert_eq!(created.event.seq, 1);
        assert_eq!(created.event.event_type, "created");

        let Ok(cart) = store.list_cart_items(alice.id).await else {
            panic!("list cart failed");
        };
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn total_is_amount_times_qty() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let mut double = create_item(500);
        double.qty = 2;
        let created = order_with(&store, alice.id, OrderStatus::PendingPayment, &[double, create_item(300)]).await;
        assert_eq!(created.order.total_amount, 1300);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_collides() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let mut order = NewOrder::plain(alice.id, "ORD-A".to_string(), OrderStatus::PendingPayment, "CNY");
        order.idempotency_key = Some("k1".to_string());
        let Ok(first) = store.create_order_with_items(&order, &[create_item(1)]).await else {
            panic!("first insert failed");
        };
        order.order_no = "ORD-B".to_string();
        let Err(err) = store.create_order_with_items(&order, &[create_item(1)]).await else {
            panic!("duplicate key accepted");
        };
        assert!(err.is_unique_violation());

        let Ok(Some(found)) = store.get_order_by_idempotency_key(alice.id, "k1").await else {
            panic!("lookup failed");
        };
        assert_eq!(found.id, first.order.id);

        // absent keys never collide
        order.idempotency_key = None;
        order.order_no = "ORD-C".to_string();
        assert!(store.create_order_with_items(&order, &[create_item(1)]).await.is_ok());
        order.order_no = "ORD-D".to_string();
        assert!(store.create_order_with_items(&order, &[create_item(1)]).await.is_ok());
    }

    #[tokio::test]
    async fn event_sequence_is_dense() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let created = order_with(&store, alice.id, OrderStatus::PendingPayment, &[create_item(1)]).await;
        for _ in 0..3 {
            let Ok(_) = store
                .append_event(created.order.id, "note", &serde_json::json!({}))
                .await
            else {
                panic!("append failed");
            };
        }
        let Ok(events) = store.list_events(created.order.id).await else {
            panic!("list failed");
        };
        let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn guarded_transition_rejects_wrong_source() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let created = order_with(&store, alice.id, OrderStatus::PendingReview, &[create_item(1)]).await;
        let cmd = OrderTransitionCmd::new(created.order.id, &[OrderStatus::PendingReview], OrderStatus::Rejected)
            .with_items(OrderItemStatus::Rejected)
            .with_payments(PaymentReview {
                status: crate::domain::PaymentStatus::Rejected,
                reviewed_by: Some(1),
                reason: "blurry".to_string(),
            });
        let Ok(outcome) = store.transition_order(&cmd).await else {
            panic!("reject failed");
        };
        assert_eq!(outcome.order.status, OrderStatus::Rejected);
        assert_eq!(outcome.event.event_type, "rejected");
        assert_eq!(outcome.event.seq, 2);

        let Ok(items) = store.list_order_items(created.order.id).await else {
            panic!("list items failed");
        };
        assert!(items.iter().all(|i| i.status == OrderItemStatus::Rejected));

        let Err(ShopError::Conflict(_)) = store.transition_order(&cmd).await else {
            panic!("second reject accepted");
        };
    }

    #[tokio::test]
    async fn retry_transition_moves_failed_create_items_with_the_order() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let items = [
            NewOrderItem {
                status: OrderItemStatus::Failed,
                ..create_item(99_900)
            },
            NewOrderItem {
                status: OrderItemStatus::Active,
                ..create_item(99_900)
            },
            NewOrderItem {
                status: OrderItemStatus::Failed,
                ..resize_item(42)
            },
        ];
        let created = order_with(&store, alice.id, OrderStatus::Failed, &items).await;
        let cmd = OrderTransitionCmd::new(created.order.id, &[OrderStatus::Failed], OrderStatus::Provisioning)
            .with_items_matching(
                OrderItemStatus::Approved,
                &[OrderItemStatus::Failed],
                Some(ItemAction::Create),
            );

        let Ok(outcome) = store.transition_order(&cmd).await else {
            panic!("retry transition failed");
        };
        assert_eq!(outcome.order.status, OrderStatus::Provisioning);
        let Ok(after) = store.list_order_items(created.order.id).await else {
            panic!("list items failed");
        };
        let statuses: Vec<OrderItemStatus> = after.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![OrderItemStatus::Approved, OrderItemStatus::Active, OrderItemStatus::Failed]
        );

        // a refused transition leaves the items alone
        let Err(ShopError::Conflict(_)) = store.transition_order(&cmd).await else {
            panic!("second retry accepted");
        };
        let Ok(again) = store.list_order_items(created.order.id).await else {
            panic!("list items failed");
        };
        assert_eq!(again.iter().map(|i| i.status).collect::<Vec<_>>(), statuses);
    }

    #[tokio::test]
    async fn approval_stamps_time_without_admin() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let created = order_with(&store, alice.id, OrderStatus::PendingPayment, &[create_item(1)]).await;
        let cmd = OrderTransitionCmd::new(created.order.id, &[OrderStatus::PendingPayment], OrderStatus::Approved)
            .with_items(OrderItemStatus::Approved);
        let Ok(outcome) = store.transition_order(&cmd).await else {
            panic!("approve failed");
        };
        assert!(outcome.order.approved_at.is_some());
        assert_eq!(outcome.order.approved_by, None);
    }

    #[tokio::test]
    async fn resize_approval_excludes_concurrent_tasks() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            99_900,
            None,
        )
        .await;
        let o1 = order_with(&store, alice.id, OrderStatus::PendingReview, &[resize_item(vps.id)]).await;
        let o2 = order_with(&store, alice.id, OrderStatus::PendingReview, &[resize_item(vps.id)]).await;

        let approve = |created: &OrderCreated| {
            let cmd = OrderTransitionCmd::new(
                created.order.id,
                &[OrderStatus::PendingReview],
                OrderStatus::Approved,
            )
            .with_items(OrderItemStatus::Approved)
            .approved_by(Some(1));
            let tasks: Vec<NewResizeTask> = created
                .items
                .iter()
                .map(|item| NewResizeTask {
                    vps_id: vps.id,
                    order_id: created.order.id,
                    order_item_id: item.id,
                    scheduled_at: None,
                })
                .collect();
            (cmd, tasks)
        };

        let (cmd, tasks) = approve(&o1);
        let Ok(approval) = store.approve_resize_order_with_tasks(&cmd, &tasks).await else {
            panic!("first approval failed");
        };
        assert_eq!(approval.order.status, OrderStatus::Approved);
        assert!(approval.order.approved_at.is_some());
        assert_eq!(approval.tasks.len(), 1);

        let (cmd, tasks) = approve(&o2);
        let Err(ShopError::ResizeInProgress(id)) = store.approve_resize_order_with_tasks(&cmd, &tasks).await
        else {
            panic!("second approval accepted");
        };
        assert_eq!(id, vps.id);

        let Ok(o2_now) = store.get_order(o2.order.id).await else {
            panic!("reload failed");
        };
        assert_eq!(o2_now.status, OrderStatus::PendingReview);
        let Ok(all) = store.list_resize_tasks(vps.id).await else {
            panic!("list tasks failed");
        };
        assert_eq!(all.len(), 1);
        assert_eq!(all.first().map(|t| t.order_id), Some(o1.order.id));
    }

    #[tokio::test]
    async fn pending_action_guard_reverifies_vps_id() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let renew = |vps_id| {
            NewOrderItem::for_vps(
                OrderItemSpec::Renew(RenewSpec {
                    vps_id,
                    renew_days: 30,
                    duration_months: 1,
                }),
                99_900,
                1,
                1,
            )
        };
        let _ = order_with(&store, alice.id, OrderStatus::PendingPayment, &[renew(70)]).await;

        // "vps_id":7 is a prefix of "vps_id":70
        let Ok(false) = store.has_pending_action_order(alice.id, 7).await else {
            panic!("substring match leaked through");
        };
        let Ok(true) = store.has_pending_action_order(alice.id, 70).await else {
            panic!("pending renew not found");
        };

        let done = order_with(&store, alice.id, OrderStatus::Active, &[renew(8)]).await;
        assert_eq!(done.order.status, OrderStatus::Active);
        let Ok(false) = store.has_pending_action_order(alice.id, 8).await else {
            panic!("finished order counted as pending");
        };
    }

    #[tokio::test]
    async fn delete_cascades_to_instances() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            99_900,
            None,
        )
        .await;
        let Ok(item) = store.get_order_item(vps.order_item_id).await else {
            panic!("item missing");
        };
        let Ok(()) = store.delete_order(item.order_id).await else {
            panic!("delete failed");
        };
        assert!(matches!(store.get_order(item.order_id).await, Err(ShopError::NotFound(_))));
        assert!(matches!(store.get_instance(vps.id).await, Err(ShopError::NotFound(_))));
        let Ok(events) = store.list_events(item.order_id).await else {
            panic!("list events failed");
        };
        assert!(events.is_empty());

        assert!(matches!(store.delete_order(item.order_id).await, Err(ShopError::NotFound(_))));
    }

    #[tokio::test]
    async fn recompute_moves_provisioning_order_to_active() {
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
        let Ok(item) = store.get_order_item(vps.order_item_id).await else {
            panic!("item missing");
        };
        let Ok(None) = store.recompute_order_status(item.order_id).await else {
            panic!("recompute changed a consistent order");
        };
        let Ok(()) = store.update_order_item_status(item.id, OrderItemStatus::Active).await else {
            panic!("item update failed");
        };
        let Ok(Some(outcome)) = store.recompute_order_status(item.order_id).await else {
            panic!("recompute did nothing");
        };
        assert_eq!(outcome.order.status, OrderStatus::Active);
        assert_eq!(outcome.event.event_type, "active");
    }

    #[tokio::test]
    async fn successful_orders_are_counted() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let _ = order_with(&store, alice.id, OrderStatus::PendingPayment, &[create_item(1)]).await;
        let _ = order_with(&store, alice.id, OrderStatus::Active, &[create_item(1)]).await;
        let Ok(n) = store.count_successful_orders(alice.id).await else {
            panic!("count failed");
        };
        assert_eq!(n, 1);
    }

    #[test]
    fn patterns_cover_both_spacings() {
        let (a, b) = vps_id_patterns(5);
        assert_eq!(a, "%\"vps_id\":5%");
        assert_eq!(b, "%\"vps_id\": 5%");
    }

    #[tokio::test]
    async fn list_orders_filters() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let bob = test_support::user(&store, "bob").await;
        let _ = order_with(&store, alice.id, OrderStatus::PendingPayment, &[create_item(1)]).await;
        let _ = order_with(&store, alice.id, OrderStatus::Active, &[create_item(1)]).await;
        let _ = order_with(&store, bob.id, OrderStatus::Active, &[create_item(1)]).await;

        let filter = OrderFilter {
            user_id: Some(alice.id),
            status: Some(OrderStatus::Active),
        };
        let Ok(rows) = store.list_orders(&filter, 10, 0).await else {
            panic!("list failed");
        };
        assert_eq!(rows.len(), 1);
        let Ok(all) = store.list_orders(&OrderFilter::default(), 10, 0).await else {
            panic!("list failed");
        };
        assert_eq!(all.len(), 3);
    }
}
