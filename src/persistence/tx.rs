//! Statements shared by the transactional composites.
//!
//! Every helper takes the open transaction and never touches the pool, so a
//! composite can chain them and commit once.

use chrono::Utc;

use super::{Backend, OrderTransitionCmd, SqlStore, TransitionOutcome, found};
use crate::domain::{
    NewResizeTask, Order, OrderEvent, OrderItemStatus, OrderStatus, OrderTransition,
    PaymentStatus, RedemptionStatus, ResizeTask, ResizeTaskStatus, Wallet, WalletAdjustment,
};
use crate::error::{ShopError, ShopResult};

/// Renders static enum strings as a SQL `IN` list body.
pub(super) fn quoted<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Status an order should take given its item statuses, if any item still
/// counts.
pub(super) fn derive_order_status(items: &[OrderItemStatus]) -> Option<OrderStatus> {
    let failed = items.iter().filter(|s| **s == OrderItemStatus::Failed).count();
    let active = items.iter().filter(|s| **s == OrderItemStatus::Active).count();
    let pending = items.iter().filter(|s| !s.is_terminal()).count();
    if failed > 0 {
        Some(OrderStatus::Failed)
    } else if pending > 0 {
        Some(OrderStatus::Provisioning)
    } else if active > 0 {
        Some(OrderStatus::Active)
    } else {
        None
    }
}

macro_rules! impl_tx_helpers {
    ($db:ty) => {
        impl SqlStore<$db> {
            /// Takes the write lock on one row. Returns whether the row exists.
            pub(super) async fn lock_row(
                tx: &mut sqlx::Transaction<'_, $db>,
                table: &str,
                key: &str,
                id: i64,
            ) -> ShopResult<bool> {
                let dialect = <$db as Backend>::DIALECT;
                if dialect.needs_write_lock_touch() {
                    let sql = format!("UPDATE {table} SET {key} = {key} WHERE {key} = $1");
                    let done = sqlx::query(&sql).bind(id).execute(&mut **tx).await?;
                    return Ok(done.rows_affected() > 0);
                }
                let sql = format!("SELECT {key} FROM {table} WHERE {key} = $1{}", dialect.for_update());
                let row: Option<i64> = sqlx::query_scalar(&sql)
                    .bind(id)
                    .fetch_optional(&mut **tx)
                    .await?;
                Ok(row.is_some())
            }

            /// Locks and loads an order.
            pub(super) async fn lock_order(
                tx: &mut sqlx::Transaction<'_, $db>,
                order_id: i64,
            ) -> ShopResult<Order> {
                Self::lock_row(tx, "orders", "id", order_id).await?;
                let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
                    .bind(order_id)
                    .fetch_optional(&mut **tx)
                    .await?;
                found(order, "order", order_id)
            }

            /// Appends the next event of an order. The caller holds the order
            /// lock, which serialises the `MAX(seq)` read.
            pub(super) async fn append_event_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                order_id: i64,
                event_type: &str,
                data: &serde_json::Value,
            ) -> ShopResult<OrderEvent> {
                let seq: i64 = sqlx::query_scalar(
                    "SELECT CAST(COALESCE(MAX(seq), 0) + 1 AS BIGINT) FROM order_events WHERE order_id = $1",
                )
                .bind(order_id)
                .fetch_one(&mut **tx)
                .await?;
                let event: OrderEvent = sqlx::query_as(
                    "INSERT INTO order_events (order_id, seq, event_type, data_json, created_at) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING *",
                )
                .bind(order_id)
                .bind(seq)
                .bind(event_type)
                .bind(data.to_string())
                .bind(Utc::now())
                .fetch_one(&mut **tx)
                .await?;
                Ok(event)
            }

            /// Guarded status change plus its item, payment and event writes.
            pub(super) async fn transition_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                cmd: &OrderTransitionCmd,
            ) -> ShopResult<TransitionOutcome> {
                Self::transition_with_tasks_tx(tx, cmd)
                    .await
                    .map(|(outcome, _)| outcome)
            }

            /// [`Self::transition_tx`] that also returns the resize tasks it
            /// queued.
            pub(super) async fn transition_with_tasks_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                cmd: &OrderTransitionCmd,
            ) -> ShopResult<(TransitionOutcome, Vec<ResizeTask>)> {
                let order = Self::lock_order(tx, cmd.order_id).await?;
                Self::guard_resize_tasks_tx(tx, &cmd.resize_tasks).await?;
                if !cmd.from.contains(&order.status) {
                    return Err(ShopError::Conflict(format!(
                        "order {} is {}, cannot move to {}",
                        order.id, order.status, cmd.to
                    )));
                }
                let now = Utc::now();
                let approved_by = cmd.approved_by.or(order.approved_by);
                let approved_at = if cmd.to == OrderStatus::Approved {
                    Some(now)
                } else {
                    order.approved_at
                };
                let pending_reason = cmd.pending_reason.as_deref().unwrap_or(&order.pending_reason);
                let rejected_reason = cmd.rejected_reason.as_deref().unwrap_or(&order.rejected_reason);
                sqlx::query(
                    "UPDATE orders SET status = $1, approved_by = $2, approved_at = $3, \
                     pending_reason = $4, rejected_reason = $5, updated_at = $6 WHERE id = $7",
                )
                .bind(cmd.to.as_str())
                .bind(approved_by)
                .bind(approved_at)
                .bind(pending_reason)
                .bind(rejected_reason)
                .bind(now)
                .bind(order.id)
                .execute(&mut **tx)
                .await?;

                if let Some(status) = cmd.items_to {
                    let scope = match &cmd.items_from {
                        Some(from) => format!("IN ({})", quoted(from.iter().map(|s| s.as_str()))),
                        None => format!(
                            "NOT IN ({})",
                            quoted(OrderItemStatus::TERMINAL.iter().map(|s| s.as_str()))
                        ),
                    };
                    let action = match cmd.items_action {
                        Some(action) => format!(" AND action = '{}'", action.as_str()),
                        None => String::new(),
                    };
                    let sql = format!(
                        "UPDATE order_items SET status = $1, updated_at = $2 \
                         WHERE order_id = $3 AND status {scope}{action}"
                    );
                    sqlx::query(&sql)
                        .bind(status.as_str())
                        .bind(now)
                        .bind(order.id)
                        .execute(&mut **tx)
                        .await?;
                }

                if let Some(review) = &cmd.payments {
                    let sql = format!(
                        "UPDATE order_payments SET status = $1, reviewed_by = $2, review_reason = $3, \
                         updated_at = $4 WHERE order_id = $5 AND status IN ({})",
                        quoted([
                            PaymentStatus::PendingPayment.as_str(),
                            PaymentStatus::PendingReview.as_str(),
                        ])
                    );
                    sqlx::query(&sql)
                        .bind(review.status.as_str())
                        .bind(review.reviewed_by)
                        .bind(&review.reason)
                        .bind(now)
                        .bind(order.id)
                        .execute(&mut **tx)
                        .await?;
                }

                let mut tasks = Vec::with_capacity(cmd.resize_tasks.len());
                for task in &cmd.resize_tasks {
                    let row: ResizeTask = sqlx::query_as(
                        "INSERT INTO resize_tasks (vps_id, order_id, order_item_id, status, \
                         scheduled_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $6) \
                         RETURNING *",
                    )
                    .bind(task.vps_id)
                    .bind(task.order_id)
                    .bind(task.order_item_id)
                    .bind(ResizeTaskStatus::Pending.as_str())
                    .bind(task.scheduled_at)
                    .bind(now)
                    .fetch_one(&mut **tx)
                    .await?;
                    tasks.push(row);
                }

                let transition = OrderTransition::into_status(cmd.to);
                let event =
                    Self::append_event_tx(tx, order.id, transition.as_str(), &cmd.event_data).await?;
                let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
                    .bind(order.id)
                    .fetch_one(&mut **tx)
                    .await?;
                Ok((TransitionOutcome { order, event }, tasks))
            }

            /// Locks each target VPS and refuses while it already has a
            /// pending or running resize task.
            async fn guard_resize_tasks_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                tasks: &[NewResizeTask],
            ) -> ShopResult<()> {
                let busy_sql = format!(
                    "SELECT COUNT(*) FROM resize_tasks WHERE vps_id = $1 AND status IN ({})",
                    quoted([ResizeTaskStatus::Pending.as_str(), ResizeTaskStatus::Running.as_str()])
                );
                let mut seen: Vec<i64> = Vec::with_capacity(tasks.len());
                for task in tasks {
                    Self::lock_row(tx, "vps_instances", "id", task.vps_id).await?;
                    let busy: i64 = sqlx::query_scalar(&busy_sql)
                        .bind(task.vps_id)
                        .fetch_one(&mut **tx)
                        .await?;
                    if busy > 0 || seen.contains(&task.vps_id) {
                        return Err(ShopError::ResizeInProgress(task.vps_id));
                    }
                    seen.push(task.vps_id);
                }
                Ok(())
            }

            /// Re-derives an order's status from its items. Canceled, rejected
            /// and unpaid orders are left alone.
            pub(super) async fn recompute_order_status_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                order_id: i64,
            ) -> ShopResult<Option<TransitionOutcome>> {
                let order = Self::lock_order(tx, order_id).await?;
                if !OrderStatus::RECOMPUTABLE.contains(&order.status) {
                    return Ok(None);
                }
                let raw: Vec<String> =
                    sqlx::query_scalar("SELECT status FROM order_items WHERE order_id = $1")
                        .bind(order_id)
                        .fetch_all(&mut **tx)
                        .await?;
                let statuses = raw
                    .into_iter()
                    .map(OrderItemStatus::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ShopError::Internal(e.to_string()))?;
                let Some(target) = derive_order_status(&statuses) else {
                    return Ok(None);
                };
                if target == order.status {
                    return Ok(None);
                }

                let now = Utc::now();
                sqlx::query("UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3")
                    .bind(target.as_str())
                    .bind(now)
                    .bind(order_id)
                    .execute(&mut **tx)
                    .await?;
                if target == OrderStatus::Active {
                    sqlx::query(
                        "UPDATE coupon_redemptions SET status = $1, updated_at = $2 \
                         WHERE order_id = $3 AND status = $4",
                    )
                    .bind(RedemptionStatus::Confirmed.as_str())
                    .bind(now)
                    .bind(order_id)
                    .bind(RedemptionStatus::Applied.as_str())
                    .execute(&mut **tx)
                    .await?;
                }
                let data = serde_json::json!({
                    "from": order.status.as_str(),
                    "items": statuses.len(),
                });
                let transition = OrderTransition::into_status(target);
                let event = Self::append_event_tx(tx, order_id, transition.as_str(), &data).await?;
                let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
                    .bind(order_id)
                    .fetch_one(&mut **tx)
                    .await?;
                Ok(Some(TransitionOutcome { order, event }))
            }

            /// Applies a wallet delta under the wallet row lock.
            pub(super) async fn adjust_wallet_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                adj: &WalletAdjustment,
            ) -> ShopResult<Wallet> {
                let now = Utc::now();
                sqlx::query(
                    "INSERT INTO user_wallets (user_id, balance, updated_at) VALUES ($1, 0, $2) \
                     ON CONFLICT (user_id) DO NOTHING",
                )
                .bind(adj.user_id)
                .bind(now)
                .execute(&mut **tx)
                .await?;
                Self::lock_row(tx, "user_wallets", "user_id", adj.user_id).await?;
                let wallet: Wallet = sqlx::query_as("SELECT * FROM user_wallets WHERE user_id = $1")
                    .bind(adj.user_id)
                    .fetch_one(&mut **tx)
                    .await?;
                let balance = wallet
                    .balance
                    .checked_add(adj.delta)
                    .ok_or_else(|| ShopError::InvalidInput("wallet delta overflows".to_string()))?;
                if balance < 0 {
                    return Err(ShopError::InsufficientBalance);
                }
                sqlx::query("UPDATE user_wallets SET balance = $1, updated_at = $2 WHERE id = $3")
                    .bind(balance)
                    .bind(now)
                    .bind(wallet.id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query(
                    "INSERT INTO wallet_transactions \
                     (user_id, amount, tx_type, ref_type, ref_id, note, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(adj.user_id)
                .bind(adj.delta)
                .bind(&adj.tx_type)
                .bind(&adj.ref_type)
                .bind(adj.ref_id)
                .bind(&adj.note)
                .bind(now)
                .execute(&mut **tx)
                .await?;
                Ok(Wallet {
                    balance,
                    updated_at: now,
                    ..wallet
                })
            }
        }
    };
}

impl_tx_helpers!(sqlx::Sqlite);
impl_tx_helpers!(sqlx::Postgres);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_list() {
        assert_eq!(quoted(["a", "b"]), "'a', 'b'");
        assert_eq!(quoted(Vec::<&str>::new()), "");
    }

    #[test]
    fn failed_item_dominates() {
        let items = [OrderItemStatus::Active, OrderItemStatus::Failed, OrderItemStatus::Provisioning];
        assert_eq!(derive_order_status(&items), Some(OrderStatus::Failed));
    }

    #[test]
    fn pending_items_keep_order_provisioning() {
        let items = [OrderItemStatus::Active, OrderItemStatus::Approved];
        assert_eq!(derive_order_status(&items), Some(OrderStatus::Provisioning));
    }

    #[test]
    fn all_active_is_active() {
        let items = [OrderItemStatus::Active, OrderItemStatus::Canceled];
        assert_eq!(derive_order_status(&items), Some(OrderStatus::Active));
        assert_eq!(derive_order_status(&[OrderItemStatus::Canceled]), None);
    }
}
