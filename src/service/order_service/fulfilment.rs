//! Post-approval work on the items of an order.
//!
//! Create items get a provision job, renewals and refunds run inline, and
//! resize items wait for their scheduled task. A failed item is marked
//! `failed` with an automation log row; the order status is then
//! re-derived from its items.

use chrono::{DateTime, Utc};

use super::OrderService;
use crate::domain::{
    ItemAction, NewAutomationLog, Order, OrderItem, OrderItemSpec, OrderItemStatus, OrderStatus,
    ProvisionJobStatus, ProvisionJobUpsert, RefundSpec, RenewSpec, ShopEvent, VpsStatus,
    WalletAdjustment,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::OrderTransitionCmd;
use crate::service::with_timeout;

/// Wallet reference of refund credits.
const REFUND_REF: &str = "order_refund";

/// What handling one item produced.
enum Handled {
    /// Queued for the scheduler.
    Scheduled,
    /// Finished inline.
    Done,
}

impl OrderService {
    /// Fulfils the approved items of an order and re-derives its status.
    ///
    /// Item failures are recorded on the item; only store failures are
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Database`] and other store errors.
    pub(crate) async fn fulfil(&self, order_id: i64) -> ShopResult<()> {
        let order = self.store.get_order(order_id).await?;
        let items = self.store.list_order_items(order_id).await?;
        let mut scheduled = 0_usize;
        for item in items.iter().filter(|item| item.status == OrderItemStatus::Approved) {
            match self.fulfil_item(&order, item).await {
                Ok(Handled::Scheduled) => scheduled += 1,
                Ok(Handled::Done) => {}
                Err(err @ ShopError::Database(_)) => return Err(err),
                Err(err) => self.fail_item(&order, item, &err).await?,
            }
        }

        if scheduled > 0 {
            let current = self.store.get_order(order_id).await?;
            if current.status == OrderStatus::Approved {
                let cmd = OrderTransitionCmd::new(order_id, &[OrderStatus::Approved], OrderStatus::Provisioning)
                    .with_data(serde_json::json!({ "scheduled": scheduled }));
                let outcome = self.store.transition_order(&cmd).await?;
                self.publish(&outcome.event);
            }
        }
        if let Some(outcome) = self.store.recompute_order_status(order_id).await? {
            self.publish(&outcome.event);
            tracing::info!(order_id, status = %outcome.order.status, "order status recomputed");
        }
        Ok(())
    }

    async fn fulfil_item(&self, order: &Order, item: &OrderItem) -> ShopResult<Handled> {
        match item.action {
            ItemAction::Create => self.schedule_provision(item).await,
            ItemAction::Resize => Ok(Handled::Scheduled),
            ItemAction::Renew | ItemAction::EmergencyRenew => {
                let (OrderItemSpec::Renew(spec) | OrderItemSpec::EmergencyRenew(spec)) = item.spec()?
                else {
                    return Err(ShopError::Fatal(format!("item {} has no renew payload", item.id)));
                };
                self.renew(order, item, &spec).await?;
                Ok(Handled::Done)
            }
            ItemAction::Refund => {
                let OrderItemSpec::Refund(spec) = item.spec()? else {
                    return Err(ShopError::Fatal(format!("item {} has no refund payload", item.id)));
                };
                self.refund(order, item, &spec).await?;
                Ok(Handled::Done)
            }
        }
    }

    // A retried item keeps its host so the scheduler does not build a
    // second instance.
    async fn schedule_provision(&self, item: &OrderItem) -> ShopResult<Handled> {
        let now = Utc::now();
        let job = match self.store.get_provision_job_by_item(item.id).await? {
            Some(existing) => ProvisionJobUpsert {
                status: ProvisionJobStatus::Pending,
                attempts: 0,
                next_run_at: now,
                last_error: String::new(),
                ..ProvisionJobUpsert::from(&existing)
            },
            None => ProvisionJobUpsert::fresh(item.order_id, item.id, now),
        };
        let job = self.store.upsert_provision_job(&job).await?;
        self.store
            .update_order_item_status(item.id, OrderItemStatus::Provisioning)
            .await?;
        tracing::debug!(item_id = item.id, job_id = job.id, "provision job scheduled");
        Ok(Handled::Scheduled)
    }

    async fn renew(&self, order: &Order, item: &OrderItem, spec: &RenewSpec) -> ShopResult<()> {
        let vps = self.store.get_instance(spec.vps_id).await?;
        let now = Utc::now();
        let reported = with_timeout(
            self.composite_timeout,
            "renew instance",
            self.automation
                .renew(&vps.automation_instance_id, spec.duration_months),
        )
        .await?;
        let expire_at = match reported {
            Some(at) => at,
            None => extend(vps.expire_at, now, spec.renew_days)?,
        };
        self.store.update_instance_expire_at(vps.id, Some(expire_at)).await?;
        if item.action == ItemAction::EmergencyRenew {
            self.store.update_instance_emergency_renew_at(vps.id, now).await?;
        }
        if vps.status == VpsStatus::ExpiredLocked {
            let outcome = self
                .store
                .update_instance_status(vps.id, VpsStatus::Running, 2)
                .await?;
            let _ = self.event_bus.publish(ShopEvent::VpsStatusChanged {
                vps_id: vps.id,
                status: VpsStatus::Running,
                automation_state: 2,
                timestamp: now,
            });
            if let Some(event) = &outcome.order_event {
                self.publish(event);
            }
        }
        self.store
            .update_order_item_status(item.id, OrderItemStatus::Active)
            .await?;
        self.log_automation(
            order,
            item,
            item.action.as_str(),
            serde_json::json!({
                "instance_id": vps.automation_instance_id,
                "months": spec.duration_months,
                "days": spec.renew_days,
            }),
            Ok(serde_json::json!({ "expire_at": expire_at })),
        )
        .await;
        tracing::info!(order_id = order.id, vps_id = vps.id, %expire_at, "vps renewed");
        Ok(())
    }

    async fn refund(&self, order: &Order, item: &OrderItem, spec: &RefundSpec) -> ShopResult<()> {
        if !self
            .store
            .has_wallet_transaction(order.user_id, REFUND_REF, order.id)
            .await?
        {
            let adj = WalletAdjustment::new(order.user_id, spec.refund_amount, "refund", REFUND_REF, order.id)
                .with_note(&order.order_no);
            let wallet = self.store.adjust_wallet_balance(&adj).await?;
            let _ = self.event_bus.publish(ShopEvent::WalletAdjusted {
                user_id: order.user_id,
                delta: spec.refund_amount,
                balance: wallet.balance,
                timestamp: Utc::now(),
            });
            tracing::info!(order_id = order.id, amount = spec.refund_amount, "refund credited");
        }
        if spec.delete_on_approve {
            match self.store.get_instance(spec.vps_id).await {
                Ok(vps) => {
                    with_timeout(
                        self.composite_timeout,
                        "destroy instance",
                        self.automation.destroy(&vps.automation_instance_id),
                    )
                    .await?;
                    match self.store.delete_instance(vps.id).await {
                        Ok(()) | Err(ShopError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                    tracing::info!(order_id = order.id, vps_id = vps.id, "refunded vps destroyed");
                }
                Err(ShopError::NotFound(_)) => {
                    tracing::debug!(vps_id = spec.vps_id, "refunded vps already gone");
                }
                Err(err) => return Err(err),
            }
        }
        self.store
            .update_order_item_status(item.id, OrderItemStatus::Active)
            .await
    }

    async fn fail_item(&self, order: &Order, item: &OrderItem, err: &ShopError) -> ShopResult<()> {
        tracing::warn!(order_id = order.id, item_id = item.id, action = %item.action, error = %err, "item fulfilment failed");
        self.store
            .update_order_item_status(item.id, OrderItemStatus::Failed)
            .await?;
        self.log_automation(
            order,
            item,
            item.action.as_str(),
            serde_json::json!({ "item_id": item.id }),
            Err(err),
        )
        .await;
        Ok(())
    }

    async fn log_automation(
        &self,
        order: &Order,
        item: &OrderItem,
        action: &str,
        request: serde_json::Value,
        response: Result<serde_json::Value, &ShopError>,
    ) {
        let (success, response_json, message) = match response {
            Ok(body) => (true, body.to_string(), "ok".to_string()),
            Err(err) => (false, "{}".to_string(), err.to_string()),
        };
        let log = NewAutomationLog {
            order_id: order.id,
            order_item_id: item.id,
            action: action.to_string(),
            request_json: request.to_string(),
            response_json,
            success,
            message,
        };
        if let Err(err) = self.store.create_automation_log(&log).await {
            tracing::warn!(order_id = order.id, error = %err, "automation log write failed");
        }
    }
}

/// New expiry after adding `days` to whichever is later of now and the
/// current expiry.
fn extend(current: Option<DateTime<Utc>>, now: DateTime<Utc>, days: i64) -> ShopResult<DateTime<Utc>> {
    let base = current.map_or(now, |at| at.max(now));
    chrono::Duration::try_days(days)
        .and_then(|span| base.checked_add_signed(span))
        .ok_or_else(|| ShopError::InvalidInput(format!("cannot extend expiry by {days} days")))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;
    use crate::service::order_service::tests::{fill_cart, harness};
    use crate::service::order_service::{CheckoutRequest, MarkPaidRequest, RenewRequest};

    #[test]
    fn extend_starts_from_the_later_date() {
        let now = Utc::now();
        let Ok(from_now) = extend(Some(now - chrono::Duration::days(5)), now, 30) else {
            panic!("extend failed");
        };
        assert_eq!(from_now, now + chrono::Duration::days(30));
        let later = now + chrono::Duration::days(3);
        let Ok(from_expiry) = extend(Some(later), now, 1) else {
            panic!("extend failed");
        };
        assert_eq!(from_expiry, later + chrono::Duration::days(1));
        let Err(ShopError::InvalidInput(_)) = extend(None, now, i64::MAX) else {
            panic!("overflow accepted");
        };
    }

    #[tokio::test]
    async fn paid_renewal_extends_expiry_and_unlocks() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let expire_at = Utc::now() - chrono::Duration::days(1);
        let vps = test_support::provisioned_vps(
            &h.store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            9_900,
            Some(expire_at),
        )
        .await;
        let Ok(_) = h
            .store
            .update_instance_status(vps.id, VpsStatus::ExpiredLocked, 9)
            .await
        else {
            panic!("lock failed");
        };
        let req = RenewRequest {
            duration_months: 1,
            renew_days: 0,
        };
        let Ok(order) = h.orders.create_renew_order(alice.id, vps.id, &req).await else {
            panic!("renew failed");
        };
        let Ok(detail) = h.orders.mark_paid(2, order.order.id, &MarkPaidRequest::default()).await else {
            panic!("mark paid failed");
        };
        assert_eq!(detail.order.status, OrderStatus::Active);

        let Ok(renewed) = h.store.get_instance(vps.id).await else {
            panic!("vps missing");
        };
        assert_eq!(renewed.status, VpsStatus::Running);
        let Some(new_expiry) = renewed.expire_at else {
            panic!("expiry cleared");
        };
        // lapsed instances renew from now
        assert!(new_expiry > Utc::now() + chrono::Duration::days(29));
        assert_eq!(h.automation.calls().await, vec![format!("renew:{}", vps.automation_instance_id)]);
        let Ok(logs) = h.orders.automation_logs(order.order.id).await else {
            panic!("logs failed");
        };
        assert!(logs.iter().any(|log| log.success && log.action == "renew"));
    }

    #[tokio::test]
    async fn failed_renewal_fails_the_order_and_is_logged() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let vps = test_support::provisioned_vps(
            &h.store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            9_900,
            Some(Utc::now() + chrono::Duration::days(3)),
        )
        .await;
        h.automation
            .push_renew(Err(ShopError::Retryable("backend busy".to_string())))
            .await;
        let Ok(order) = h
            .orders
            .create_renew_order(alice.id, vps.id, &RenewRequest::default())
            .await
        else {
            panic!("renew failed");
        };
        let Ok(detail) = h.orders.mark_paid(2, order.order.id, &MarkPaidRequest::default()).await else {
            panic!("mark paid failed");
        };
        assert_eq!(detail.order.status, OrderStatus::Failed);
        assert!(detail.items.iter().all(|i| i.status == OrderItemStatus::Failed));
        let Ok(logs) = h.orders.automation_logs(order.order.id).await else {
            panic!("logs failed");
        };
        let Some(log) = logs.first() else {
            panic!("no automation log");
        };
        assert!(!log.success);
        assert!(log.message.contains("backend busy"));
        let Ok(unchanged) = h.store.get_instance(vps.id).await else {
            panic!("vps missing");
        };
        assert_eq!(unchanged.expire_at, vps.expire_at);
    }

    #[tokio::test]
    async fn retry_resets_the_existing_job() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        fill_cart(&h.store, alice.id, 1).await;
        let Ok(created) = h.orders.checkout(alice.id, &CheckoutRequest::default()).await else {
            panic!("checkout failed");
        };
        let order_id = created.order.id;
        let Ok(_) = h.orders.mark_paid(2, order_id, &MarkPaidRequest::default()).await else {
            panic!("mark paid failed");
        };
        let Some(item) = created.items.first() else {
            panic!("no item");
        };
        let Ok(Some(job)) = h.store.get_provision_job_by_item(item.id).await else {
            panic!("no job");
        };
        let failed = ProvisionJobUpsert {
            host_id: 1001,
            host_name: "host-keep".to_string(),
            status: ProvisionJobStatus::Failed,
            attempts: 30,
            last_error: "gave up".to_string(),
            ..ProvisionJobUpsert::from(&job)
        };
        tokio_test::assert_ok!(h.store.upsert_provision_job(&failed).await);
        tokio_test::assert_ok!(h.store.update_order_item_status(item.id, OrderItemStatus::Failed).await);
        tokio_test::assert_ok!(h.store.recompute_order_status(order_id).await);

        let Err(ShopError::NotFound(_)) = h.orders.retry_provision(2, order_id + 100).await else {
            panic!("unknown order retried");
        };
        let Ok(detail) = h.orders.retry_provision(2, order_id).await else {
            panic!("retry failed");
        };
        assert_eq!(detail.order.status, OrderStatus::Provisioning);
        let Ok(Some(reset)) = h.store.get_provision_job_by_item(item.id).await else {
            panic!("job gone");
        };
        assert_eq!(reset.status, ProvisionJobStatus::Pending);
        assert_eq!((reset.attempts, reset.host_id), (0, 1001));
        assert_eq!(reset.host_name, "host-keep");
        assert!(reset.last_error.is_empty());
    }
}
