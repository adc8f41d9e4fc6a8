//! Payment intake: user submissions, provider callbacks and admin
//! mark-paid.

use chrono::Utc;
use serde::Deserialize;

use super::{OrderDetail, OrderService};
use crate::collaborator::PaymentInstructions;
use crate::domain::{
    NewPayment, OrderItemStatus, OrderPayment, OrderStatus, PaymentStatus, ShopEvent,
    WalletAdjustment,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::{OrderTransitionCmd, PaymentReview};
use crate::service::{idempotency_key, with_timeout};

/// Method settled from the user's wallet.
pub const BALANCE_METHOD: &str = "balance";

/// A user's payment submission.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct PaymentRequest {
    /// `balance` or an offline method such as `bank_transfer`.
    pub method: String,
    /// Must equal the order total.
    pub amount: i64,
    /// Provider trade number, if the payer has one.
    pub trade_no: String,
    /// Free text.
    pub note: String,
    /// Uploaded proof of payment.
    pub screenshot_url: Option<String>,
    /// Repeating a key returns the payment created with it.
    pub idempotency_key: Option<String>,
}

/// Admin confirmation of an offline payment.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct MarkPaidRequest {
    /// Method recorded on the payment row; defaults to `manual`.
    pub method: String,
    /// Bank or provider reference.
    pub trade_no: String,
    /// Free text.
    pub note: String,
}

impl OrderService {
    /// Records a payment for an unpaid order of the user.
    ///
    /// `balance` debits the wallet and settles at once: the order is
    /// approved and fulfilled. Any other method leaves the payment and the
    /// order in `pending_review`.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for a foreign order,
    /// [`ShopError::Conflict`] unless the order is `pending_payment`,
    /// [`ShopError::InvalidInput`] when the amount differs from the order
    /// total, [`ShopError::InsufficientBalance`] when the wallet cannot
    /// cover a balance payment, and [`ShopError::ResizeInProgress`] when a
    /// settled resize order meets an already queued task.
    pub async fn submit_payment(
        &self,
        user_id: i64,
        order_id: i64,
        req: &PaymentRequest,
    ) -> ShopResult<OrderPayment> {
        let order = self.owned_order(user_id, order_id).await?;
        let key = idempotency_key(req.idempotency_key.as_deref());
        if let Some(key) = key.as_deref() {
            if let Some(existing) = self.store.get_payment_by_idempotency_key(order.id, key).await? {
                tracing::debug!(payment_id = existing.id, "payment replayed by idempotency key");
                return Ok(existing);
            }
        }
        if order.status != OrderStatus::PendingPayment {
            return Err(ShopError::Conflict(format!(
                "order {order_id} is {}, not pending payment",
                order.status
            )));
        }
        if req.amount != order.total_amount {
            return Err(ShopError::InvalidInput(format!(
                "amount {} does not match order total {}",
                req.amount, order.total_amount
            )));
        }
        let method = req.method.trim();
        if method.is_empty() {
            return Err(ShopError::InvalidInput("payment method is required".to_string()));
        }
        let settled = method == BALANCE_METHOD;

        let payment = NewPayment {
            order_id: order.id,
            user_id,
            method: method.to_string(),
            amount: req.amount,
            currency: order.currency.clone(),
            trade_no: req.trade_no.trim().to_string(),
            note: req.note.clone(),
            screenshot_url: req
                .screenshot_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            status: if settled {
                PaymentStatus::Approved
            } else {
                PaymentStatus::PendingReview
            },
            idempotency_key: key.clone(),
        };
        let data = serde_json::json!({ "method": method, "amount": req.amount });
        let (debit, cmd) = if settled {
            let debit = (req.amount > 0).then(|| {
                WalletAdjustment::new(user_id, -req.amount, "debit", "order", order.id)
                    .with_note(&order.order_no)
            });
            let cmd = OrderTransitionCmd::new(order.id, &[OrderStatus::PendingPayment], OrderStatus::Approved)
                .with_items(OrderItemStatus::Approved)
                .with_resize_tasks(self.resize_tasks_for(order.id).await?)
                .with_data(data);
            (debit, cmd)
        } else {
            let mut cmd =
                OrderTransitionCmd::new(order.id, &[OrderStatus::PendingPayment], OrderStatus::PendingReview)
                    .with_data(data);
            cmd.pending_reason = Some(format!("{method} payment submitted"));
            (None, cmd)
        };

        let submitted = match with_timeout(
            self.composite_timeout,
            "submit payment",
            self.store.submit_payment(&payment, debit.as_ref(), &cmd),
        )
        .await
        {
            Ok(submitted) => submitted,
            Err(err) if err.is_unique_violation() => {
                let existing = match key.as_deref() {
                    Some(key) => self.store.get_payment_by_idempotency_key(order.id, key).await?,
                    None => None,
                };
                return existing.ok_or_else(|| {
                    ShopError::Conflict(format!("trade number {} already recorded", payment.trade_no))
                });
            }
            Err(err) => return Err(err),
        };

        self.publish(&submitted.event);
        if let Some(wallet) = &submitted.wallet {
            let _ = self.event_bus.publish(ShopEvent::WalletAdjusted {
                user_id,
                delta: -req.amount,
                balance: wallet.balance,
                timestamp: Utc::now(),
            });
        }
        tracing::info!(
            order_id,
            payment_id = submitted.payment.id,
            method,
            amount = req.amount,
            order_status = %submitted.order.status,
            "payment submitted"
        );
        if settled {
            self.fulfil(order.id).await?;
        }
        Ok(submitted.payment)
    }

    /// Opens a provider payment for an unpaid order and returns what the
    /// payer needs. The payment row carries a placeholder trade number that
    /// doubles as the merchant reference.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Conflict`] unless the order is
    /// `pending_payment`, and provider errors.
    pub async fn start_payment(&self, user_id: i64, order_id: i64) -> ShopResult<PaymentInstructions> {
        let order = self.owned_order(user_id, order_id).await?;
        if order.status != OrderStatus::PendingPayment {
            return Err(ShopError::Conflict(format!(
                "order {order_id} is {}, not pending payment",
                order.status
            )));
        }
        let payment = self
            .store
            .create_payment(&NewPayment {
                order_id: order.id,
                user_id,
                method: self.payments.method().to_string(),
                amount: order.total_amount,
                currency: order.currency.clone(),
                trade_no: String::new(),
                note: String::new(),
                screenshot_url: None,
                status: PaymentStatus::PendingPayment,
                idempotency_key: None,
            })
            .await?;
        let instructions = with_timeout(
            self.composite_timeout,
            "start payment",
            self.payments.start_payment(&order, &payment.trade_no),
        )
        .await?;
        tracing::info!(order_id, payment_id = payment.id, method = %payment.method, "payment started");
        Ok(instructions)
    }

    /// Applies a provider notification. Re-delivery of a settled payment
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a malformed payload and
    /// [`ShopError::NotFound`] when no payment matches either reference.
    pub async fn handle_payment_callback(&self, payload: &serde_json::Value) -> ShopResult<OrderPayment> {
        let callback = self.payments.parse_callback(payload)?;
        let payment = match self.store.get_payment_by_trade_no(&callback.trade_no).await? {
            Some(payment) => payment,
            None => {
                let Some(payment) = self.store.get_payment_by_trade_no(&callback.merchant_ref).await?
                else {
                    return Err(ShopError::NotFound(format!("payment {}", callback.merchant_ref)));
                };
                self.store
                    .update_payment_trade_no(payment.id, &callback.trade_no)
                    .await?;
                self.store.get_payment(payment.id).await?
            }
        };
        if payment.status == PaymentStatus::Approved {
            tracing::debug!(payment_id = payment.id, "callback for settled payment ignored");
            return Ok(payment);
        }
        if !callback.paid {
            tracing::info!(payment_id = payment.id, trade_no = %callback.trade_no, "unpaid callback");
            return Ok(payment);
        }

        let order = self.store.get_order(payment.order_id).await?;
        if matches!(order.status, OrderStatus::PendingPayment | OrderStatus::PendingReview) {
            let cmd = OrderTransitionCmd::new(
                order.id,
                &[OrderStatus::PendingPayment, OrderStatus::PendingReview],
                OrderStatus::Approved,
            )
            .with_items(OrderItemStatus::Approved)
            .with_payments(PaymentReview {
                status: PaymentStatus::Approved,
                reviewed_by: None,
                reason: "confirmed by provider".to_string(),
            })
            .with_resize_tasks(self.resize_tasks_for(order.id).await?)
            .with_data(serde_json::json!({ "trade_no": callback.trade_no }));
            let outcome =
                with_timeout(self.composite_timeout, "payment callback", self.store.transition_order(&cmd))
                    .await?;
            self.publish(&outcome.event);
            tracing::info!(order_id = order.id, payment_id = payment.id, "payment confirmed by provider");
            self.fulfil(order.id).await?;
        } else {
            self.store
                .update_payment_status(payment.id, PaymentStatus::Approved, None, "confirmed by provider")
                .await?;
            tracing::warn!(
                order_id = order.id,
                payment_id = payment.id,
                order_status = %order.status,
                "payment confirmed for an order that no longer awaits it"
            );
        }
        self.store.get_payment(payment.id).await
    }

    /// Records an offline payment confirmed by an admin and fulfils the
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Conflict`] unless the order is
    /// `pending_payment`, and [`ShopError::ResizeInProgress`] when a resize
    /// task for the same VPS is already queued.
    pub async fn mark_paid(
        &self,
        admin_id: i64,
        order_id: i64,
        req: &MarkPaidRequest,
    ) -> ShopResult<OrderDetail> {
        let order = self.store.get_order(order_id).await?;
        if order.status != OrderStatus::PendingPayment {
            return Err(ShopError::Conflict(format!(
                "order {order_id} is {}, not pending payment",
                order.status
            )));
        }
        let method = match req.method.trim() {
            "" => "manual",
            other => other,
        };
        let payment = NewPayment {
            order_id: order.id,
            user_id: order.user_id,
            method: method.to_string(),
            amount: order.total_amount,
            currency: order.currency.clone(),
            trade_no: req.trade_no.trim().to_string(),
            note: req.note.clone(),
            screenshot_url: None,
            status: PaymentStatus::Approved,
            idempotency_key: None,
        };
        let cmd = OrderTransitionCmd::new(order.id, &[OrderStatus::PendingPayment], OrderStatus::Approved)
            .with_items(OrderItemStatus::Approved)
            .with_payments(PaymentReview {
                status: PaymentStatus::Rejected,
                reviewed_by: Some(admin_id),
                reason: "superseded by manual payment".to_string(),
            })
            .approved_by(Some(admin_id))
            .with_resize_tasks(self.resize_tasks_for(order.id).await?)
            .with_data(serde_json::json!({ "admin_id": admin_id, "method": method }));
        let submitted = with_timeout(
            self.composite_timeout,
            "mark paid",
            self.store.submit_payment(&payment, None, &cmd),
        )
        .await?;
        self.publish(&submitted.event);
        tracing::info!(order_id, admin_id, payment_id = submitted.payment.id, "order marked paid");
        self.fulfil(order.id).await?;
        self.get_order(None, order.id).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{CartSpec, ProvisionJobStatus, ResizeTaskStatus};
    use crate::persistence::test_support;
    use crate::service::order_service::{CheckoutRequest, ResizeRequest};
    use crate::service::order_service::tests::{fill_cart, harness};

    async fn unpaid_order(h: &crate::service::order_service::tests::Harness, user_id: i64) -> i64 {
        fill_cart(&h.store, user_id, 1).await;
        let Ok(detail) = h.orders.checkout(user_id, &CheckoutRequest::default()).await else {
            panic!("checkout failed");
        };
        detail.order.id
    }

    async fn fund(h: &crate::service::order_service::tests::Harness, user_id: i64, amount: i64) {
        let adj = WalletAdjustment::new(user_id, amount, "credit", "test", 0);
        let Ok(_) = h.store.adjust_wallet_balance(&adj).await else {
            panic!("fund failed");
        };
    }

    /// A charged resize order on a fresh instance: `(vps_id, order_id)`.
    async fn unpaid_resize(h: &crate::service::order_service::tests::Harness, user_id: i64) -> (i64, i64) {
        let _ = test_support::catalog(&h.store).await;
        let vps = test_support::provisioned_vps(
            &h.store,
            user_id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            99_900,
            Some(Utc::now() + chrono::Duration::days(15)),
        )
        .await;
        let req = ResizeRequest {
            spec: CartSpec {
                add_cores: 2,
                ..CartSpec::default()
            },
            ..ResizeRequest::default()
        };
        let Ok(detail) = h.orders.create_resize_order(user_id, vps.id, &req).await else {
            panic!("resize order failed");
        };
        assert_eq!(detail.order.status, OrderStatus::PendingPayment);
        assert!(detail.order.total_amount > 0);
        (vps.id, detail.order.id)
    }

    async fn assert_resize_queued(h: &crate::service::order_service::tests::Harness, vps_id: i64, order_id: i64) {
        let Ok(tasks) = h.store.list_resize_tasks(vps_id).await else {
            panic!("list tasks failed");
        };
        assert_eq!(tasks.len(), 1);
        assert!(tasks.iter().all(|t| t.order_id == order_id && t.status == ResizeTaskStatus::Pending));
        let Ok(detail) = h.orders.get_order(None, order_id).await else {
            panic!("order missing");
        };
        assert_eq!(detail.order.status, OrderStatus::Provisioning);
        assert!(detail.order.approved_at.is_some());
        assert!(detail.items.iter().all(|i| i.status == OrderItemStatus::Approved));
    }

    fn balance(amount: i64) -> PaymentRequest {
        PaymentRequest {
            method: BALANCE_METHOD.to_string(),
            amount,
            ..PaymentRequest::default()
        }
    }

    #[tokio::test]
    async fn balance_payment_settles_and_schedules_provisioning() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let order_id = unpaid_order(&h, alice.id).await;
        fund(&h, alice.id, 200_000).await;

        let Err(ShopError::InvalidInput(_)) = h.orders.submit_payment(alice.id, order_id, &balance(1)).await
        else {
            panic!("wrong amount accepted");
        };
        let Ok(payment) = h.orders.submit_payment(alice.id, order_id, &balance(99_900)).await else {
            panic!("payment failed");
        };
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert!(payment.has_placeholder_trade_no());

        let Ok(wallet) = h.store.get_wallet(alice.id).await else {
            panic!("wallet missing");
        };
        assert_eq!(wallet.balance, 100_100);
        let Ok(detail) = h.orders.get_order(Some(alice.id), order_id).await else {
            panic!("order missing");
        };
        assert_eq!(detail.order.status, OrderStatus::Provisioning);
        let transitions: Vec<&str> = detail.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(transitions, vec!["created", "approved", "provisioning"]);
        let Some(item) = detail.items.first() else {
            panic!("no item");
        };
        assert_eq!(item.status, OrderItemStatus::Provisioning);
        let Ok(Some(job)) = h.store.get_provision_job_by_item(item.id).await else {
            panic!("no provision job");
        };
        assert_eq!(job.status, ProvisionJobStatus::Pending);
    }

    #[tokio::test]
    async fn balance_payment_without_funds_changes_nothing() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let order_id = unpaid_order(&h, alice.id).await;
        let Err(ShopError::InsufficientBalance) =
            h.orders.submit_payment(alice.id, order_id, &balance(99_900)).await
        else {
            panic!("overdraft accepted");
        };
        let Ok(detail) = h.orders.get_order(None, order_id).await else {
            panic!("order missing");
        };
        assert_eq!(detail.order.status, OrderStatus::PendingPayment);
        assert!(detail.payments.is_empty());
    }

    #[tokio::test]
    async fn offline_payment_waits_for_review_and_replays_key() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let order_id = unpaid_order(&h, alice.id).await;
        let req = PaymentRequest {
            method: "bank_transfer".to_string(),
            amount: 99_900,
            screenshot_url: Some("https://img/1.png".to_string()),
            idempotency_key: Some("pay-1".to_string()),
            ..PaymentRequest::default()
        };
        let Ok(first) = h.orders.submit_payment(alice.id, order_id, &req).await else {
            panic!("payment failed");
        };
        assert_eq!(first.status, PaymentStatus::PendingReview);
        let Ok(second) = h.orders.submit_payment(alice.id, order_id, &req).await else {
            panic!("replay failed");
        };
        assert_eq!(first.id, second.id);
        let Ok(queue) = h.orders.review_queue(10, 0).await else {
            panic!("queue failed");
        };
        assert_eq!(queue.len(), 1);

        let Ok(approved) = h.orders.approve(Some(7), order_id).await else {
            panic!("approve failed");
        };
        assert_eq!(approved.order.status, OrderStatus::Provisioning);
        assert!(approved.payments.iter().all(|p| p.status == PaymentStatus::Approved));
        let Err(ShopError::Conflict(_)) = h.orders.cancel(alice.id, order_id).await else {
            panic!("paid order canceled");
        };
    }

    #[tokio::test]
    async fn provider_callback_rewrites_trade_no_once() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let order_id = unpaid_order(&h, alice.id).await;
        let Ok(instructions) = h.orders.start_payment(alice.id, order_id).await else {
            panic!("start failed");
        };
        assert!(instructions.merchant_ref.starts_with("pending-"));
        assert_eq!(instructions.amount, 99_900);

        let body = serde_json::json!({
            "merchant_ref": instructions.merchant_ref,
            "trade_no": "BANK-778",
            "status": "paid",
        });
        let Ok(payment) = h.orders.handle_payment_callback(&body).await else {
            panic!("callback failed");
        };
        assert_eq!(payment.trade_no, "BANK-778");
        assert_eq!(payment.status, PaymentStatus::Approved);
        let Ok(detail) = h.orders.get_order(None, order_id).await else {
            panic!("order missing");
        };
        assert_eq!(detail.order.status, OrderStatus::Provisioning);
        let events = detail.events.len();

        let Ok(again) = h.orders.handle_payment_callback(&body).await else {
            panic!("redelivery failed");
        };
        assert_eq!(again.id, payment.id);
        let Ok(detail) = h.orders.get_order(None, order_id).await else {
            panic!("order missing");
        };
        assert_eq!(detail.events.len(), events);

        let unknown = serde_json::json!({
            "merchant_ref": "nope",
            "trade_no": "nope",
            "status": "paid",
        });
        let Err(ShopError::NotFound(_)) = h.orders.handle_payment_callback(&unknown).await else {
            panic!("unknown payment accepted");
        };
    }

    #[tokio::test]
    async fn mark_paid_records_manual_payment() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let order_id = unpaid_order(&h, alice.id).await;
        let req = MarkPaidRequest {
            trade_no: "WIRE-1".to_string(),
            ..MarkPaidRequest::default()
        };
        let Ok(detail) = h.orders.mark_paid(3, order_id, &req).await else {
            panic!("mark paid failed");
        };
        assert_eq!(detail.order.approved_by, Some(3));
        assert_eq!(detail.order.status, OrderStatus::Provisioning);
        let Some(payment) = detail.payments.first() else {
            panic!("no payment");
        };
        assert_eq!((payment.method.as_str(), payment.status), ("manual", PaymentStatus::Approved));
        let Err(ShopError::Conflict(_)) = h.orders.mark_paid(3, order_id, &req).await else {
            panic!("paid twice");
        };
    }

    #[tokio::test]
    async fn marked_paid_resize_queues_its_task() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let (vps_id, order_id) = unpaid_resize(&h, alice.id).await;
        let Ok(_) = h.orders.mark_paid(3, order_id, &MarkPaidRequest::default()).await else {
            panic!("mark paid failed");
        };
        assert_resize_queued(&h, vps_id, order_id).await;
    }

    #[tokio::test]
    async fn balance_paid_resize_queues_its_task() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let (vps_id, order_id) = unpaid_resize(&h, alice.id).await;
        let Ok(detail) = h.orders.get_order(None, order_id).await else {
            panic!("order missing");
        };
        fund(&h, alice.id, detail.order.total_amount).await;
        let Ok(payment) = h
            .orders
            .submit_payment(alice.id, order_id, &balance(detail.order.total_amount))
            .await
        else {
            panic!("payment failed");
        };
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_resize_queued(&h, vps_id, order_id).await;
    }

    #[tokio::test]
    async fn provider_paid_resize_queues_its_task() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let (vps_id, order_id) = unpaid_resize(&h, alice.id).await;
        let Ok(instructions) = h.orders.start_payment(alice.id, order_id).await else {
            panic!("start failed");
        };
        let body = serde_json::json!({
            "merchant_ref": instructions.merchant_ref,
            "trade_no": "BANK-901",
            "status": "paid",
        });
        let Ok(_) = h.orders.handle_payment_callback(&body).await else {
            panic!("callback failed");
        };
        assert_resize_queued(&h, vps_id, order_id).await;
    }
}
