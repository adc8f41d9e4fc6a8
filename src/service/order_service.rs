//! Order service: the order state machine.
//!
//! Checkout, the VPS action orders (renew, emergency renew, resize,
//! refund) and the admin review flow live here; payment intake is in
//! [`payments`] and post-approval work in [`fulfilment`].
//!
//! Every status change goes through one store composite so the event log
//! and the item and payment side effects commit together. The resulting
//! [`OrderEvent`] is published on the [`EventBus`] after commit.

mod fulfilment;
mod payments;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use payments::{BALANCE_METHOD, MarkPaidRequest, PaymentRequest};

use super::coupon_service::{CouponQuote, CouponService};
use super::policy::{self, EmergencyRenewPolicy};
use super::{idempotency_key, pricing, with_timeout};
use crate::collaborator::{AutomationProvider, PaymentProvider};
use crate::config::ShopConfig;
use crate::domain::money::round_div;
use crate::domain::{
    AutomationLog, CartSpec, CreateSpec, EventBus, ItemAction, NewOrder, NewOrderItem,
    NewResizeTask, Order, OrderEvent, OrderItem, OrderItemSpec, OrderItemStatus, OrderKind,
    OrderNo, OrderPayment, OrderStatus, PaymentStatus, QuoteItem, RedemptionStatus, RefundSpec,
    RenewSpec, ResizeSpec, ShopEvent, User, UserStatus, VpsInstance,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::{EntityStore, OrderCreated, OrderFilter, OrderTransitionCmd, PaymentReview};

/// Longest refund reason accepted, in characters.
const REFUND_REASON_MAX: usize = 500;

/// Checkout options.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct CheckoutRequest {
    /// Coupon to apply.
    pub coupon_code: Option<String>,
    /// Repeating a key returns the order created with it.
    pub idempotency_key: Option<String>,
}

/// Paid renewal. Either field may be zero.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct RenewRequest {
    /// Months to pay for.
    pub duration_months: i64,
    /// Days to add; defaults to 30 per month.
    pub renew_days: i64,
}

/// Resize target.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct ResizeRequest {
    /// New package in the same plan group; keeps the current one if unset.
    pub target_package_id: Option<i64>,
    /// Addons on top of the target package.
    pub spec: CartSpec,
    /// Earliest execution time.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Refund request.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct RefundRequest {
    /// Why the user wants the refund.
    pub reason: String,
}

/// An order with everything hanging off it.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct OrderDetail {
    /// The order header.
    pub order: Order,
    /// Its items.
    pub items: Vec<OrderItem>,
    /// Payment attempts.
    pub payments: Vec<OrderPayment>,
    /// Event log by sequence.
    pub events: Vec<OrderEvent>,
}

/// Order state machine and fulfilment.
#[derive(Debug, Clone)]
pub struct OrderService {
    store: Arc<dyn EntityStore>,
    coupons: CouponService,
    automation: Arc<dyn AutomationProvider>,
    payments: Arc<dyn PaymentProvider>,
    event_bus: EventBus,
    currency: String,
    composite_timeout: Duration,
}

impl OrderService {
    /// Creates a new `OrderService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        automation: Arc<dyn AutomationProvider>,
        payments: Arc<dyn PaymentProvider>,
        event_bus: EventBus,
        config: &ShopConfig,
    ) -> Self {
        Self {
            coupons: CouponService::new(Arc::clone(&store)),
            store,
            automation,
            payments,
            event_bus,
            currency: config.default_currency.clone(),
            composite_timeout: Duration::from_secs(config.composite_timeout_secs.max(1)),
        }
    }

    fn publish(&self, event: &OrderEvent) {
        let _ = self.event_bus.publish(ShopEvent::from(event));
    }

    async fn active_user(&self, user_id: i64) -> ShopResult<User> {
        let user = self.store.get_user(user_id).await?;
        if user.status != UserStatus::Active {
            return Err(ShopError::Forbidden(format!("user {user_id} is {}", user.status)));
        }
        Ok(user)
    }

    async fn owned_order(&self, user_id: i64, order_id: i64) -> ShopResult<Order> {
        let order = self.store.get_order(order_id).await?;
        if order.user_id != user_id {
            return Err(ShopError::NotFound(format!("order {order_id}")));
        }
        Ok(order)
    }

    async fn owned_vps(&self, user_id: i64, vps_id: i64) -> ShopResult<VpsInstance> {
        let vps = self.store.get_instance(vps_id).await?;
        if vps.user_id != user_id {
            return Err(ShopError::NotFound(format!("vps {vps_id}")));
        }
        Ok(vps)
    }

    // snapshot price, then the package list price
    async fn monthly_price(&self, vps: &VpsInstance) -> ShopResult<i64> {
        if vps.monthly_price > 0 {
            return Ok(vps.monthly_price);
        }
        let package = self.store.get_package(vps.package_id).await?;
        if package.monthly_price <= 0 {
            return Err(ShopError::InvalidInput(format!("vps {} has no price", vps.id)));
        }
        Ok(package.monthly_price)
    }

    /// Whether a renewal of the VPS is already in progress.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn has_pending_renew_order(&self, user_id: i64, vps_id: i64) -> ShopResult<bool> {
        self.store.has_pending_action_order(user_id, vps_id).await
    }

    /// Whether a resize of the VPS is already in progress.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn has_pending_resize_order(&self, user_id: i64, vps_id: i64) -> ShopResult<bool> {
        self.store.has_pending_action_order(user_id, vps_id).await
    }

    /// Whether a refund of the VPS is already in progress.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn has_pending_refund_order(&self, user_id: i64, vps_id: i64) -> ShopResult<bool> {
        self.store.has_pending_action_order(user_id, vps_id).await
    }

    async fn create_action_order(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> ShopResult<OrderCreated> {
        let created = with_timeout(
            self.composite_timeout,
            "create order",
            self.store.create_order_with_items(order, items),
        )
        .await?;
        self.publish(&created.event);
        tracing::info!(
            order_id = created.order.id,
            order_no = %created.order.order_no,
            user_id = order.user_id,
            status = %created.order.status,
            total = created.order.total_amount,
            "order created"
        );
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    async fn detail(&self, order: Order) -> ShopResult<OrderDetail> {
        let items = self.store.list_order_items(order.id).await?;
        let payments = self.store.list_payments(order.id).await?;
        let events = self.store.list_events(order.id).await?;
        Ok(OrderDetail {
            order,
            items,
            payments,
            events,
        })
    }

    /// Loads an order with items, payments and events; with `owner` set,
    /// only the owner's.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for unknown or foreign orders.
    pub async fn get_order(&self, owner: Option<i64>, id: i64) -> ShopResult<OrderDetail> {
        let order = match owner {
            Some(user_id) => self.owned_order(user_id, id).await?,
            None => self.store.get_order(id).await?,
        };
        self.detail(order).await
    }

    /// Lists order headers, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_orders(
        &self,
        owner: Option<i64>,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<Order>> {
        let filter = OrderFilter {
            user_id: owner,
            status,
        };
        self.store.list_orders(&filter, limit, offset).await
    }

    /// Payments waiting for manual review, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn review_queue(&self, limit: i64, offset: i64) -> ShopResult<Vec<OrderPayment>> {
        self.store
            .list_payments_by_status(PaymentStatus::PendingReview, limit, offset)
            .await
    }

    /// Automation calls recorded for an order.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn automation_logs(&self, order_id: i64) -> ShopResult<Vec<AutomationLog>> {
        self.store.list_automation_logs(order_id).await
    }

    // ------------------------------------------------------------------
    // Checkout
    // ------------------------------------------------------------------

    async fn priced_cart(&self, user_id: i64) -> ShopResult<Vec<pricing::LinePrice>> {
        let cart = self.store.list_cart_items(user_id).await?;
        if cart.is_empty() {
            return Err(ShopError::InvalidInput("cart is empty".to_string()));
        }
        let mut lines = Vec::with_capacity(cart.len());
        for row in &cart {
            let spec = CartSpec::parse(&row.spec_json)?;
            let mut line =
                pricing::price_line(&*self.store, row.package_id, row.system_id, &spec).await?;
            line.quote.qty = row.qty.max(1);
            lines.push(line);
        }
        Ok(lines)
    }

    /// Prices the current cart with a coupon without placing an order.
    ///
    /// # Errors
    ///
    /// Same as [`CouponService::quote`]; [`ShopError::InvalidInput`] for an
    /// empty cart.
    pub async fn preview_coupon(&self, user_id: i64, code: &str) -> ShopResult<CouponQuote> {
        let lines = self.priced_cart(user_id).await?;
        let items: Vec<QuoteItem> = lines.iter().map(|line| line.quote.clone()).collect();
        self.coupons.quote(user_id, code, &items, Utc::now()).await
    }

    /// Turns the cart into an order in `pending_payment`.
    ///
    /// Each cart row with quantity `n` becomes `n` create items of quantity
    /// one. The coupon discount is taken off per unit and its redemption is
    /// recorded after the order commits.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Forbidden`] for a disabled user,
    /// [`ShopError::InvalidInput`] for an empty or unsellable cart, coupon
    /// errors from [`CouponService::quote`], and [`ShopError::Timeout`] when
    /// the insert does not finish in time.
    pub async fn checkout(&self, user_id: i64, req: &CheckoutRequest) -> ShopResult<OrderDetail> {
        self.active_user(user_id).await?;
        let key = idempotency_key(req.idempotency_key.as_deref());
        if let Some(key) = key.as_deref() {
            if let Some(existing) = self.store.get_order_by_idempotency_key(user_id, key).await? {
                tracing::debug!(order_id = existing.id, "checkout replayed by idempotency key");
                return self.detail(existing).await;
            }
        }

        let lines = self.priced_cart(user_id).await?;
        let now = Utc::now();
        let quote = match req
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
        {
            Some(code) => {
                let items: Vec<QuoteItem> = lines.iter().map(|line| line.quote.clone()).collect();
                Some(self.coupons.quote(user_id, code, &items, now).await?)
            }
            None => None,
        };

        let mut items = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let discount = quote
                .as_ref()
                .and_then(|q| q.unit_discounts.get(idx).copied())
                .unwrap_or(0);
            let unit = line.quote.unit_total.saturating_sub(discount).max(0);
            let spec = OrderItemSpec::Create(CreateSpec {
                cart: line.spec.clone(),
                plan_group_id: line.group.id,
                region_id: line.group.region_id,
                line_id: line.group.line_id,
            });
            for _ in 0..line.quote.qty {
                items.push(NewOrderItem {
                    package_id: Some(line.package.id),
                    system_id: Some(line.image.id),
                    spec: spec.clone(),
                    qty: 1,
                    amount: unit,
                    status: OrderItemStatus::PendingPayment,
                    goods_type_id: line.package.goods_type_id,
                    duration_months: line.months,
                });
            }
        }

        let order_no = OrderNo::generate(OrderKind::Checkout, user_id, now).into_inner();
        let order = NewOrder {
            idempotency_key: key.clone(),
            coupon_id: quote.as_ref().map(|q| q.coupon.id),
            coupon_code: quote
                .as_ref()
                .map(|q| q.coupon.code.clone())
                .unwrap_or_default(),
            coupon_discount: quote.as_ref().map_or(0, |q| q.total_discount),
            ..NewOrder::plain(user_id, order_no, OrderStatus::PendingPayment, &self.currency)
        };
        let created = match with_timeout(
            self.composite_timeout,
            "checkout",
            self.store.create_order_from_cart(&order, &items),
        )
        .await
        {
            Ok(created) => created,
            Err(err) if err.is_unique_violation() => {
                // lost a race on the same idempotency key
                let existing = match key.as_deref() {
                    Some(key) => self.store.get_order_by_idempotency_key(user_id, key).await?,
                    None => None,
                };
                return match existing {
                    Some(existing) => self.detail(existing).await,
                    None => Err(err),
                };
            }
            Err(err) => return Err(err),
        };

        if let Some(q) = &quote {
            if let Err(err) = self
                .store
                .create_coupon_redemption(q.coupon.id, created.order.id, user_id, q.total_discount)
                .await
            {
                tracing::warn!(
                    order_id = created.order.id,
                    coupon_id = q.coupon.id,
                    error = %err,
                    "coupon redemption not recorded"
                );
            }
        }
        self.publish(&created.event);
        tracing::info!(
            order_id = created.order.id,
            order_no = %created.order.order_no,
            user_id,
            items = created.items.len(),
            total = created.order.total_amount,
            coupon_discount = created.order.coupon_discount,
            "checkout completed"
        );
        self.detail(created.order).await
    }

    // ------------------------------------------------------------------
    // VPS action orders
    // ------------------------------------------------------------------

    /// Creates a paid renewal order in `pending_payment`.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for a foreign VPS and
    /// [`ShopError::Conflict`] while another action order on it is open.
    pub async fn create_renew_order(
        &self,
        user_id: i64,
        vps_id: i64,
        req: &RenewRequest,
    ) -> ShopResult<OrderDetail> {
        self.active_user(user_id).await?;
        let vps = self.owned_vps(user_id, vps_id).await?;
        if self.has_pending_renew_order(user_id, vps.id).await? {
            return Err(ShopError::Conflict(format!("vps {vps_id} has an open order")));
        }
        let months = if req.duration_months > 0 {
            req.duration_months
        } else if req.renew_days > 0 {
            (req.renew_days + 29) / 30
        } else {
            1
        };
        let renew_days = if req.renew_days > 0 {
            req.renew_days
        } else {
            months.saturating_mul(30)
        };
        let monthly = self.monthly_price(&vps).await?;
        let amount = monthly
            .checked_mul(months)
            .ok_or_else(|| ShopError::InvalidInput("renewal amount overflows".to_string()))?;
        let spec = OrderItemSpec::Renew(RenewSpec {
            vps_id: vps.id,
            renew_days,
            duration_months: months,
        });
        let item = NewOrderItem::for_vps(spec, amount, vps.goods_type_id, months);
        let order_no = OrderNo::generate(OrderKind::Renew, user_id, Utc::now()).into_inner();
        let order = NewOrder::plain(user_id, order_no, OrderStatus::PendingPayment, &self.currency);
        let created = self.create_action_order(&order, &[item]).await?;
        self.detail(created.order).await
    }

    /// Creates and immediately approves a free emergency renewal.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Forbidden`] when the feature is off and
    /// [`ShopError::Conflict`] when the VPS is outside the expiry window,
    /// was emergency-renewed too recently, or has an open order.
    pub async fn create_emergency_renew_order(
        &self,
        user_id: i64,
        vps_id: i64,
    ) -> ShopResult<OrderDetail> {
        self.active_user(user_id).await?;
        let policy = EmergencyRenewPolicy::load(&*self.store).await?;
        if !policy.enabled {
            return Err(ShopError::Forbidden("emergency renewal is disabled".to_string()));
        }
        let vps = self.owned_vps(user_id, vps_id).await?;
        if self.has_pending_renew_order(user_id, vps.id).await? {
            return Err(ShopError::Conflict(format!("vps {vps_id} has an open order")));
        }
        let now = Utc::now();
        let Some(expire_at) = vps.expire_at else {
            return Err(ShopError::Conflict(format!("vps {vps_id} does not expire")));
        };
        if (expire_at - now).num_seconds() > policy.window_days.saturating_mul(86_400) {
            return Err(ShopError::Conflict(format!(
                "vps {vps_id} expires in more than {} days",
                policy.window_days
            )));
        }
        if let Some(last) = vps.last_emergency_renew_at {
            if (now - last).num_seconds() < policy.interval_hours.saturating_mul(3_600) {
                return Err(ShopError::Conflict(format!(
                    "vps {vps_id} was emergency-renewed within {} hours",
                    policy.interval_hours
                )));
            }
        }
        let spec = OrderItemSpec::EmergencyRenew(RenewSpec {
            vps_id: vps.id,
            renew_days: policy.renew_days,
            duration_months: 0,
        });
        let item = NewOrderItem::for_vps(spec, 0, vps.goods_type_id, 0);
        let order_no = OrderNo::generate(OrderKind::EmergencyRenew, user_id, now).into_inner();
        let order = NewOrder {
            pending_reason: "emergency renewal".to_string(),
            ..NewOrder::plain(user_id, order_no, OrderStatus::PendingReview, &self.currency)
        };
        let created = self.create_action_order(&order, &[item]).await?;
        self.approve(None, created.order.id).await
    }

    /// Creates a resize order. A zero charge is approved on the spot.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Forbidden`] when resizing is switched off,
    /// [`ShopError::Conflict`] for an open order or an expired VPS,
    /// [`ShopError::ResizeInProgress`] while a resize task is pending, and
    /// [`ShopError::InvalidInput`] for a shrinking disk, an unchanged spec
    /// or a package from another plan group.
    pub async fn create_resize_order(
        &self,
        user_id: i64,
        vps_id: i64,
        req: &ResizeRequest,
    ) -> ShopResult<OrderDetail> {
        self.active_user(user_id).await?;
        if !policy::resize_enabled(&*self.store).await? {
            return Err(ShopError::Forbidden("resizing is disabled".to_string()));
        }
        let vps = self.owned_vps(user_id, vps_id).await?;
        if self.has_pending_resize_order(user_id, vps.id).await? {
            return Err(ShopError::Conflict(format!("vps {vps_id} has an open order")));
        }
        if self.store.has_pending_resize_task(vps.id).await? {
            return Err(ShopError::ResizeInProgress(vps.id));
        }
        let now = Utc::now();
        if vps.expire_at.is_some_and(|at| at <= now) {
            return Err(ShopError::Conflict(format!("vps {vps_id} has expired")));
        }
        req.spec.validate()?;

        let current = self.store.get_package(vps.package_id).await?;
        let target = match req.target_package_id.filter(|id| *id > 0 && *id != current.id) {
            Some(id) => {
                let package = self.store.get_package(id).await?;
                if package.plan_group_id != current.plan_group_id {
                    return Err(ShopError::InvalidInput(format!(
                        "package {id} is not in plan group {}",
                        current.plan_group_id
                    )));
                }
                if !package.active {
                    return Err(ShopError::InvalidInput(format!("package {id} is not for sale")));
                }
                package
            }
            None => current,
        };
        let group = self.store.get_plan_group(target.plan_group_id).await?;
        pricing::validate_addons(&group, &req.spec)?;

        let target_cpu = target.cores + req.spec.add_cores;
        let target_mem_gb = target.memory_gb + req.spec.add_mem_gb;
        let target_disk_gb = target.disk_gb + req.spec.add_disk_gb;
        let target_bw_mbps = target.bandwidth_mbps + req.spec.add_bw_mbps;
        if target_disk_gb < vps.disk_gb {
            return Err(ShopError::InvalidInput(format!(
                "disk cannot shrink from {} GB to {target_disk_gb} GB",
                vps.disk_gb
            )));
        }
        if (target_cpu, target_mem_gb, target_disk_gb, target_bw_mbps)
            == (vps.cpu, vps.memory_gb, vps.disk_gb, vps.bandwidth_mbps)
        {
            return Err(ShopError::InvalidInput("resize changes nothing".to_string()));
        }

        let target_monthly = target.monthly_price + pricing::addon_monthly(&group, &req.spec).total();
        let current_monthly = self.monthly_price(&vps).await?;
        let remaining = pricing::remaining_days(vps.expire_at, now);
        let charge = round_div(
            i128::from(target_monthly - current_monthly) * i128::from(remaining),
            30,
        )
        .max(0);

        let spec = OrderItemSpec::Resize(ResizeSpec {
            vps_id: vps.id,
            spec: req.spec.clone(),
            target_package_id: target.id,
            target_cpu,
            target_mem_gb,
            target_disk_gb,
            target_bw_mbps,
            target_monthly,
            current_monthly,
            charge_amount: charge,
            scheduled_at: req.scheduled_at,
        });
        let item = NewOrderItem::for_vps(spec, charge, vps.goods_type_id, 0);
        let order_no = OrderNo::generate(OrderKind::Resize, user_id, now).into_inner();
        let order = if charge == 0 {
            NewOrder {
                pending_reason: "free resize".to_string(),
                ..NewOrder::plain(user_id, order_no, OrderStatus::PendingReview, &self.currency)
            }
        } else {
            NewOrder::plain(user_id, order_no, OrderStatus::PendingPayment, &self.currency)
        };
        let created = self.create_action_order(&order, &[item]).await?;
        if charge == 0 {
            return self.approve(None, created.order.id).await;
        }
        self.detail(created.order).await
    }

    /// Creates a refund order for the unused period, pending review.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a missing or overlong reason,
    /// [`ShopError::Conflict`] for an open order,
    /// [`ShopError::ResizeInProgress`] while a resize task is pending, and
    /// [`ShopError::Forbidden`] when nothing is left to refund.
    pub async fn create_refund_order(
        &self,
        user_id: i64,
        vps_id: i64,
        req: &RefundRequest,
    ) -> ShopResult<OrderDetail> {
        let reason = req.reason.trim();
        if reason.is_empty() {
            return Err(ShopError::InvalidInput("refund reason is required".to_string()));
        }
        if reason.chars().count() > REFUND_REASON_MAX {
            return Err(ShopError::InvalidInput(format!(
                "refund reason exceeds {REFUND_REASON_MAX} characters"
            )));
        }
        self.active_user(user_id).await?;
        let vps = self.owned_vps(user_id, vps_id).await?;
        if self.has_pending_refund_order(user_id, vps.id).await? {
            return Err(ShopError::Conflict(format!("vps {vps_id} has an open order")));
        }
        if self.store.has_pending_resize_task(vps.id).await? {
            return Err(ShopError::ResizeInProgress(vps.id));
        }
        let monthly = if vps.monthly_price > 0 {
            vps.monthly_price
        } else {
            self.store.get_order_item(vps.order_item_id).await?.amount
        };
        let now = Utc::now();
        let remaining = pricing::remaining_days(vps.expire_at, now);
        let amount = round_div(i128::from(monthly) * i128::from(remaining), 30).min(monthly);
        if amount <= 0 {
            return Err(ShopError::Forbidden(format!("vps {vps_id} has nothing left to refund")));
        }
        let spec = OrderItemSpec::Refund(RefundSpec {
            vps_id: vps.id,
            refund_amount: amount,
            reason: reason.to_string(),
            delete_on_approve: true,
        });
        let item = NewOrderItem::for_vps(spec, -amount, vps.goods_type_id, 0);
        let order_no = OrderNo::generate(OrderKind::Refund, user_id, now).into_inner();
        let order = NewOrder {
            pending_reason: reason.to_string(),
            ..NewOrder::plain(user_id, order_no, OrderStatus::PendingReview, &self.currency)
        };
        let created = self.create_action_order(&order, &[item]).await?;
        self.detail(created.order).await
    }

    // ------------------------------------------------------------------
    // Review flow
    // ------------------------------------------------------------------

    /// Approves an order under review and fulfils it. `admin_id` is `None`
    /// for automatic approvals.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Conflict`] unless the order is `pending_review`,
    /// and [`ShopError::ResizeInProgress`] when a resize task for the same
    /// VPS is already queued.
    pub async fn approve(&self, admin_id: Option<i64>, order_id: i64) -> ShopResult<OrderDetail> {
        let tasks = self.resize_tasks_for(order_id).await?;
        let cmd = OrderTransitionCmd::new(order_id, &[OrderStatus::PendingReview], OrderStatus::Approved)
            .with_items(OrderItemStatus::Approved)
            .with_payments(PaymentReview {
                status: PaymentStatus::Approved,
                reviewed_by: admin_id,
                reason: String::new(),
            })
            .approved_by(admin_id)
            .with_data(serde_json::json!({ "admin_id": admin_id }));
        let event = if tasks.is_empty() {
            with_timeout(self.composite_timeout, "approve order", self.store.transition_order(&cmd))
                .await?
                .event
        } else {
            with_timeout(
                self.composite_timeout,
                "approve resize order",
                self.store.approve_resize_order_with_tasks(&cmd, &tasks),
            )
            .await?
            .event
        };
        self.publish(&event);
        tracing::info!(order_id, admin_id = ?admin_id, resize_tasks = tasks.len(), "order approved");
        self.fulfil(order_id).await?;
        self.get_order(None, order_id).await
    }

    /// Resize tasks an order needs on approval, one per resize item.
    pub(crate) async fn resize_tasks_for(&self, order_id: i64) -> ShopResult<Vec<NewResizeTask>> {
        let items = self.store.list_order_items(order_id).await?;
        let mut tasks = Vec::new();
        for item in items.iter().filter(|item| item.action == ItemAction::Resize) {
            let OrderItemSpec::Resize(spec) = item.spec()? else {
                return Err(ShopError::Internal(format!("item {} has no resize payload", item.id)));
            };
            tasks.push(NewResizeTask {
                vps_id: spec.vps_id,
                order_id,
                order_item_id: item.id,
                scheduled_at: spec.scheduled_at,
            });
        }
        Ok(tasks)
    }

    /// Rejects an order under review with its items and open payments.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Conflict`] unless the order is `pending_review`.
    pub async fn reject(&self, admin_id: i64, order_id: i64, reason: &str) -> ShopResult<OrderDetail> {
        let mut cmd =
            OrderTransitionCmd::new(order_id, &[OrderStatus::PendingReview], OrderStatus::Rejected)
                .with_items(OrderItemStatus::Rejected)
                .with_payments(PaymentReview {
                    status: PaymentStatus::Rejected,
                    reviewed_by: Some(admin_id),
                    reason: reason.to_string(),
                })
                .with_data(serde_json::json!({ "admin_id": admin_id, "reason": reason }));
        cmd.rejected_reason = Some(reason.to_string());
        let outcome =
            with_timeout(self.composite_timeout, "reject order", self.store.transition_order(&cmd))
                .await?;
        self.release_coupon(order_id).await?;
        self.publish(&outcome.event);
        tracing::info!(order_id, admin_id, "order rejected");
        self.detail(outcome.order).await
    }

    /// Cancels an unpaid order of the user.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for a foreign order and
    /// [`ShopError::Conflict`] once the order is past review or has an
    /// approved payment.
    pub async fn cancel(&self, user_id: i64, order_id: i64) -> ShopResult<OrderDetail> {
        let order = self.owned_order(user_id, order_id).await?;
        if !order.status.is_cancelable() {
            return Err(ShopError::Conflict(format!(
                "order {order_id} is {} and cannot be canceled",
                order.status
            )));
        }
        if self.store.has_approved_payment(order.id).await? {
            return Err(ShopError::Conflict(format!("order {order_id} is already paid")));
        }
        let cmd = OrderTransitionCmd::new(
            order.id,
            &[OrderStatus::PendingPayment, OrderStatus::PendingReview],
            OrderStatus::Canceled,
        )
        .with_items(OrderItemStatus::Canceled)
        .with_payments(PaymentReview {
            status: PaymentStatus::Rejected,
            reviewed_by: None,
            reason: "order canceled".to_string(),
        })
        .with_data(serde_json::json!({ "user_id": user_id }));
        let outcome =
            with_timeout(self.composite_timeout, "cancel order", self.store.transition_order(&cmd))
                .await?;
        self.release_coupon(order.id).await?;
        self.publish(&outcome.event);
        tracing::info!(order_id, user_id, "order canceled");
        self.detail(outcome.order).await
    }

    async fn release_coupon(&self, order_id: i64) -> ShopResult<()> {
        let released = self
            .store
            .update_redemptions_for_order(order_id, RedemptionStatus::Applied, RedemptionStatus::Canceled)
            .await?;
        if released > 0 {
            tracing::info!(order_id, released, "coupon redemptions canceled");
        }
        Ok(())
    }

    /// Puts a failed order's failed create items back into provisioning.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Conflict`] unless the order is `failed` with at
    /// least one failed create item.
    pub async fn retry_provision(&self, admin_id: i64, order_id: i64) -> ShopResult<OrderDetail> {
        let order = self.store.get_order(order_id).await?;
        if order.status != OrderStatus::Failed {
            return Err(ShopError::Conflict(format!("order {order_id} is {}", order.status)));
        }
        let items = self.store.list_order_items(order_id).await?;
        let failed: Vec<&OrderItem> = items
            .iter()
            .filter(|item| item.action == ItemAction::Create && item.status == OrderItemStatus::Failed)
            .collect();
        if failed.is_empty() {
            return Err(ShopError::Conflict(format!("order {order_id} has no failed create items")));
        }
        let cmd = OrderTransitionCmd::new(order_id, &[OrderStatus::Failed], OrderStatus::Provisioning)
            .with_items_matching(
                OrderItemStatus::Approved,
                &[OrderItemStatus::Failed],
                Some(ItemAction::Create),
            )
            .with_data(serde_json::json!({ "admin_id": admin_id, "retry": failed.len() }));
        let outcome = with_timeout(
            self.composite_timeout,
            "retry provision",
            self.store.transition_order(&cmd),
        )
        .await?;
        self.publish(&outcome.event);
        tracing::info!(order_id, admin_id, items = failed.len(), "provisioning retried");
        self.fulfil(order_id).await?;
        self.get_order(None, order_id).await
    }

    /// Deletes an order and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown order.
    pub async fn delete(&self, admin_id: i64, order_id: i64) -> ShopResult<()> {
        self.store.delete_order(order_id).await?;
        tracing::info!(order_id, admin_id, "order deleted");
        Ok(())
    }
}
