//! Persistence layer: the entity store.
//!
//! Each aggregate has its own async trait (`UserStore`, `OrderStore`, ...).
//! [`EntityStore`] bundles them so services can hold a single
//! `Arc<dyn EntityStore>`. One generic adapter, [`SqlStore`], implements
//! every trait for both the embedded SQLite engine and PostgreSQL; the SQL
//! is shared and the few engine differences live in [`Dialect`].
//!
//! Composites that span tables run in one transaction. Dropping a future
//! mid-flight rolls the open transaction back.

pub mod dialect;
mod schema;

mod cart_repo;
mod catalog_repo;
mod coupon_repo;
mod job_repo;
mod order_repo;
mod payment_repo;
mod peripheral_repo;
mod tx;
mod user_repo;
mod vps_repo;
mod wallet_repo;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use dialect::{Backend, Dialect};

use crate::config::{DbDriver, ShopConfig};
use crate::domain::{
    AutomationLog, BillingCycle, CartItem, Coupon, CouponProductGroup, CouponRedemption,
    EmailTemplate, GoodsType, ItemAction, NewAutomationLog, NewCartItem, NewCoupon, NewCouponProductGroup,
    NewOrder, NewOrderItem, NewPayment, NewResizeTask, NewUser, NewVpsInstance, NewWalletOrder,
    Order, OrderEvent, OrderItem, OrderItemStatus, OrderPayment, OrderStatus, Package,
    PaymentStatus, PlanGroup, ProvisionJob, ProvisionJobUpsert, PushToken, RedemptionStatus,
    Region, ResizeTask, ResizeTaskStatus, SystemImage, User, UserStatus, VerificationCode,
    VpsAdminStatus, VpsInstance, VpsReconciliation, VpsSnapshot, VpsStatus, Wallet,
    WalletAdjustment, WalletOrder, WalletTransaction,
};
use crate::error::{ShopError, ShopResult};

/// SQL-backed entity store over a `sqlx` pool.
#[derive(Debug, Clone)]
pub struct SqlStore<DB: sqlx::Database> {
    pool: sqlx::Pool<DB>,
}

impl<DB: sqlx::Database> SqlStore<DB> {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: sqlx::Pool<DB>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &sqlx::Pool<DB> {
        &self.pool
    }
}

/// Store over the embedded engine.
pub type SqliteStore = SqlStore<sqlx::Sqlite>;

/// Store over PostgreSQL.
pub type PgStore = SqlStore<sqlx::Postgres>;

// ---------------------------------------------------------------------------
// Commands and composite results
// ---------------------------------------------------------------------------

/// An order row together with its items and the `created` event.
#[derive(Debug, Clone)]
pub struct OrderCreated {
    /// The inserted order.
    pub order: Order,
    /// The inserted items, in input order.
    pub items: Vec<OrderItem>,
    /// Event `seq = 1`.
    pub event: OrderEvent,
}

/// Review decision written onto an order's open payments.
#[derive(Debug, Clone)]
pub struct PaymentReview {
    /// New status for payments still `pending_payment` or `pending_review`.
    pub status: PaymentStatus,
    /// Reviewing admin.
    pub reviewed_by: Option<i64>,
    /// Review comment.
    pub reason: String,
}

/// Guarded order status change.
///
/// Applied only when the order's current status is one of `from`; otherwise
/// the store returns [`ShopError::Conflict`].
#[derive(Debug, Clone)]
pub struct OrderTransitionCmd {
    /// Target order.
    pub order_id: i64,
    /// Allowed source statuses.
    pub from: Vec<OrderStatus>,
    /// Target status.
    pub to: OrderStatus,
    /// Reviewing admin. `approved_at` is stamped on every move to
    /// `approved` regardless.
    pub approved_by: Option<i64>,
    /// New `pending_reason`, if any.
    pub pending_reason: Option<String>,
    /// New `rejected_reason`, if any.
    pub rejected_reason: Option<String>,
    /// Status applied to every item not yet terminal.
    pub items_to: Option<OrderItemStatus>,
    /// Narrows `items_to` to items currently in one of these statuses.
    pub items_from: Option<Vec<OrderItemStatus>>,
    /// Narrows `items_to` to items of this action.
    pub items_action: Option<ItemAction>,
    /// Resize tasks inserted with the transition. Refused with
    /// [`ShopError::ResizeInProgress`] while the VPS has an open task.
    pub resize_tasks: Vec<NewResizeTask>,
    /// Decision applied to open payments.
    pub payments: Option<PaymentReview>,
    /// JSON attached to the event.
    pub event_data: serde_json::Value,
}

impl OrderTransitionCmd {
    /// A bare transition with no side effects on items or payments.
    #[must_use]
    pub fn new(order_id: i64, from: &[OrderStatus], to: OrderStatus) -> Self {
        Self {
            order_id,
            from: from.to_vec(),
            to,
            approved_by: None,
            pending_reason: None,
            rejected_reason: None,
            items_to: None,
            items_from: None,
            items_action: None,
            resize_tasks: Vec::new(),
            payments: None,
            event_data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the item status applied alongside the order.
    #[must_use]
    pub const fn with_items(mut self, status: OrderItemStatus) -> Self {
        self.items_to = Some(status);
        self
    }

    /// Moves only the items of `action` currently in one of `from`.
    #[must_use]
    pub fn with_items_matching(
        mut self,
        status: OrderItemStatus,
        from: &[OrderItemStatus],
        action: Option<ItemAction>,
    ) -> Self {
        self.items_to = Some(status);
        self.items_from = Some(from.to_vec());
        self.items_action = action;
        self
    }

    /// Queues resize tasks in the same transaction.
    #[must_use]
    pub fn with_resize_tasks(mut self, tasks: Vec<NewResizeTask>) -> Self {
        self.resize_tasks = tasks;
        self
    }

    /// Sets the decision applied to open payments.
    #[must_use]
    pub fn with_payments(mut self, review: PaymentReview) -> Self {
        self.payments = Some(review);
        self
    }

    /// Records the approving admin.
    #[must_use]
    pub const fn approved_by(mut self, admin_id: Option<i64>) -> Self {
        self.approved_by = admin_id;
        self
    }

    /// Attaches event data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }
}

/// Updated order and the event that recorded the change.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// Order after the change.
    pub order: Order,
    /// Appended event.
    pub event: OrderEvent,
}

/// Result of approving a resize order.
#[derive(Debug, Clone)]
pub struct ResizeApproval {
    /// Order after approval.
    pub order: Order,
    /// The `approved` event.
    pub event: OrderEvent,
    /// Inserted tasks.
    pub tasks: Vec<ResizeTask>,
}

/// Result of a payment submission.
#[derive(Debug, Clone)]
pub struct PaymentSubmitted {
    /// The inserted payment.
    pub payment: OrderPayment,
    /// Order after the transition.
    pub order: Order,
    /// The transition event.
    pub event: OrderEvent,
    /// Wallet snapshot when the payment was settled from the balance.
    pub wallet: Option<Wallet>,
}

/// Order listing filter.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Owner.
    pub user_id: Option<i64>,
    /// Status.
    pub status: Option<OrderStatus>,
}

/// Wallet order review decision.
#[derive(Debug, Clone)]
pub struct WalletOrderReview {
    /// Target wallet order.
    pub id: i64,
    /// Approve or reject.
    pub approve: bool,
    /// Reviewing admin.
    pub admin_id: i64,
    /// Comment.
    pub reason: String,
    /// Balance change applied on approval.
    pub adjustment: Option<WalletAdjustment>,
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user.
    async fn create_user(&self, user: &NewUser) -> ShopResult<User>;
    /// Loads a user by id.
    async fn get_user(&self, id: i64) -> ShopResult<User>;
    /// Loads a user by username.
    async fn get_user_by_username(&self, username: &str) -> ShopResult<User>;
    /// Loads a user by e-mail.
    async fn get_user_by_email(&self, email: &str) -> ShopResult<User>;
    /// Enables or disables a user.
    async fn update_user_status(&self, id: i64, status: UserStatus) -> ShopResult<()>;
    /// Lists users by id.
    async fn list_users(&self, limit: i64, offset: i64) -> ShopResult<Vec<User>>;
}

/// Catalog tables.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a goods type.
    async fn create_goods_type(&self, row: &GoodsType) -> ShopResult<GoodsType>;
    /// Lists goods types by sort order.
    async fn list_goods_types(&self) -> ShopResult<Vec<GoodsType>>;
    /// Inserts a region.
    async fn create_region(&self, row: &Region) -> ShopResult<Region>;
    /// Loads a region.
    async fn get_region(&self, id: i64) -> ShopResult<Region>;
    /// Inserts a plan group.
    async fn create_plan_group(&self, row: &PlanGroup) -> ShopResult<PlanGroup>;
    /// Loads a plan group.
    async fn get_plan_group(&self, id: i64) -> ShopResult<PlanGroup>;
    /// Lists plan groups.
    async fn list_plan_groups(&self) -> ShopResult<Vec<PlanGroup>>;
    /// Inserts a package.
    async fn create_package(&self, row: &Package) -> ShopResult<Package>;
    /// Loads a package.
    async fn get_package(&self, id: i64) -> ShopResult<Package>;
    /// Lists packages, optionally of one plan group.
    async fn list_packages(&self, plan_group_id: Option<i64>) -> ShopResult<Vec<Package>>;
    /// Inserts a system image.
    async fn create_system_image(&self, row: &SystemImage) -> ShopResult<SystemImage>;
    /// Loads a system image.
    async fn get_system_image(&self, id: i64) -> ShopResult<SystemImage>;
    /// Replaces the images offered on a network line.
    async fn set_line_system_images(&self, line_id: i64, image_ids: &[i64]) -> ShopResult<()>;
    /// Image ids offered on a network line.
    async fn list_line_system_images(&self, line_id: i64) -> ShopResult<Vec<i64>>;
    /// Inserts a billing cycle.
    async fn create_billing_cycle(&self, row: &BillingCycle) -> ShopResult<BillingCycle>;
    /// Loads a billing cycle.
    async fn get_billing_cycle(&self, id: i64) -> ShopResult<BillingCycle>;
    /// Lists billing cycles.
    async fn list_billing_cycles(&self) -> ShopResult<Vec<BillingCycle>>;
}

/// Per-user shopping cart.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Adds a line.
    async fn add_cart_item(&self, item: &NewCartItem) -> ShopResult<CartItem>;
    /// Lines of a user, oldest first.
    async fn list_cart_items(&self, user_id: i64) -> ShopResult<Vec<CartItem>>;
    /// Rewrites a line owned by `item.user_id`.
    async fn update_cart_item(&self, id: i64, item: &NewCartItem) -> ShopResult<CartItem>;
    /// Removes a line owned by `user_id`.
    async fn delete_cart_item(&self, id: i64, user_id: i64) -> ShopResult<()>;
    /// Removes every line of a user.
    async fn clear_cart(&self, user_id: i64) -> ShopResult<()>;
}

/// Orders, order items and the order-level composites.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order with its items and the `created` event, then clears
    /// the owner's cart. All or nothing.
    async fn create_order_from_cart(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> ShopResult<OrderCreated>;
    /// Same as [`OrderStore::create_order_from_cart`] without touching the
    /// cart.
    async fn create_order_with_items(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> ShopResult<OrderCreated>;
    /// Loads an order.
    async fn get_order(&self, id: i64) -> ShopResult<Order>;
    /// Loads an order by number.
    async fn get_order_by_no(&self, order_no: &str) -> ShopResult<Order>;
    /// Looks up an order by its per-user idempotency key.
    async fn get_order_by_idempotency_key(
        &self,
        user_id: i64,
        key: &str,
    ) -> ShopResult<Option<Order>>;
    /// Lists orders, newest first.
    async fn list_orders(&self, filter: &OrderFilter, limit: i64, offset: i64)
    -> ShopResult<Vec<Order>>;
    /// Items of an order by id.
    async fn list_order_items(&self, order_id: i64) -> ShopResult<Vec<OrderItem>>;
    /// Loads an item.
    async fn get_order_item(&self, id: i64) -> ShopResult<OrderItem>;
    /// Deletes an order and everything it owns.
    async fn delete_order(&self, id: i64) -> ShopResult<()>;
    /// Whether the user has an in-progress renew, resize or refund order for
    /// the VPS.
    async fn has_pending_action_order(&self, user_id: i64, vps_id: i64) -> ShopResult<bool>;
    /// Applies a guarded status change and appends its event.
    async fn transition_order(&self, cmd: &OrderTransitionCmd) -> ShopResult<TransitionOutcome>;
    /// Approves a resize order and inserts its tasks, refusing when a task is
    /// already pending or running for any target VPS.
    async fn approve_resize_order_with_tasks(
        &self,
        cmd: &OrderTransitionCmd,
        tasks: &[NewResizeTask],
    ) -> ShopResult<ResizeApproval>;
    /// Sets one item's status.
    async fn update_order_item_status(&self, id: i64, status: OrderItemStatus) -> ShopResult<()>;
    /// Records the provider handle on an item.
    async fn set_order_item_automation_id(&self, id: i64, instance_id: &str) -> ShopResult<()>;
    /// Re-derives the order status from its items. Returns the event when
    /// the status changed.
    async fn recompute_order_status(&self, order_id: i64) -> ShopResult<Option<TransitionOutcome>>;
    /// Orders of the user in `approved`, `provisioning` or `active`.
    async fn count_successful_orders(&self, user_id: i64) -> ShopResult<i64>;
}

/// Per-order event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends an event with the next sequence number.
    async fn append_event(
        &self,
        order_id: i64,
        event_type: &str,
        data: &serde_json::Value,
    ) -> ShopResult<OrderEvent>;
    /// Events of an order by sequence.
    async fn list_events(&self, order_id: i64) -> ShopResult<Vec<OrderEvent>>;
}

/// Order payments.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a payment; an empty trade number gets a placeholder.
    async fn create_payment(&self, payment: &NewPayment) -> ShopResult<OrderPayment>;
    /// Loads a payment.
    async fn get_payment(&self, id: i64) -> ShopResult<OrderPayment>;
    /// Looks up a payment by trade number.
    async fn get_payment_by_trade_no(&self, trade_no: &str) -> ShopResult<Option<OrderPayment>>;
    /// Looks up a payment by its per-order idempotency key.
    async fn get_payment_by_idempotency_key(
        &self,
        order_id: i64,
        key: &str,
    ) -> ShopResult<Option<OrderPayment>>;
    /// Payments of an order.
    async fn list_payments(&self, order_id: i64) -> ShopResult<Vec<OrderPayment>>;
    /// Payments in a status, oldest first.
    async fn list_payments_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<OrderPayment>>;
    /// Records a review decision.
    async fn update_payment_status(
        &self,
        id: i64,
        status: PaymentStatus,
        reviewed_by: Option<i64>,
        reason: &str,
    ) -> ShopResult<()>;
    /// Replaces the trade number.
    async fn update_payment_trade_no(&self, id: i64, trade_no: &str) -> ShopResult<()>;
    /// Inserts a payment, optionally debits the wallet, and moves the order,
    /// in one transaction.
    async fn submit_payment(
        &self,
        payment: &NewPayment,
        debit: Option<&WalletAdjustment>,
        transition: &OrderTransitionCmd,
    ) -> ShopResult<PaymentSubmitted>;
    /// Whether the order has an approved payment.
    async fn has_approved_payment(&self, order_id: i64) -> ShopResult<bool>;
}

/// VPS instances.
#[async_trait]
pub trait VpsStore: Send + Sync {
    /// Inserts an instance.
    async fn create_instance(&self, vps: &NewVpsInstance) -> ShopResult<VpsInstance>;
    /// Loads an instance.
    async fn get_instance(&self, id: i64) -> ShopResult<VpsInstance>;
    /// The instance created by an item, if any.
    async fn get_instance_by_order_item(&self, item_id: i64) -> ShopResult<Option<VpsInstance>>;
    /// Lists instances, optionally of one user.
    async fn list_instances(
        &self,
        user_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<VpsInstance>>;
    /// Writes a status update and reconciles the owning item and order.
    async fn update_instance_status(
        &self,
        id: i64,
        status: VpsStatus,
        automation_state: i64,
    ) -> ShopResult<VpsReconciliation>;
    /// Sets the expiry.
    async fn update_instance_expire_at(
        &self,
        id: i64,
        expire_at: Option<DateTime<Utc>>,
    ) -> ShopResult<()>;
    /// Rewrites the package snapshot.
    async fn update_instance_snapshot(&self, id: i64, snapshot: &VpsSnapshot) -> ShopResult<()>;
    /// Records a free emergency renewal.
    async fn update_instance_emergency_renew_at(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> ShopResult<()>;
    /// Sets the administrative flag.
    async fn update_instance_admin_status(
        &self,
        id: i64,
        status: VpsAdminStatus,
    ) -> ShopResult<()>;
    /// Caches panel link and login details.
    async fn update_instance_access(
        &self,
        id: i64,
        panel_url: Option<&str>,
        access_info_json: Option<&str>,
    ) -> ShopResult<()>;
    /// Deletes an instance row.
    async fn delete_instance(&self, id: i64) -> ShopResult<()>;
    /// Instances with `expire_at <= before`, soonest first. Already locked
    /// instances are included.
    async fn list_instances_expiring(&self, before: DateTime<Utc>) -> ShopResult<Vec<VpsInstance>>;
}

/// Provisioning work queue.
#[async_trait]
pub trait ProvisionJobStore: Send + Sync {
    /// Inserts or rewrites the job of an item.
    async fn upsert_provision_job(&self, job: &ProvisionJobUpsert) -> ShopResult<ProvisionJob>;
    /// Jobs due at `now`, oldest first.
    async fn list_due_provision_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ShopResult<Vec<ProvisionJob>>;
    /// The job of an item, if any.
    async fn get_provision_job_by_item(&self, item_id: i64) -> ShopResult<Option<ProvisionJob>>;
}

/// Scheduled resizes.
#[async_trait]
pub trait ResizeTaskStore: Send + Sync {
    /// Pending tasks due at `now`, by schedule then id.
    async fn list_due_resize_tasks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ShopResult<Vec<ResizeTask>>;
    /// Whether a pending or running task exists for the VPS.
    async fn has_pending_resize_task(&self, vps_id: i64) -> ShopResult<bool>;
    /// Moves a task, stamping `started_at` on `running` and `finished_at` on
    /// `done` / `failed`.
    async fn update_resize_task_status(
        &self,
        id: i64,
        status: ResizeTaskStatus,
        at: DateTime<Utc>,
    ) -> ShopResult<()>;
    /// Tasks of a VPS by id.
    async fn list_resize_tasks(&self, vps_id: i64) -> ShopResult<Vec<ResizeTask>>;
}

/// Wallet ledger.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// The user's wallet; created with a zero balance on first read.
    async fn get_wallet(&self, user_id: i64) -> ShopResult<Wallet>;
    /// Applies a signed delta under a row lock and appends a transaction.
    async fn adjust_wallet_balance(&self, adj: &WalletAdjustment) -> ShopResult<Wallet>;
    /// Whether a transaction with this reference exists.
    async fn has_wallet_transaction(
        &self,
        user_id: i64,
        ref_type: &str,
        ref_id: i64,
    ) -> ShopResult<bool>;
    /// Ledger entries, newest first.
    async fn list_wallet_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<WalletTransaction>>;
    /// Inserts a wallet order in `pending_review`.
    async fn create_wallet_order(&self, order: &NewWalletOrder) -> ShopResult<WalletOrder>;
    /// Loads a wallet order.
    async fn get_wallet_order(&self, id: i64) -> ShopResult<WalletOrder>;
    /// Lists wallet orders, newest first.
    async fn list_wallet_orders(
        &self,
        user_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<WalletOrder>>;
    /// Approves or rejects a pending wallet order, applying the adjustment
    /// in the same transaction.
    async fn review_wallet_order(
        &self,
        review: &WalletOrderReview,
    ) -> ShopResult<(WalletOrder, Option<Wallet>)>;
}

/// Coupons, product groups and redemptions.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Inserts a product group.
    async fn create_coupon_group(
        &self,
        group: &NewCouponProductGroup,
    ) -> ShopResult<CouponProductGroup>;
    /// Loads a product group.
    async fn get_coupon_group(&self, id: i64) -> ShopResult<CouponProductGroup>;
    /// Lists product groups.
    async fn list_coupon_groups(&self) -> ShopResult<Vec<CouponProductGroup>>;
    /// Deletes a product group.
    async fn delete_coupon_group(&self, id: i64) -> ShopResult<()>;
    /// Inserts a coupon; the code must already be normalised.
    async fn create_coupon(&self, coupon: &NewCoupon) -> ShopResult<Coupon>;
    /// Loads a coupon.
    async fn get_coupon(&self, id: i64) -> ShopResult<Coupon>;
    /// Loads a coupon by code, normalising the input.
    async fn get_coupon_by_code(&self, code: &str) -> ShopResult<Coupon>;
    /// Lists coupons, newest first.
    async fn list_coupons(&self, limit: i64, offset: i64) -> ShopResult<Vec<Coupon>>;
    /// Enables or disables a coupon.
    async fn set_coupon_active(&self, id: i64, active: bool) -> ShopResult<()>;
    /// Deletes a coupon.
    async fn delete_coupon(&self, id: i64) -> ShopResult<()>;
    /// Redemptions of a coupon in the given statuses, optionally of one
    /// user.
    async fn count_coupon_redemptions(
        &self,
        coupon_id: i64,
        user_id: Option<i64>,
        statuses: &[RedemptionStatus],
    ) -> ShopResult<i64>;
    /// Records a redemption.
    async fn create_coupon_redemption(
        &self,
        coupon_id: i64,
        order_id: i64,
        user_id: i64,
        discount_amount: i64,
    ) -> ShopResult<CouponRedemption>;
    /// Moves an order's redemptions from one status to another.
    async fn update_redemptions_for_order(
        &self,
        order_id: i64,
        from: RedemptionStatus,
        to: RedemptionStatus,
    ) -> ShopResult<u64>;
    /// Redemptions of an order.
    async fn list_redemptions_for_order(&self, order_id: i64) -> ShopResult<Vec<CouponRedemption>>;
}

/// Key/value runtime settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Reads a setting.
    async fn get_setting(&self, key: &str) -> ShopResult<Option<String>>;
    /// Writes a setting.
    async fn set_setting(&self, key: &str, value: &str) -> ShopResult<()>;
}

/// Tables owned by collaborators.
#[async_trait]
pub trait PeripheralStore: Send + Sync {
    /// Records an automation call.
    async fn create_automation_log(&self, log: &NewAutomationLog) -> ShopResult<AutomationLog>;
    /// Automation calls of an order.
    async fn list_automation_logs(&self, order_id: i64) -> ShopResult<Vec<AutomationLog>>;
    /// Stores a verification code.
    async fn create_verification_code(
        &self,
        channel: &str,
        receiver: &str,
        purpose: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> ShopResult<VerificationCode>;
    /// Marks the newest matching unexpired code used. Returns whether one
    /// was found.
    async fn consume_verification_code(
        &self,
        channel: &str,
        receiver: &str,
        purpose: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> ShopResult<bool>;
    /// Stores a captcha.
    async fn create_captcha(&self, id: &str, code: &str, expires_at: DateTime<Utc>)
    -> ShopResult<()>;
    /// Deletes the captcha and reports whether the answer matched in time.
    async fn consume_captcha(&self, id: &str, code: &str, now: DateTime<Utc>) -> ShopResult<bool>;
    /// Inserts or replaces a template by name.
    async fn upsert_email_template(
        &self,
        name: &str,
        subject: &str,
        body: &str,
        enabled: bool,
    ) -> ShopResult<EmailTemplate>;
    /// Loads a template by name.
    async fn get_email_template(&self, name: &str) -> ShopResult<Option<EmailTemplate>>;
    /// Registers a device token; re-registering moves it to `user_id`.
    async fn register_push_token(
        &self,
        user_id: i64,
        platform: &str,
        token: &str,
    ) -> ShopResult<PushToken>;
    /// Device tokens of a user.
    async fn list_push_tokens(&self, user_id: i64) -> ShopResult<Vec<PushToken>>;
}

/// Schema management.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Creates missing tables, columns and indexes and runs one-shot
    /// backfills. Safe to call on every start.
    async fn migrate(&self, money_migration_forced: bool) -> ShopResult<()>;
}

/// Every store trait in one object-safe bundle.
pub trait EntityStore:
    UserStore
    + CatalogStore
    + CartStore
    + OrderStore
    + EventStore
    + PaymentStore
    + VpsStore
    + ProvisionJobStore
    + ResizeTaskStore
    + WalletStore
    + CouponStore
    + SettingsStore
    + PeripheralStore
    + Migrator
    + std::fmt::Debug
{
}

impl<T> EntityStore for T where
    T: UserStore
        + CatalogStore
        + CartStore
        + OrderStore
        + EventStore
        + PaymentStore
        + VpsStore
        + ProvisionJobStore
        + ResizeTaskStore
        + WalletStore
        + CouponStore
        + SettingsStore
        + PeripheralStore
        + Migrator
        + std::fmt::Debug
{
}

// ---------------------------------------------------------------------------
// Connecting
// ---------------------------------------------------------------------------

/// Opens the configured database and returns the store.
///
/// Does not migrate; call [`Migrator::migrate`] afterwards.
///
/// # Errors
///
/// Returns [`ShopError::InvalidInput`] for a malformed DSN and
/// [`ShopError::Database`] when the connection fails.
pub async fn connect(config: &ShopConfig) -> ShopResult<Arc<dyn EntityStore>> {
    let acquire = Duration::from_secs(config.database_connect_timeout_secs);
    match config.db_driver {
        DbDriver::Sqlite => {
            let options = SqliteConnectOptions::from_str(&config.db_dsn)
                .map_err(|e| ShopError::InvalidInput(format!("invalid sqlite dsn: {e}")))?
                .create_if_missing(true)
                .busy_timeout(Duration::from_secs(5));
            let in_memory = config.db_dsn.contains(":memory:");
            let options = if in_memory {
                options
            } else {
                options.journal_mode(SqliteJournalMode::Wal)
            };
            let mut pool = SqlitePoolOptions::new()
                .max_connections(config.database_max_connections.max(1))
                .acquire_timeout(acquire);
            if in_memory {
                // the database lives only as long as its last connection
                pool = pool
                    .min_connections(1)
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None);
            }
            let pool = pool.connect_with(options).await?;
            tracing::info!(dsn = %config.db_dsn, "connected to sqlite");
            Ok(Arc::new(SqliteStore::new(pool)))
        }
        DbDriver::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections.max(1))
                .acquire_timeout(acquire)
                .connect(&config.db_dsn)
                .await?;
            tracing::info!("connected to postgres");
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

/// Connects with [`ShopConfig::in_memory`] and migrates.
///
/// # Errors
///
/// Propagates connection and migration failures.
pub async fn open_in_memory() -> ShopResult<Arc<dyn EntityStore>> {
    let store = connect(&ShopConfig::in_memory()).await?;
    store.migrate(false).await?;
    Ok(store)
}

/// Maps a missing row to [`ShopError::NotFound`] naming the entity.
pub(crate) fn found<T>(row: Option<T>, what: &str, id: impl std::fmt::Display) -> ShopResult<T> {
    row.ok_or_else(|| ShopError::NotFound(format!("{what} {id}")))
}

/// Fails with [`ShopError::NotFound`] when an update touched no row.
pub(crate) fn touched(rows: u64, what: &str, id: impl std::fmt::Display) -> ShopResult<()> {
    if rows == 0 {
        return Err(ShopError::NotFound(format!("{what} {id}")));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod test_support {
    //! Seed helpers shared by store and service tests.

    use std::sync::Arc;

    use super::{CatalogStore, EntityStore, OrderStore, UserStore, VpsStore};
    use crate::domain::{
        CartSpec, CreateSpec, NewOrder, NewOrderItem, NewUser, NewVpsInstance, OrderItemSpec,
        OrderItemStatus, OrderStatus, Package, PlanGroup, Region, SystemImage, User, VpsInstance,
        VpsSnapshot, VpsStatus,
    };

    /// Fresh migrated in-memory store.
    pub(crate) async fn store() -> Arc<dyn EntityStore> {
        let Ok(store) = super::open_in_memory().await else {
            panic!("in-memory store failed to open");
        };
        store
    }

    pub(crate) async fn user(store: &Arc<dyn EntityStore>, name: &str) -> User {
        let Ok(user) = store
            .create_user(&NewUser::customer(name, &format!("{name}@example.com")))
            .await
        else {
            panic!("create user {name} failed");
        };
        user
    }

    /// Region, plan group (line 7), package priced 99900 and image joined
    /// to the line.
    pub(crate) async fn catalog(store: &Arc<dyn EntityStore>) -> (PlanGroup, Package, SystemImage) {
        let Ok(region) = store
            .create_region(&Region {
                goods_type_id: 1,
                code: "hk".to_string(),
                name: "Hong Kong".to_string(),
                active: true,
                ..Region::default()
            })
            .await
        else {
            panic!("create region failed");
        };
        let Ok(group) = store
            .create_plan_group(&PlanGroup {
                goods_type_id: 1,
                region_id: region.id,
                name: "standard".to_string(),
                line_id: 7,
                unit_core: 1000,
                unit_mem: 500,
                unit_disk: 10,
                unit_bw: 100,
                add_core_min: 1,
                add_core_max: 8,
                add_core_step: 1,
                add_mem_min: 1,
                add_mem_max: 16,
                add_mem_step: 1,
                add_disk_min: 10,
                add_disk_max: 500,
                add_disk_step: 10,
                add_bw_min: 0,
                add_bw_max: 0,
                add_bw_step: 0,
                active: true,
                visible: true,
                ..PlanGroup::default()
            })
            .await
        else {
            panic!("create plan group failed");
        };
        let Ok(package) = store
            .create_package(&Package {
                goods_type_id: 1,
                plan_group_id: group.id,
                product_id: 100,
                name: "P".to_string(),
                cores: 2,
                memory_gb: 4,
                disk_gb: 40,
                bandwidth_mbps: 10,
                port_num: 20,
                monthly_price: 99900,
                active: true,
                visible: true,
                ..Package::default()
            })
            .await
        else {
            panic!("create package failed");
        };
        let Ok(image) = store
            .create_system_image(&SystemImage {
                image_id: 501,
                name: "debian-12".to_string(),
                image_type: "linux".to_string(),
                enabled: true,
                ..SystemImage::default()
            })
            .await
        else {
            panic!("create image failed");
        };
        let Ok(()) = store.set_line_system_images(group.line_id, &[image.id]).await else {
            panic!("join image failed");
        };
        (group, package, image)
    }

    /// A paid create order with one item whose VPS exists.
    pub(crate) async fn provisioned_vps(
        store: &Arc<dyn EntityStore>,
        user_id: i64,
        order_status: OrderStatus,
        item_status: OrderItemStatus,
        monthly: i64,
        expire_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> VpsInstance {
        let spec = OrderItemSpec::Create(CreateSpec {
            cart: CartSpec {
                duration_months: 1,
                ..CartSpec::default()
            },
            plan_group_id: 0,
            region_id: 0,
            line_id: 0,
        });
        let mut item = NewOrderItem::for_vps(spec, monthly, 1, 1);
        item.status = item_status;
        let order = NewOrder::plain(
            user_id,
            format!("ORD-{user_id}-{}", uuid::Uuid::new_v4().simple()),
            order_status,
            "CNY",
        );
        let Ok(created) = store.create_order_with_items(&order, &[item]).await else {
            panic!("create order failed");
        };
        let Some(item) = created.items.first() else {
            panic!("order has no items");
        };
        let Ok(vps) = store
            .create_instance(&NewVpsInstance {
                user_id,
                order_item_id: item.id,
                automation_instance_id: format!("host-{}", item.id),
                goods_type_id: 1,
                name: format!("vps-{}", item.id),
                region: "Hong Kong".to_string(),
                region_id: 1,
                line_id: 7,
                system_id: 1,
                snapshot: VpsSnapshot {
                    package_id: 1,
                    package_name: "P".to_string(),
                    cpu: 2,
                    memory_gb: 4,
                    disk_gb: 40,
                    bandwidth_mbps: 10,
                    port_num: 20,
                    monthly_price: monthly,
                    spec_json: "{}".to_string(),
                },
                status: VpsStatus::Running,
                expire_at,
            })
            .await
        else {
            panic!("create vps failed");
        };
        vps
    }
}
