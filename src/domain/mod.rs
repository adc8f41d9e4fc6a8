//! Domain layer: entities, status enums, typed payloads and the event bus.
//!
//! Nothing in here touches the database or the network. Row structs derive
//! `sqlx::FromRow` so both store adapters can decode them directly.

pub mod catalog;
pub mod coupon;
pub mod event_bus;
pub mod jobs;
pub mod money;
pub mod order;
pub mod order_event;
pub mod order_no;
pub mod peripheral;
pub mod spec;
pub mod status;
pub mod user;
pub mod vps;
pub mod wallet;

pub use catalog::{
    AddonKind, AddonRange, BillingCycle, GoodsType, Package, PlanGroup, Region, SystemImage,
};
pub use coupon::{
    Coupon, CouponProductGroup, CouponProductRule, CouponRedemption, NewCoupon,
    NewCouponProductGroup, QuoteItem,
};
pub use event_bus::EventBus;
pub use jobs::{
    NewResizeTask, ProvisionJob, ProvisionJobUpsert, ResizeTask, provision_retry_delay_secs,
};
pub use order::{
    CartItem, NewCartItem, NewOrder, NewOrderItem, NewPayment, Order, OrderItem, OrderPayment,
    placeholder_trade_no,
};
pub use order_event::{OrderEvent, ShopEvent};
pub use order_no::{OrderKind, OrderNo};
pub use peripheral::{
    AutomationLog, Captcha, EmailTemplate, NewAutomationLog, PushToken, VerificationCode,
};
pub use spec::{CartSpec, CreateSpec, OrderItemSpec, RefundSpec, RenewSpec, ResizeSpec};
pub use status::{
    CouponScope, ItemAction, OrderItemStatus, OrderStatus, OrderTransition, ParseStatusError,
    PaymentStatus, ProvisionJobStatus, RedemptionStatus, ResizeTaskStatus, UserRole, UserStatus,
    VpsAdminStatus, VpsStatus, VpsStatusClass, WalletOrderStatus, WalletOrderType,
};
pub use user::{NewUser, User};
pub use vps::{NewVpsInstance, VpsInstance, VpsReconciliation, VpsSnapshot};
pub use wallet::{NewWalletOrder, Wallet, WalletAdjustment, WalletOrder, WalletTransaction};
