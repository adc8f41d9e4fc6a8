//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::collaborator::{AutomationProvider, PaymentProvider};
use crate::config::ShopConfig;
use crate::domain::EventBus;
use crate::persistence::EntityStore;
use crate::service::{CartService, CouponService, OrderService, VpsService, WalletService};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Backing store, for readiness checks.
    pub store: Arc<dyn EntityStore>,
    /// Order state machine and payments.
    pub orders: Arc<OrderService>,
    /// Shopping carts.
    pub carts: Arc<CartService>,
    /// Coupon administration.
    pub coupons: Arc<CouponService>,
    /// Wallets and wallet orders.
    pub wallets: Arc<WalletService>,
    /// Instance reads and status reports.
    pub vps: Arc<VpsService>,
    /// Committed state changes, also consumed by the scheduler.
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires every service over one store and bus.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        automation: Arc<dyn AutomationProvider>,
        payments: Arc<dyn PaymentProvider>,
        event_bus: EventBus,
        config: &ShopConfig,
    ) -> Self {
        let orders = OrderService::new(
            Arc::clone(&store),
            Arc::clone(&automation),
            payments,
            event_bus.clone(),
            config,
        );
        let vps = VpsService::new(Arc::clone(&store), automation, event_bus.clone());
        let wallets = WalletService::new(
            Arc::clone(&store),
            event_bus.clone(),
            &config.default_currency,
        );
        Self {
            orders: Arc::new(orders),
            carts: Arc::new(CartService::new(Arc::clone(&store))),
            coupons: Arc::new(CouponService::new(Arc::clone(&store))),
            wallets: Arc::new(wallets),
            vps: Arc::new(vps),
            event_bus,
            store,
        }
    }
}
