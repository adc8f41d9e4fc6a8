//! Wallet service: balances, ledger and wallet orders.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::domain::{
    EventBus, NewWalletOrder, ShopEvent, Wallet, WalletAdjustment, WalletOrder, WalletOrderType,
    WalletTransaction,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::{EntityStore, WalletOrderReview};

/// A user's top-up, withdrawal or refund request.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct WalletOrderRequest {
    /// Request kind.
    pub order_type: WalletOrderType,
    /// Positive amount in minor units.
    pub amount: i64,
    /// Currency; defaults to the shop currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Extra data such as payout account details.
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Admin balance change.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct AdminAdjustRequest {
    /// Signed change.
    pub delta: i64,
    /// Free text.
    #[serde(default)]
    pub note: String,
}

/// Wallet operations. Balance changes are published as
/// [`ShopEvent::WalletAdjusted`] after commit.
#[derive(Debug, Clone)]
pub struct WalletService {
    store: Arc<dyn EntityStore>,
    event_bus: EventBus,
    currency: String,
}

impl WalletService {
    /// Creates a new `WalletService`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, event_bus: EventBus, currency: &str) -> Self {
        Self {
            store,
            event_bus,
            currency: currency.to_string(),
        }
    }

    fn publish(&self, user_id: i64, delta: i64, wallet: &Wallet) {
        let _ = self.event_bus.publish(ShopEvent::WalletAdjusted {
            user_id,
            delta,
            balance: wallet.balance,
            timestamp: Utc::now(),
        });
    }

    /// The user's wallet, created with a zero balance on first access.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_wallet(&self, user_id: i64) -> ShopResult<Wallet> {
        self.store.get_wallet(user_id).await
    }

    /// Ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<WalletTransaction>> {
        self.store.list_wallet_transactions(user_id, limit, offset).await
    }

    /// Admin credit or debit.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a zero delta and
    /// [`ShopError::InsufficientBalance`] when a debit would overdraw.
    pub async fn admin_adjust(
        &self,
        admin_id: i64,
        user_id: i64,
        req: &AdminAdjustRequest,
    ) -> ShopResult<Wallet> {
        if req.delta == 0 {
            return Err(ShopError::InvalidInput("delta must not be zero".to_string()));
        }
        let tx_type = if req.delta > 0 { "credit" } else { "debit" };
        let adj = WalletAdjustment::new(user_id, req.delta, tx_type, "admin", admin_id).with_note(&req.note);
        let wallet = self.store.adjust_wallet_balance(&adj).await?;
        self.publish(user_id, req.delta, &wallet);
        tracing::info!(user_id, admin_id, delta = req.delta, balance = wallet.balance, "wallet adjusted by admin");
        Ok(wallet)
    }

    /// Files a wallet order for review.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a non-positive amount and
    /// [`ShopError::InsufficientBalance`] for a withdrawal above the
    /// current balance.
    pub async fn create_order(&self, user_id: i64, req: &WalletOrderRequest) -> ShopResult<WalletOrder> {
        if req.amount <= 0 {
            return Err(ShopError::InvalidInput("amount must be positive".to_string()));
        }
        if req.order_type == WalletOrderType::Withdraw
            && self.store.get_wallet(user_id).await?.balance < req.amount
        {
            return Err(ShopError::InsufficientBalance);
        }
        let meta_json = if req.meta.is_null() {
            "{}".to_string()
        } else {
            serde_json::to_string(&req.meta)?
        };
        let order = self
            .store
            .create_wallet_order(&NewWalletOrder {
                user_id,
                order_type: req.order_type,
                amount: req.amount,
                currency: req
                    .currency
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| self.currency.clone()),
                meta_json,
            })
            .await?;
        tracing::info!(user_id, wallet_order_id = order.id, order_type = %order.order_type, "wallet order created");
        Ok(order)
    }

    /// Wallet orders, optionally of one user.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_orders(
        &self,
        user_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> ShopResult<Vec<WalletOrder>> {
        self.store.list_wallet_orders(user_id, limit, offset).await
    }

    /// Approves or rejects a wallet order. Approval credits recharges and
    /// refunds and debits withdrawals in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::Conflict`] when the order was already reviewed
    /// and [`ShopError::InsufficientBalance`] when a withdrawal can no
    /// longer be covered.
    pub async fn review_order(
        &self,
        admin_id: i64,
        id: i64,
        approve: bool,
        reason: &str,
    ) -> ShopResult<WalletOrder> {
        let current = self.store.get_wallet_order(id).await?;
        let delta = match current.order_type {
            WalletOrderType::Recharge | WalletOrderType::Refund => current.amount,
            WalletOrderType::Withdraw => -current.amount,
        };
        let adjustment = WalletAdjustment::new(
            current.user_id,
            delta,
            current.order_type.as_str(),
            "wallet_order",
            current.id,
        )
        .with_note(reason);
        let (order, wallet) = self
            .store
            .review_wallet_order(&WalletOrderReview {
                id,
                approve,
                admin_id,
                reason: reason.to_string(),
                adjustment: Some(adjustment),
            })
            .await?;
        if let Some(wallet) = wallet {
            self.publish(order.user_id, delta, &wallet);
        }
        tracing::info!(wallet_order_id = id, admin_id, status = %order.status, "wallet order reviewed");
        Ok(order)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::WalletOrderStatus;
    use crate::persistence::test_support;

    fn service(store: &Arc<dyn EntityStore>) -> (WalletService, EventBus) {
        let bus = EventBus::new(16);
        (WalletService::new(Arc::clone(store), bus.clone(), "CNY"), bus)
    }

    #[tokio::test]
    async fn admin_adjust_publishes_event() {
        let store = test_support::store().await;
        let (wallets, bus) = service(&store);
        let mut rx = bus.subscribe();
        let req = AdminAdjustRequest {
            delta: 500,
            note: "promo".to_string(),
        };
        let Ok(wallet) = wallets.admin_adjust(1, 7, &req).await else {
            panic!("adjust failed");
        };
        assert_eq!(wallet.balance, 500);
        let Ok(ShopEvent::WalletAdjusted { user_id, balance, .. }) = rx.recv().await else {
            panic!("no wallet event");
        };
        assert_eq!((user_id, balance), (7, 500));

        let zero = AdminAdjustRequest {
            delta: 0,
            note: String::new(),
        };
        tokio_test::assert_err!(wallets.admin_adjust(1, 7, &zero).await);
    }

    #[tokio::test]
    async fn withdraw_above_balance_is_refused() {
        let store = test_support::store().await;
        let (wallets, _) = service(&store);
        let req = WalletOrderRequest {
            order_type: WalletOrderType::Withdraw,
            amount: 100,
            currency: None,
            meta: serde_json::Value::Null,
        };
        let Err(ShopError::InsufficientBalance) = wallets.create_order(3, &req).await else {
            panic!("overdrawn withdrawal accepted");
        };
    }

    #[tokio::test]
    async fn approved_withdrawal_debits_and_rejected_recharge_does_not() {
        let store = test_support::store().await;
        let (wallets, _) = service(&store);
        let Ok(_) = wallets
            .admin_adjust(
                1,
                3,
                &AdminAdjustRequest {
                    delta: 1000,
                    note: String::new(),
                },
            )
            .await
        else {
            panic!("seed failed");
        };
        let Ok(withdraw) = wallets
            .create_order(
                3,
                &WalletOrderRequest {
                    order_type: WalletOrderType::Withdraw,
                    amount: 400,
                    currency: None,
                    meta: serde_json::json!({"account": "x"}),
                },
            )
            .await
        else {
            panic!("withdraw failed");
        };
        assert_eq!(withdraw.currency, "CNY");
        let Ok(reviewed) = wallets.review_order(9, withdraw.id, true, "paid out").await else {
            panic!("review failed");
        };
        assert_eq!(reviewed.status, WalletOrderStatus::Approved);

        let Ok(recharge) = wallets
            .create_order(
                3,
                &WalletOrderRequest {
                    order_type: WalletOrderType::Recharge,
                    amount: 5000,
                    currency: Some("USD".to_string()),
                    meta: serde_json::Value::Null,
                },
            )
            .await
        else {
            panic!("recharge failed");
        };
        let Ok(rejected) = wallets.review_order(9, recharge.id, false, "no proof").await else {
            panic!("review failed");
        };
        assert_eq!(rejected.status, WalletOrderStatus::Rejected);

        let Ok(wallet) = wallets.get_wallet(3).await else {
            panic!("get wallet failed");
        };
        assert_eq!(wallet.balance, 600);
        let Err(ShopError::Conflict(_)) = wallets.review_order(9, recharge.id, true, "").await else {
            panic!("second review accepted");
        };
    }
}
