//! `WalletStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::{SqlStore, WalletOrderReview, WalletStore, found};
use crate::domain::{
    NewWalletOrder, Wallet, WalletAdjustment, WalletOrder, WalletOrderStatus, WalletTransaction,
};
use crate::error::{ShopError, ShopResult};

macro_rules! impl_wallet_store {
    ($db:ty) => {
        #[async_trait]
        impl WalletStore for SqlStore<$db> {
            async fn get_wallet(&self, user_id: i64) -> ShopResult<Wallet> {
                sqlx::query(
                    "INSERT INTO user_wallets (user_id, balance, updated_at) VALUES ($1, 0, $2) \
                     ON CONFLICT (user_id) DO NOTHING",
                )
                .bind(user_id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                let wallet = sqlx::query_as("SELECT * FROM user_wallets WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(wallet)
            }

            async fn adjust_wallet_balance(&self, adj: &WalletAdjustment) -> ShopResult<Wallet> {
                let mut tx = self.pool.begin().await?;
                let wallet = Self::adjust_wallet_tx(&mut tx, adj).await?;
                tx.commit().await?;
                tracing::debug!(
                    user_id = adj.user_id,
                    delta = adj.delta,
                    balance = wallet.balance,
                    "wallet adjusted"
                );
                Ok(wallet)
            }

            async fn has_wallet_transaction(
                &self,
                user_id: i64,
                ref_type: &str,
                ref_id: i64,
            ) -> ShopResult<bool> {
                let n: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM wallet_transactions \
                     WHERE user_id = $1 AND ref_type = $2 AND ref_id = $3",
                )
                .bind(user_id)
                .bind(ref_type)
                .bind(ref_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(n > 0)
            }

            async fn list_wallet_transactions(
                &self,
                user_id: i64,
                limit: i64,
                offset: i64,
            ) -> ShopResult<Vec<WalletTransaction>> {
                let rows = sqlx::query_as(
                    "SELECT * FROM wallet_transactions WHERE user_id = $1 ORDER BY id DESC \
                     LIMIT $2 OFFSET $3",
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                Ok(rows)
            }

            async fn create_wallet_order(&self, order: &NewWalletOrder) -> ShopResult<WalletOrder> {
                let row = sqlx::query_as(
                    "INSERT INTO wallet_orders (user_id, order_type, amount, currency, status, meta_json, \
                     review_reason, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, '', $7, $7) \
                     RETURNING *",
                )
                .bind(order.user_id)
                .bind(order.order_type.as_str())
                .bind(order.amount)
                .bind(&order.currency)
                .bind(WalletOrderStatus::PendingReview.as_str())
                .bind(&order.meta_json)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn get_wallet_order(&self, id: i64) -> ShopResult<WalletOrder> {
                let row = sqlx::query_as("SELECT * FROM wallet_orders WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "wallet order", id)
            }

            async fn list_wallet_orders(
                &self,
                user_id: Option<i64>,
                limit: i64,
                offset: i64,
            ) -> ShopResult<Vec<WalletOrder>> {
                let rows = match user_id {
                    Some(user_id) => {
                        sqlx::query_as(
                            "SELECT * FROM wallet_orders WHERE user_id = $1 ORDER BY id DESC \
                             LIMIT $2 OFFSET $3",
                        )
                        .bind(user_id)
                        .bind(limit)
                        .bind(offset)
                        .fetch_all(&self.pool)
                        .await?
                    }
                    None => {
                        sqlx::query_as("SELECT * FROM wallet_orders ORDER BY id DESC LIMIT $1 OFFSET $2")
                            .bind(limit)
                            .bind(offset)
                            .fetch_all(&self.pool)
                            .await?
                    }
                };
                Ok(rows)
            }

            async fn review_wallet_order(
                &self,
                review: &WalletOrderReview,
            ) -> ShopResult<(WalletOrder, Option<Wallet>)> {
                let mut tx = self.pool.begin().await?;
                Self::lock_row(&mut tx, "wallet_orders", "id", review.id).await?;
                let current: Option<WalletOrder> = sqlx::query_as("SELECT * FROM wallet_orders WHERE id = $1")
                    .bind(review.id)
                    .fetch_optional(&mut *tx)
                    .await?;
                let current = found(current, "wallet order", review.id)?;
                if current.status != WalletOrderStatus::PendingReview {
                    return Err(ShopError::Conflict(format!(
                        "wallet order {} is already {}",
                        current.id, current.status
                    )));
                }
                let status = if review.approve {
                    WalletOrderStatus::Approved
                } else {
                    WalletOrderStatus::Rejected
                };
                let updated: WalletOrder = sqlx::query_as(
                    "UPDATE wallet_orders SET status = $1, reviewed_by = $2, review_reason = $3, \
                     updated_at = $4 WHERE id = $5 RETURNING *",
                )
                .bind(status.as_str())
                .bind(review.admin_id)
                .bind(&review.reason)
                .bind(Utc::now())
                .bind(review.id)
                .fetch_one(&mut *tx)
                .await?;
                let wallet = match (&review.adjustment, review.approve) {
                    (Some(adj), true) => Some(Self::adjust_wallet_tx(&mut tx, adj).await?),
                    _ => None,
                };
                tx.commit().await?;
                Ok((updated, wallet))
            }
        }
    };
}

impl_wallet_store!(sqlx::Sqlite);
impl_wallet_store!(sqlx::Postgres);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::WalletOrderType;
    use crate::persistence::test_support;

    #[tokio::test]
    async fn wallet_is_created_on_first_read() {
        let store = test_support::store().await;
        let Ok(wallet) = store.get_wallet(42).await else {
            panic!("get wallet failed");
        };
        assert_eq!(wallet.balance, 0);
        let Ok(again) = store.get_wallet(42).await else {
            panic!("second read failed");
        };
        assert_eq!(again.id, wallet.id);
    }

    #[tokio::test]
    async fn overdraft_changes_nothing() {
        let store = test_support::store().await;
        tokio_test::assert_ok!(
            store
                .adjust_wallet_balance(&WalletAdjustment::new(1, 5000, "credit", "admin", 0))
                .await
        );
        let result = store
            .adjust_wallet_balance(&WalletAdjustment::new(1, -6000, "debit", "order", 1))
            .await;
        let Err(ShopError::InsufficientBalance) = result else {
            panic!("overdraft accepted");
        };
        let Ok(wallet) = store.get_wallet(1).await else {
            panic!("get wallet failed");
        };
        assert_eq!(wallet.balance, 5000);
        let Ok(txs) = store.list_wallet_transactions(1, 10, 0).await else {
            panic!("list failed");
        };
        assert_eq!(txs.len(), 1);
    }

    #[tokio::test]
    async fn credit_then_debit_restores_balance() {
        let store = test_support::store().await;
        let Ok(_) = store
            .adjust_wallet_balance(&WalletAdjustment::new(7, 2500, "credit", "promo", 3))
            .await
        else {
            panic!("credit failed");
        };
        let Ok(wallet) = store
            .adjust_wallet_balance(&WalletAdjustment::new(7, -2500, "debit", "promo", 3))
            .await
        else {
            panic!("debit failed");
        };
        assert_eq!(wallet.balance, 0);
        let Ok(txs) = store.list_wallet_transactions(7, 10, 0).await else {
            panic!("list failed");
        };
        let amounts: Vec<i64> = txs.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![-2500, 2500]);
        assert_eq!(amounts.iter().sum::<i64>(), wallet.balance);
        let Ok(true) = store.has_wallet_transaction(7, "promo", 3).await else {
            panic!("reference lookup failed");
        };
        let Ok(false) = store.has_wallet_transaction(7, "promo", 4).await else {
            panic!("unknown reference found");
        };
    }

    #[tokio::test]
    async fn wallet_order_review_applies_once() {
        let store = test_support::store().await;
        let Ok(order) = store
            .create_wallet_order(&NewWalletOrder {
                user_id: 3,
                order_type: WalletOrderType::Recharge,
                amount: 1000,
                currency: "CNY".to_string(),
                meta_json: "{}".to_string(),
            })
            .await
        else {
            panic!("create failed");
        };
        let review = WalletOrderReview {
            id: order.id,
            approve: true,
            admin_id: 99,
            reason: "ok".to_string(),
            adjustment: Some(WalletAdjustment::new(3, 1000, "recharge", "wallet_order", order.id)),
        };
        let Ok((updated, Some(wallet))) = store.review_wallet_order(&review).await else {
            panic!("review failed");
        };
        assert_eq!(updated.status, WalletOrderStatus::Approved);
        assert_eq!(updated.reviewed_by, Some(99));
        assert_eq!(wallet.balance, 1000);

        tokio_test::assert_err!(store.review_wallet_order(&review).await);
        let Ok(wallet) = store.get_wallet(3).await else {
            panic!("get wallet failed");
        };
        assert_eq!(wallet.balance, 1000);
    }
}
