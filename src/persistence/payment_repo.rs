//! `PaymentStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::{OrderTransitionCmd, PaymentStore, PaymentSubmitted, SqlStore, found, touched};
use crate::domain::{
    NewPayment, OrderPayment, PaymentStatus, WalletAdjustment, placeholder_trade_no,
};
use crate::error::ShopResult;

macro_rules! impl_payment_store {
    ($db:ty) => {
        impl SqlStore<$db> {
            async fn insert_payment_tx(
                tx: &mut sqlx::Transaction<'_, $db>,
                payment: &NewPayment,
            ) -> ShopResult<OrderPayment> {
                let now = Utc::now();
                let trade_no = if payment.trade_no.trim().is_empty() {
                    placeholder_trade_no(payment.order_id, now)
                } else {
                    payment.trade_no.trim().to_string()
                };
                let row = sqlx::query_as(
                    "INSERT INTO order_payments (order_id, user_id, method, amount, currency, trade_no, \
                     note, screenshot_url, status, idempotency_key, review_reason, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, '', $11, $11) RETURNING *",
                )
                .bind(payment.order_id)
                .bind(payment.user_id)
                .bind(&payment.method)
                .bind(payment.amount)
                .bind(&payment.currency)
                .bind(trade_no)
                .bind(&payment.note)
                .bind(payment.screenshot_url.as_deref())
                .bind(payment.status.as_str())
                .bind(payment.idempotency_key.as_deref())
                .bind(now)
                .fetch_one(&mut **tx)
                .await?;
                Ok(row)
            }
        }

        #[async_trait]
        impl PaymentStore for SqlStore<$db> {
            async fn create_payment(&self, payment: &NewPayment) -> ShopResult<OrderPayment> {
                let mut tx = self.pool.begin().await?;
                let row = Self::insert_payment_tx(&mut tx, payment).await?;
                tx.commit().await?;
                Ok(row)
            }

            async fn get_payment(&self, id: i64) -> ShopResult<OrderPayment> {
                let row = sqlx::query_as("SELECT * FROM order_payments WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "payment", id)
            }

            async fn get_payment_by_trade_no(&self, trade_no: &str) -> ShopResult<Option<OrderPayment>> {
                let row = sqlx::query_as("SELECT * FROM order_payments WHERE trade_no = $1")
                    .bind(trade_no)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(row)
            }

            async fn get_payment_by_idempotency_key(
                &self,
                order_id: i64,
                key: &str,
            ) -> ShopResult<Option<OrderPayment>> {
                let row = sqlx::query_as(
                    "SELECT * FROM order_payments WHERE order_id = $1 AND idempotency_key = $2",
                )
                .bind(order_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_payments(&self, order_id: i64) -> ShopResult<Vec<OrderPayment>> {
                let rows = sqlx::query_as("SELECT * FROM order_payments WHERE order_id = $1 ORDER BY id")
                    .bind(order_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn list_payments_by_status(
                &self,
                status: PaymentStatus,
                limit: i64,
                offset: i64,
            ) -> ShopResult<Vec<OrderPayment>> {
                let rows = sqlx::query_as(
                    "SELECT * FROM order_payments WHERE status = $1 ORDER BY id LIMIT $2 OFFSET $3",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                Ok(rows)
            }

            async fn update_payment_status(
                &self,
                id: i64,
                status: PaymentStatus,
                reviewed_by: Option<i64>,
                reason: &str,
            ) -> ShopResult<()> {
                let done = sqlx::query(
                    "UPDATE order_payments SET status = $1, reviewed_by = $2, review_reason = $3, \
                     updated_at = $4 WHERE id = $5",
                )
                .bind(status.as_str())
                .bind(reviewed_by)
                .bind(reason)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
                touched(done.rows_affected(), "payment", id)
            }

            async fn update_payment_trade_no(&self, id: i64, trade_no: &str) -> ShopResult<()> {
                let done =
                    sqlx::query("UPDATE order_payments SET trade_no = $1, updated_at = $2 WHERE id = $3")
                        .bind(trade_no)
                        .bind(Utc::now())
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                touched(done.rows_affected(), "payment", id)
            }

            async fn submit_payment(
                &self,
                payment: &NewPayment,
                debit: Option<&WalletAdjustment>,
                transition: &OrderTransitionCmd,
            ) -> ShopResult<PaymentSubmitted> {
                let mut tx = self.pool.begin().await?;
                Self::lock_order(&mut tx, transition.order_id).await?;
                let row = Self::insert_payment_tx(&mut tx, payment).await?;
                let wallet = match debit {
                    Some(adj) => Some(Self::adjust_wallet_tx(&mut tx, adj).await?),
                    None => None,
                };
                let outcome = Self::transition_tx(&mut tx, transition).await?;
                tx.commit().await?;
                Ok(PaymentSubmitted {
                    payment: row,
                    order: outcome.order,
                    event: outcome.event,
                    wallet,
                })
            }

            async fn has_approved_payment(&self, order_id: i64) -> ShopResult<bool> {
                let n: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM order_payments WHERE order_id = $1 AND status = $2",
                )
                .bind(order_id)
                .bind(PaymentStatus::Approved.as_str())
                .fetch_one(&self.pool)
                .await?;
                Ok(n > 0)
            }
        }
    };
}

impl_payment_store!(sqlx::Sqlite);
impl_payment_store!(sqlx::Postgres);
