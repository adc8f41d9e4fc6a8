//! `CartStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::{CartStore, SqlStore, found, touched};
use crate::domain::{CartItem, NewCartItem};
use crate::error::ShopResult;

macro_rules! impl_cart_store {
    ($db:ty) => {
        #[async_trait]
        impl CartStore for SqlStore<$db> {
            async fn add_cart_item(&self, item: &NewCartItem) -> ShopResult<CartItem> {
                let row = sqlx::query_as(
                    "INSERT INTO cart_items (user_id, package_id, system_id, spec_json, qty, amount, \
                     created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) RETURNING *",
                )
                .bind(item.user_id)
                .bind(item.package_id)
                .bind(item.system_id)
                .bind(&item.spec_json)
                .bind(item.qty)
                .bind(item.amount)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_cart_items(&self, user_id: i64) -> ShopResult<Vec<CartItem>> {
                let rows = sqlx::query_as("SELECT * FROM cart_items WHERE user_id = $1 ORDER BY id")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn update_cart_item(&self, id: i64, item: &NewCartItem) -> ShopResult<CartItem> {
                let row = sqlx::query_as(
                    "UPDATE cart_items SET package_id = $1, system_id = $2, spec_json = $3, qty = $4, \
                     amount = $5, updated_at = $6 WHERE id = $7 AND user_id = $8 RETURNING *",
                )
                .bind(item.package_id)
                .bind(item.system_id)
                .bind(&item.spec_json)
                .bind(item.qty)
                .bind(item.amount)
                .bind(Utc::now())
                .bind(id)
                .bind(item.user_id)
                .fetch_optional(&self.pool)
                .await?;
                found(row, "cart item", id)
            }

            async fn delete_cart_item(&self, id: i64, user_id: i64) -> ShopResult<()> {
                let done = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
                    .bind(id)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "cart item", id)
            }

            async fn clear_cart(&self, user_id: i64) -> ShopResult<()> {
                sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }
    };
}

impl_cart_store!(sqlx::Sqlite);
impl_cart_store!(sqlx::Postgres);
