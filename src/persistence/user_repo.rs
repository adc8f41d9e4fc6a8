//! `UserStore` over SQL.

use async_trait::async_trait;
use chrono::Utc;

use super::{SqlStore, UserStore, found, touched};
use crate::domain::{NewUser, User, UserStatus};
use crate::error::ShopResult;

macro_rules! impl_user_store {
    ($db:ty) => {
        #[async_trait]
        impl UserStore for SqlStore<$db> {
            async fn create_user(&self, user: &NewUser) -> ShopResult<User> {
                let now = Utc::now();
                let row: User = sqlx::query_as(
                    "INSERT INTO users (username, email, phone, password_hash, role, status, \
                     created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) RETURNING *",
                )
                .bind(&user.username)
                .bind(&user.email)
                .bind(&user.phone)
                .bind(&user.password_hash)
                .bind(user.role.as_str())
                .bind(UserStatus::Active.as_str())
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn get_user(&self, id: i64) -> ShopResult<User> {
                let row = sqlx::query_as("SELECT * FROM users WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "user", id)
            }

            async fn get_user_by_username(&self, username: &str) -> ShopResult<User> {
                let row = sqlx::query_as("SELECT * FROM users WHERE username = $1")
                    .bind(username)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "user", username)
            }

            async fn get_user_by_email(&self, email: &str) -> ShopResult<User> {
                let row = sqlx::query_as("SELECT * FROM users WHERE email = $1")
                    .bind(email)
                    .fetch_optional(&self.pool)
                    .await?;
                found(row, "user", email)
            }

            async fn update_user_status(&self, id: i64, status: UserStatus) -> ShopResult<()> {
                let done = sqlx::query("UPDATE users SET status = $1, updated_at = $2 WHERE id = $3")
                    .bind(status.as_str())
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "user", id)
            }

            async fn list_users(&self, limit: i64, offset: i64) -> ShopResult<Vec<User>> {
                let rows = sqlx::query_as("SELECT * FROM users ORDER BY id LIMIT $1 OFFSET $2")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }
        }
    };
}

impl_user_store!(sqlx::Sqlite);
impl_user_store!(sqlx::Postgres);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ShopError;
    use crate::persistence::test_support;

    #[tokio::test]
    async fn duplicate_username_is_a_unique_violation() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        assert_eq!(alice.status, UserStatus::Active);

        let Err(err) = store
            .create_user(&NewUser::customer("alice", "other@example.com"))
            .await
        else {
            panic!("duplicate username accepted");
        };
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn lookups_and_status() {
        let store = test_support::store().await;
        let bob = test_support::user(&store, "bob").await;
        let Ok(by_mail) = store.get_user_by_email("bob@example.com").await else {
            panic!("lookup by email failed");
        };
        assert_eq!(by_mail.id, bob.id);

        let Ok(()) = store.update_user_status(bob.id, UserStatus::Disabled).await else {
            panic!("status update failed");
        };
        let Ok(reloaded) = store.get_user_by_username("bob").await else {
            panic!("lookup by username failed");
        };
        assert_eq!(reloaded.status, UserStatus::Disabled);

        assert!(matches!(store.get_user(9999).await, Err(ShopError::NotFound(_))));
    }
}
