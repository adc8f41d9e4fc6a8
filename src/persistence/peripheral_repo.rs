//! `SettingsStore` and `PeripheralStore` over SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{PeripheralStore, SettingsStore, SqlStore};
use crate::domain::{
    AutomationLog, Captcha, EmailTemplate, NewAutomationLog, PushToken, VerificationCode,
};
use crate::error::ShopResult;

macro_rules! impl_peripheral_stores {
    ($db:ty) => {
        #[async_trait]
        impl SettingsStore for SqlStore<$db> {
            async fn get_setting(&self, key: &str) -> ShopResult<Option<String>> {
                let value = sqlx::query_scalar("SELECT value_json FROM settings WHERE key = $1")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(value)
            }

            async fn set_setting(&self, key: &str, value: &str) -> ShopResult<()> {
                sqlx::query(
                    "INSERT INTO settings (key, value_json, updated_at) VALUES ($1, $2, $3) \
                     ON CONFLICT (key) DO UPDATE SET value_json = excluded.value_json, \
                     updated_at = excluded.updated_at",
                )
                .bind(key)
                .bind(value)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }

        #[async_trait]
        impl PeripheralStore for SqlStore<$db> {
            async fn create_automation_log(&self, log: &NewAutomationLog) -> ShopResult<AutomationLog> {
                let row = sqlx::query_as(
                    "INSERT INTO automation_logs (order_id, order_item_id, action, request_json, \
                     response_json, success, message, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
                )
                .bind(log.order_id)
                .bind(log.order_item_id)
                .bind(&log.action)
                .bind(&log.request_json)
                .bind(&log.response_json)
                .bind(log.success)
                .bind(&log.message)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_automation_logs(&self, order_id: i64) -> ShopResult<Vec<AutomationLog>> {
                let rows = sqlx::query_as("SELECT * FROM automation_logs WHERE order_id = $1 ORDER BY id")
                    .bind(order_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn create_verification_code(
                &self,
                channel: &str,
                receiver: &str,
                purpose: &str,
                code: &str,
                expires_at: DateTime<Utc>,
            ) -> ShopResult<VerificationCode> {
                let row = sqlx::query_as(
                    "INSERT INTO verification_codes (channel, receiver, purpose, code, expires_at, \
                     used, created_at) VALUES ($1, $2, $3, $4, $5, FALSE, $6) RETURNING *",
                )
                .bind(channel)
                .bind(receiver.trim())
                .bind(purpose)
                .bind(code)
                .bind(expires_at)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn consume_verification_code(
                &self,
                channel: &str,
                receiver: &str,
                purpose: &str,
                code: &str,
                now: DateTime<Utc>,
            ) -> ShopResult<bool> {
                let mut tx = self.pool.begin().await?;
                let latest: Option<VerificationCode> = sqlx::query_as(
                    "SELECT * FROM verification_codes WHERE channel = $1 AND receiver = $2 \
                     AND purpose = $3 AND used = FALSE AND expires_at >= $4 \
                     ORDER BY id DESC LIMIT 1",
                )
                .bind(channel)
                .bind(receiver.trim())
                .bind(purpose)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?;
                // only the newest live code counts
                let Some(latest) = latest.filter(|c| c.code == code.trim()) else {
                    return Ok(false);
                };
                let done = sqlx::query(
                    "UPDATE verification_codes SET used = TRUE WHERE id = $1 AND used = FALSE",
                )
                .bind(latest.id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(done.rows_affected() == 1)
            }

            async fn create_captcha(
                &self,
                id: &str,
                code: &str,
                expires_at: DateTime<Utc>,
            ) -> ShopResult<()> {
                sqlx::query(
                    "INSERT INTO captchas (id, code, expires_at, created_at) VALUES ($1, $2, $3, $4)",
                )
                .bind(id)
                .bind(code)
                .bind(expires_at)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                Ok(())
            }

            async fn consume_captcha(&self, id: &str, code: &str, now: DateTime<Utc>) -> ShopResult<bool> {
                let mut tx = self.pool.begin().await?;
                let row: Option<Captcha> = sqlx::query_as("SELECT * FROM captchas WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
                let Some(row) = row else {
                    return Ok(false);
                };
                sqlx::query("DELETE FROM captchas WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(row.expires_at >= now && row.code.eq_ignore_ascii_case(code.trim()))
            }

            async fn upsert_email_template(
                &self,
                name: &str,
                subject: &str,
                body: &str,
                enabled: bool,
            ) -> ShopResult<EmailTemplate> {
                let row = sqlx::query_as(
                    "INSERT INTO email_templates (name, subject, body, enabled, updated_at) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (name) DO UPDATE SET subject = excluded.subject, \
                     body = excluded.body, enabled = excluded.enabled, updated_at = excluded.updated_at \
                     RETURNING *",
                )
                .bind(name)
                .bind(subject)
                .bind(body)
                .bind(enabled)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn get_email_template(&self, name: &str) -> ShopResult<Option<EmailTemplate>> {
                let row = sqlx::query_as("SELECT * FROM email_templates WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(row)
            }

            async fn register_push_token(
                &self,
                user_id: i64,
                platform: &str,
                token: &str,
            ) -> ShopResult<PushToken> {
                let row = sqlx::query_as(
                    "INSERT INTO push_tokens (user_id, platform, token, updated_at) \
                     VALUES ($1, $2, $3, $4) \
                     ON CONFLICT (token) DO UPDATE SET user_id = excluded.user_id, \
                     platform = excluded.platform, updated_at = excluded.updated_at \
                     RETURNING *",
                )
                .bind(user_id)
                .bind(platform)
                .bind(token)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_push_tokens(&self, user_id: i64) -> ShopResult<Vec<PushToken>> {
                let rows = sqlx::query_as("SELECT * FROM push_tokens WHERE user_id = $1 ORDER BY id")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }
        }
    };
}

impl_peripheral_stores!(sqlx::Sqlite);
impl_peripheral_stores!(sqlx::Postgres);
