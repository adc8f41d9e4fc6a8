//! Scheduler queues: `ProvisionJobStore` and `ResizeTaskStore` over SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::tx::quoted;
use super::{ProvisionJobStore, ResizeTaskStore, SqlStore, touched};
use crate::domain::{ProvisionJob, ProvisionJobStatus, ProvisionJobUpsert, ResizeTask, ResizeTaskStatus};
use crate::error::ShopResult;

/// Which timestamp column a resize status stamps.
const fn resize_stamp_column(status: ResizeTaskStatus) -> Option<&'static str> {
    match status {
        ResizeTaskStatus::Running => Some("started_at"),
        ResizeTaskStatus::Done | ResizeTaskStatus::Failed => Some("finished_at"),
        ResizeTaskStatus::Pending => None,
    }
}

macro_rules! impl_job_stores {
    ($db:ty) => {
        #[async_trait]
        impl ProvisionJobStore for SqlStore<$db> {
            async fn upsert_provision_job(&self, job: &ProvisionJobUpsert) -> ShopResult<ProvisionJob> {
                let row = sqlx::query_as(
                    "INSERT INTO provision_jobs (order_id, order_item_id, host_id, host_name, status, \
                     attempts, next_run_at, last_error, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
                     ON CONFLICT (order_item_id) DO UPDATE SET order_id = excluded.order_id, \
                     host_id = excluded.host_id, host_name = excluded.host_name, \
                     status = excluded.status, attempts = excluded.attempts, \
                     next_run_at = excluded.next_run_at, last_error = excluded.last_error, \
                     updated_at = excluded.updated_at \
                     RETURNING *",
                )
                .bind(job.order_id)
                .bind(job.order_item_id)
                .bind(job.host_id)
                .bind(&job.host_name)
                .bind(job.status.as_str())
                .bind(job.attempts)
                .bind(job.next_run_at)
                .bind(&job.last_error)
                .bind(Utc::now())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }

            async fn list_due_provision_jobs(
                &self,
                now: DateTime<Utc>,
                limit: i64,
            ) -> ShopResult<Vec<ProvisionJob>> {
                let sql = format!(
                    "SELECT * FROM provision_jobs WHERE status IN ({}) AND next_run_at <= $1 \
                     ORDER BY id LIMIT $2",
                    quoted(ProvisionJobStatus::DUE.iter().map(|s| s.as_str()))
                );
                let rows = sqlx::query_as(&sql)
                    .bind(now)
                    .bind(if limit > 0 { limit } else { 20 })
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }

            async fn get_provision_job_by_item(&self, item_id: i64) -> ShopResult<Option<ProvisionJob>> {
                let row = sqlx::query_as("SELECT * FROM provision_jobs WHERE order_item_id = $1")
                    .bind(item_id)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(row)
            }
        }

        #[async_trait]
        impl ResizeTaskStore for SqlStore<$db> {
            async fn list_due_resize_tasks(
                &self,
                now: DateTime<Utc>,
                limit: i64,
            ) -> ShopResult<Vec<ResizeTask>> {
                // unscheduled tasks sort first on both engines
                let rows = sqlx::query_as(
                    "SELECT * FROM resize_tasks WHERE status = $1 \
                     AND (scheduled_at IS NULL OR scheduled_at <= $2) \
                     ORDER BY CASE WHEN scheduled_at IS NULL THEN 0 ELSE 1 END, scheduled_at, id \
                     LIMIT $3",
                )
                .bind(ResizeTaskStatus::Pending.as_str())
                .bind(now)
                .bind(if limit > 0 { limit } else { 20 })
                .fetch_all(&self.pool)
                .await?;
                Ok(rows)
            }

            async fn has_pending_resize_task(&self, vps_id: i64) -> ShopResult<bool> {
                let n: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM resize_tasks WHERE vps_id = $1 AND status IN ($2, $3)",
                )
                .bind(vps_id)
                .bind(ResizeTaskStatus::Pending.as_str())
                .bind(ResizeTaskStatus::Running.as_str())
                .fetch_one(&self.pool)
                .await?;
                Ok(n > 0)
            }

            async fn update_resize_task_status(
                &self,
                id: i64,
                status: ResizeTaskStatus,
                at: DateTime<Utc>,
            ) -> ShopResult<()> {
                let stamp = resize_stamp_column(status)
                    .map(|col| format!(", {col} = $2"))
                    .unwrap_or_default();
                let sql = format!("UPDATE resize_tasks SET status = $1, updated_at = $2{stamp} WHERE id = $3");
                let done = sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(at)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                touched(done.rows_affected(), "resize task", id)
            }

            async fn list_resize_tasks(&self, vps_id: i64) -> ShopResult<Vec<ResizeTask>> {
                let rows = sqlx::query_as("SELECT * FROM resize_tasks WHERE vps_id = $1 ORDER BY id")
                    .bind(vps_id)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows)
            }
        }
    };
}

impl_job_stores!(sqlx::Sqlite);
impl_job_stores!(sqlx::Postgres);
