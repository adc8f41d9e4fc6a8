//! Scheduler work rows: provision jobs and resize tasks.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ProvisionJobStatus, ResizeTaskStatus};

/// Provisioning work for one create item.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct ProvisionJob {
    /// Row id.
    pub id: i64,
    /// Parent order.
    pub order_id: i64,
    /// Create item; unique.
    pub order_item_id: i64,
    /// Provider host id, 0 until created.
    pub host_id: i64,
    /// Provider host name.
    pub host_name: String,
    /// Current status.
    #[sqlx(try_from = "String")]
    pub status: ProvisionJobStatus,
    /// Attempts so far.
    pub attempts: i64,
    /// Earliest next pick.
    pub next_run_at: DateTime<Utc>,
    /// Last failure message.
    pub last_error: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert-or-update command for [`ProvisionJob`].
#[derive(Debug, Clone)]
pub struct ProvisionJobUpsert {
    /// Parent order.
    pub order_id: i64,
    /// Create item.
    pub order_item_id: i64,
    /// Provider host id.
    pub host_id: i64,
    /// Provider host name.
    pub host_name: String,
    /// Status to store.
    pub status: ProvisionJobStatus,
    /// Attempts to store.
    pub attempts: i64,
    /// Earliest next pick.
    pub next_run_at: DateTime<Utc>,
    /// Failure message.
    pub last_error: String,
}

impl ProvisionJobUpsert {
    /// A fresh job due at `now`.
    #[must_use]
    pub const fn fresh(order_id: i64, order_item_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            order_item_id,
            host_id: 0,
            host_name: String::new(),
            status: ProvisionJobStatus::Pending,
            attempts: 0,
            next_run_at: now,
            last_error: String::new(),
        }
    }
}

impl From<&ProvisionJob> for ProvisionJobUpsert {
    fn from(job: &ProvisionJob) -> Self {
        Self {
            order_id: job.order_id,
            order_item_id: job.order_item_id,
            host_id: job.host_id,
            host_name: job.host_name.clone(),
            status: job.status,
            attempts: job.attempts,
            next_run_at: job.next_run_at,
            last_error: job.last_error.clone(),
        }
    }
}

/// A scheduled resize of one VPS.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct ResizeTask {
    /// Row id.
    pub id: i64,
    /// Target VPS.
    pub vps_id: i64,
    /// Parent order.
    pub order_id: i64,
    /// Resize item.
    pub order_item_id: i64,
    /// Current status.
    #[sqlx(try_from = "String")]
    pub status: ResizeTaskStatus,
    /// Earliest execution time.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Pick time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert command for [`ResizeTask`].
#[derive(Debug, Clone)]
pub struct NewResizeTask {
    /// Target VPS.
    pub vps_id: i64,
    /// Parent order.
    pub order_id: i64,
    /// Resize item.
    pub order_item_id: i64,
    /// Earliest execution time.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Back-off before the next provision attempt.
#[must_use]
pub const fn provision_retry_delay_secs(attempts: i64) -> i64 {
    if attempts > 12 {
        15
    } else if attempts > 6 {
        10
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_steps_up() {
        assert_eq!(provision_retry_delay_secs(1), 5);
        assert_eq!(provision_retry_delay_secs(6), 5);
        assert_eq!(provision_retry_delay_secs(7), 10);
        assert_eq!(provision_retry_delay_secs(13), 15);
    }
}
