//! Wallet ledger rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{WalletOrderStatus, WalletOrderType};

/// Materialised balance of one user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct Wallet {
    /// Row id.
    pub id: i64,
    /// Owner; unique.
    pub user_id: i64,
    /// Balance in minor units, never negative.
    pub balance: i64,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger entry.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct WalletTransaction {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Signed delta.
    pub amount: i64,
    /// Entry type, e.g. `debit` or `credit`.
    pub tx_type: String,
    /// Referenced entity kind.
    pub ref_type: String,
    /// Referenced entity id.
    pub ref_id: i64,
    /// Free text.
    pub note: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Balance change command.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct WalletAdjustment {
    /// Owner.
    pub user_id: i64,
    /// Signed delta.
    pub delta: i64,
    /// Entry type.
    pub tx_type: String,
    /// Referenced entity kind.
    pub ref_type: String,
    /// Referenced entity id.
    pub ref_id: i64,
    /// Free text.
    #[serde(default)]
    pub note: String,
}

impl WalletAdjustment {
    /// Builds an adjustment.
    #[must_use]
    pub fn new(user_id: i64, delta: i64, tx_type: &str, ref_type: &str, ref_id: i64) -> Self {
        Self {
            user_id,
            delta,
            tx_type: tx_type.to_string(),
            ref_type: ref_type.to_string(),
            ref_id,
            note: String::new(),
        }
    }

    /// Attaches a note.
    #[must_use]
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }
}

/// A user-visible top-up, withdrawal or refund request.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct WalletOrder {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Request kind.
    #[sqlx(try_from = "String")]
    pub order_type: WalletOrderType,
    /// Positive amount.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Review status.
    #[sqlx(try_from = "String")]
    pub status: WalletOrderStatus,
    /// Extra data as JSON.
    pub meta_json: String,
    /// Reviewing admin.
    pub reviewed_by: Option<i64>,
    /// Review comment.
    pub review_reason: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert command for [`WalletOrder`].
#[derive(Debug, Clone)]
pub struct NewWalletOrder {
    /// Owner.
    pub user_id: i64,
    /// Request kind.
    pub order_type: WalletOrderType,
    /// Positive amount.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Extra data as JSON.
    pub meta_json: String,
}
