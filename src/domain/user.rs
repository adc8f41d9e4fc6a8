//! Accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{UserRole, UserStatus};

/// A registered account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Unique login name.
    pub username: String,
    /// Unique e-mail address.
    pub email: String,
    /// Phone number, possibly empty.
    pub phone: String,
    /// Password hash; never serialised.
    #[serde(skip)]
    pub password_hash: String,
    /// Account role.
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    /// Account status.
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    /// Optional permission group for admins.
    pub permission_group_id: Option<i64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Insert command for [`User`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    /// Unique login name.
    pub username: String,
    /// Unique e-mail address.
    pub email: String,
    /// Phone number.
    pub phone: String,
    /// Password hash computed by the caller.
    pub password_hash: String,
    /// Account role.
    pub role: UserRole,
}

impl NewUser {
    /// A customer account with an empty phone and hash.
    #[must_use]
    pub fn customer(username: &str, email: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            phone: String::new(),
            password_hash: String::new(),
            role: UserRole::User,
        }
    }
}
