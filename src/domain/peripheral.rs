//! Rows owned by collaborators: automation logs, verification codes,
//! captchas, e-mail templates and push tokens.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Request/response record of one automation call.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct AutomationLog {
    /// Row id.
    pub id: i64,
    /// Order the call served.
    pub order_id: i64,
    /// Item the call served.
    pub order_item_id: i64,
    /// Operation name.
    pub action: String,
    /// Request JSON.
    pub request_json: String,
    /// Response JSON.
    pub response_json: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Summary.
    pub message: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Insert command for [`AutomationLog`].
#[derive(Debug, Clone)]
pub struct NewAutomationLog {
    /// Order the call served.
    pub order_id: i64,
    /// Item the call served.
    pub order_item_id: i64,
    /// Operation name.
    pub action: String,
    /// Request JSON.
    pub request_json: String,
    /// Response JSON.
    pub response_json: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Summary.
    pub message: String,
}

/// A one-time code sent over e-mail or SMS.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerificationCode {
    /// Row id.
    pub id: i64,
    /// `email` or `sms`.
    pub channel: String,
    /// Address or phone number.
    pub receiver: String,
    /// What the code authorises, e.g. `register`.
    pub purpose: String,
    /// The code.
    pub code: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Whether the code was consumed.
    pub used: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A stored captcha challenge.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Captcha {
    /// Opaque id handed to the client.
    pub id: String,
    /// Expected answer.
    pub code: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A named message template with `{{key}}` placeholders.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailTemplate {
    /// Row id.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Subject template.
    pub subject: String,
    /// Body template.
    pub body: String,
    /// Whether the template is used.
    pub enabled: bool,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A device registered for push notifications.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PushToken {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// `ios`, `android` or `web`.
    pub platform: String,
    /// Unique device token.
    pub token: String,
    /// Last registration time.
    pub updated_at: DateTime<Utc>,
}
