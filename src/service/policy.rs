//! Runtime business switches read from the `settings` table.

use crate::config::parse_bool;
use crate::error::ShopResult;
use crate::persistence::EntityStore;

/// Setting keys.
pub mod keys {
    /// Master switch for free emergency renewals.
    pub const EMERGENCY_RENEW_ENABLED: &str = "emergency_renew_enabled";
    /// How close to expiry an emergency renewal is allowed.
    pub const EMERGENCY_RENEW_WINDOW_DAYS: &str = "emergency_renew_window_days";
    /// Days granted per emergency renewal.
    pub const EMERGENCY_RENEW_DAYS: &str = "emergency_renew_days";
    /// Minimum gap between two emergency renewals of one VPS.
    pub const EMERGENCY_RENEW_INTERVAL_HOURS: &str = "emergency_renew_interval_hours";
    /// Master switch for resize orders.
    pub const RESIZE_ENABLED: &str = "resize_enabled";
}

// values may be stored as JSON strings
fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

async fn setting_bool(store: &dyn EntityStore, key: &str, default: bool) -> ShopResult<bool> {
    let raw = store.get_setting(key).await?;
    Ok(parse_bool(raw.as_deref().map(unquote)).unwrap_or(default))
}

async fn setting_i64(store: &dyn EntityStore, key: &str, default: i64) -> ShopResult<i64> {
    let raw = store.get_setting(key).await?;
    Ok(raw
        .as_deref()
        .and_then(|v| unquote(v).parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default))
}

/// Emergency renewal rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyRenewPolicy {
    /// Whether the feature is on.
    pub enabled: bool,
    /// The VPS must expire within this many days.
    pub window_days: i64,
    /// Days added per renewal.
    pub renew_days: i64,
    /// Hours between two renewals of the same VPS.
    pub interval_hours: i64,
}

impl Default for EmergencyRenewPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            window_days: 7,
            renew_days: 1,
            interval_hours: 720,
        }
    }
}

impl EmergencyRenewPolicy {
    /// Reads the policy, falling back to defaults for missing or malformed
    /// values.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn load(store: &dyn EntityStore) -> ShopResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: setting_bool(store, keys::EMERGENCY_RENEW_ENABLED, defaults.enabled).await?,
            window_days: setting_i64(store, keys::EMERGENCY_RENEW_WINDOW_DAYS, defaults.window_days)
                .await?,
            renew_days: setting_i64(store, keys::EMERGENCY_RENEW_DAYS, defaults.renew_days).await?,
            interval_hours: setting_i64(
                store,
                keys::EMERGENCY_RENEW_INTERVAL_HOURS,
                defaults.interval_hours,
            )
            .await?,
        })
    }
}

/// Whether resize orders are accepted. Defaults to `true`.
///
/// # Errors
///
/// Propagates store failures.
pub async fn resize_enabled(store: &dyn EntityStore) -> ShopResult<bool> {
    setting_bool(store, keys::RESIZE_ENABLED, true).await
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;

    #[tokio::test]
    async fn defaults_apply_when_unset() {
        let store = test_support::store().await;
        let Ok(policy) = EmergencyRenewPolicy::load(&*store).await else {
            panic!("load failed");
        };
        assert_eq!(policy, EmergencyRenewPolicy::default());
        let Ok(true) = resize_enabled(&*store).await else {
            panic!("resize should default on");
        };
    }

    #[tokio::test]
    async fn stored_values_override_and_junk_is_ignored() {
        let store = test_support::store().await;
        for (key, value) in [
            (keys::EMERGENCY_RENEW_ENABLED, "\"true\""),
            (keys::EMERGENCY_RENEW_WINDOW_DAYS, "3"),
            (keys::EMERGENCY_RENEW_DAYS, "abc"),
            (keys::RESIZE_ENABLED, "0"),
        ] {
            tokio_test::assert_ok!(store.set_setting(key, value).await);
        }
        let Ok(policy) = EmergencyRenewPolicy::load(&*store).await else {
            panic!("load failed");
        };
        assert!(policy.enabled);
        assert_eq!(policy.window_days, 3);
        assert_eq!(policy.renew_days, 1);
        let Ok(false) = resize_enabled(&*store).await else {
            panic!("resize switch ignored");
        };
    }
}
