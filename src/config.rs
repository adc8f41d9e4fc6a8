//! Storefront configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). The core layers receive the resulting [`ShopConfig`] and never
//! read the process environment themselves.

use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::ShopError;

/// Database engine selected by `DB_DRIVER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDriver {
    /// Embedded single-file engine.
    Sqlite,
    /// PostgreSQL server engine.
    Postgres,
}

impl FromStr for DbDriver {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(ShopError::InvalidInput(format!("unknown db driver: {other}"))),
        }
    }
}

/// Top-level storefront configuration.
///
/// Loaded once at startup via [`ShopConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ShopConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Database engine.
    pub db_driver: DbDriver,

    /// Connection string for the selected engine.
    pub db_dsn: String,

    /// Re-run the legacy money conversion even if the sentinel is present.
    pub money_migration_forced: bool,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,

    /// Timeout applied by services to long-running composites.
    pub composite_timeout_secs: u64,

    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,

    /// Whether the background scheduler runs in this process.
    pub scheduler_enabled: bool,

    /// Seconds between provision worker ticks.
    pub provision_tick_secs: u64,

    /// Seconds between resize worker ticks.
    pub resize_tick_secs: u64,

    /// Seconds between expiry worker ticks.
    pub expiry_tick_secs: u64,

    /// Currency assigned to new orders.
    pub default_currency: String,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_driver: DbDriver::Sqlite,
            db_dsn: "sqlite://storefront.db".to_string(),
            money_migration_forced: false,
            database_max_connections: 10,
            database_connect_timeout_secs: 5,
            composite_timeout_secs: 15,
            event_bus_capacity: 1024,
            scheduler_enabled: true,
            provision_tick_secs: 5,
            resize_tick_secs: 10,
            expiry_tick_secs: 300,
            default_currency: "CNY".to_string(),
        }
    }
}

impl ShopConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` or `DB_DRIVER` is set but cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, ShopError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ShopError::InvalidInput(format!("invalid LISTEN_ADDR: {raw}")))?,
            Err(_) => defaults.listen_addr,
        };

        let db_driver = match std::env::var("DB_DRIVER") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.db_driver,
        };

        let db_dsn = std::env::var("DB_DSN").unwrap_or(defaults.db_dsn);

        Ok(Self {
            listen_addr,
            db_driver,
            db_dsn,
            money_migration_forced: parse_env_bool(
                "MONEY_MIGRATION_FORCED",
                defaults.money_migration_forced,
            ),
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            database_connect_timeout_secs: parse_env(
                "DATABASE_CONNECT_TIMEOUT_SECS",
                defaults.database_connect_timeout_secs,
            ),
            composite_timeout_secs: parse_env(
                "COMPOSITE_TIMEOUT_SECS",
                defaults.composite_timeout_secs,
            ),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity),
            scheduler_enabled: parse_env_bool("SCHEDULER_ENABLED", defaults.scheduler_enabled),
            provision_tick_secs: parse_env("PROVISION_TICK_SECS", defaults.provision_tick_secs),
            resize_tick_secs: parse_env("RESIZE_TICK_SECS", defaults.resize_tick_secs),
            expiry_tick_secs: parse_env("EXPIRY_TICK_SECS", defaults.expiry_tick_secs),
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .unwrap_or(defaults.default_currency),
        })
    }

    /// Configuration for an in-memory SQLite store, used by tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            db_dsn: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            scheduler_enabled: false,
            ..Self::default()
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    parse_bool(std::env::var(key).ok().as_deref()).unwrap_or(default)
}

/// Parses the boolean spellings accepted in environment and settings values.
pub(crate) fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => Some(true),
        Some("false" | "0" | "no" | "off") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn driver_parses_aliases() {
        assert_eq!("SQLite".parse::<DbDriver>().ok(), Some(DbDriver::Sqlite));
        assert_eq!("pg".parse::<DbDriver>().ok(), Some(DbDriver::Postgres));
        assert!("mysql".parse::<DbDriver>().is_err());
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool(Some("TRUE")), Some(true));
        assert_eq!(parse_bool(Some(" 0 ")), Some(false));
        assert_eq!(parse_bool(Some("maybe")), None);
        assert_eq!(parse_bool(None), None);
    }

    #[test]
    fn in_memory_uses_single_connection() {
        let cfg = ShopConfig::in_memory();
        assert_eq!(cfg.db_driver, DbDriver::Sqlite);
        assert_eq!(cfg.database_max_connections, 1);
        assert!(!cfg.scheduler_enabled);
    }
}
