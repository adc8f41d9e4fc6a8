//! Schema creation and startup migration.
//!
//! Runs on every start: create missing tables, add missing columns, run
//! sentinel-guarded backfills, create indexes. Nothing is ever dropped.

use async_trait::async_trait;
use chrono::Utc;

use super::{Backend, Migrator, SettingsStore, SqlStore};
use crate::domain::CartSpec;
use crate::error::ShopResult;

/// Setting that marks the legacy money conversion as done.
pub(crate) const MONEY_SENTINEL: &str = "money_cents_migrated";

/// `CREATE TABLE` templates; `{pk}` and `{ts}` are filled per dialect.
const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value_json TEXT NOT NULL DEFAULT '',
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id {pk},
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        phone TEXT NOT NULL DEFAULT '',
        password_hash TEXT NOT NULL DEFAULT '',
        role TEXT NOT NULL DEFAULT 'user',
        status TEXT NOT NULL DEFAULT 'active',
        permission_group_id BIGINT,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS goods_types (
        id {pk},
        code TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        sort_order BIGINT NOT NULL DEFAULT 0,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS regions (
        id {pk},
        goods_type_id BIGINT NOT NULL DEFAULT 0,
        code TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS plan_groups (
        id {pk},
        goods_type_id BIGINT NOT NULL DEFAULT 0,
        region_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        line_id BIGINT NOT NULL DEFAULT 0,
        unit_core BIGINT NOT NULL DEFAULT 0,
        unit_mem BIGINT NOT NULL DEFAULT 0,
        unit_disk BIGINT NOT NULL DEFAULT 0,
        unit_bw BIGINT NOT NULL DEFAULT 0,
        add_core_min BIGINT NOT NULL DEFAULT 0,
        add_core_max BIGINT NOT NULL DEFAULT 0,
        add_core_step BIGINT NOT NULL DEFAULT 1,
        add_mem_min BIGINT NOT NULL DEFAULT 0,
        add_mem_max BIGINT NOT NULL DEFAULT 0,
        add_mem_step BIGINT NOT NULL DEFAULT 1,
        add_disk_min BIGINT NOT NULL DEFAULT 0,
        add_disk_max BIGINT NOT NULL DEFAULT 0,
        add_disk_step BIGINT NOT NULL DEFAULT 1,
        add_bw_min BIGINT NOT NULL DEFAULT 0,
        add_bw_max BIGINT NOT NULL DEFAULT 0,
        add_bw_step BIGINT NOT NULL DEFAULT 1,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        visible BOOLEAN NOT NULL DEFAULT TRUE,
        sort_order BIGINT NOT NULL DEFAULT 0,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS packages (
        id {pk},
        goods_type_id BIGINT NOT NULL DEFAULT 0,
        plan_group_id BIGINT NOT NULL,
        product_id BIGINT NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        cores BIGINT NOT NULL DEFAULT 0,
        memory_gb BIGINT NOT NULL DEFAULT 0,
        disk_gb BIGINT NOT NULL DEFAULT 0,
        bandwidth_mbps BIGINT NOT NULL DEFAULT 0,
        port_num BIGINT NOT NULL DEFAULT 0,
        monthly_price BIGINT NOT NULL DEFAULT 0,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        visible BOOLEAN NOT NULL DEFAULT TRUE,
        sort_order BIGINT NOT NULL DEFAULT 0,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS system_images (
        id {pk},
        image_id BIGINT NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        image_type TEXT NOT NULL DEFAULT '',
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS line_system_images (
        id {pk},
        line_id BIGINT NOT NULL,
        system_image_id BIGINT NOT NULL,
        created_at {ts} NOT NULL,
        UNIQUE (line_id, system_image_id)
    )",
    "CREATE TABLE IF NOT EXISTS billing_cycles (
        id {pk},
        name TEXT NOT NULL,
        months BIGINT NOT NULL,
        multiplier_permille BIGINT NOT NULL DEFAULT 1000,
        min_qty BIGINT NOT NULL DEFAULT 1,
        max_qty BIGINT NOT NULL DEFAULT 0,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        sort_order BIGINT NOT NULL DEFAULT 0,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS cart_items (
        id {pk},
        user_id BIGINT NOT NULL,
        package_id BIGINT NOT NULL,
        system_id BIGINT NOT NULL,
        spec_json TEXT NOT NULL DEFAULT '',
        qty BIGINT NOT NULL DEFAULT 1,
        amount BIGINT NOT NULL DEFAULT 0,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id {pk},
        user_id BIGINT NOT NULL,
        order_no TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        total_amount BIGINT NOT NULL DEFAULT 0,
        currency TEXT NOT NULL DEFAULT 'CNY',
        idempotency_key TEXT,
        coupon_id BIGINT,
        coupon_code TEXT NOT NULL DEFAULT '',
        coupon_discount BIGINT NOT NULL DEFAULT 0,
        pending_reason TEXT NOT NULL DEFAULT '',
        approved_by BIGINT,
        approved_at {ts},
        rejected_reason TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS order_items (
        id {pk},
        order_id BIGINT NOT NULL,
        package_id BIGINT,
        system_id BIGINT,
        spec_json TEXT NOT NULL DEFAULT '',
        qty BIGINT NOT NULL DEFAULT 1,
        amount BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        goods_type_id BIGINT NOT NULL DEFAULT 0,
        automation_instance_id TEXT,
        action TEXT NOT NULL DEFAULT 'create',
        duration_months BIGINT NOT NULL DEFAULT 1,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS order_payments (
        id {pk},
        order_id BIGINT NOT NULL,
        user_id BIGINT NOT NULL,
        method TEXT NOT NULL,
        amount BIGINT NOT NULL,
        currency TEXT NOT NULL,
        trade_no TEXT NOT NULL,
        note TEXT NOT NULL DEFAULT '',
        screenshot_url TEXT,
        status TEXT NOT NULL,
        idempotency_key TEXT,
        reviewed_by BIGINT,
        review_reason TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS order_events (
        id {pk},
        order_id BIGINT NOT NULL,
        seq BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        data_json TEXT NOT NULL DEFAULT '{}',
        created_at {ts} NOT NULL,
        UNIQUE (order_id, seq)
    )",
    "CREATE TABLE IF NOT EXISTS vps_instances (
        id {pk},
        user_id BIGINT NOT NULL,
        order_item_id BIGINT NOT NULL DEFAULT 0,
        automation_instance_id TEXT NOT NULL DEFAULT '',
        goods_type_id BIGINT NOT NULL DEFAULT 0,
        name TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        region_id BIGINT NOT NULL DEFAULT 0,
        line_id BIGINT NOT NULL DEFAULT 0,
        package_id BIGINT NOT NULL DEFAULT 0,
        package_name TEXT NOT NULL DEFAULT '',
        cpu BIGINT NOT NULL DEFAULT 0,
        memory_gb BIGINT NOT NULL DEFAULT 0,
        disk_gb BIGINT NOT NULL DEFAULT 0,
        bandwidth_mbps BIGINT NOT NULL DEFAULT 0,
        port_num BIGINT NOT NULL DEFAULT 0,
        monthly_price BIGINT NOT NULL DEFAULT 0,
        spec_json TEXT NOT NULL DEFAULT '',
        system_id BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'provisioning',
        automation_state BIGINT NOT NULL DEFAULT 0,
        admin_status TEXT NOT NULL DEFAULT 'normal',
        expire_at {ts},
        panel_url_cache TEXT,
        access_info_json TEXT,
        last_emergency_renew_at {ts},
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS provision_jobs (
        id {pk},
        order_id BIGINT NOT NULL,
        order_item_id BIGINT NOT NULL UNIQUE,
        host_id BIGINT NOT NULL DEFAULT 0,
        host_name TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        attempts BIGINT NOT NULL DEFAULT 0,
        next_run_at {ts} NOT NULL,
        last_error TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS resize_tasks (
        id {pk},
        vps_id BIGINT NOT NULL,
        order_id BIGINT NOT NULL,
        order_item_id BIGINT NOT NULL,
        status TEXT NOT NULL,
        scheduled_at {ts},
        started_at {ts},
        finished_at {ts},
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_wallets (
        id {pk},
        user_id BIGINT NOT NULL UNIQUE,
        balance BIGINT NOT NULL DEFAULT 0,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wallet_transactions (
        id {pk},
        user_id BIGINT NOT NULL,
        amount BIGINT NOT NULL,
        tx_type TEXT NOT NULL,
        ref_type TEXT NOT NULL DEFAULT '',
        ref_id BIGINT NOT NULL DEFAULT 0,
        note TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wallet_orders (
        id {pk},
        user_id BIGINT NOT NULL,
        order_type TEXT NOT NULL,
        amount BIGINT NOT NULL,
        currency TEXT NOT NULL,
        status TEXT NOT NULL,
        meta_json TEXT NOT NULL DEFAULT '{}',
        reviewed_by BIGINT,
        review_reason TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coupon_product_groups (
        id {pk},
        name TEXT NOT NULL,
        scope TEXT NOT NULL DEFAULT 'all',
        rules_json TEXT NOT NULL DEFAULT '',
        goods_type_id BIGINT NOT NULL DEFAULT 0,
        region_id BIGINT NOT NULL DEFAULT 0,
        plan_group_id BIGINT NOT NULL DEFAULT 0,
        package_id BIGINT NOT NULL DEFAULT 0,
        addon_core BIGINT NOT NULL DEFAULT 0,
        addon_mem_gb BIGINT NOT NULL DEFAULT 0,
        addon_disk_gb BIGINT NOT NULL DEFAULT 0,
        addon_bw_mbps BIGINT NOT NULL DEFAULT 0,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coupons (
        id {pk},
        code TEXT NOT NULL UNIQUE,
        discount_permille BIGINT NOT NULL,
        product_group_id BIGINT NOT NULL,
        total_limit BIGINT NOT NULL DEFAULT -1,
        per_user_limit BIGINT NOT NULL DEFAULT -1,
        starts_at {ts},
        ends_at {ts},
        new_user_only BOOLEAN NOT NULL DEFAULT FALSE,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        note TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coupon_redemptions (
        id {pk},
        coupon_id BIGINT NOT NULL,
        order_id BIGINT NOT NULL,
        user_id BIGINT NOT NULL,
        status TEXT NOT NULL,
        discount_amount BIGINT NOT NULL DEFAULT 0,
        created_at {ts} NOT NULL,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS automation_logs (
        id {pk},
        order_id BIGINT NOT NULL DEFAULT 0,
        order_item_id BIGINT NOT NULL DEFAULT 0,
        action TEXT NOT NULL,
        request_json TEXT NOT NULL DEFAULT '',
        response_json TEXT NOT NULL DEFAULT '',
        success BOOLEAN NOT NULL DEFAULT FALSE,
        message TEXT NOT NULL DEFAULT '',
        created_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS verification_codes (
        id {pk},
        channel TEXT NOT NULL,
        receiver TEXT NOT NULL,
        purpose TEXT NOT NULL,
        code TEXT NOT NULL,
        expires_at {ts} NOT NULL,
        used BOOLEAN NOT NULL DEFAULT FALSE,
        created_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS captchas (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL,
        expires_at {ts} NOT NULL,
        created_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS email_templates (
        id {pk},
        name TEXT NOT NULL UNIQUE,
        subject TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL DEFAULT '',
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        updated_at {ts} NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS push_tokens (
        id {pk},
        user_id BIGINT NOT NULL,
        platform TEXT NOT NULL,
        token TEXT NOT NULL UNIQUE,
        updated_at {ts} NOT NULL
    )",
];

/// Columns introduced after the first schema; added to older databases.
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("orders", "coupon_id", "BIGINT"),
    ("orders", "coupon_code", "TEXT NOT NULL DEFAULT ''"),
    ("orders", "coupon_discount", "BIGINT NOT NULL DEFAULT 0"),
    ("order_items", "action", "TEXT NOT NULL DEFAULT 'create'"),
    ("order_items", "duration_months", "BIGINT NOT NULL DEFAULT 1"),
    ("order_items", "goods_type_id", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "package_id", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "package_name", "TEXT NOT NULL DEFAULT ''"),
    ("vps_instances", "cpu", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "memory_gb", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "disk_gb", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "bandwidth_mbps", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "port_num", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "monthly_price", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "region_id", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "line_id", "BIGINT NOT NULL DEFAULT 0"),
    ("vps_instances", "last_emergency_renew_at", "{ts}"),
    ("coupon_product_groups", "rules_json", "TEXT NOT NULL DEFAULT ''"),
];

/// Index definitions.
struct IndexDef {
    name: &'static str,
    table: &'static str,
    columns: &'static str,
    unique: bool,
    predicate: Option<&'static str>,
}

const INDEXES: &[IndexDef] = &[
    IndexDef {
        name: "uq_orders_user_idem",
        table: "orders",
        columns: "user_id, idempotency_key",
        unique: true,
        predicate: Some("idempotency_key IS NOT NULL"),
    },
    IndexDef {
        name: "uq_order_payments_trade_no",
        table: "order_payments",
        columns: "trade_no",
        unique: true,
        predicate: None,
    },
    IndexDef {
        name: "uq_order_payments_idem",
        table: "order_payments",
        columns: "order_id, idempotency_key",
        unique: true,
        predicate: Some("idempotency_key IS NOT NULL"),
    },
    IndexDef {
        name: "idx_orders_user",
        table: "orders",
        columns: "user_id, status",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_order_items_order",
        table: "order_items",
        columns: "order_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_cart_items_user",
        table: "cart_items",
        columns: "user_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_vps_instances_user",
        table: "vps_instances",
        columns: "user_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_vps_instances_item",
        table: "vps_instances",
        columns: "order_item_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_vps_instances_expire",
        table: "vps_instances",
        columns: "expire_at",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_provision_jobs_due",
        table: "provision_jobs",
        columns: "status, next_run_at",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_resize_tasks_vps",
        table: "resize_tasks",
        columns: "vps_id, status",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_wallet_transactions_ref",
        table: "wallet_transactions",
        columns: "user_id, ref_type, ref_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_coupon_redemptions_coupon",
        table: "coupon_redemptions",
        columns: "coupon_id, user_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_coupon_redemptions_order",
        table: "coupon_redemptions",
        columns: "order_id",
        unique: false,
        predicate: None,
    },
    IndexDef {
        name: "idx_automation_logs_order",
        table: "automation_logs",
        columns: "order_id",
        unique: false,
        predicate: None,
    },
];

/// Legacy decimal money columns, converted to minor units once.
const MONEY_COLUMNS: &[(&str, &[&str])] = &[
    ("plan_groups", &["unit_core", "unit_mem", "unit_disk", "unit_bw"]),
    ("packages", &["monthly_price"]),
    ("cart_items", &["amount"]),
    ("orders", &["total_amount"]),
    ("order_items", &["amount"]),
    ("vps_instances", &["monthly_price"]),
    ("order_payments", &["amount"]),
    ("user_wallets", &["balance"]),
    ("wallet_transactions", &["amount"]),
    ("wallet_orders", &["amount"]),
];

impl IndexDef {
    fn ddl(&self, partial_unique: bool) -> String {
        // Without partial unique support the index keeps its name but loses
        // uniqueness; the application-level lookups still dedupe.
        let (unique, predicate) = match (self.unique, self.predicate) {
            (true, Some(_)) if !partial_unique => (false, None),
            other => other,
        };
        let mut sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.name,
            self.table,
            self.columns
        );
        if let Some(pred) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(pred);
        }
        sql
    }
}

fn money_update_sql(table: &str, columns: &[&str]) -> String {
    let sets: Vec<String> = columns
        .iter()
        .map(|c| format!("{c} = CAST(ROUND(CAST({c} AS NUMERIC) * 100) AS BIGINT)"))
        .collect();
    format!("UPDATE {table} SET {}", sets.join(", "))
}

/// Snapshot columns of a VPS row before backfill.
#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    order_item_id: i64,
    spec_json: String,
    package_id: i64,
    package_name: String,
    cpu: i64,
    memory_gb: i64,
    disk_gb: i64,
    bandwidth_mbps: i64,
    port_num: i64,
    monthly_price: i64,
    region: String,
    region_id: i64,
    line_id: i64,
}

impl SnapshotRow {
    const fn is_complete(&self) -> bool {
        self.package_id != 0
            && self.cpu != 0
            && self.memory_gb != 0
            && self.disk_gb != 0
            && self.bandwidth_mbps != 0
            && self.region_id != 0
            && self.line_id != 0
    }

    /// Addon spec of the row. Accepts both the bare cart spec and the
    /// tagged create payload.
    fn addons(&self) -> CartSpec {
        let value: serde_json::Value =
            serde_json::from_str(&self.spec_json).unwrap_or(serde_json::Value::Null);
        let inner = value.get("cart").cloned().unwrap_or(value);
        serde_json::from_value(inner).unwrap_or_default()
    }
}

macro_rules! impl_migrator {
    ($db:ty) => {
        impl SqlStore<$db> {
            async fn column_exists(&self, table: &str, column: &str) -> ShopResult<bool> {
                let n: i64 = sqlx::query_scalar(<$db as Backend>::DIALECT.column_exists_sql())
                    .bind(table)
                    .bind(column)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(n > 0)
            }

            async fn create_tables(&self) -> ShopResult<()> {
                let dialect = <$db as Backend>::DIALECT;
                for ddl in TABLES {
                    sqlx::query(&dialect.render(ddl)).execute(&self.pool).await?;
                }
                Ok(())
            }

            async fn add_missing_columns(&self) -> ShopResult<()> {
                let dialect = <$db as Backend>::DIALECT;
                for (table, column, ddl) in ADDED_COLUMNS {
                    if self.column_exists(table, column).await? {
                        continue;
                    }
                    let sql = format!(
                        "ALTER TABLE {table} ADD COLUMN {column} {}",
                        dialect.render(ddl)
                    );
                    sqlx::query(&sql).execute(&self.pool).await?;
                    tracing::info!(table, column, "added missing column");
                }
                Ok(())
            }

            async fn create_indexes(&self) -> ShopResult<()> {
                let partial = <$db as Backend>::DIALECT.supports_partial_unique_index();
                for index in INDEXES {
                    sqlx::query(&index.ddl(partial)).execute(&self.pool).await?;
                }
                Ok(())
            }

            async fn migrate_money(&self, forced: bool) -> ShopResult<bool> {
                let done = self
                    .get_setting(MONEY_SENTINEL)
                    .await?
                    .is_some_and(|v| crate::config::parse_bool(Some(v.trim_matches('"'))) == Some(true));
                if done && !forced {
                    return Ok(false);
                }
                let mut tx = self.pool.begin().await?;
                for (table, columns) in MONEY_COLUMNS {
                    sqlx::query(&money_update_sql(table, columns))
                        .execute(&mut *tx)
                        .await?;
                }
                sqlx::query(
                    "INSERT INTO settings (key, value_json, updated_at) VALUES ($1, '1', $2) \
                     ON CONFLICT (key) DO UPDATE SET value_json = excluded.value_json, \
                     updated_at = excluded.updated_at",
                )
                .bind(MONEY_SENTINEL)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(true)
            }

            async fn backfill_vps_snapshots(&self) -> ShopResult<u64> {
                let rows: Vec<SnapshotRow> = sqlx::query_as(
                    "SELECT id, order_item_id, spec_json, package_id, package_name, cpu, memory_gb, \
                     disk_gb, bandwidth_mbps, port_num, monthly_price, region, region_id, line_id \
                     FROM vps_instances WHERE order_item_id <> 0",
                )
                .fetch_all(&self.pool)
                .await?;
                let mut updated = 0;
                for mut row in rows {
                    if row.is_complete() {
                        continue;
                    }
                    let item_package: Option<Option<i64>> =
                        sqlx::query_scalar("SELECT package_id FROM order_items WHERE id = $1")
                            .bind(row.order_item_id)
                            .fetch_optional(&self.pool)
                            .await?;
                    let Some(package_id) = item_package.flatten().filter(|id| *id > 0) else {
                        continue;
                    };
                    let package: Option<crate::domain::Package> =
                        sqlx::query_as("SELECT * FROM packages WHERE id = $1")
                            .bind(package_id)
                            .fetch_optional(&self.pool)
                            .await?;
                    let Some(package) = package else {
                        continue;
                    };
                    let group: Option<crate::domain::PlanGroup> =
                        sqlx::query_as("SELECT * FROM plan_groups WHERE id = $1")
                            .bind(package.plan_group_id)
                            .fetch_optional(&self.pool)
                            .await?;
                    let group = group.unwrap_or_default();
                    let region_name: Option<String> =
                        sqlx::query_scalar("SELECT name FROM regions WHERE id = $1")
                            .bind(group.region_id)
                            .fetch_optional(&self.pool)
                            .await?;

                    let add = row.addons();
                    let price = package.monthly_price
                        + add.add_cores * group.unit_core
                        + add.add_mem_gb * group.unit_mem
                        + add.add_disk_gb * group.unit_disk
                        + add.add_bw_mbps * group.unit_bw;
                    let fill = |cur: &mut i64, v: i64| {
                        if *cur == 0 {
                            *cur = v;
                        }
                    };
                    fill(&mut row.package_id, package.id);
                    fill(&mut row.cpu, package.cores + add.add_cores);
                    fill(&mut row.memory_gb, package.memory_gb + add.add_mem_gb);
                    fill(&mut row.disk_gb, package.disk_gb + add.add_disk_gb);
                    fill(&mut row.bandwidth_mbps, package.bandwidth_mbps + add.add_bw_mbps);
                    fill(&mut row.port_num, package.port_num);
                    fill(&mut row.monthly_price, price);
                    fill(&mut row.region_id, group.region_id);
                    fill(&mut row.line_id, group.line_id);
                    if row.package_name.is_empty() {
                        row.package_name = package.name.clone();
                    }
                    if row.region.is_empty() {
                        row.region = region_name.unwrap_or_default();
                    }

                    sqlx::query(
                        "UPDATE vps_instances SET package_id = $1, package_name = $2, cpu = $3, \
                         memory_gb = $4, disk_gb = $5, bandwidth_mbps = $6, port_num = $7, \
                         monthly_price = $8, region = $9, region_id = $10, line_id = $11, \
                         updated_at = $12 WHERE id = $13",
                    )
                    .bind(row.package_id)
                    .bind(&row.package_name)
                    .bind(row.cpu)
                    .bind(row.memory_gb)
                    .bind(row.disk_gb)
                    .bind(row.bandwidth_mbps)
                    .bind(row.port_num)
                    .bind(row.monthly_price)
                    .bind(&row.region)
                    .bind(row.region_id)
                    .bind(row.line_id)
                    .bind(Utc::now())
                    .bind(row.id)
                    .execute(&self.pool)
                    .await?;
                    updated += 1;
                }
                Ok(updated)
            }
        }

        #[async_trait]
        impl Migrator for SqlStore<$db> {
            async fn migrate(&self, money_migration_forced: bool) -> ShopResult<()> {
                self.create_tables().await?;
                self.add_missing_columns().await?;
                if self.migrate_money(money_migration_forced).await? {
                    tracing::info!(forced = money_migration_forced, "money columns converted to minor units");
                }
                let backfilled = self.backfill_vps_snapshots().await?;
                if backfilled > 0 {
                    tracing::info!(rows = backfilled, "vps snapshot columns backfilled");
                }
                self.create_indexes().await?;
                tracing::info!(dialect = ?<$db as Backend>::DIALECT, "schema migrated");
                Ok(())
            }
        }
    };
}

impl_migrator!(sqlx::Sqlite);
impl_migrator!(sqlx::Postgres);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;
    use crate::domain::PlanGroup;

    #[test]
    fn partial_unique_index_downgrades_when_unsupported() {
        let Some(idx) = INDEXES.iter().find(|i| i.name == "uq_orders_user_idem") else {
            panic!("index missing");
        };
        assert_eq!(
            idx.ddl(true),
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_orders_user_idem ON orders (user_id, idempotency_key) \
             WHERE idempotency_key IS NOT NULL"
        );
        assert_eq!(
            idx.ddl(false),
            "CREATE INDEX IF NOT EXISTS uq_orders_user_idem ON orders (user_id, idempotency_key)"
        );
    }

    #[test]
    fn money_update_rounds_each_column() {
        let sql = money_update_sql("packages", &["monthly_price"]);
        assert_eq!(
            sql,
            "UPDATE packages SET monthly_price = CAST(ROUND(CAST(monthly_price AS NUMERIC) * 100) AS BIGINT)"
        );
    }

    #[tokio::test]
    async fn rerunning_migration_is_a_no_op() {
        let store = test_support::store().await;
        let (group, _, _) = test_support::catalog(&store).await;
        // a second run must not multiply prices again
        let Ok(()) = store.migrate(false).await else {
            panic!("second migration failed");
        };
        let Ok(reloaded) = store.get_plan_group(group.id).await else {
            panic!("plan group vanished");
        };
        assert_eq!(reloaded.unit_core, 1000);
        let Ok(sentinel) = store.get_setting(MONEY_SENTINEL).await else {
            panic!("settings read failed");
        };
        assert_eq!(sentinel.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn forced_money_migration_reconverts() {
        let store = test_support::store().await;
        let Ok(group) = store
            .create_plan_group(&PlanGroup {
                region_id: 1,
                name: "legacy".to_string(),
                unit_core: 12,
                ..PlanGroup::default()
            })
            .await
        else {
            panic!("create plan group failed");
        };
        let Ok(()) = store.migrate(true).await else {
            panic!("forced migration failed");
        };
        let Ok(reloaded) = store.get_plan_group(group.id).await else {
            panic!("plan group vanished");
        };
        assert_eq!(reloaded.unit_core, 1200);
    }
}
