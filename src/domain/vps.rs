//! VPS instances and their package snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{VpsAdminStatus, VpsStatus};

/// A provisioned virtual machine.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct VpsInstance {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Create item that produced the instance.
    pub order_item_id: i64,
    /// Provider handle.
    pub automation_instance_id: String,
    /// Goods type.
    pub goods_type_id: i64,
    /// Host name.
    pub name: String,
    /// Region name.
    pub region: String,
    /// Region id.
    pub region_id: i64,
    /// Network line id.
    pub line_id: i64,
    /// Package id.
    pub package_id: i64,
    /// Package name.
    pub package_name: String,
    /// vCPU cores.
    pub cpu: i64,
    /// Memory in GB.
    pub memory_gb: i64,
    /// Disk in GB.
    pub disk_gb: i64,
    /// Bandwidth in Mbps.
    pub bandwidth_mbps: i64,
    /// Forwarded ports.
    pub port_num: i64,
    /// Monthly price including addons.
    pub monthly_price: i64,
    /// Serialised [`super::CartSpec`] of the current configuration.
    pub spec_json: String,
    /// Installed image.
    pub system_id: i64,
    /// Reported status.
    #[sqlx(try_from = "String")]
    pub status: VpsStatus,
    /// Raw provider state.
    pub automation_state: i64,
    /// Administrative flag.
    #[sqlx(try_from = "String")]
    pub admin_status: VpsAdminStatus,
    /// End of the paid period.
    pub expire_at: Option<DateTime<Utc>>,
    /// Cached control panel link.
    pub panel_url_cache: Option<String>,
    /// Login details as JSON.
    pub access_info_json: Option<String>,
    /// Last free emergency renewal.
    pub last_emergency_renew_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Package figures copied onto an instance so later catalog edits do not
/// change what the customer bought.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VpsSnapshot {
    /// Package id.
    pub package_id: i64,
    /// Package name.
    pub package_name: String,
    /// vCPU cores.
    pub cpu: i64,
    /// Memory in GB.
    pub memory_gb: i64,
    /// Disk in GB.
    pub disk_gb: i64,
    /// Bandwidth in Mbps.
    pub bandwidth_mbps: i64,
    /// Forwarded ports.
    pub port_num: i64,
    /// Monthly price including addons.
    pub monthly_price: i64,
    /// Serialised addon spec.
    pub spec_json: String,
}

/// Insert command for [`VpsInstance`].
#[derive(Debug, Clone)]
pub struct NewVpsInstance {
    /// Owner.
    pub user_id: i64,
    /// Create item.
    pub order_item_id: i64,
    /// Provider handle.
    pub automation_instance_id: String,
    /// Goods type.
    pub goods_type_id: i64,
    /// Host name.
    pub name: String,
    /// Region name.
    pub region: String,
    /// Region id.
    pub region_id: i64,
    /// Line id.
    pub line_id: i64,
    /// Installed image.
    pub system_id: i64,
    /// Package snapshot.
    pub snapshot: VpsSnapshot,
    /// Initial status.
    pub status: VpsStatus,
    /// End of the paid period.
    pub expire_at: Option<DateTime<Utc>>,
}

/// Outcome of a VPS status update.
#[derive(Debug, Clone)]
pub struct VpsReconciliation {
    /// The updated instance.
    pub instance: VpsInstance,
    /// New status of the owning create item, if it changed.
    pub item_status: Option<super::OrderItemStatus>,
    /// Event appended when the parent order changed status.
    pub order_event: Option<super::OrderEvent>,
}
