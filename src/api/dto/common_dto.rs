//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{OrderStatus, VpsAdminStatus, VpsStatus};

/// Pagination query parameters for list endpoints.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Pagination metadata included in list responses.
///
/// The stores do not count rows, so `count` is the size of this page; a
/// page shorter than `per_page` is the last one.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Items on this page.
    pub count: usize,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Page<T> {
    /// Rows on this page.
    pub data: Vec<T>,
    /// Where this page sits.
    pub pagination: PaginationMeta,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Clamps `per_page` to the allowed maximum of 100.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 100),
        }
    }

    /// Row limit for the store query.
    #[must_use]
    pub fn limit(&self) -> i64 {
        i64::from(self.clamped().per_page)
    }

    /// Row offset for the store query.
    #[must_use]
    pub fn offset(&self) -> i64 {
        let p = self.clamped();
        i64::from(p.page - 1) * i64::from(p.per_page)
    }

    /// Wraps the rows fetched with [`Self::limit`] and [`Self::offset`].
    #[must_use]
    pub fn page<T>(&self, data: Vec<T>) -> Page<T> {
        let p = self.clamped();
        Page {
            pagination: PaginationMeta {
                page: p.page,
                per_page: p.per_page,
                count: data.len(),
            },
            data,
        }
    }
}

/// Optional order status filter.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    /// Only orders in this status.
    pub status: Option<OrderStatus>,
}

/// Optional owner filter for admin listings.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OwnerFilter {
    /// Only rows of this user.
    pub user_id: Option<i64>,
}

/// Admin decision with a reason.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct ReviewRequest {
    /// Shown to the user.
    pub reason: String,
}

/// Wallet order decision.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WalletReviewRequest {
    /// Approve or reject.
    pub approve: bool,
    /// Shown to the user.
    #[serde(default)]
    pub reason: String,
}

/// Coupon enable/disable switch.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct ActiveToggle {
    /// New state.
    pub active: bool,
}

/// Administrative VPS flag.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct AdminStatusRequest {
    /// New flag.
    pub admin_status: VpsAdminStatus,
}

/// Status report pushed by the automation backend.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct AutomationReport {
    /// Instance the report is about.
    pub vps_id: i64,
    /// Reported status.
    pub status: VpsStatus,
    /// Raw backend state code.
    #[serde(default)]
    pub automation_state: i64,
}

/// Coupon code to preview.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CouponPreviewRequest {
    /// Code as typed by the user.
    pub code: String,
}

/// Pending action lookup result.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct PendingActions {
    /// An unfinished renewal exists.
    pub renew: bool,
    /// An unfinished resize exists.
    pub resize: bool,
    /// An unfinished refund exists.
    pub refund: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped_into_limit_and_offset() {
        let params = PaginationParams {
            page: 0,
            per_page: 1000,
        };
        assert_eq!(params.limit(), 100);
        assert_eq!(params.offset(), 0);

        let params = PaginationParams {
            page: 3,
            per_page: 20,
        };
        assert_eq!(params.offset(), 40);
        let page = params.page(vec![1, 2]);
        assert_eq!(page.pagination.page, 3);
        assert_eq!(page.pagination.count, 2);
    }
}
