//! The automation backend that creates, renews, resizes and destroys
//! instances.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::VpsStatus;
use crate::error::{ShopError, ShopResult};

/// What to build for one create item.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest {
    /// Parent order.
    pub order_id: i64,
    /// Create item.
    pub order_item_id: i64,
    /// Owner.
    pub user_id: i64,
    /// Provider-side product of the package.
    pub product_id: i64,
    /// Provider-side image id.
    pub image_id: i64,
    /// Network line.
    pub line_id: i64,
    /// Requested host name.
    pub host_name: String,
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
    /// Paid term.
    pub months: i64,
}

/// Host handle returned by a successful provision call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedHost {
    /// Provider host id.
    pub host_id: i64,
    /// Provider host name.
    pub host_name: String,
}

/// Resulting figures of a resize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResizeTarget {
    /// vCPU cores.
    pub cpu: i64,
    /// Memory in GB.
    pub memory_gb: i64,
    /// Disk in GB.
    pub disk_gb: i64,
    /// Bandwidth in Mbps.
    pub bandwidth_mbps: i64,
}

/// Status report for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    /// Normalised status.
    pub status: VpsStatus,
    /// Raw provider state.
    pub automation_state: i64,
}

impl InstanceStatus {
    /// Builds a report from the raw provider state.
    #[must_use]
    pub const fn from_state(automation_state: i64) -> Self {
        Self {
            status: VpsStatus::from_automation_state(automation_state),
            automation_state,
        }
    }
}

/// Instance lifecycle operations on the automation backend.
#[async_trait]
pub trait AutomationProvider: Send + Sync + std::fmt::Debug {
    /// Starts building an instance and returns its host handle.
    async fn provision(&self, req: &ProvisionRequest) -> ShopResult<ProvisionedHost>;
    /// Extends an instance. Returns the provider's new expiry when it
    /// tracks one.
    async fn renew(&self, instance_id: &str, months: i64) -> ShopResult<Option<DateTime<Utc>>>;
    /// Changes the size of an instance.
    async fn resize(&self, instance_id: &str, target: &ResizeTarget) -> ShopResult<()>;
    /// Reports the current status.
    async fn status(&self, instance_id: &str) -> ShopResult<InstanceStatus>;
    /// Deletes an instance.
    async fn destroy(&self, instance_id: &str) -> ShopResult<()>;
}

#[derive(Debug, Default)]
struct SimulatedState {
    next_host: i64,
    // instance id -> polls left before the host reports running
    hosts: HashMap<String, u32>,
}

/// In-process backend for development.
///
/// Hosts get sequential ids and report `provisioning` for a fixed number
/// of status polls before switching to `running`.
#[derive(Debug, Default)]
pub struct SimulatedAutomation {
    ready_after_polls: u32,
    state: Mutex<SimulatedState>,
}

impl SimulatedAutomation {
    /// A backend whose hosts are running on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts stay `provisioning` for `polls` status calls.
    #[must_use]
    pub fn with_ready_after(polls: u32) -> Self {
        Self {
            ready_after_polls: polls,
            state: Mutex::default(),
        }
    }
}

#[async_trait]
impl AutomationProvider for SimulatedAutomation {
    async fn provision(&self, req: &ProvisionRequest) -> ShopResult<ProvisionedHost> {
        let mut state = self.state.lock().await;
        state.next_host += 1;
        let host_id = state.next_host;
        state.hosts.insert(host_id.to_string(), self.ready_after_polls);
        tracing::info!(host_id, item_id = req.order_item_id, "simulated host created");
        Ok(ProvisionedHost {
            host_id,
            host_name: if req.host_name.is_empty() {
                format!("sim-{host_id}")
            } else {
                req.host_name.clone()
            },
        })
    }

    async fn renew(&self, instance_id: &str, months: i64) -> ShopResult<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        if !state.hosts.contains_key(instance_id) {
            return Err(ShopError::Fatal(format!("unknown host {instance_id}")));
        }
        tracing::debug!(instance_id, months, "simulated renew");
        Ok(None)
    }

    async fn resize(&self, instance_id: &str, target: &ResizeTarget) -> ShopResult<()> {
        let state = self.state.lock().await;
        if !state.hosts.contains_key(instance_id) {
            return Err(ShopError::Fatal(format!("unknown host {instance_id}")));
        }
        tracing::debug!(instance_id, cpu = target.cpu, memory_gb = target.memory_gb, "simulated resize");
        Ok(())
    }

    async fn status(&self, instance_id: &str) -> ShopResult<InstanceStatus> {
        let mut state = self.state.lock().await;
        let Some(polls_left) = state.hosts.get_mut(instance_id) else {
            return Err(ShopError::Fatal(format!("unknown host {instance_id}")));
        };
        if *polls_left > 0 {
            *polls_left -= 1;
            return Ok(InstanceStatus::from_state(1));
        }
        Ok(InstanceStatus::from_state(2))
    }

    async fn destroy(&self, instance_id: &str) -> ShopResult<()> {
        self.state.lock().await.hosts.remove(instance_id);
        tracing::info!(instance_id, "simulated host destroyed");
        Ok(())
    }
}


#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            order_id: 1,
            order_item_id: 2,
            user_id: 3,
            product_id: 100,
            image_id: 501,
            line_id: 7,
            host_name: String::new(),
            cpu: 2,
            memory_gb: 4,
            disk_gb: 40,
            bandwidth_mbps: 10,
            port_num: 20,
            months: 1,
        }
    }

    #[tokio::test]
    async fn simulated_host_becomes_ready_after_polls() {
        let automation = SimulatedAutomation::with_ready_after(2);
        let Ok(host) = automation.provision(&request()).await else {
            panic!("provision failed");
        };
        assert_eq!(host.host_name, "sim-1");
        let id = host.host_id.to_string();
        for _ in 0..2 {
            let Ok(report) = automation.status(&id).await else {
                panic!("status failed");
            };
            assert_eq!(report.status, VpsStatus::Provisioning);
        }
        let Ok(report) = automation.status(&id).await else {
            panic!("status failed");
        };
        assert_eq!(report.status, VpsStatus::Running);
    }

    #[tokio::test]
    async fn destroyed_host_is_unknown() {
        let automation = SimulatedAutomation::new();
        let Ok(host) = automation.provision(&request()).await else {
            panic!("provision failed");
        };
        let id = host.host_id.to_string();
        tokio_test::assert_ok!(automation.destroy(&id).await);
        let Err(ShopError::Fatal(_)) = automation.status(&id).await else {
            panic!("destroyed host still reports");
        };
    }

    #[tokio::test]
    async fn scripted_double_replays_queue_then_defaults() {
        let automation = scripted::ScriptedAutomation::default();
        automation
            .push_status(Err(ShopError::Retryable("busy".to_string())))
            .await;
        tokio_test::assert_err!(automation.status("h1").await);
        let Ok(report) = automation.status("h1").await else {
            panic!("default status failed");
        };
        assert_eq!(report.status, VpsStatus::Running);
        assert_eq!(automation.calls().await, vec!["status:h1", "status:h1"]);
    }
}
