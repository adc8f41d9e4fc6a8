//! VPS service: instance queries and the lifecycle coordinator entry
//! point.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::collaborator::AutomationProvider;
use crate::domain::{
    EventBus, ShopEvent, VpsAdminStatus, VpsInstance, VpsReconciliation, VpsStatus,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::EntityStore;

/// Admin access-detail update.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct AccessUpdate {
    /// Control panel link.
    #[serde(default)]
    pub panel_url: Option<String>,
    /// Login details.
    #[serde(default)]
    pub access_info: Option<serde_json::Value>,
}

/// Instance reads and status changes.
///
/// Every status change goes through [`VpsService::update_status`], which
/// lets the store reconcile the owning create item and its order in one
/// transaction and then publishes the resulting events.
#[derive(Debug, Clone)]
pub struct VpsService {
    store: Arc<dyn EntityStore>,
    automation: Arc<dyn AutomationProvider>,
    event_bus: EventBus,
}

impl VpsService {
    /// Creates a new `VpsService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        automation: Arc<dyn AutomationProvider>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            automation,
            event_bus,
        }
    }

    /// Loads an instance; with `owner` set, only the owner's.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for unknown or foreign instances.
    pub async fn get(&self, owner: Option<i64>, id: i64) -> ShopResult<VpsInstance> {
        let vps = self.store.get_instance(id).await?;
        if owner.is_some_and(|user_id| user_id != vps.user_id) {
            return Err(ShopError::NotFound(format!("vps {id}")));
        }
        Ok(vps)
    }

    /// Lists instances, optionally of one user.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self, owner: Option<i64>, limit: i64, offset: i64) -> ShopResult<Vec<VpsInstance>> {
        self.store.list_instances(owner, limit, offset).await
    }

    /// Writes a status report and reconciles the owning item and order.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown instance.
    pub async fn update_status(
        &self,
        id: i64,
        status: VpsStatus,
        automation_state: i64,
    ) -> ShopResult<VpsReconciliation> {
        let outcome = self
            .store
            .update_instance_status(id, status, automation_state)
            .await?;
        let _ = self.event_bus.publish(ShopEvent::VpsStatusChanged {
            vps_id: id,
            status,
            automation_state,
            timestamp: Utc::now(),
        });
        if let Some(event) = &outcome.order_event {
            let _ = self.event_bus.publish(ShopEvent::from(event));
        }
        tracing::info!(
            vps_id = id,
            %status,
            item_status = ?outcome.item_status,
            "vps status updated"
        );
        Ok(outcome)
    }

    /// Polls the automation backend and records what it reports.
    ///
    /// # Errors
    ///
    /// Propagates collaborator failures and [`VpsService::update_status`]
    /// errors.
    pub async fn refresh(&self, owner: Option<i64>, id: i64) -> ShopResult<VpsInstance> {
        let vps = self.get(owner, id).await?;
        let report = self.automation.status(&vps.automation_instance_id).await?;
        let outcome = self
            .update_status(vps.id, report.status, report.automation_state)
            .await?;
        Ok(outcome.instance)
    }

    /// Sets the administrative flag.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown instance.
    pub async fn set_admin_status(&self, id: i64, status: VpsAdminStatus) -> ShopResult<VpsInstance> {
        self.store.update_instance_admin_status(id, status).await?;
        tracing::info!(vps_id = id, %status, "vps admin status set");
        self.store.get_instance(id).await
    }

    /// Caches panel link and login details.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] for an unknown instance.
    pub async fn update_access(&self, id: i64, update: &AccessUpdate) -> ShopResult<VpsInstance> {
        let access = update
            .access_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.store
            .update_instance_access(id, update.panel_url.as_deref(), access.as_deref())
            .await?;
        self.store.get_instance(id).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::collaborator::InstanceStatus;
    use crate::collaborator::automation::scripted::ScriptedAutomation;
    use crate::domain::{OrderItemStatus, OrderStatus};
    use crate::persistence::test_support;

    fn service(
        store: &Arc<dyn EntityStore>,
        automation: &Arc<ScriptedAutomation>,
    ) -> (VpsService, EventBus) {
        let bus = EventBus::new(16);
        let automation: Arc<dyn AutomationProvider> = Arc::clone(automation) as Arc<dyn AutomationProvider>;
        (VpsService::new(Arc::clone(store), automation, bus.clone()), bus)
    }

    #[tokio::test]
    async fn ready_status_activates_item_and_order() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Provisioning,
            OrderItemStatus::Provisioning,
            9900,
            None,
        )
        .await;
        let automation = Arc::new(ScriptedAutomation::default());
        let (service, bus) = service(&store, &automation);
        let mut rx = bus.subscribe();

        let Ok(outcome) = service.update_status(vps.id, VpsStatus::Running, 2).await else {
            panic!("update failed");
        };
        assert_eq!(outcome.item_status, Some(OrderItemStatus::Active));
        assert!(outcome.order_event.is_some());
        let Ok(ShopEvent::VpsStatusChanged { vps_id, .. }) = rx.recv().await else {
            panic!("no vps event");
        };
        assert_eq!(vps_id, vps.id);
        let Ok(ShopEvent::OrderTransitioned { transition, .. }) = rx.recv().await else {
            panic!("no order event");
        };
        assert_eq!(transition, "active");

        let Ok(item) = store.get_order_item(vps.order_item_id).await else {
            panic!("item missing");
        };
        let Ok(order) = store.get_order(item.order_id).await else {
            panic!("order missing");
        };
        assert_eq!(order.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn refresh_uses_backend_report_and_checks_owner() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            9900,
            None,
        )
        .await;
        let automation = Arc::new(ScriptedAutomation::default());
        automation.push_status(Ok(InstanceStatus::from_state(3))).await;
        let (service, _) = service(&store, &automation);

        let Err(ShopError::NotFound(_)) = service.refresh(Some(alice.id + 1), vps.id).await else {
            panic!("foreign refresh allowed");
        };
        let Ok(refreshed) = service.refresh(Some(alice.id), vps.id).await else {
            panic!("refresh failed");
        };
        assert_eq!(refreshed.status, VpsStatus::Stopped);
        assert_eq!(automation.calls().await, vec![format!("status:{}", vps.automation_instance_id)]);
    }

    #[tokio::test]
    async fn admin_flags_and_access() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let vps = test_support::provisioned_vps(
            &store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            9900,
            None,
        )
        .await;
        let automation = Arc::new(ScriptedAutomation::default());
        let (service, _) = service(&store, &automation);
        let Ok(flagged) = service.set_admin_status(vps.id, VpsAdminStatus::Abuse).await else {
            panic!("flag failed");
        };
        assert_eq!(flagged.admin_status, VpsAdminStatus::Abuse);
        let Ok(updated) = service
            .update_access(
                vps.id,
                &AccessUpdate {
                    panel_url: Some("https://panel/1".to_string()),
                    access_info: Some(serde_json::json!({"user": "root"})),
                },
            )
            .await
        else {
            panic!("access failed");
        };
        assert_eq!(updated.panel_url_cache.as_deref(), Some("https://panel/1"));
        assert!(updated.access_info_json.is_some_and(|a| a.contains("root")));
    }
}
