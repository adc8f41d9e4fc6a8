//! Background workers: provisioning, scheduled resizes and expiry locks.
//!
//! Each worker is a tick function over a due-work query plus a loop that
//! drives it from a `tokio::time::interval`. The provision loop also wakes
//! early when an order is approved. All loops stop on the shared
//! [`CancellationToken`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pricing;
use super::vps_service::VpsService;
use super::with_timeout;
use crate::collaborator::{AutomationProvider, Notifier, ProvisionRequest, ResizeTarget};
use crate::config::ShopConfig;
use crate::domain::{
    EventBus, NewAutomationLog, NewVpsInstance, OrderItem, OrderItemSpec, OrderItemStatus,
    ProvisionJob, ProvisionJobStatus, ProvisionJobUpsert, ResizeTask, ResizeTaskStatus, ShopEvent,
    VpsInstance, VpsSnapshot, VpsStatus, VpsStatusClass, provision_retry_delay_secs,
};
use crate::error::{ShopError, ShopResult};
use crate::persistence::EntityStore;

/// Jobs picked per provision tick.
const PROVISION_BATCH: i64 = 20;
/// Tasks picked per resize tick.
const RESIZE_BATCH: i64 = 20;
/// Attempts after which a provision job gives up.
const MAX_PROVISION_ATTEMPTS: i64 = 30;
/// Lease taken on a job before any external call.
const CLAIM_SECS: i64 = 5;
/// Days per paid month on a new instance.
const DAYS_PER_MONTH: i64 = 30;

/// How a provision attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Ready,
    Pending,
    Failed,
}

/// Runs the background workers.
#[derive(Debug)]
pub struct Scheduler {
    store: Arc<dyn EntityStore>,
    automation: Arc<dyn AutomationProvider>,
    notifier: Arc<dyn Notifier>,
    vps: VpsService,
    event_bus: EventBus,
    call_timeout: Duration,
    provision_every: Duration,
    resize_every: Duration,
    expiry_every: Duration,
}

impl Scheduler {
    /// Creates a new `Scheduler`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        automation: Arc<dyn AutomationProvider>,
        notifier: Arc<dyn Notifier>,
        vps: VpsService,
        event_bus: EventBus,
        config: &ShopConfig,
    ) -> Self {
        Self {
            store,
            automation,
            notifier,
            vps,
            event_bus,
            call_timeout: Duration::from_secs(config.composite_timeout_secs.max(1)),
            provision_every: Duration::from_secs(config.provision_tick_secs.max(1)),
            resize_every: Duration::from_secs(config.resize_tick_secs.max(1)),
            expiry_every: Duration::from_secs(config.expiry_tick_secs.max(1)),
        }
    }

    /// Spawns the three worker loops.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self).provision_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).resize_loop(shutdown.clone())),
            tokio::spawn(self.expiry_loop(shutdown)),
        ]
    }

    async fn provision_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.provision_every);
        let mut events = self.event_bus.subscribe();
        tracing::info!(every_secs = self.provision_every.as_secs(), "provision worker started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                event = events.recv() => match event {
                    Ok(event) if event.wakes_provisioning() => {}
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "provision worker lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
            if let Err(err) = self.run_provision_tick(Utc::now()).await {
                tracing::error!(error = %err, "provision tick failed");
            }
        }
        tracing::info!("provision worker stopped");
    }

    async fn resize_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.resize_every);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.run_resize_tick(Utc::now()).await {
                tracing::error!(error = %err, "resize tick failed");
            }
        }
        tracing::info!("resize worker stopped");
    }

    async fn expiry_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.expiry_every);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.run_expiry_tick(Utc::now()).await {
                tracing::error!(error = %err, "expiry tick failed");
            }
        }
        tracing::info!("expiry worker stopped");
    }

    fn publish(&self, event: Option<&crate::domain::OrderEvent>) {
        if let Some(event) = event {
            let _ = self.event_bus.publish(ShopEvent::from(event));
        }
    }

    async fn log_call(&self, item: &OrderItem, action: &str, request: String, result: Result<String, &ShopError>) {
        let (success, response_json, message) = match result {
            Ok(body) => (true, body, "ok".to_string()),
            Err(err) => (false, "{}".to_string(), err.to_string()),
        };
        let log = NewAutomationLog {
            order_id: item.order_id,
            order_item_id: item.id,
            action: action.to_string(),
            request_json: request,
            response_json,
            success,
            message,
        };
        if let Err(err) = self.store.create_automation_log(&log).await {
            tracing::warn!(item_id = item.id, error = %err, "automation log write failed");
        }
    }

    async fn fail_item(&self, item: &OrderItem) -> ShopResult<()> {
        self.store
            .update_order_item_status(item.id, OrderItemStatus::Failed)
            .await?;
        let outcome = self.store.recompute_order_status(item.order_id).await?;
        self.publish(outcome.as_ref().map(|o| &o.event));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------

    /// Works through the provision jobs due at `now`. Returns how many were
    /// picked.
    ///
    /// # Errors
    ///
    /// Returns store errors from the due query; per-job failures are
    /// recorded on the job.
    pub async fn run_provision_tick(&self, now: DateTime<Utc>) -> ShopResult<usize> {
        let jobs = self.store.list_due_provision_jobs(now, PROVISION_BATCH).await?;
        for job in &jobs {
            if let Err(err) = self.provision_job(job, now).await {
                tracing::error!(job_id = job.id, item_id = job.order_item_id, error = %err, "provision job errored");
            }
        }
        Ok(jobs.len())
    }

    async fn provision_job(&self, job: &ProvisionJob, now: DateTime<Utc>) -> ShopResult<()> {
        let item = self.store.get_order_item(job.order_item_id).await?;
        if item.status.is_terminal() {
            let status = if item.status == OrderItemStatus::Active {
                ProvisionJobStatus::Done
            } else {
                ProvisionJobStatus::Failed
            };
            self.store
                .upsert_provision_job(&ProvisionJobUpsert {
                    status,
                    ..ProvisionJobUpsert::from(job)
                })
                .await?;
            tracing::debug!(job_id = job.id, item_status = %item.status, "provision job closed");
            return Ok(());
        }

        let mut claim = ProvisionJobUpsert {
            status: ProvisionJobStatus::Running,
            attempts: job.attempts + 1,
            next_run_at: now + chrono::Duration::seconds(CLAIM_SECS),
            ..ProvisionJobUpsert::from(job)
        };
        self.store.upsert_provision_job(&claim).await?;
        tracing::info!(job_id = job.id, item_id = item.id, attempt = claim.attempts, "provision job picked");

        if claim.attempts > MAX_PROVISION_ATTEMPTS {
            let err = ShopError::Fatal(format!("gave up after {} attempts", job.attempts));
            return self.give_up(&mut claim, &item, &err).await;
        }

        match self.attempt_provision(&mut claim, &item, now).await {
            Ok(Attempt::Ready) => {
                claim.status = ProvisionJobStatus::Done;
                claim.last_error.clear();
                self.store.upsert_provision_job(&claim).await?;
                tracing::info!(job_id = job.id, item_id = item.id, "provision job done");
                Ok(())
            }
            Ok(Attempt::Pending) => {
                self.retry(&mut claim, now, "instance not ready").await
            }
            Ok(Attempt::Failed) => {
                claim.status = ProvisionJobStatus::Failed;
                claim.last_error = "instance reported failure".to_string();
                self.store.upsert_provision_job(&claim).await?;
                tracing::warn!(job_id = job.id, item_id = item.id, "instance reported failure");
                Ok(())
            }
            Err(err) if err.is_transient() => self.retry(&mut claim, now, &err.to_string()).await,
            Err(err) => self.give_up(&mut claim, &item, &err).await,
        }
    }

    async fn retry(&self, claim: &mut ProvisionJobUpsert, now: DateTime<Utc>, reason: &str) -> ShopResult<()> {
        let delay = provision_retry_delay_secs(claim.attempts);
        claim.status = ProvisionJobStatus::Retry;
        claim.next_run_at = now + chrono::Duration::seconds(delay);
        claim.last_error = reason.to_string();
        self.store.upsert_provision_job(claim).await?;
        tracing::debug!(item_id = claim.order_item_id, attempt = claim.attempts, delay_secs = delay, reason, "provision job requeued");
        Ok(())
    }

    async fn give_up(&self, claim: &mut ProvisionJobUpsert, item: &OrderItem, err: &ShopError) -> ShopResult<()> {
        claim.status = ProvisionJobStatus::Failed;
        claim.last_error = err.to_string();
        self.store.upsert_provision_job(claim).await?;
        self.log_call(item, "provision", serde_json::json!({ "attempts": claim.attempts }).to_string(), Err(err))
            .await;
        self.fail_item(item).await?;
        tracing::warn!(item_id = item.id, attempts = claim.attempts, error = %err, "provision job failed");
        Ok(())
    }

    // Creates the host on the first attempt, then polls its status.
    async fn attempt_provision(
        &self,
        claim: &mut ProvisionJobUpsert,
        item: &OrderItem,
        now: DateTime<Utc>,
    ) -> ShopResult<Attempt> {
        let vps = match self.store.get_instance_by_order_item(item.id).await? {
            Some(vps) => vps,
            None => self.create_host(claim, item, now).await?,
        };
        let report = with_timeout(
            self.call_timeout,
            "instance status",
            self.automation.status(&vps.automation_instance_id),
        )
        .await?;
        self.vps
            .update_status(vps.id, report.status, report.automation_state)
            .await?;
        Ok(match report.status.class() {
            VpsStatusClass::Ready => Attempt::Ready,
            VpsStatusClass::Transient => Attempt::Pending,
            VpsStatusClass::Failed => Attempt::Failed,
        })
    }

    async fn create_host(
        &self,
        claim: &mut ProvisionJobUpsert,
        item: &OrderItem,
        now: DateTime<Utc>,
    ) -> ShopResult<VpsInstance> {
        let OrderItemSpec::Create(spec) = item.spec()? else {
            return Err(ShopError::Fatal(format!("item {} has no create payload", item.id)));
        };
        let order = self.store.get_order(item.order_id).await?;
        let package_id = item
            .package_id
            .ok_or_else(|| ShopError::Fatal(format!("item {} has no package", item.id)))?;
        let package = self.store.get_package(package_id).await?;
        let image = match item.system_id {
            Some(id) => Some(self.store.get_system_image(id).await?),
            None => None,
        };
        let group = self.store.get_plan_group(spec.plan_group_id).await?;
        let region = match self.store.get_region(spec.region_id).await {
            Ok(region) => region.name,
            Err(ShopError::NotFound(_)) => String::new(),
            Err(err) => return Err(err),
        };
        let cart = &spec.cart;
        let months = item.duration_months.max(1);
        let snapshot = VpsSnapshot {
            package_id: package.id,
            package_name: package.name.clone(),
            cpu: package.cores + cart.add_cores,
            memory_gb: package.memory_gb + cart.add_mem_gb,
            disk_gb: package.disk_gb + cart.add_disk_gb,
            bandwidth_mbps: package.bandwidth_mbps + cart.add_bw_mbps,
            port_num: package.port_num,
            monthly_price: package.monthly_price + pricing::addon_monthly(&group, cart).total(),
            spec_json: serde_json::to_string(cart)?,
        };
        let req = ProvisionRequest {
            order_id: item.order_id,
            order_item_id: item.id,
            user_id: order.user_id,
            product_id: package.product_id,
            image_id: image.as_ref().map_or(0, |i| i.image_id),
            line_id: spec.line_id,
            host_name: String::new(),
            cpu: snapshot.cpu,
            memory_gb: snapshot.memory_gb,
            disk_gb: snapshot.disk_gb,
            bandwidth_mbps: snapshot.bandwidth_mbps,
            port_num: snapshot.port_num,
            months,
        };
        let request_json = serde_json::to_string(&req)?;
        let host = match with_timeout(self.call_timeout, "provision instance", self.automation.provision(&req)).await {
            Ok(host) => host,
            Err(err) => {
                self.log_call(item, "provision", request_json, Err(&err)).await;
                return Err(err);
            }
        };
        self.log_call(item, "provision", request_json, Ok(serde_json::to_string(&host)?))
            .await;

        claim.host_id = host.host_id;
        claim.host_name.clone_from(&host.host_name);
        self.store.upsert_provision_job(claim).await?;

        let instance_id = host.host_id.to_string();
        let expire_at = chrono::Duration::try_days(DAYS_PER_MONTH.saturating_mul(months))
            .and_then(|span| now.checked_add_signed(span));
        let vps = self
            .store
            .create_instance(&NewVpsInstance {
                user_id: order.user_id,
                order_item_id: item.id,
                automation_instance_id: instance_id.clone(),
                goods_type_id: item.goods_type_id,
                name: host.host_name,
                region,
                region_id: spec.region_id,
                line_id: spec.line_id,
                system_id: item.system_id.unwrap_or_default(),
                snapshot,
                status: VpsStatus::Provisioning,
                expire_at,
            })
            .await?;
        self.store
            .set_order_item_automation_id(item.id, &instance_id)
            .await?;
        tracing::info!(item_id = item.id, vps_id = vps.id, host_id = claim.host_id, "instance created");
        Ok(vps)
    }

    // ------------------------------------------------------------------
    // Resizes
    // ------------------------------------------------------------------

    /// Executes the resize tasks due at `now`. Returns how many were
    /// picked.
    ///
    /// # Errors
    ///
    /// Returns store errors from the due query; per-task failures mark the
    /// task and its item failed.
    pub async fn run_resize_tick(&self, now: DateTime<Utc>) -> ShopResult<usize> {
        let tasks = self.store.list_due_resize_tasks(now, RESIZE_BATCH).await?;
        for task in &tasks {
            self.store
                .update_resize_task_status(task.id, ResizeTaskStatus::Running, now)
                .await?;
            tracing::info!(task_id = task.id, vps_id = task.vps_id, "resize task picked");
            let item = self.store.get_order_item(task.order_item_id).await?;
            match self.resize(task, &item).await {
                Ok(()) => {
                    self.store
                        .update_order_item_status(item.id, OrderItemStatus::Active)
                        .await?;
                    self.store
                        .update_resize_task_status(task.id, ResizeTaskStatus::Done, Utc::now())
                        .await?;
                    let outcome = self.store.recompute_order_status(item.order_id).await?;
                    self.publish(outcome.as_ref().map(|o| &o.event));
                    tracing::info!(task_id = task.id, vps_id = task.vps_id, "resize done");
                }
                Err(err) => {
                    tracing::warn!(task_id = task.id, vps_id = task.vps_id, error = %err, "resize failed");
                    self.store
                        .update_resize_task_status(task.id, ResizeTaskStatus::Failed, Utc::now())
                        .await?;
                    self.log_call(&item, "resize", serde_json::json!({ "task_id": task.id }).to_string(), Err(&err))
                        .await;
                    self.fail_item(&item).await?;
                }
            }
        }
        Ok(tasks.len())
    }

    async fn resize(&self, task: &ResizeTask, item: &OrderItem) -> ShopResult<()> {
        let OrderItemSpec::Resize(spec) = item.spec()? else {
            return Err(ShopError::Fatal(format!("item {} has no resize payload", item.id)));
        };
        let vps = self.store.get_instance(task.vps_id).await?;
        let package = self.store.get_package(spec.target_package_id).await?;
        let target = ResizeTarget {
            cpu: spec.target_cpu,
            memory_gb: spec.target_mem_gb,
            disk_gb: spec.target_disk_gb,
            bandwidth_mbps: spec.target_bw_mbps,
        };
        with_timeout(
            self.call_timeout,
            "resize instance",
            self.automation.resize(&vps.automation_instance_id, &target),
        )
        .await?;
        self.log_call(item, "resize", serde_json::to_string(&target)?, Ok("{}".to_string()))
            .await;
        let snapshot = VpsSnapshot {
            package_id: package.id,
            package_name: package.name,
            cpu: spec.target_cpu,
            memory_gb: spec.target_mem_gb,
            disk_gb: spec.target_disk_gb,
            bandwidth_mbps: spec.target_bw_mbps,
            port_num: package.port_num,
            monthly_price: spec.target_monthly,
            spec_json: serde_json::to_string(&spec.spec)?,
        };
        self.store.update_instance_snapshot(vps.id, &snapshot).await
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    /// Locks instances whose paid period ended before `now` and notifies
    /// their owners. Returns how many were locked.
    ///
    /// # Errors
    ///
    /// Returns store errors; notification failures are only logged.
    pub async fn run_expiry_tick(&self, now: DateTime<Utc>) -> ShopResult<usize> {
        let expired = self.store.list_instances_expiring(now).await?;
        let mut locked = 0;
        for vps in expired.iter().filter(|v| v.status != VpsStatus::ExpiredLocked) {
            self.vps
                .update_status(vps.id, VpsStatus::ExpiredLocked, vps.automation_state)
                .await?;
            locked += 1;
            let data = serde_json::json!({
                "vps_id": vps.id,
                "name": vps.name,
                "expire_at": vps.expire_at,
            });
            if let Err(err) = self.notifier.notify(vps.user_id, "vps_expired", &data).await {
                tracing::warn!(vps_id = vps.id, user_id = vps.user_id, error = %err, "expiry notice failed");
            }
        }
        if locked > 0 {
            tracing::info!(locked, "expired instances locked");
        }
        Ok(locked)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::collaborator::{InstanceStatus, LogNotifier};
    use crate::domain::{CartSpec, OrderStatus};
    use crate::persistence::test_support;
    use crate::service::order_service::tests::{Harness, fill_cart, harness};
    use crate::service::order_service::{CheckoutRequest, MarkPaidRequest, ResizeRequest};

    fn scheduler(h: &Harness) -> Scheduler {
        let automation: Arc<dyn AutomationProvider> =
            Arc::clone(&h.automation) as Arc<dyn AutomationProvider>;
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(Arc::clone(&h.store)));
        let vps = VpsService::new(Arc::clone(&h.store), Arc::clone(&automation), h.bus.clone());
        Scheduler::new(
            Arc::clone(&h.store),
            automation,
            notifier,
            vps,
            h.bus.clone(),
            &ShopConfig::in_memory(),
        )
    }

    async fn paid_create_order(h: &Harness) -> (i64, i64) {
        let alice = test_support::user(&h.store, "alice").await;
        fill_cart(&h.store, alice.id, 1).await;
        let Ok(created) = h.orders.checkout(alice.id, &CheckoutRequest::default()).await else {
            panic!("checkout failed");
        };
        let Ok(_) = h
            .orders
            .mark_paid(1, created.order.id, &MarkPaidRequest::default())
            .await
        else {
            panic!("mark paid failed");
        };
        let Some(item) = created.items.first() else {
            panic!("no item");
        };
        (created.order.id, item.id)
    }

    #[tokio::test]
    async fn provision_creates_instance_and_activates_order() {
        let h = harness().await;
        let (order_id, item_id) = paid_create_order(&h).await;
        let scheduler = scheduler(&h);

        let Ok(picked) = scheduler.run_provision_tick(Utc::now()).await else {
            panic!("tick failed");
        };
        assert_eq!(picked, 1);
        let Ok(Some(vps)) = h.store.get_instance_by_order_item(item_id).await else {
            panic!("no instance");
        };
        assert_eq!(vps.status, VpsStatus::Running);
        assert_eq!((vps.cpu, vps.memory_gb, vps.monthly_price), (2, 4, 99_900));
        assert!(vps.expire_at.is_some());
        let Ok(Some(job)) = h.store.get_provision_job_by_item(item_id).await else {
            panic!("job missing");
        };
        assert_eq!((job.status, job.attempts, job.host_id), (ProvisionJobStatus::Done, 1, 1001));
        let Ok(order) = h.store.get_order(order_id).await else {
            panic!("order missing");
        };
        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(
            h.automation.calls().await,
            vec![format!("provision:{item_id}"), "status:1001".to_string()]
        );

        let Ok(0) = scheduler.run_provision_tick(Utc::now()).await else {
            panic!("finished job picked again");
        };
    }

    #[tokio::test]
    async fn transient_status_requeues_with_backoff() {
        let h = harness().await;
        let (order_id, item_id) = paid_create_order(&h).await;
        h.automation.push_status(Ok(InstanceStatus::from_state(1))).await;
        let scheduler = scheduler(&h);
        let now = Utc::now();

        let Ok(1) = scheduler.run_provision_tick(now).await else {
            panic!("tick failed");
        };
        let Ok(Some(job)) = h.store.get_provision_job_by_item(item_id).await else {
            panic!("job missing");
        };
        assert_eq!(job.status, ProvisionJobStatus::Retry);
        assert!((4..=5).contains(&(job.next_run_at - now).num_seconds()));
        let Ok(0) = scheduler.run_provision_tick(now).await else {
            panic!("job picked before back-off");
        };

        // second attempt reuses the host
        let Ok(1) = scheduler
            .run_provision_tick(now + chrono::Duration::seconds(6))
            .await
        else {
            panic!("tick failed");
        };
        let calls = h.automation.calls().await;
        assert_eq!(calls.iter().filter(|c| c.starts_with("provision:")).count(), 1);
        let Ok(order) = h.store.get_order(order_id).await else {
            panic!("order missing");
        };
        assert_eq!(order.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn fatal_provision_fails_item_and_order() {
        let h = harness().await;
        let (order_id, item_id) = paid_create_order(&h).await;
        h.automation
            .push_provision(Err(ShopError::Fatal("no capacity".to_string())))
            .await;
        let scheduler = scheduler(&h);

        let Ok(1) = scheduler.run_provision_tick(Utc::now()).await else {
            panic!("tick failed");
        };
        let Ok(Some(job)) = h.store.get_provision_job_by_item(item_id).await else {
            panic!("job missing");
        };
        assert_eq!(job.status, ProvisionJobStatus::Failed);
        assert!(job.last_error.contains("no capacity"));
        let Ok(item) = h.store.get_order_item(item_id).await else {
            panic!("item missing");
        };
        assert_eq!(item.status, OrderItemStatus::Failed);
        let Ok(order) = h.store.get_order(order_id).await else {
            panic!("order missing");
        };
        assert_eq!(order.status, OrderStatus::Failed);
        let Ok(logs) = h.store.list_automation_logs(order_id).await else {
            panic!("logs failed");
        };
        assert!(logs.iter().any(|l| !l.success && l.action == "provision"));
    }

    #[tokio::test]
    async fn resize_task_updates_snapshot() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let _ = test_support::catalog(&h.store).await;
        let vps = test_support::provisioned_vps(
            &h.store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            99_900,
            None,
        )
        .await;
        let req = ResizeRequest {
            spec: CartSpec {
                add_cores: 1,
                ..CartSpec::default()
            },
            ..ResizeRequest::default()
        };
        let Ok(order) = h.orders.create_resize_order(alice.id, vps.id, &req).await else {
            panic!("resize order failed");
        };
        let scheduler = scheduler(&h);
        let Ok(1) = scheduler.run_resize_tick(Utc::now()).await else {
            panic!("tick failed");
        };
        let Ok(resized) = h.store.get_instance(vps.id).await else {
            panic!("vps missing");
        };
        assert_eq!((resized.cpu, resized.monthly_price), (3, 100_900));
        let Ok(tasks) = h.store.list_resize_tasks(vps.id).await else {
            panic!("tasks missing");
        };
        assert!(tasks.iter().all(|t| t.status == ResizeTaskStatus::Done && t.finished_at.is_some()));
        let Ok(done) = h.store.get_order(order.order.id).await else {
            panic!("order missing");
        };
        assert_eq!(done.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn failed_resize_marks_task_and_order() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let _ = test_support::catalog(&h.store).await;
        let vps = test_support::provisioned_vps(
            &h.store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            99_900,
            None,
        )
        .await;
        let req = ResizeRequest {
            spec: CartSpec {
                add_mem_gb: 2,
                ..CartSpec::default()
            },
            ..ResizeRequest::default()
        };
        let Ok(order) = h.orders.create_resize_order(alice.id, vps.id, &req).await else {
            panic!("resize order failed");
        };
        h.automation
            .push_resize(Err(ShopError::Fatal("host full".to_string())))
            .await;
        let Ok(1) = scheduler(&h).run_resize_tick(Utc::now()).await else {
            panic!("tick failed");
        };
        let Ok(tasks) = h.store.list_resize_tasks(vps.id).await else {
            panic!("tasks missing");
        };
        assert!(tasks.iter().all(|t| t.status == ResizeTaskStatus::Failed));
        let Ok(failed) = h.store.get_order(order.order.id).await else {
            panic!("order missing");
        };
        assert_eq!(failed.status, OrderStatus::Failed);
        let Ok(unchanged) = h.store.get_instance(vps.id).await else {
            panic!("vps missing");
        };
        assert_eq!(unchanged.memory_gb, vps.memory_gb);
    }

    #[tokio::test]
    async fn expiry_locks_once() {
        let h = harness().await;
        let alice = test_support::user(&h.store, "alice").await;
        let vps = test_support::provisioned_vps(
            &h.store,
            alice.id,
            OrderStatus::Active,
            OrderItemStatus::Active,
            9_900,
            Some(Utc::now() - chrono::Duration::hours(1)),
        )
        .await;
        let scheduler = scheduler(&h);
        let mut rx = h.bus.subscribe();
        let Ok(1) = scheduler.run_expiry_tick(Utc::now()).await else {
            panic!("tick failed");
        };
        let Ok(locked) = h.store.get_instance(vps.id).await else {
            panic!("vps missing");
        };
        assert_eq!(locked.status, VpsStatus::ExpiredLocked);
        let Ok(ShopEvent::VpsStatusChanged { status, .. }) = rx.recv().await else {
            panic!("no vps event");
        };
        assert_eq!(status, VpsStatus::ExpiredLocked);
        let Ok(0) = scheduler.run_expiry_tick(Utc::now()).await else {
            panic!("locked twice");
        };
    }

    #[tokio::test]
    async fn loops_stop_on_cancel() {
        let h = harness().await;
        let scheduler = Arc::new(scheduler(&h));
        let shutdown = CancellationToken::new();
        let handles = scheduler.spawn(shutdown.clone());
        assert_eq!(handles.len(), 3);
        shutdown.cancel();
        for handle in handles {
            tokio_test::assert_ok!(handle.await);
        }
    }
}
