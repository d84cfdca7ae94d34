//! Lifecycle of the per-store bot processes.
//!
//! Each tenant moves through `Stopped -> Starting -> Running -> Stopping ->
//! Stopped`, or `Starting -> Error` when its credential cannot be opened, and
//! `Running -> Error` when its receive loop dies. `Error` sticks until an
//! explicit `start` or `restart`.
//!
//! The registry is a single mutex-guarded map. It is never held across a
//! network call: `start` claims the slot as `Starting`, releases the lock to
//! open the connection, then re-takes it to publish `Running`. Only the final
//! `Stopped` write-back of `stop` happens under the lock.

pub mod directory;
pub mod health;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::config;
use crate::core::metrics;
use crate::core::types::StoreId;
use crate::dispatch::{run_poll_loop, EventPipeline, LaneLimits};
use crate::router::Router;
use crate::source::{Connection, Connector, SourceError};
use crate::telegram::messages;
use crate::telegram::Outbound;

pub use directory::{DesiredStatus, TenantDirectory, TenantHandle};
pub use health::{HealthMonitor, HealthReport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("bot of store {0} is already running")]
    AlreadyRunning(StoreId),

    #[error("bot of store {0} is not running")]
    NotRunning(StoreId),

    #[error("store {0} does not exist")]
    UnknownTenant(StoreId),

    #[error("store {0} has no bot token")]
    MissingCredential(StoreId),

    #[error("bot token rejected: {0}")]
    CredentialInvalid(String),

    #[error("could not connect: {0}")]
    ConnectionFailed(String),

    #[error("tenant directory unavailable: {0}")]
    Directory(String),
}

impl From<SourceError> for SupervisorError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::CredentialInvalid(reason) => SupervisorError::CredentialInvalid(reason),
            SourceError::ConnectionFailed(reason) => SupervisorError::ConnectionFailed(reason),
            SourceError::Closed => SupervisorError::ConnectionFailed("update source closed".to_string()),
        }
    }
}

impl SupervisorError {
    /// Caller asked for a transition that does not apply; nothing changed.
    pub fn is_misuse(&self) -> bool {
        matches!(self, SupervisorError::AlreadyRunning(_) | SupervisorError::NotRunning(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Builds the conversation router for a tenant that is about to start.
pub type RouterFactory = Arc<dyn Fn(&TenantHandle) -> Router + Send + Sync>;

struct RunningProcess {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    /// The tenant bot's own sender, for messages that originate elsewhere
    outbound: Arc<dyn Outbound>,
}

enum Slot {
    Starting { generation: u64 },
    Running(RunningProcess),
    Stopping,
    Error { reason: String },
}

impl Slot {
    fn status(&self) -> TenantStatus {
        match self {
            Slot::Starting { .. } => TenantStatus::Starting,
            Slot::Running(_) => TenantStatus::Running,
            Slot::Stopping => TenantStatus::Stopping,
            Slot::Error { .. } => TenantStatus::Error,
        }
    }

    /// A live slot blocks another `start`.
    fn is_live(&self) -> bool {
        !matches!(self, Slot::Error { .. })
    }

    fn generation(&self) -> Option<u64> {
        match self {
            Slot::Starting { generation } => Some(*generation),
            Slot::Running(process) => Some(process.generation),
            Slot::Stopping | Slot::Error { .. } => None,
        }
    }
}

/// Outcome of `start_all` / `stop_all`.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: Vec<StoreId>,
    pub failed: Vec<(StoreId, SupervisorError)>,
}

struct Inner {
    registry: Mutex<HashMap<StoreId, Slot>>,
    connector: Arc<dyn Connector>,
    directory: Arc<dyn TenantDirectory>,
    routers: RouterFactory,
    /// Mother bot outbound, for telling owners their bot failed
    notifier: Arc<dyn Outbound>,
    limits: LaneLimits,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    generation: AtomicU64,
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        directory: Arc<dyn TenantDirectory>,
        routers: RouterFactory,
        notifier: Arc<dyn Outbound>,
        limits: LaneLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(HashMap::new()),
                connector,
                directory,
                routers,
                notifier,
                limits,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Fires when the supervisor shuts down; background tasks can watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub async fn status(&self, store_id: StoreId) -> TenantStatus {
        self.inner
            .registry
            .lock()
            .await
            .get(&store_id)
            .map_or(TenantStatus::Stopped, Slot::status)
    }

    /// Last failure reason of a tenant in `Error`.
    pub async fn last_error(&self, store_id: StoreId) -> Option<String> {
        match self.inner.registry.lock().await.get(&store_id) {
            Some(Slot::Error { reason }) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Every tenant the registry knows about, ordered by store id.
    pub async fn snapshot(&self) -> Vec<(StoreId, TenantStatus)> {
        let registry = self.inner.registry.lock().await;
        let mut entries: Vec<_> = registry.iter().map(|(id, slot)| (*id, slot.status())).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Sender of a running tenant bot; `None` unless it is `Running`.
    pub async fn outbound(&self, store_id: StoreId) -> Option<Arc<dyn Outbound>> {
        match self.inner.registry.lock().await.get(&store_id) {
            Some(Slot::Running(process)) => Some(Arc::clone(&process.outbound)),
            _ => None,
        }
    }

    pub async fn running(&self) -> Vec<StoreId> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|(_, status)| *status == TenantStatus::Running)
            .map(|(id, _)| id)
            .collect()
    }

    /// Opens the tenant's credential and starts its receive loop.
    pub async fn start(&self, store_id: StoreId) -> Result<TenantStatus, SupervisorError> {
        let tenant = self
            .inner
            .directory
            .tenant(store_id)
            .await?
            .ok_or(SupervisorError::UnknownTenant(store_id))?;
        let credential = tenant
            .credential
            .clone()
            .ok_or(SupervisorError::MissingCredential(store_id))?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut registry = self.inner.registry.lock().await;
            if registry.get(&store_id).is_some_and(Slot::is_live) {
                return Err(SupervisorError::AlreadyRunning(store_id));
            }
            registry.insert(store_id, Slot::Starting { generation });
        }
        self.record(store_id, TenantStatus::Starting, None).await;
        log::info!("Starting bot of store {}", store_id);

        let connection = match self.inner.connector.open(&credential).await {
            Ok(connection) => connection,
            Err(e) => {
                let err = SupervisorError::from(e);
                metrics::record_transition("start_failed");
                self.fail(&tenant, generation, err.to_string()).await;
                return Err(err);
            }
        };

        let Connection {
            source,
            outbound,
            bot_username,
        } = connection;
        if let Some(username) = &bot_username {
            if let Err(e) = self.inner.directory.record_username(store_id, username).await {
                log::warn!("Could not record username of store {}: {}", store_id, e);
            }
        }

        let router = (self.inner.routers)(&tenant);
        let tenant_outbound = Arc::clone(&outbound);
        let pipeline = EventPipeline::new(router, outbound, None, self.inner.limits, self.inner.tracker.clone());
        let cancel = self.inner.shutdown.child_token();
        let join = {
            let supervisor = self.clone();
            let cancel = cancel.clone();
            let tenant = tenant.clone();
            self.inner.tracker.spawn(async move {
                let name = format!("store {}", tenant.store_id);
                if let Err(e) = run_poll_loop(source, pipeline, cancel, &name).await {
                    metrics::record_transition("crash");
                    supervisor.fail(&tenant, generation, e.to_string()).await;
                }
            })
        };

        let mut registry = self.inner.registry.lock().await;
        match registry.get(&store_id) {
            Some(Slot::Starting { generation: g }) if *g == generation => {
                registry.insert(
                    store_id,
                    Slot::Running(RunningProcess {
                        generation,
                        cancel,
                        join,
                        outbound: tenant_outbound,
                    }),
                );
                Self::update_gauge(&registry);
                drop(registry);

                metrics::record_transition("start");
                self.record(store_id, TenantStatus::Running, None).await;
                log::info!(
                    "Bot of store {} is running as @{}",
                    store_id,
                    bot_username.as_deref().unwrap_or("?")
                );
                Ok(TenantStatus::Running)
            }
            // The loop died before it could be published; `fail` already ran.
            Some(Slot::Error { reason }) => Err(SupervisorError::ConnectionFailed(reason.clone())),
            _ => {
                cancel.cancel();
                Err(SupervisorError::ConnectionFailed("start was superseded".to_string()))
            }
        }
    }

    /// Cancels the tenant's receive loop and waits for it to exit.
    ///
    /// Event handlers already running are left to finish.
    pub async fn stop(&self, store_id: StoreId) -> Result<(), SupervisorError> {
        let process = {
            let mut registry = self.inner.registry.lock().await;
            match registry.remove(&store_id) {
                Some(Slot::Running(process)) => {
                    registry.insert(store_id, Slot::Stopping);
                    process
                }
                Some(other) => {
                    registry.insert(store_id, other);
                    return Err(SupervisorError::NotRunning(store_id));
                }
                None => return Err(SupervisorError::NotRunning(store_id)),
            }
        };
        self.record(store_id, TenantStatus::Stopping, None).await;

        process.cancel.cancel();
        if let Err(e) = process.join.await {
            log::error!("Receive loop of store {} panicked: {}", store_id, e);
        }

        // `Stopped` is written while the slot is still held, so a `start`
        // racing in behind this stop always records after it.
        let mut registry = self.inner.registry.lock().await;
        if matches!(registry.get(&store_id), Some(Slot::Stopping)) {
            registry.remove(&store_id);
            self.record(store_id, TenantStatus::Stopped, None).await;
        }
        Self::update_gauge(&registry);
        drop(registry);

        metrics::record_transition("stop");
        log::info!("Bot of store {} stopped", store_id);
        Ok(())
    }

    /// `stop` (a tenant that is not running is fine) followed by `start`.
    pub async fn restart(&self, store_id: StoreId) -> Result<TenantStatus, SupervisorError> {
        match self.stop(store_id).await {
            Ok(()) | Err(SupervisorError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(store_id).await
    }

    /// Starts every active tenant. Individual failures are logged and reported,
    /// only an unreachable directory fails the call.
    pub async fn start_all(&self) -> Result<BulkReport, SupervisorError> {
        let tenants = self.inner.directory.active_tenants().await?;
        let results = join_all(tenants.iter().map(|tenant| async move {
            (tenant.store_id, self.start(tenant.store_id).await)
        }))
        .await;

        let report = Self::collect(results.into_iter().map(|(id, r)| (id, r.map(|_| ()))));
        for (store_id, err) in &report.failed {
            log::warn!("Store {} did not start: {}", store_id, err);
        }
        log::info!(
            "Started {} tenant bots ({} failed)",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Stops every running tenant concurrently.
    pub async fn stop_all(&self) -> BulkReport {
        let ids = self.running().await;
        let results = join_all(ids.into_iter().map(|id| async move { (id, self.stop(id).await) })).await;
        let report = Self::collect(results);
        log::info!("Stopped {} tenant bots", report.succeeded.len());
        report
    }

    /// Stops everything and waits (bounded) for in-flight handlers.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.stop_all().await;
        self.inner.tracker.close();
        if tokio::time::timeout(config::supervisor::shutdown_grace(), self.inner.tracker.wait())
            .await
            .is_err()
        {
            log::warn!("Some tenant event handlers were still running at shutdown");
        }
    }

    fn collect(results: impl IntoIterator<Item = (StoreId, Result<(), SupervisorError>)>) -> BulkReport {
        let mut report = BulkReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.succeeded.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }
        report
    }

    /// Moves the tenant to `Error` if `generation` is still current, then
    /// records and reports it.
    async fn fail(&self, tenant: &TenantHandle, generation: u64, reason: String) {
        let store_id = tenant.store_id;
        {
            let mut registry = self.inner.registry.lock().await;
            if registry.get(&store_id).and_then(Slot::generation) != Some(generation) {
                return;
            }
            registry.insert(store_id, Slot::Error { reason: reason.clone() });
            Self::update_gauge(&registry);
        }

        log::error!("Bot of store {} failed: {}", store_id, reason);
        self.record(store_id, TenantStatus::Error, Some(&reason)).await;
        let notice = messages::tenant_failed(&reason);
        if let Err(e) = self
            .inner
            .notifier
            .send_message(tenant.owner_chat_id, &notice.text, notice.keyboard.as_ref())
            .await
        {
            log::warn!("Could not notify owner of store {}: {}", store_id, e);
        }
    }

    async fn record(&self, store_id: StoreId, status: TenantStatus, error: Option<&str>) {
        if let Err(e) = self.inner.directory.record_status(store_id, status, error).await {
            log::warn!("Could not record status {} for store {}: {}", status, store_id, e);
        }
    }

    fn update_gauge(registry: &HashMap<StoreId, Slot>) {
        let running = registry.values().filter(|slot| matches!(slot, Slot::Running(_))).count();
        metrics::RUNNING_TENANTS.set(i64::try_from(running).unwrap_or(i64::MAX));
    }
}
