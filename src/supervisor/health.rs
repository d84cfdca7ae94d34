//! Periodic reconciliation between store rows and running bots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::AppResult;
use crate::storage::Database;
use crate::supervisor::{Supervisor, TenantStatus};
use crate::telegram::messages;
use crate::telegram::Outbound;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Owners warned that their plan is about to run out
    pub reminded: Vec<i64>,
    pub expired: Vec<i64>,
    pub started: Vec<i64>,
    pub stopped: Vec<i64>,
}

pub struct HealthMonitor {
    supervisor: Supervisor,
    db: Database,
    notifier: Arc<dyn Outbound>,
}

impl HealthMonitor {
    pub fn new(supervisor: Supervisor, db: Database, notifier: Arc<dyn Outbound>) -> Self {
        Self {
            supervisor,
            db,
            notifier,
        }
    }

    /// One pass: remind owners of upcoming expiry, expire lapsed plans, start
    /// what should run, stop what should not.
    ///
    /// Tenants in `Error` are not retried here, and neither are bots their
    /// owner switched off.
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<HealthReport> {
        let mut report = HealthReport {
            reminded: self.send_expiry_reminders(now).await?,
            ..HealthReport::default()
        };

        for store in self.db.expired_stores(now)? {
            log::info!("Plan of store {} expired", store.id);
            self.db.deactivate_store(store.id)?;
            if self.supervisor.status(store.id).await == TenantStatus::Running {
                if let Err(e) = self.supervisor.stop(store.id).await {
                    log::warn!("Could not stop expired store {}: {}", store.id, e);
                }
            }
            let notice = messages::store_expired(&store);
            if let Err(e) = self
                .notifier
                .send_message(store.owner_id, &notice.text, notice.keyboard.as_ref())
                .await
            {
                log::warn!("Could not tell owner of store {} about expiry: {}", store.id, e);
            }
            report.expired.push(store.id);
        }

        for store in self.db.list_stores()? {
            let live = self.supervisor.status(store.id).await;
            if store.is_active && store.has_bot() {
                let wanted = store.bot_enabled && store.bot_status != TenantStatus::Error;
                if live == TenantStatus::Stopped && wanted {
                    match self.supervisor.start(store.id).await {
                        Ok(_) => report.started.push(store.id),
                        Err(e) => log::warn!("Health check could not start store {}: {}", store.id, e),
                    }
                }
            } else if live == TenantStatus::Running {
                match self.supervisor.stop(store.id).await {
                    Ok(()) => report.stopped.push(store.id),
                    Err(e) => log::warn!("Health check could not stop store {}: {}", store.id, e),
                }
            }
        }

        if report != HealthReport::default() {
            log::info!(
                "Health check: {} reminded, {} expired, {} started, {} stopped",
                report.reminded.len(),
                report.expired.len(),
                report.started.len(),
                report.stopped.len()
            );
        }
        Ok(report)
    }

    /// Warns owners whose plan ends within one of the reminder windows.
    ///
    /// Only the tightest window that applies is sent, and each one at most once
    /// per validity period.
    async fn send_expiry_reminders(&self, now: DateTime<Utc>) -> AppResult<Vec<i64>> {
        let windows = config::reminders::DAYS_BEFORE_EXPIRY;
        let Some(widest) = windows.iter().max() else {
            return Ok(Vec::new());
        };

        let mut reminded = Vec::new();
        for store in self.db.stores_expiring_between(now, now + ChronoDuration::days(*widest))? {
            let Some(expires_at) = store.expires_at else {
                continue;
            };
            let Some(days) = windows
                .iter()
                .copied()
                .filter(|days| expires_at <= now + ChronoDuration::days(*days))
                .min()
            else {
                continue;
            };
            if !self.db.claim_expiry_reminder(store.id, days, expires_at, now)? {
                continue;
            }

            let notice = messages::expiry_reminder(&store, days);
            if let Err(e) = self
                .notifier
                .send_message(store.owner_id, &notice.text, notice.keyboard.as_ref())
                .await
            {
                log::warn!("Could not remind owner of store {} about expiry: {}", store.id, e);
            }
            reminded.push(store.id);
        }
        Ok(reminded)
    }

    /// Runs `run_once` every `interval` until `cancel` fires. The first pass
    /// happens one interval after boot; boot itself calls `start_all`.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.run_once(Utc::now()).await {
                    log::error!("Health check failed: {}", e);
                }
            }
        })
    }
}
