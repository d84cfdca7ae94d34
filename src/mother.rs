//! The control bot's own receive loop.
//!
//! Unlike tenant bots the mother bot is not supervised: it is opened once at
//! boot, a failure to open it aborts startup, and it runs until shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::config;
use crate::dispatch::{run_poll_loop, EventPipeline, GatePolicy, LaneLimits};
use crate::router::Router;
use crate::source::{Connection, SourceError, UpdateSource};
use crate::telegram::{messages, MembershipGate, Outbound};

pub struct MotherDispatcher {
    source: Box<dyn UpdateSource>,
    pipeline: EventPipeline,
    outbound: Arc<dyn Outbound>,
    tracker: TaskTracker,
}

impl MotherDispatcher {
    /// `channel` and `gate` go together: when set, non-members get the join
    /// prompt instead of being routed.
    pub fn new(
        connection: Connection,
        router: Router,
        gate: Option<(Arc<dyn MembershipGate>, String)>,
        limits: LaneLimits,
        tracker: TaskTracker,
    ) -> Self {
        let Connection {
            source,
            outbound,
            bot_username,
        } = connection;
        if let Some(username) = bot_username {
            log::info!("Mother bot is @{}", username);
        }

        let gate = gate.map(|(gate, channel)| GatePolicy {
            gate,
            denied: messages::join_channel(&channel),
        });
        let pipeline = EventPipeline::new(router, Arc::clone(&outbound), gate, limits, tracker.clone());
        Self {
            source,
            pipeline,
            outbound,
            tracker,
        }
    }

    /// Outbound of the mother bot, used for owner and admin notifications.
    pub fn outbound(&self) -> Arc<dyn Outbound> {
        Arc::clone(&self.outbound)
    }

    /// Receives until `cancel` fires, then waits for queued events to finish.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SourceError> {
        let result = run_poll_loop(self.source, self.pipeline, cancel, "mother").await;
        self.tracker.close();
        if tokio::time::timeout(config::supervisor::shutdown_grace(), self.tracker.wait())
            .await
            .is_err()
        {
            log::warn!("Mother bot handlers still running after the shutdown grace period");
        }
        result
    }
}
