//! What happens to one inbound event after the receive loop hands it off.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::metrics;
use crate::core::types::InboundEvent;
use crate::dispatch::lanes::{Job, KeyedLanes, LaneLimits};
use crate::router::{Effect, Router};
use crate::session::SessionKey;
use crate::telegram::messages::Reply;
use crate::telegram::{MembershipGate, Outbound};

/// Membership requirement in front of a router, with the reply sent to outsiders.
pub struct GatePolicy {
    pub gate: Arc<dyn MembershipGate>,
    pub denied: Reply,
}

/// Button that asks for the membership check to be redone.
const RECHECK_ACTION: &str = "check_membership";

struct Stages {
    router: Router,
    outbound: Arc<dyn Outbound>,
    gate: Option<GatePolicy>,
}

/// Acknowledge, gate, route, deliver; serialized per session key.
#[derive(Clone)]
pub struct EventPipeline {
    stages: Arc<Stages>,
    lanes: KeyedLanes<SessionKey>,
}

impl EventPipeline {
    pub fn new(
        router: Router,
        outbound: Arc<dyn Outbound>,
        gate: Option<GatePolicy>,
        limits: LaneLimits,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            stages: Arc::new(Stages { router, outbound, gate }),
            lanes: KeyedLanes::new(limits, tracker),
        }
    }

    /// Hands `event` to its user's lane. Waits while the lanes are full;
    /// returns `false` if `cancel` fired first.
    pub async fn submit(&self, event: InboundEvent, cancel: &CancellationToken) -> bool {
        let key = self.stages.router.session_key(&event);
        metrics::EVENTS_TOTAL
            .with_label_values(&[self.stages.router.scope().label()])
            .inc();
        let stages = Arc::clone(&self.stages);
        let job: Job = Box::pin(async move {
            stages.process(event).await;
        });
        self.lanes.submit(key, job, cancel).await
    }

    /// Runs one event to completion on the caller's task, bypassing lanes.
    pub async fn process(&self, event: InboundEvent) -> Vec<Effect> {
        self.stages.process(event).await
    }
}

/// Holds one unit of the in-flight gauge; released on drop, so a panicking
/// handler does not leave it raised.
struct InFlight(&'static str);

impl InFlight {
    fn enter(scope: &'static str) -> Self {
        metrics::EVENTS_IN_FLIGHT.with_label_values(&[scope]).inc();
        Self(scope)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::EVENTS_IN_FLIGHT.with_label_values(&[self.0]).dec();
    }
}

impl Stages {
    async fn process(&self, event: InboundEvent) -> Vec<Effect> {
        let _in_flight = InFlight::enter(self.router.scope().label());

        if let Some(callback_id) = event.callback_id() {
            if let Err(e) = self.outbound.ack_callback(callback_id).await {
                log::debug!("Callback ack failed: {}", e);
            }
        }

        let effects = match &self.gate {
            Some(policy) if !self.admitted(policy, &event).await => {
                metrics::GATE_REJECTIONS_TOTAL.inc();
                vec![Effect::reply(event.chat_id(), policy.denied.clone())]
            }
            _ => self.router.route(&event).await.effects,
        };

        deliver(self.outbound.as_ref(), &effects).await;
        effects
    }

    async fn admitted(&self, policy: &GatePolicy, event: &InboundEvent) -> bool {
        if event.action_id() == Some(RECHECK_ACTION) {
            policy.gate.refresh(event.user_id()).await;
        }
        policy.gate.is_authorized(event.user_id()).await
    }
}

/// Sends effects in order. A failed send is logged and does not stop the rest.
pub async fn deliver(outbound: &dyn Outbound, effects: &[Effect]) {
    for effect in effects {
        let result = match effect {
            Effect::Message { chat_id, text, keyboard } => {
                outbound.send_message(*chat_id, text, keyboard.as_ref()).await
            }
            Effect::Photo {
                chat_id,
                photo,
                caption,
                keyboard,
            } => outbound.send_photo(*chat_id, photo, caption, keyboard.as_ref()).await,
        };
        if let Err(e) = result {
            log::warn!("Failed to deliver to chat {}: {}", effect.chat_id(), e);
        }
    }
}
