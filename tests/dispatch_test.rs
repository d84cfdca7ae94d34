//! Event pipeline: per-user ordering, cross-user concurrency and the
//! membership gate.
//!
//! Run with: cargo test --test dispatch_test

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use common::{named_text, Hub};
use storehub::core::types::InboundEvent;
use storehub::dispatch::{run_poll_loop, EventPipeline, GatePolicy, LaneLimits};
use storehub::router::Router;
use storehub::session::{BotScope, FlowStep, SessionStore};
use storehub::telegram::messages;
use storehub::telegram::MembershipGate;
use storehub::testing::{ChannelUpdateSource, EchoHandler, RecordingOutbound, Sent};

const LIMITS: LaneLimits = LaneLimits { workers: 4, pending: 64 };

fn echo_pipeline(outbound: Arc<RecordingOutbound>, tracker: TaskTracker) -> EventPipeline {
    let router = Router::new(
        Arc::new(EchoHandler::new(BotScope::Mother)),
        SessionStore::in_memory(Duration::from_secs(3_600)),
    );
    EventPipeline::new(router, outbound, None, LIMITS, tracker)
}

async fn drain(tracker: &TaskTracker) {
    tracker.close();
    tokio::time::timeout(Duration::from_secs(5), tracker.wait())
        .await
        .unwrap();
}

// ==================== ordering ====================

mod ordering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_same_user_events_run_in_order() {
        let outbound = Arc::new(RecordingOutbound::new());
        let tracker = TaskTracker::new();
        let pipeline = echo_pipeline(outbound.clone(), tracker.clone());
        let cancel = CancellationToken::new();

        assert!(pipeline.submit(InboundEvent::text(1, 1, "/slow"), &cancel).await);
        assert!(pipeline.submit(InboundEvent::text(1, 1, "fast"), &cancel).await);
        assert!(pipeline.submit(InboundEvent::text(2, 2, "other"), &cancel).await);
        drain(&tracker).await;

        assert_eq!(outbound.texts_to(1).await, vec!["/slow".to_string(), "fast".to_string()]);

        // The other user was not held up behind the slow handler
        let order: Vec<_> = outbound
            .sent()
            .await
            .iter()
            .filter_map(|s| s.text().map(str::to_string))
            .collect();
        assert_eq!(order[0], "other");
    }

    #[tokio::test]
    async fn test_second_message_sees_first_transition() {
        let hub = Hub::new();
        let tracker = TaskTracker::new();
        let pipeline = EventPipeline::new(hub.mother.clone(), hub.mother_out.clone(), None, LIMITS, tracker.clone());
        let cancel = CancellationToken::new();

        for user in 1..=5 {
            pipeline.submit(named_text(user, "u", "/register"), &cancel).await;
        }
        for user in 1..=5 {
            pipeline.submit(named_text(user, "u", "My Shop"), &cancel).await;
        }
        drain(&tracker).await;

        for user in 1..=5 {
            assert_eq!(
                hub.session(user).await,
                Some(FlowStep::RegistrationAwaitingDescription {
                    name: "My Shop".to_string()
                }),
                "user {}",
                user
            );
        }
    }

    #[tokio::test]
    async fn test_poll_loop_feeds_the_pipeline_until_cancelled() {
        let outbound = Arc::new(RecordingOutbound::new());
        let tracker = TaskTracker::new();
        let pipeline = echo_pipeline(outbound.clone(), tracker.clone());
        let live = Arc::new(AtomicUsize::new(0));
        let (feed, source) = ChannelUpdateSource::new(live.clone());
        let cancel = CancellationToken::new();

        let loop_task = tokio::spawn(run_poll_loop(Box::new(source), pipeline, cancel.clone(), "test"));
        feed.send(Ok(InboundEvent::text(3, 3, "ping"))).unwrap();
        let out = &outbound;
        assert!(common::wait_until(|| async move { !out.texts_to(3).await.is_empty() }).await);

        cancel.cancel();
        assert_eq!(loop_task.await.unwrap(), Ok(()));
        assert_eq!(live.load(Ordering::SeqCst), 0);
        drain(&tracker).await;
    }
}

// ==================== membership gate ====================

#[derive(Default)]
struct ListGate {
    members: Vec<i64>,
    refreshes: AtomicUsize,
}

#[async_trait]
impl MembershipGate for ListGate {
    async fn is_authorized(&self, user_id: i64) -> bool {
        self.members.contains(&user_id)
    }

    async fn refresh(&self, _user_id: i64) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

mod gate {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gated(hub: &Hub, gate: Arc<ListGate>) -> EventPipeline {
        let policy = GatePolicy {
            gate,
            denied: messages::join_channel("@storehub_news"),
        };
        EventPipeline::new(
            hub.mother.clone(),
            hub.mother_out.clone(),
            Some(policy),
            LIMITS,
            TaskTracker::new(),
        )
    }

    #[tokio::test]
    async fn test_outsiders_get_the_join_prompt() {
        let hub = Hub::new();
        let pipeline = gated(&hub, Arc::new(ListGate::default()));

        let effects = pipeline.process(named_text(7, "carol", "/register")).await;

        assert_eq!(effects.len(), 1);
        assert!(effects[0].text().contains("join our channel @storehub_news"));
        assert_eq!(hub.session(7).await, None);
    }

    #[tokio::test]
    async fn test_members_are_routed() {
        let hub = Hub::new();
        let gate = Arc::new(ListGate {
            members: vec![7],
            ..ListGate::default()
        });
        let pipeline = gated(&hub, gate);

        pipeline.process(named_text(7, "carol", "/register")).await;

        assert_eq!(hub.session(7).await, Some(FlowStep::RegistrationAwaitingName));
    }

    #[tokio::test]
    async fn test_recheck_refreshes_and_acks() {
        let hub = Hub::new();
        let gate = Arc::new(ListGate::default());
        let pipeline = gated(&hub, gate.clone());

        pipeline
            .process(InboundEvent::callback(7, 7, "cb-42", "check_membership"))
            .await;

        assert_eq!(gate.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.mother_out.acks().await, vec!["cb-42".to_string()]);
        assert!(matches!(hub.mother_out.sent().await[0], Sent::Ack(_)));
    }
}
