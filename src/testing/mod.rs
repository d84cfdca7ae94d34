//! In-process doubles for the transport seams.
//!
//! `MockConnector` hands out channel-backed update sources and a shared
//! `RecordingOutbound`, so supervisor and routing behaviour can be exercised
//! without a network.
//!
//! ```rust,ignore
//! let connector = MockConnector::new();
//! let outbound = connector.outbound();
//! // ... start a tenant with token "111:..."
//! connector.feed("111:...").unwrap().send(Ok(InboundEvent::text(7, 7, "/start"))).unwrap();
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::core::error::AppResult;
use crate::core::types::{InboundEvent, Keyboard, StoreId};
use crate::flow::Completion;
use crate::router::{ConversationHandler, Effect, Outcome};
use crate::session::{BotScope, FlowStep};
use crate::source::{Connection, Connector, SourceError, UpdateSource};
use crate::supervisor::{SupervisorError, TenantDirectory, TenantHandle, TenantStatus};
use crate::telegram::messages::Reply;
use crate::telegram::{Outbound, OutboundError};

/// How long `ChannelUpdateSource::next_event` waits before reporting an idle poll.
const IDLE_POLL: Duration = Duration::from_millis(20);

// ==================== Outbound ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Message {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Photo {
        chat_id: i64,
        photo: String,
        caption: String,
        keyboard: Option<Keyboard>,
    },
    Ack(String),
}

impl Sent {
    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Sent::Message { chat_id, .. } | Sent::Photo { chat_id, .. } => Some(*chat_id),
            Sent::Ack(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Sent::Message { text, .. } => Some(text),
            Sent::Photo { caption, .. } => Some(caption),
            Sent::Ack(_) => None,
        }
    }
}

/// Records every send instead of performing it.
#[derive(Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    /// Texts and captions delivered to `chat_id`, in order.
    pub async fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| s.chat_id() == Some(chat_id))
            .filter_map(|s| s.text().map(str::to_string))
            .collect()
    }

    pub async fn acks(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|s| match s {
                Sent::Ack(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), OutboundError> {
        self.sent.lock().await.push(Sent::Message {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), OutboundError> {
        self.sent.lock().await.push(Sent::Photo {
            chat_id,
            photo: photo.to_string(),
            caption: caption.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn ack_callback(&self, callback_id: &str) -> Result<(), OutboundError> {
        self.sent.lock().await.push(Sent::Ack(callback_id.to_string()));
        Ok(())
    }
}

// ==================== Update source ====================

pub type Feed = UnboundedSender<Result<InboundEvent, SourceError>>;

/// Update source fed through a channel. Pushing an `Err` simulates a poll
/// failure; dropping every sender closes the source.
pub struct ChannelUpdateSource {
    events: UnboundedReceiver<Result<InboundEvent, SourceError>>,
    live: Arc<AtomicUsize>,
    closed: bool,
}

impl ChannelUpdateSource {
    pub fn new(live: Arc<AtomicUsize>) -> (Feed, Self) {
        let (tx, rx) = unbounded_channel();
        live.fetch_add(1, Ordering::SeqCst);
        (
            tx,
            Self {
                events: rx,
                live,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl UpdateSource for ChannelUpdateSource {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        match tokio::time::timeout(IDLE_POLL, self.events.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(event)) => event.map(Some),
            Ok(None) => Err(SourceError::Closed),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.events.close();
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ==================== Connector ====================

/// Opens channel-backed connections keyed by token.
#[derive(Default)]
pub struct MockConnector {
    outbound: Arc<RecordingOutbound>,
    feeds: DashMap<String, Feed>,
    rejected: DashSet<String>,
    unreachable: DashSet<String>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    open_delay: Option<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` takes at least `delay`, to widen race windows in tests.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// `open` fails with `CredentialInvalid` for this token.
    pub fn reject(&self, token: &str) {
        self.rejected.insert(token.to_string());
    }

    /// `open` fails with `ConnectionFailed` for this token.
    pub fn make_unreachable(&self, token: &str) {
        self.unreachable.insert(token.to_string());
    }

    pub fn restore(&self, token: &str) {
        self.rejected.remove(token);
        self.unreachable.remove(token);
    }

    pub fn outbound(&self) -> Arc<RecordingOutbound> {
        Arc::clone(&self.outbound)
    }

    /// Sender for the most recent connection opened with `token`.
    pub fn feed(&self, token: &str) -> Option<Feed> {
        self.feeds.get(token).map(|feed| feed.clone())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Sources opened and not yet closed.
    pub fn live_sources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, credential: &SecretString) -> Result<Connection, SourceError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let token = credential.expose_secret();
        if self.rejected.contains(token) {
            return Err(SourceError::CredentialInvalid("Unauthorized".to_string()));
        }
        if self.unreachable.contains(token) {
            return Err(SourceError::ConnectionFailed("network unreachable".to_string()));
        }

        let (feed, source) = ChannelUpdateSource::new(Arc::clone(&self.live));
        self.feeds.insert(token.to_string(), feed);
        let name = token.split(':').next().unwrap_or("mock");
        Ok(Connection {
            source: Box::new(source),
            outbound: Arc::clone(&self.outbound) as Arc<dyn Outbound>,
            bot_username: Some(format!("store_{}_bot", name)),
        })
    }
}

// ==================== Tenant directory ====================

/// Tenants held in memory, with every status write recorded.
#[derive(Default)]
pub struct StaticDirectory {
    tenants: DashMap<StoreId, TenantHandle>,
    statuses: Mutex<Vec<(StoreId, TenantStatus, Option<String>)>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: TenantHandle) {
        self.tenants.insert(tenant.store_id, tenant);
    }

    /// Status writes for `store_id`, oldest first.
    pub async fn history(&self, store_id: StoreId) -> Vec<TenantStatus> {
        self.statuses
            .lock()
            .await
            .iter()
            .filter(|(id, _, _)| *id == store_id)
            .map(|(_, status, _)| *status)
            .collect()
    }
}

#[async_trait]
impl TenantDirectory for StaticDirectory {
    async fn active_tenants(&self) -> Result<Vec<TenantHandle>, SupervisorError> {
        let mut tenants: Vec<_> = self
            .tenants
            .iter()
            .filter(|t| t.desired == crate::supervisor::DesiredStatus::Active && t.credential.is_some())
            .map(|t| t.value().clone())
            .collect();
        tenants.sort_by_key(|t| t.store_id);
        Ok(tenants)
    }

    async fn tenant(&self, store_id: StoreId) -> Result<Option<TenantHandle>, SupervisorError> {
        Ok(self.tenants.get(&store_id).map(|t| t.value().clone()))
    }

    async fn record_status(
        &self,
        store_id: StoreId,
        status: TenantStatus,
        error: Option<&str>,
    ) -> Result<(), SupervisorError> {
        self.statuses
            .lock()
            .await
            .push((store_id, status, error.map(str::to_string)));
        Ok(())
    }

    async fn record_username(&self, _store_id: StoreId, _username: &str) -> Result<(), SupervisorError> {
        Ok(())
    }
}

// ==================== Handler ====================

/// Replies with the text it received; `/slow` sleeps before replying.
pub struct EchoHandler {
    scope: BotScope,
}

impl EchoHandler {
    pub fn new(scope: BotScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl ConversationHandler for EchoHandler {
    fn scope(&self) -> BotScope {
        self.scope
    }

    async fn idle(&self, event: &InboundEvent) -> AppResult<Outcome> {
        if let Some(("slow", _)) = event.command() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let text = event
            .message_text()
            .or(event.action_id())
            .unwrap_or("<empty>")
            .to_string();
        Ok(Outcome::default().with_effect(Effect::reply(event.chat_id(), Reply::text(text))))
    }

    async fn complete(&self, event: &InboundEvent, _completion: Completion) -> AppResult<Outcome> {
        Ok(Outcome::reply(event.chat_id(), Reply::text("done")))
    }

    fn prompt(&self, step: &FlowStep) -> Reply {
        Reply::text(step.state_name())
    }

    async fn main_menu(&self, _event: &InboundEvent) -> Reply {
        Reply::text("menu")
    }
}
