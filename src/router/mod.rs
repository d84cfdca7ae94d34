//! Conversation routing shared by the mother bot and every storefront.
//!
//! The router owns the session lifecycle: it loads the user's session, feeds
//! the event to the current flow step, persists the result and hands terminal
//! steps to a bot-specific `ConversationHandler`. Idle users go straight to the
//! handler's command table.

pub mod mother;
pub mod storefront;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::types::{InboundEvent, Keyboard};
use crate::flow::{self, Completion, Transition};
use crate::session::{BotScope, FlowStep, SessionError, SessionKey, SessionStore};
use crate::telegram::messages::{self, Reply, BACK_MAIN_ACTION, CANCEL_ACTION};

pub use mother::MotherHandler;
pub use storefront::StorefrontHandler;

/// Something to send once routing is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
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
}

impl Effect {
    pub fn reply(chat_id: i64, reply: Reply) -> Self {
        Effect::Message {
            chat_id,
            text: reply.text,
            keyboard: reply.keyboard,
        }
    }

    pub fn photo(chat_id: i64, photo: impl Into<String>, reply: Reply) -> Self {
        Effect::Photo {
            chat_id,
            photo: photo.into(),
            caption: reply.text,
            keyboard: reply.keyboard,
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Effect::Message { chat_id, .. } | Effect::Photo { chat_id, .. } => *chat_id,
        }
    }

    /// Message text or photo caption.
    pub fn text(&self) -> &str {
        match self {
            Effect::Message { text, .. } => text,
            Effect::Photo { caption, .. } => caption,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Effect::Message { keyboard, .. } | Effect::Photo { keyboard, .. } => keyboard.as_ref(),
        }
    }
}

/// What a handler decided: replies plus the flow step to enter, if any.
#[derive(Debug, Default)]
pub struct Outcome {
    pub effects: Vec<Effect>,
    /// `Some` enters (or stays in) a flow; `None` leaves the user idle.
    pub next: Option<FlowStep>,
}

impl Outcome {
    pub fn reply(chat_id: i64, reply: Reply) -> Self {
        Self {
            effects: vec![Effect::reply(chat_id, reply)],
            next: None,
        }
    }

    pub fn enter(step: FlowStep) -> Self {
        Self {
            effects: Vec::new(),
            next: Some(step),
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn then(mut self, step: FlowStep) -> Self {
        self.next = Some(step);
        self
    }
}

/// How the session was left after routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Unchanged,
    Set(FlowStep),
    /// No session remains for the user.
    Cleared,
}

#[derive(Debug)]
pub struct Routed {
    pub effects: Vec<Effect>,
    pub session: SessionChange,
}

/// Bot-specific behaviour plugged into the shared router.
#[async_trait]
pub trait ConversationHandler: Send + Sync {
    fn scope(&self) -> BotScope;

    /// Checked before the session is touched. `Some` short-circuits routing.
    async fn preflight(&self, _event: &InboundEvent) -> AppResult<Option<Vec<Effect>>> {
        Ok(None)
    }

    /// Event from a user with no active flow.
    async fn idle(&self, event: &InboundEvent) -> AppResult<Outcome>;

    /// Performs a flow's terminal action.
    async fn complete(&self, event: &InboundEvent, completion: Completion) -> AppResult<Outcome>;

    fn prompt(&self, step: &FlowStep) -> Reply;

    /// Where a user lands after cancelling or losing their session.
    async fn main_menu(&self, event: &InboundEvent) -> Reply;
}

#[derive(Clone)]
pub struct Router {
    handler: Arc<dyn ConversationHandler>,
    sessions: SessionStore,
}

fn is_escape(event: &InboundEvent) -> bool {
    matches!(event.command(), Some(("cancel" | "start" | "menu", _)))
        || matches!(event.action_id(), Some(CANCEL_ACTION | BACK_MAIN_ACTION))
}

impl Router {
    pub fn new(handler: Arc<dyn ConversationHandler>, sessions: SessionStore) -> Self {
        Self { handler, sessions }
    }

    pub fn scope(&self) -> BotScope {
        self.handler.scope()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn session_key(&self, event: &InboundEvent) -> SessionKey {
        SessionKey::new(self.handler.scope(), event.user_id())
    }

    fn failure(event: &InboundEvent) -> Routed {
        Routed {
            effects: vec![Effect::reply(event.chat_id(), Reply::text(messages::GENERIC_FAILURE))],
            session: SessionChange::Unchanged,
        }
    }

    /// Routes one event. Never fails: errors become a generic reply and
    /// leave the session as it was.
    pub async fn route(&self, event: &InboundEvent) -> Routed {
        match self.handler.preflight(event).await {
            Ok(Some(effects)) => {
                return Routed {
                    effects,
                    session: SessionChange::Unchanged,
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Preflight failed for {}: {}", self.session_key(event), e);
                return Self::failure(event);
            }
        }

        let key = self.session_key(event);
        let session = match self.sessions.get(&key).await {
            Ok(session) => session,
            Err(SessionError::Corrupt(reason)) => {
                log::warn!("Resetting corrupt session {}: {}", key, reason);
                metrics::CORRUPT_SESSIONS_TOTAL.inc();
                if let Err(e) = self.sessions.clear(&key).await {
                    log::error!("Failed to clear corrupt session {}: {}", key, e);
                }
                let menu = self.handler.main_menu(event).await;
                return Routed {
                    effects: vec![
                        Effect::reply(event.chat_id(), Reply::text(messages::SESSION_RESET)),
                        Effect::reply(event.chat_id(), menu),
                    ],
                    session: SessionChange::Cleared,
                };
            }
            Err(e) => {
                log::error!("Failed to load session {}: {}", key, e);
                return Self::failure(event);
            }
        };

        match session {
            Some(session) => self.in_flow(&key, session.step, event).await,
            None => match self.handler.idle(event).await {
                Ok(outcome) => self.apply(&key, event.chat_id(), outcome).await,
                Err(e) => {
                    log::error!("Handler failed for {}: {}", key, e);
                    Self::failure(event)
                }
            },
        }
    }

    async fn in_flow(&self, key: &SessionKey, step: FlowStep, event: &InboundEvent) -> Routed {
        let chat_id = event.chat_id();

        if is_escape(event) {
            if let Err(e) = self.sessions.clear(key).await {
                log::error!("Failed to clear session {}: {}", key, e);
                return Self::failure(event);
            }
            log::debug!("{} left {} at {}", key, step.flow(), step.state_name());
            let mut effects = Vec::new();
            if event.command().map(|(name, _)| name) == Some("cancel") || event.action_id() == Some(CANCEL_ACTION) {
                effects.push(Effect::reply(chat_id, Reply::text(messages::FLOW_CANCELLED)));
            }
            effects.push(Effect::reply(chat_id, self.handler.main_menu(event).await));
            return Routed {
                effects,
                session: SessionChange::Cleared,
            };
        }

        // Any other command mid-flow is not an answer; the step stays put
        if let Some((name, _)) = event.command() {
            if !flow::accepts_command(&step, name) {
                log::debug!("{} sent /{} during {}", key, name, step.state_name());
                return self.reprompt(&step, chat_id, messages::COMMAND_IN_FLOW);
            }
        }

        match flow::advance(&step, event) {
            Transition::Reprompt(reason) => {
                metrics::VALIDATION_REJECTIONS_TOTAL
                    .with_label_values(&[step.state_name()])
                    .inc();
                self.reprompt(&step, chat_id, reason.to_string())
            }
            Transition::Advance(next) => self.apply(key, chat_id, Outcome::enter(next)).await,
            Transition::Complete(completion) => {
                let flow = completion.flow();
                match self.handler.complete(event, completion).await {
                    Ok(outcome) => {
                        metrics::FLOWS_COMPLETED_TOTAL.with_label_values(&[flow.as_ref()]).inc();
                        self.apply(key, chat_id, outcome).await
                    }
                    Err(e) => {
                        // The user can resend the last answer
                        log::error!("Completing {} for {} failed: {}", flow, key, e);
                        Self::failure(event)
                    }
                }
            }
        }
    }

    fn reprompt(&self, step: &FlowStep, chat_id: i64, reason: impl Into<String>) -> Routed {
        Routed {
            effects: vec![
                Effect::reply(chat_id, Reply::text(reason)),
                Effect::reply(chat_id, self.handler.prompt(step)),
            ],
            session: SessionChange::Unchanged,
        }
    }

    /// Persists the handler's chosen step and appends its prompt.
    async fn apply(&self, key: &SessionKey, chat_id: i64, outcome: Outcome) -> Routed {
        let Outcome { mut effects, next } = outcome;
        let result = match &next {
            Some(step) => self.sessions.set(key, step).await,
            None => self.sessions.clear(key).await,
        };
        if let Err(e) = result {
            log::error!("Failed to persist session {}: {}", key, e);
            effects.push(Effect::reply(chat_id, Reply::text(messages::GENERIC_FAILURE)));
            return Routed {
                effects,
                session: SessionChange::Unchanged,
            };
        }

        match next {
            Some(step) => {
                effects.push(Effect::reply(chat_id, self.handler.prompt(&step)));
                Routed {
                    effects,
                    session: SessionChange::Set(step),
                }
            }
            None => Routed {
                effects,
                session: SessionChange::Cleared,
            },
        }
    }
}
