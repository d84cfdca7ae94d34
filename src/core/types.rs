//! Transport-neutral types shared by sources, routers and outbound adapters.

use serde::{Deserialize, Serialize};

/// Primary key of a store row; also identifies the store's tenant bot.
pub type StoreId = i64;

/// Who sent an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

impl Sender {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            username: None,
            first_name: String::new(),
        }
    }

    /// `@username` when known, otherwise the first name.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{}", username),
            None if !self.first_name.is_empty() => self.first_name.clone(),
            None => format!("user {}", self.user_id),
        }
    }
}

/// Media attached to a text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Photo { file_id: String },
    Document { file_id: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub chat_id: i64,
    pub sender: Sender,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAction {
    pub callback_id: String,
    pub chat_id: i64,
    pub sender: Sender,
    pub action_id: String,
}

/// One inbound event, alive for a single dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(TextMessage),
    Callback(CallbackAction),
}

impl InboundEvent {
    pub fn text(chat_id: i64, user_id: i64, text: impl Into<String>) -> Self {
        InboundEvent::Text(TextMessage {
            chat_id,
            sender: Sender::new(user_id),
            text: Some(text.into()),
            attachments: Vec::new(),
        })
    }

    pub fn photo(chat_id: i64, user_id: i64, file_id: impl Into<String>) -> Self {
        InboundEvent::Text(TextMessage {
            chat_id,
            sender: Sender::new(user_id),
            text: None,
            attachments: vec![Attachment::Photo { file_id: file_id.into() }],
        })
    }

    pub fn callback(chat_id: i64, user_id: i64, callback_id: impl Into<String>, action_id: impl Into<String>) -> Self {
        InboundEvent::Callback(CallbackAction {
            callback_id: callback_id.into(),
            chat_id,
            sender: Sender::new(user_id),
            action_id: action_id.into(),
        })
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            InboundEvent::Text(m) => m.chat_id,
            InboundEvent::Callback(c) => c.chat_id,
        }
    }

    pub fn sender(&self) -> &Sender {
        match self {
            InboundEvent::Text(m) => &m.sender,
            InboundEvent::Callback(c) => &c.sender,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.sender().user_id
    }

    /// Trimmed message text, if this is a text message with non-empty text.
    pub fn message_text(&self) -> Option<&str> {
        match self {
            InboundEvent::Text(m) => m.text.as_deref().map(str::trim).filter(|t| !t.is_empty()),
            InboundEvent::Callback(_) => None,
        }
    }

    /// File id of the largest attached photo.
    pub fn photo_file_id(&self) -> Option<&str> {
        match self {
            InboundEvent::Text(m) => m.attachments.iter().find_map(|a| match a {
                Attachment::Photo { file_id } => Some(file_id.as_str()),
                _ => None,
            }),
            InboundEvent::Callback(_) => None,
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        match self {
            InboundEvent::Callback(c) => Some(c.action_id.as_str()),
            InboundEvent::Text(_) => None,
        }
    }

    pub fn callback_id(&self) -> Option<&str> {
        match self {
            InboundEvent::Callback(c) => Some(c.callback_id.as_str()),
            InboundEvent::Text(_) => None,
        }
    }

    /// Command name without the leading slash or a `@botname` suffix.
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.message_text()?;
        let rest = text.strip_prefix('/')?;
        let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let name = head.split('@').next().unwrap_or(head);
        Some((name, args.trim()))
    }
}

/// An inline button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Button {
    Callback { label: String, action: String },
    Url { label: String, url: String },
}

impl Button {
    pub fn callback(label: impl Into<String>, action: impl Into<String>) -> Self {
        Button::Callback {
            label: label.into(),
            action: action.into(),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Button::Url {
            label: label.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    pub fn single(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new().row(vec![Button::callback(label, action)])
    }

    /// Every callback action on the keyboard, in order.
    pub fn actions(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|b| match b {
                Button::Callback { action, .. } => Some(action.as_str()),
                Button::Url { .. } => None,
            })
            .collect()
    }
}
