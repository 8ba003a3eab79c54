//! Chat-platform boundary: outbound messages, the inbound update feed, and the
//! contact-linking listener.

pub mod listener;
pub mod replies;
pub mod telegram;

pub use listener::{ChatListener, ListenerOutcome};
pub use telegram::TelegramClient;

use crate::domain::RecipientId;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request timed out after {0:?}")]
    Timeout(Duration),
    #[error("chat transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat platform rejected `{method}`: {description}")]
    Rejected {
        method: &'static str,
        description: String,
    },
    #[error("failed to decode `{method}` reply: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid chat endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl ChatError {
    /// Short failure code that is safe to show to API callers.
    pub fn reason(&self) -> String {
        match self {
            ChatError::Timeout(_) => "timeout".to_string(),
            ChatError::Transport(_) => "transport".to_string(),
            ChatError::Rejected { description, .. } => format!("rejected: {description}"),
            ChatError::Decode { .. } => "decode".to_string(),
            ChatError::Endpoint(_) => "endpoint".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub request_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_field_placeholder: Option<String>,
    pub one_time_keyboard: bool,
    pub resize_keyboard: bool,
}

impl ReplyKeyboard {
    /// A single button asking the user to share their phone contact.
    pub fn request_contact(label: impl Into<String>, placeholder: impl Into<String>) -> Self {
        Self {
            keyboard: vec![vec![KeyboardButton {
                text: label.into(),
                request_contact: true,
            }]],
            input_field_placeholder: Some(placeholder.into()),
            one_time_keyboard: false,
            resize_keyboard: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient_id: RecipientId,
    pub text: String,
    pub keyboard: Option<ReplyKeyboard>,
}

impl OutboundMessage {
    pub fn text(recipient_id: RecipientId, text: impl Into<String>) -> Self {
        Self {
            recipient_id,
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: ReplyKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    ContactShared { phone_number: String },
    Text(String),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub chat_id: i64,
    /// False for groups and channels.
    pub private: bool,
    pub kind: UpdateKind,
}

#[async_trait]
pub trait ChatMessenger: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChatError>;
}

#[async_trait]
pub trait UpdateFeed: Send + Sync {
    /// Long-polls for updates with `update_id >= offset`.
    async fn poll(&self, offset: i64) -> Result<Vec<InboundUpdate>, ChatError>;
}
