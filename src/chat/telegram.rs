#![forbid(unsafe_code)]

use super::{
    ChatError, ChatMessenger, InboundUpdate, OutboundMessage, ReplyKeyboard, UpdateFeed,
    UpdateKind,
};
use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SEND_MESSAGE: &str = "sendMessage";
const GET_UPDATES: &str = "getUpdates";
/// Slack on top of the long-poll window before the HTTP request itself gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Bot API client covering the two calls the service needs.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: Url,
    poll_timeout: Duration,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, ChatError> {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &TelegramConfig) -> Result<Self, ChatError> {
        Ok(Self {
            http,
            base: bot_base_url(&config.api_url, &config.token)?,
            poll_timeout: config.poll_timeout,
        })
    }

    async fn call<B, T>(
        &self,
        method: &'static str,
        body: &B,
        limit: Duration,
    ) -> Result<T, ChatError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.base.join(method)?;
        let response = self
            .http
            .post(url)
            .timeout(limit)
            .json(body)
            .send()
            .await
            .map_err(|err| classify(err, limit))?;
        let bytes = response.bytes().await.map_err(|err| classify(err, limit))?;
        parse_reply(method, &bytes)
    }
}

/// `{api_url}/bot{token}/`, with the trailing slash so method names join underneath.
fn bot_base_url(api_url: &str, token: &str) -> Result<Url, ChatError> {
    let trimmed = api_url.trim_end_matches('/');
    Ok(Url::parse(&format!("{trimmed}/bot{token}/"))?)
}

/// The request URL embeds the bot token, so it never travels with the error.
fn classify(err: reqwest::Error, limit: Duration) -> ChatError {
    if err.is_timeout() {
        ChatError::Timeout(limit)
    } else {
        ChatError::Transport(err.without_url())
    }
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

fn parse_reply<T: DeserializeOwned>(method: &'static str, bytes: &[u8]) -> Result<T, ChatError> {
    let reply: ApiReply<T> =
        serde_json::from_slice(bytes).map_err(|source| ChatError::Decode { method, source })?;

    match (reply.ok, reply.result) {
        (true, Some(result)) => Ok(result),
        (true, None) => Err(ChatError::Rejected {
            method,
            description: "reply carried no result".to_string(),
        }),
        (false, _) => Err(ChatError::Rejected {
            method,
            description: reply
                .description
                .unwrap_or_else(|| "no description".to_string()),
        }),
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a ReplyKeyboard>,
}

#[derive(Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    contact: Option<RawContact>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    phone_number: String,
}

/// Decodes one update on its own so a malformed entry cannot stall the offset.
/// Entries without a readable `update_id` are dropped.
fn decode_update(value: serde_json::Value) -> Option<InboundUpdate> {
    let update_id = value.get("update_id").and_then(serde_json::Value::as_i64)?;
    match serde_json::from_value::<RawUpdate>(value) {
        Ok(raw) => Some(InboundUpdate::from(raw)),
        Err(err) => {
            tracing::debug!(
                target: "notifier::chat",
                update_id,
                error = %err,
                "undecodable update treated as other"
            );
            Some(InboundUpdate {
                update_id,
                chat_id: 0,
                private: false,
                kind: UpdateKind::Other,
            })
        }
    }
}

impl From<RawUpdate> for InboundUpdate {
    fn from(raw: RawUpdate) -> Self {
        let Some(message) = raw.message else {
            return InboundUpdate {
                update_id: raw.update_id,
                chat_id: 0,
                private: false,
                kind: UpdateKind::Other,
            };
        };

        let kind = match (message.contact, message.text) {
            (Some(contact), _) => UpdateKind::ContactShared {
                phone_number: contact.phone_number,
            },
            (None, Some(text)) => UpdateKind::Text(text),
            (None, None) => UpdateKind::Other,
        };

        InboundUpdate {
            update_id: raw.update_id,
            chat_id: message.chat.id,
            private: message.chat.kind == "private",
            kind,
        }
    }
}

#[async_trait]
impl ChatMessenger for TelegramClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChatError> {
        let request = SendMessageRequest {
            chat_id: message.recipient_id,
            text: &message.text,
            reply_markup: message.keyboard.as_ref(),
        };
        let _: serde_json::Value = self.call(SEND_MESSAGE, &request, POLL_GRACE).await?;
        Ok(())
    }
}

#[async_trait]
impl UpdateFeed for TelegramClient {
    async fn poll(&self, offset: i64) -> Result<Vec<InboundUpdate>, ChatError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: ["message"],
        };
        let updates: Vec<serde_json::Value> = self
            .call(GET_UPDATES, &request, self.poll_timeout + POLL_GRACE)
            .await?;
        Ok(updates.into_iter().filter_map(decode_update).collect())
    }
}
