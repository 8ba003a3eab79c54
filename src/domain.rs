#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub type EventId = i64;
pub type SubscriberId = i64;
pub type SubscriptionId = i64;
pub type RecipientId = i64;

/// A fireable event as recorded in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub event_id: EventId,
    pub name: String,
    pub translate: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Subscriber {
    pub subscriber_id: SubscriberId,
    pub phone_number: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub subscriber_id: SubscriberId,
    pub event_id: EventId,
}

/// Chat-platform recipient linked to a subscriber. At most one per subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ChatRecipientLink {
    pub recipient_id: RecipientId,
    pub subscriber_id: SubscriberId,
}

/// Reporting view of one subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriberReport {
    pub subscriber_id: SubscriberId,
    pub phone_number: String,
    pub has_chat_link: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<SubscriptionReport>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionReport {
    pub subscription_id: SubscriptionId,
    pub event: Event,
}

/// How a caller names an event: by numeric id or by its unique name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "RawIdentifier")]
pub enum EventIdentifier {
    Id(EventId),
    Name(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Id(EventId),
    Text(String),
}

impl From<RawIdentifier> for EventIdentifier {
    fn from(raw: RawIdentifier) -> Self {
        match raw {
            RawIdentifier::Id(id) => EventIdentifier::Id(id),
            RawIdentifier::Text(text) => EventIdentifier::parse(&text),
        }
    }
}

impl EventIdentifier {
    /// All-digit input is an id, anything else a name.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse::<EventId>() {
                return EventIdentifier::Id(id);
            }
        }
        EventIdentifier::Name(trimmed.to_string())
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, EventIdentifier::Name(name) if name.is_empty())
    }
}

impl FromStr for EventIdentifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<EventId> for EventIdentifier {
    fn from(id: EventId) -> Self {
        EventIdentifier::Id(id)
    }
}

impl From<&str> for EventIdentifier {
    fn from(value: &str) -> Self {
        EventIdentifier::parse(value)
    }
}

impl Display for EventIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EventIdentifier::Id(id) => write!(f, "{id}"),
            EventIdentifier::Name(name) => f.write_str(name),
        }
    }
}
