use crate::chat::{ChatError, ChatMessenger, OutboundMessage};
use crate::config::{DeliveryConfig, DeliveryMode};
use crate::dispatch_event;
use crate::domain::{ChatRecipientLink, EventId, RecipientId, SubscriberId};
use crate::error::ServiceError;
use crate::metrics::MetricsCollector;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub mode: DeliveryMode,
    pub max_concurrency: usize,
    pub send_timeout: Duration,
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            mode: config.mode,
            max_concurrency: config.max_concurrency.max(1),
            send_timeout: config.send_timeout,
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub recipient_id: RecipientId,
    pub subscriber_id: SubscriberId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub event_id: EventId,
    pub attempted: usize,
    pub delivered: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

async fn send_one(
    messenger: &dyn ChatMessenger,
    message: &OutboundMessage,
    limit: Duration,
) -> Result<(), ChatError> {
    match tokio::time::timeout(limit, messenger.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Timeout(limit)),
    }
}

fn record(event_id: EventId, link: &ChatRecipientLink, result: &Result<(), ChatError>) {
    MetricsCollector::global().record_send(event_id, result.is_ok());
    match result {
        Ok(()) => dispatch_event!(
            debug,
            "send_succeeded",
            event_id = event_id,
            recipient = link.recipient_id
        ),
        Err(err) => dispatch_event!(
            warn,
            "send_failed",
            event_id = event_id,
            recipient = link.recipient_id,
            subscriber_id = link.subscriber_id,
            error = err
        ),
    }
}

/// Sends `text` to every recipient according to `policy`.
pub async fn deliver_all(
    messenger: &dyn ChatMessenger,
    policy: &DeliveryPolicy,
    event_id: EventId,
    recipients: &[ChatRecipientLink],
    text: &str,
) -> Result<DeliveryReport, ServiceError> {
    match policy.mode {
        DeliveryMode::Continue => {
            Ok(deliver_continue(messenger, policy, event_id, recipients, text).await)
        }
        DeliveryMode::AbortOnFirst => {
            deliver_abort_on_first(messenger, policy, event_id, recipients, text).await
        }
    }
}

async fn deliver_continue(
    messenger: &dyn ChatMessenger,
    policy: &DeliveryPolicy,
    event_id: EventId,
    recipients: &[ChatRecipientLink],
    text: &str,
) -> DeliveryReport {
    let results: Vec<(ChatRecipientLink, Result<(), ChatError>)> =
        stream::iter(recipients.iter().cloned())
            .map(|link| async move {
                let message = OutboundMessage::text(link.recipient_id, text);
                let result = send_one(messenger, &message, policy.send_timeout).await;
                record(event_id, &link, &result);
                (link, result)
            })
            .buffer_unordered(policy.max_concurrency.max(1))
            .collect()
            .await;

    let mut report = DeliveryReport {
        event_id,
        attempted: results.len(),
        delivered: 0,
        failures: Vec::new(),
    };
    for (link, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(err) => report.failures.push(DeliveryFailure {
                recipient_id: link.recipient_id,
                subscriber_id: link.subscriber_id,
                reason: err.reason(),
            }),
        }
    }
    report.failures.sort_by_key(|failure| failure.recipient_id);
    report
}

async fn deliver_abort_on_first(
    messenger: &dyn ChatMessenger,
    policy: &DeliveryPolicy,
    event_id: EventId,
    recipients: &[ChatRecipientLink],
    text: &str,
) -> Result<DeliveryReport, ServiceError> {
    let mut delivered = 0;
    for link in recipients {
        let message = OutboundMessage::text(link.recipient_id, text);
        let result = send_one(messenger, &message, policy.send_timeout).await;
        record(event_id, link, &result);
        if let Err(err) = result {
            return Err(ServiceError::DeliveryAborted {
                event_id,
                recipient_id: link.recipient_id,
                delivered,
                detail: err.reason(),
            });
        }
        delivered += 1;
    }

    Ok(DeliveryReport {
        event_id,
        attempted: recipients.len(),
        delivered,
        failures: Vec::new(),
    })
}
