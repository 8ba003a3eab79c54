//! Persisted directories: the event catalog and subscriber/subscription/link state.
//!
//! Every method returns a typed outcome for expected conditions (`Option`, `bool`)
//! and reserves `StoreError` for transport failures, deadlines and constraint
//! conflicts the caller did not check for.

pub mod postgres;

use crate::domain::{
    ChatRecipientLink, Event, EventId, EventIdentifier, RecipientId, Subscriber, SubscriberId,
    SubscriberReport, SubscriptionId, SubscriptionReport,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use postgres::PostgresDirectory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation `{operation}` timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
    #[error("store operation `{operation}` violated a uniqueness constraint")]
    Conflict { operation: &'static str },
    #[error("store operation `{operation}` failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: Box<crate::error::Error>,
    },
}

impl StoreError {
    pub fn backend<E>(operation: &'static str, source: E) -> Self
    where
        crate::error::Error: From<E>,
    {
        StoreError::Backend {
            operation,
            source: Box::new(source.into()),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            StoreError::Timeout { operation, .. }
            | StoreError::Conflict { operation }
            | StoreError::Backend { operation, .. } => operation,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

/// Runs one store call under a deadline.
pub async fn with_deadline<T, F>(
    limit: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, limit }),
    }
}

#[async_trait]
pub trait EventDirectory: Send + Sync {
    /// Insert-if-absent. Returns whether a row was created.
    async fn register_event(&self, event: &Event) -> Result<bool, StoreError>;

    async fn find_event(&self, identifier: &EventIdentifier) -> Result<Option<EventId>, StoreError>;

    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;
}

#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    async fn get_subscriber_by_phone(&self, phone: &str) -> Result<Option<Subscriber>, StoreError>;

    /// Plain insert; a duplicate phone surfaces as `StoreError::Conflict`.
    async fn register_subscriber(&self, phone: &str) -> Result<SubscriberId, StoreError>;

    /// `None` when the pair was already subscribed.
    async fn subscribe_to_event(
        &self,
        subscriber_id: SubscriberId,
        event_id: EventId,
    ) -> Result<Option<SubscriptionId>, StoreError>;

    async fn cancel_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<bool, StoreError>;

    async fn event_subscribers(&self, event_id: EventId) -> Result<Vec<Subscriber>, StoreError>;

    /// `false` when the subscriber already has a recipient.
    async fn link_chat_recipient(
        &self,
        recipient_id: RecipientId,
        subscriber_id: SubscriberId,
    ) -> Result<bool, StoreError>;

    async fn chat_recipients(
        &self,
        phone_numbers: &BTreeSet<String>,
    ) -> Result<Vec<ChatRecipientLink>, StoreError>;

    async fn subscribers_overview(&self) -> Result<Vec<SubscriberReport>, StoreError>;

    async fn subscribers_joined(&self) -> Result<Vec<SubscriberReport>, StoreError>;
}

/// One row of the subscriber ⋈ subscription ⋈ event report.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct JoinedRow {
    pub subscriber_id: SubscriberId,
    pub phone_number: String,
    pub has_chat_link: bool,
    pub subscription_id: SubscriptionId,
    pub event_id: EventId,
    pub name: String,
    pub translate: String,
}

/// Folds rows ordered by subscriber into one report per subscriber.
pub fn group_joined_rows(rows: Vec<JoinedRow>) -> Vec<SubscriberReport> {
    let mut reports: Vec<SubscriberReport> = Vec::new();

    for row in rows {
        let subscription = SubscriptionReport {
            subscription_id: row.subscription_id,
            event: Event {
                event_id: row.event_id,
                name: row.name,
                translate: row.translate,
            },
        };

        match reports.last_mut() {
            Some(current) if current.subscriber_id == row.subscriber_id => {
                current.subscriptions.push(subscription);
            }
            _ => reports.push(SubscriberReport {
                subscriber_id: row.subscriber_id,
                phone_number: row.phone_number,
                has_chat_link: row.has_chat_link,
                subscriptions: vec![subscription],
            }),
        }
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subscriber_id: i64, subscription_id: i64, event_id: i64) -> JoinedRow {
        JoinedRow {
            subscriber_id,
            phone_number: format!("+1555000{subscriber_id:04}"),
            has_chat_link: subscriber_id % 2 == 0,
            subscription_id,
            event_id,
            name: format!("event_{event_id}"),
            translate: format!("Event {event_id}"),
        }
    }

    #[test]
    fn groups_consecutive_rows_per_subscriber() {
        let reports = group_joined_rows(vec![row(1, 10, 1), row(1, 11, 2), row(2, 12, 1)]);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].subscriber_id, 1);
        assert_eq!(
            reports[0]
                .subscriptions
                .iter()
                .map(|s| s.subscription_id)
                .collect::<Vec<_>>(),
            vec![10, 11]
        );
        assert!(reports[1].has_chat_link);
        assert_eq!(reports[1].subscriptions[0].event.name, "event_1");
    }

    #[tokio::test]
    async fn deadline_turns_slow_calls_into_timeouts() {
        let result: Result<(), StoreError> = with_deadline(
            Duration::from_millis(10),
            "slow_call",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.operation(), "slow_call");
    }
}
