use super::events::EventService;
use crate::directory::{StoreError, SubscriptionDirectory};
use crate::domain::{
    ChatRecipientLink, EventId, EventIdentifier, RecipientId, Subscriber, SubscriberId,
    SubscriberReport, SubscriptionId,
};
use crate::error::{Entity, ServiceError};
use crate::phone::normalize_phone;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionReceipt {
    pub subscription_id: SubscriptionId,
    pub subscriber_id: SubscriberId,
    pub event_id: EventId,
    pub new_subscriber: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(SubscriberId),
    AlreadyLinked(SubscriberId),
    UnknownSubscriber,
}

fn store_failure(context: impl Into<String>, err: StoreError) -> ServiceError {
    ServiceError::internal(context, err)
}

/// Validated phone in canonical form.
pub fn canonical_phone(raw: &str) -> Result<String, ServiceError> {
    normalize_phone(raw).ok_or_else(|| {
        ServiceError::invalid("INVALID_PHONE", format!("`{raw}` is not a valid phone number"))
    })
}

#[derive(Clone)]
pub struct SubscriptionService {
    directory: Arc<dyn SubscriptionDirectory>,
    events: EventService,
}

impl SubscriptionService {
    pub fn new(directory: Arc<dyn SubscriptionDirectory>, events: EventService) -> Self {
        Self { directory, events }
    }

    pub async fn subscribe(
        &self,
        identifier: &EventIdentifier,
        phone: &str,
    ) -> Result<SubscriptionReceipt, ServiceError> {
        let phone = canonical_phone(phone)?;
        let event_id = self.events.does_exist(identifier).await?;
        let (subscriber_id, new_subscriber) = self.get_or_register(&phone).await?;

        let subscription_id = self
            .directory
            .subscribe_to_event(subscriber_id, event_id)
            .await
            .map_err(|err| store_failure("failed to create subscription", err))?
            .ok_or_else(|| {
                ServiceError::already_exists(
                    Entity::Subscription,
                    format!("{phone} -> event {event_id}"),
                )
            })?;

        info!(
            subscription_id,
            subscriber_id, event_id, new_subscriber, "subscription created"
        );
        Ok(SubscriptionReceipt {
            subscription_id,
            subscriber_id,
            event_id,
            new_subscriber,
        })
    }

    async fn get_or_register(&self, phone: &str) -> Result<(SubscriberId, bool), ServiceError> {
        if let Some(existing) = self.lookup(phone).await? {
            return Ok((existing.subscriber_id, false));
        }

        match self.directory.register_subscriber(phone).await {
            Ok(subscriber_id) => Ok((subscriber_id, true)),
            // A concurrent request registered the same phone first.
            Err(StoreError::Conflict { .. }) => {
                debug!(phone, "subscriber registered concurrently; re-reading");
                self.lookup(phone)
                    .await?
                    .map(|subscriber| (subscriber.subscriber_id, false))
                    .ok_or_else(|| {
                        ServiceError::internal(
                            "subscriber vanished after a registration conflict",
                            crate::err!("no subscriber for {phone}"),
                        )
                    })
            }
            Err(err) => Err(store_failure("failed to register subscriber", err)),
        }
    }

    async fn lookup(&self, phone: &str) -> Result<Option<Subscriber>, ServiceError> {
        self.directory
            .get_subscriber_by_phone(phone)
            .await
            .map_err(|err| store_failure("failed to look up subscriber", err))
    }

    pub async fn cancel(&self, subscription_id: SubscriptionId) -> Result<(), ServiceError> {
        let removed = self
            .directory
            .cancel_subscription(subscription_id)
            .await
            .map_err(|err| store_failure("failed to cancel subscription", err))?;

        if removed {
            info!(subscription_id, "subscription cancelled");
            Ok(())
        } else {
            Err(ServiceError::not_found(Entity::Subscription, subscription_id))
        }
    }

    /// Explicit pre-registration; an existing phone is a conflict.
    pub async fn register_subscriber(&self, phone: &str) -> Result<SubscriberId, ServiceError> {
        let phone = canonical_phone(phone)?;
        if self.lookup(&phone).await?.is_some() {
            return Err(ServiceError::already_exists(Entity::Subscriber, phone));
        }

        match self.directory.register_subscriber(&phone).await {
            Ok(subscriber_id) => Ok(subscriber_id),
            Err(StoreError::Conflict { .. }) => {
                Err(ServiceError::already_exists(Entity::Subscriber, phone))
            }
            Err(err) => Err(store_failure("failed to register subscriber", err)),
        }
    }

    pub async fn find_subscriber_by_phone(&self, phone: &str) -> Result<Subscriber, ServiceError> {
        let phone = canonical_phone(phone)?;
        self.lookup(&phone)
            .await?
            .ok_or_else(|| ServiceError::not_found(Entity::Subscriber, phone))
    }

    /// Links a chat recipient to the subscriber owning `phone`.
    pub async fn link_chat_recipient(
        &self,
        recipient_id: RecipientId,
        phone: &str,
    ) -> Result<LinkOutcome, ServiceError> {
        let Some(phone) = normalize_phone(phone) else {
            return Ok(LinkOutcome::UnknownSubscriber);
        };
        let Some(subscriber) = self.lookup(&phone).await? else {
            return Ok(LinkOutcome::UnknownSubscriber);
        };

        let linked = self
            .directory
            .link_chat_recipient(recipient_id, subscriber.subscriber_id)
            .await
            .map_err(|err| store_failure("failed to link chat recipient", err))?;

        Ok(if linked {
            LinkOutcome::Linked(subscriber.subscriber_id)
        } else {
            LinkOutcome::AlreadyLinked(subscriber.subscriber_id)
        })
    }

    pub async fn event_subscribers(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Subscriber>, ServiceError> {
        self.directory
            .event_subscribers(event_id)
            .await
            .map_err(|err| {
                store_failure(format!("failed to load subscribers of event {event_id}"), err)
            })
    }

    pub async fn chat_recipients(
        &self,
        phone_numbers: &BTreeSet<String>,
    ) -> Result<Vec<ChatRecipientLink>, ServiceError> {
        self.directory
            .chat_recipients(phone_numbers)
            .await
            .map_err(|err| store_failure("failed to load chat recipients", err))
    }

    pub async fn subscribers_overview(&self) -> Result<Vec<SubscriberReport>, ServiceError> {
        self.directory
            .subscribers_overview()
            .await
            .map_err(|err| store_failure("failed to load subscribers", err))
    }

    pub async fn subscribers_joined(&self) -> Result<Vec<SubscriberReport>, ServiceError> {
        self.directory
            .subscribers_joined()
            .await
            .map_err(|err| store_failure("failed to load subscriber report", err))
    }
}
