use async_trait::async_trait;
use notifier::directory::{
    group_joined_rows, EventDirectory, JoinedRow, StoreError, SubscriptionDirectory,
};
use notifier::domain::{
    ChatRecipientLink, Event, EventId, EventIdentifier, RecipientId, Subscriber, SubscriberId,
    SubscriberReport, SubscriptionId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default, Debug)]
struct Tables {
    events: BTreeMap<EventId, Event>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    subscriptions: BTreeMap<SubscriptionId, (SubscriberId, EventId)>,
    links: BTreeMap<SubscriberId, RecipientId>,
    next_subscriber: SubscriberId,
    next_subscription: SubscriptionId,
}

/// In-memory directory with the same uniqueness rules as the SQL schema.
#[derive(Default, Debug)]
pub struct MemoryDirectory {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    stale_lookups: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails with a store timeout until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next `count` phone lookups report no subscriber, as a read racing a
    /// concurrent insert would.
    pub fn miss_next_lookups(&self, count: usize) {
        self.stale_lookups.store(count, Ordering::SeqCst);
    }

    fn take_stale_lookup(&self) -> bool {
        self.stale_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn guard(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Timeout {
                operation,
                limit: Duration::from_millis(1),
            })
        } else {
            Ok(())
        }
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory directory state")
    }

    pub fn subscriber_count(&self) -> usize {
        self.tables().subscribers.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.tables().subscriptions.len()
    }

    pub fn link_count(&self) -> usize {
        self.tables().links.len()
    }

    pub fn event_count(&self) -> usize {
        self.tables().events.len()
    }

    pub fn recipient_of(&self, subscriber_id: SubscriberId) -> Option<RecipientId> {
        self.tables().links.get(&subscriber_id).copied()
    }

    /// Seeds a subscriber subscribed to `event_id`, linked to `recipient` when given.
    pub fn seed_subscriber(
        &self,
        phone: &str,
        event_id: EventId,
        recipient: Option<RecipientId>,
    ) -> SubscriberId {
        let mut tables = self.tables();
        tables.next_subscriber += 1;
        let subscriber_id = tables.next_subscriber;
        tables.subscribers.insert(
            subscriber_id,
            Subscriber {
                subscriber_id,
                phone_number: phone.to_string(),
            },
        );
        tables.next_subscription += 1;
        let subscription_id = tables.next_subscription;
        tables
            .subscriptions
            .insert(subscription_id, (subscriber_id, event_id));
        if let Some(recipient) = recipient {
            tables.links.insert(subscriber_id, recipient);
        }
        subscriber_id
    }
}

#[async_trait]
impl EventDirectory for MemoryDirectory {
    async fn register_event(&self, event: &Event) -> Result<bool, StoreError> {
        self.guard("register_event")?;
        let mut tables = self.tables();
        let taken = tables.events.contains_key(&event.event_id)
            || tables.events.values().any(|known| known.name == event.name);
        if taken {
            return Ok(false);
        }
        tables.events.insert(event.event_id, event.clone());
        Ok(true)
    }

    async fn find_event(
        &self,
        identifier: &EventIdentifier,
    ) -> Result<Option<EventId>, StoreError> {
        self.guard("find_event")?;
        let tables = self.tables();
        Ok(match identifier {
            EventIdentifier::Id(id) => tables.events.get(id).map(|event| event.event_id),
            EventIdentifier::Name(name) => tables
                .events
                .values()
                .find(|event| &event.name == name)
                .map(|event| event.event_id),
        })
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        self.guard("list_events")?;
        Ok(self.tables().events.values().cloned().collect())
    }
}

#[async_trait]
impl SubscriptionDirectory for MemoryDirectory {
    async fn get_subscriber_by_phone(&self, phone: &str) -> Result<Option<Subscriber>, StoreError> {
        self.guard("get_subscriber_by_phone")?;
        if self.take_stale_lookup() {
            return Ok(None);
        }
        Ok(self
            .tables()
            .subscribers
            .values()
            .find(|subscriber| subscriber.phone_number == phone)
            .cloned())
    }

    async fn register_subscriber(&self, phone: &str) -> Result<SubscriberId, StoreError> {
        const OP: &str = "register_subscriber";
        self.guard(OP)?;
        let mut tables = self.tables();
        if tables
            .subscribers
            .values()
            .any(|subscriber| subscriber.phone_number == phone)
        {
            return Err(StoreError::Conflict { operation: OP });
        }
        tables.next_subscriber += 1;
        let subscriber_id = tables.next_subscriber;
        tables.subscribers.insert(
            subscriber_id,
            Subscriber {
                subscriber_id,
                phone_number: phone.to_string(),
            },
        );
        Ok(subscriber_id)
    }

    async fn subscribe_to_event(
        &self,
        subscriber_id: SubscriberId,
        event_id: EventId,
    ) -> Result<Option<SubscriptionId>, StoreError> {
        self.guard("subscribe_to_event")?;
        let mut tables = self.tables();
        if tables
            .subscriptions
            .values()
            .any(|pair| *pair == (subscriber_id, event_id))
        {
            return Ok(None);
        }
        tables.next_subscription += 1;
        let subscription_id = tables.next_subscription;
        tables
            .subscriptions
            .insert(subscription_id, (subscriber_id, event_id));
        Ok(Some(subscription_id))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<bool, StoreError> {
        self.guard("cancel_subscription")?;
        Ok(self.tables().subscriptions.remove(&subscription_id).is_some())
    }

    async fn event_subscribers(&self, event_id: EventId) -> Result<Vec<Subscriber>, StoreError> {
        self.guard("event_subscribers")?;
        let tables = self.tables();
        let ids: BTreeSet<SubscriberId> = tables
            .subscriptions
            .values()
            .filter(|(_, event)| *event == event_id)
            .map(|(subscriber, _)| *subscriber)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| tables.subscribers.get(&id).cloned())
            .collect())
    }

    async fn link_chat_recipient(
        &self,
        recipient_id: RecipientId,
        subscriber_id: SubscriberId,
    ) -> Result<bool, StoreError> {
        self.guard("link_chat_recipient")?;
        let mut tables = self.tables();
        if tables.links.contains_key(&subscriber_id) {
            return Ok(false);
        }
        tables.links.insert(subscriber_id, recipient_id);
        Ok(true)
    }

    async fn chat_recipients(
        &self,
        phone_numbers: &BTreeSet<String>,
    ) -> Result<Vec<ChatRecipientLink>, StoreError> {
        self.guard("chat_recipients")?;
        let tables = self.tables();
        Ok(tables
            .subscribers
            .values()
            .filter(|subscriber| phone_numbers.contains(&subscriber.phone_number))
            .filter_map(|subscriber| {
                tables
                    .links
                    .get(&subscriber.subscriber_id)
                    .map(|recipient_id| ChatRecipientLink {
                        recipient_id: *recipient_id,
                        subscriber_id: subscriber.subscriber_id,
                    })
            })
            .collect())
    }

    async fn subscribers_overview(&self) -> Result<Vec<SubscriberReport>, StoreError> {
        self.guard("subscribers_overview")?;
        let tables = self.tables();
        Ok(tables
            .subscribers
            .values()
            .map(|subscriber| SubscriberReport {
                subscriber_id: subscriber.subscriber_id,
                phone_number: subscriber.phone_number.clone(),
                has_chat_link: tables.links.contains_key(&subscriber.subscriber_id),
                subscriptions: Vec::new(),
            })
            .collect())
    }

    async fn subscribers_joined(&self) -> Result<Vec<SubscriberReport>, StoreError> {
        self.guard("subscribers_joined")?;
        let tables = self.tables();
        let mut rows: Vec<JoinedRow> = tables
            .subscriptions
            .iter()
            .filter_map(|(subscription_id, (subscriber_id, event_id))| {
                let subscriber = tables.subscribers.get(subscriber_id)?;
                let event = tables.events.get(event_id)?;
                Some(JoinedRow {
                    subscriber_id: *subscriber_id,
                    phone_number: subscriber.phone_number.clone(),
                    has_chat_link: tables.links.contains_key(subscriber_id),
                    subscription_id: *subscription_id,
                    event_id: *event_id,
                    name: event.name.clone(),
                    translate: event.translate.clone(),
                })
            })
            .collect();
        rows.sort_by_key(|row| (row.subscriber_id, row.subscription_id));
        Ok(group_joined_rows(rows))
    }
}
