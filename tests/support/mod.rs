#![allow(dead_code)]

pub mod feed;
pub mod memory;
pub mod messenger;

use notifier::app_state::AppState;
use notifier::catalog::EventCatalog;
use notifier::chat::ChatListener;
use notifier::config::ChatConfig;
use notifier::dispatch::DeliveryPolicy;
use notifier::domain::{Event, EventId};
use notifier::payload::{FieldKind, PayloadRegistry, PayloadSchema};
use notifier::template::TemplateStore;
use std::sync::Arc;
use std::time::Duration;

pub use feed::ScriptedFeed;
pub use memory::MemoryDirectory;
pub use messenger::RecordingMessenger;

pub const ORDER_CREATED: EventId = 1;
pub const ORDER_TEMPLATE: &str = "Order %d for %s: %d";

pub fn order_event() -> Event {
    Event {
        event_id: ORDER_CREATED,
        name: "order_created".to_string(),
        translate: "Order created".to_string(),
    }
}

pub fn order_payloads() -> PayloadRegistry {
    PayloadRegistry::new().with(
        ORDER_CREATED,
        PayloadSchema::new("order_created")
            .field("order_id", FieldKind::Integer)
            .field("username", FieldKind::Text)
            .field("amount", FieldKind::Integer),
    )
}

pub fn order_templates() -> TemplateStore {
    TemplateStore::from_records([(ORDER_CREATED, ORDER_TEMPLATE)]).expect("order template")
}

pub struct Harness {
    pub state: AppState,
    pub directory: Arc<MemoryDirectory>,
    pub messenger: Arc<RecordingMessenger>,
}

impl Harness {
    pub fn listener(&self) -> ChatListener {
        ChatListener::new(
            self.state.subscriptions.clone(),
            self.messenger.clone(),
            &ChatConfig {
                update_timeout: Duration::from_secs(5),
                poll_retry_delay: Duration::from_millis(10),
            },
        )
    }
}

/// State wired over in-memory fakes with the order catalog already loaded.
pub async fn harness(policy: DeliveryPolicy) -> Harness {
    harness_with(
        order_payloads(),
        order_templates(),
        vec![order_event()],
        policy,
    )
    .await
}

pub async fn harness_with(
    payloads: PayloadRegistry,
    templates: TemplateStore,
    events: Vec<Event>,
    policy: DeliveryPolicy,
) -> Harness {
    let directory = Arc::new(MemoryDirectory::new());
    let messenger = Arc::new(RecordingMessenger::new());

    let state = AppState::assemble(
        directory.clone(),
        directory.clone(),
        Arc::new(payloads),
        Arc::new(templates),
        messenger.clone(),
        policy,
    );
    state
        .events
        .load_catalog(&EventCatalog::new(events))
        .await
        .expect("catalog loads");

    Harness {
        state,
        directory,
        messenger,
    }
}
