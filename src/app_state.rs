use crate::chat::ChatMessenger;
use crate::directory::{EventDirectory, SubscriptionDirectory};
use crate::dispatch::{DeliveryPolicy, DispatchPipeline};
use crate::payload::PayloadRegistry;
use crate::service::{EventService, SubscriptionService};
use crate::template::TemplateStore;
use std::sync::Arc;

/// Shared state handed to HTTP handlers and the chat listener.
#[derive(Clone)]
pub struct AppState {
    pub events: EventService,
    pub subscriptions: SubscriptionService,
    pub pipeline: DispatchPipeline,
}

impl AppState {
    pub fn assemble(
        event_directory: Arc<dyn EventDirectory>,
        subscription_directory: Arc<dyn SubscriptionDirectory>,
        payloads: Arc<PayloadRegistry>,
        templates: Arc<TemplateStore>,
        messenger: Arc<dyn ChatMessenger>,
        policy: DeliveryPolicy,
    ) -> Self {
        let events = EventService::new(event_directory, payloads, templates);
        let subscriptions = SubscriptionService::new(subscription_directory, events.clone());
        let pipeline =
            DispatchPipeline::new(events.clone(), subscriptions.clone(), messenger, policy);

        Self {
            events,
            subscriptions,
            pipeline,
        }
    }
}
