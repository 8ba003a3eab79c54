//! Fire-time pipeline: resolve the event, find reachable subscribers, render the
//! event's template from the payload and fan the message out.

pub mod delivery;

pub use delivery::{deliver_all, DeliveryFailure, DeliveryPolicy, DeliveryReport};

use crate::chat::ChatMessenger;
use crate::dispatch_event;
use crate::domain::{ChatRecipientLink, EventId, EventIdentifier, Subscriber};
use crate::error::ServiceError;
use crate::metrics::MetricsCollector;
use crate::payload::{PayloadError, PayloadSchema};
use crate::service::{EventService, SubscriptionService};
use crate::template::{Template, TemplateError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FireOutcome {
    NoSubscribers { event_id: EventId },
    NoRecipients { event_id: EventId, subscribers: usize },
    Delivered(DeliveryReport),
}

impl FireOutcome {
    pub fn is_noop(&self) -> bool {
        !matches!(self, FireOutcome::Delivered(_))
    }
}

/// State carried from one stage to the next once the fan-out is known to be non-empty.
struct ResolvedFire<'a> {
    event_id: EventId,
    recipients: Vec<ChatRecipientLink>,
    template: &'a Template,
    schema: &'a PayloadSchema,
}

#[derive(Clone)]
pub struct DispatchPipeline {
    events: EventService,
    subscriptions: SubscriptionService,
    messenger: Arc<dyn ChatMessenger>,
    policy: DeliveryPolicy,
}

impl DispatchPipeline {
    pub fn new(
        events: EventService,
        subscriptions: SubscriptionService,
        messenger: Arc<dyn ChatMessenger>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            events,
            subscriptions,
            messenger,
            policy,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub async fn fire(
        &self,
        identifier: &EventIdentifier,
        body: &[u8],
    ) -> Result<FireOutcome, ServiceError> {
        let fire_id = Uuid::new_v4();
        let span = tracing::info_span!(
            target: "notifier::dispatch",
            "fire",
            fire_id = %fire_id,
            event = %identifier
        );

        let metrics = MetricsCollector::global();
        metrics.inc_fires_total();

        let result = self.run_stages(identifier, body).instrument(span).await;
        match &result {
            Ok(outcome) if outcome.is_noop() => metrics.inc_fires_noop(),
            Ok(_) => {}
            Err(_) => metrics.inc_fires_rejected(),
        }
        result
    }

    async fn run_stages(
        &self,
        identifier: &EventIdentifier,
        body: &[u8],
    ) -> Result<FireOutcome, ServiceError> {
        let event_id = self.events.does_exist(identifier).await?;

        let subscribers = self.subscriptions.event_subscribers(event_id).await?;
        if subscribers.is_empty() {
            dispatch_event!(info, "fire_no_subscribers", event_id = event_id);
            return Ok(FireOutcome::NoSubscribers { event_id });
        }

        let recipients = self.load_recipients(&subscribers).await?;
        if recipients.is_empty() {
            dispatch_event!(
                info,
                "fire_no_recipients",
                event_id = event_id,
                subscribers = subscribers.len()
            );
            return Ok(FireOutcome::NoRecipients {
                event_id,
                subscribers: subscribers.len(),
            });
        }

        let fire = self.resolve(event_id, recipients)?;
        let text = render_message(&fire, body)?;

        dispatch_event!(
            info,
            "fire_delivering",
            event_id = event_id,
            recipients = fire.recipients.len()
        );
        let report = deliver_all(
            self.messenger.as_ref(),
            &self.policy,
            fire.event_id,
            &fire.recipients,
            &text,
        )
        .await?;

        dispatch_event!(
            info,
            "fire_completed",
            event_id = event_id,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failures.len()
        );
        Ok(FireOutcome::Delivered(report))
    }

    async fn load_recipients(
        &self,
        subscribers: &[Subscriber],
    ) -> Result<Vec<ChatRecipientLink>, ServiceError> {
        let phones: BTreeSet<String> = subscribers
            .iter()
            .map(|subscriber| subscriber.phone_number.clone())
            .collect();
        self.subscriptions.chat_recipients(&phones).await
    }

    fn resolve(
        &self,
        event_id: EventId,
        recipients: Vec<ChatRecipientLink>,
    ) -> Result<ResolvedFire<'_>, ServiceError> {
        let template = self
            .events
            .templates()
            .find(event_id)
            .map_err(|err| ServiceError::unavailable("TEMPLATE_NOT_FOUND", err.to_string()))?;
        let schema = self
            .events
            .payloads()
            .resolve(event_id)
            .map_err(payload_failure)?;

        Ok(ResolvedFire {
            event_id,
            recipients,
            template,
            schema,
        })
    }
}

fn render_message(fire: &ResolvedFire<'_>, body: &[u8]) -> Result<String, ServiceError> {
    let json: serde_json::Value = serde_json::from_slice(body).map_err(|err| {
        ServiceError::invalid("INVALID_PAYLOAD", format!("payload is not valid JSON: {err}"))
    })?;
    let payload = fire.schema.decode(&json).map_err(payload_failure)?;
    let args = fire.schema.template_args(&payload).map_err(payload_failure)?;

    fire.template.render(&args).map_err(|err| template_failure(fire.event_id, err))
}

fn payload_failure(err: PayloadError) -> ServiceError {
    match err {
        PayloadError::NotRegistered(_) => {
            ServiceError::unavailable("SCHEMA_NOT_FOUND", err.to_string())
        }
        PayloadError::UndeclaredField(_) => {
            ServiceError::unavailable("TEMPLATE_MISMATCH", err.to_string())
        }
        other => ServiceError::invalid("INVALID_PAYLOAD", other.to_string()),
    }
}

fn template_failure(event_id: EventId, err: TemplateError) -> ServiceError {
    dispatch_event!(error, "template_mismatch", event_id = event_id, error = err);
    ServiceError::unavailable(
        "TEMPLATE_MISMATCH",
        format!("template for event {event_id} cannot be rendered: {err}"),
    )
}
