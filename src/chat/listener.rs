use super::{
    replies, ChatMessenger, InboundUpdate, OutboundMessage, ReplyKeyboard, UpdateFeed, UpdateKind,
};
use crate::chat_event;
use crate::config::ChatConfig;
use crate::error::ServiceError;
use crate::metrics::MetricsCollector;
use crate::phone::normalize_phone;
use crate::service::{LinkOutcome, SubscriptionService};
use crate::transport::recovery::panic_message;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const START_COMMAND: &str = "/start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    Ignored,
    StartSent,
    Linked,
    AlreadyLinked,
    UnknownSubscriber,
    Failed,
}

/// Turns inbound chat updates into recipient links and canned replies.
#[derive(Clone)]
pub struct ChatListener {
    subscriptions: SubscriptionService,
    messenger: Arc<dyn ChatMessenger>,
    update_timeout: Duration,
    poll_retry_delay: Duration,
}

impl ChatListener {
    pub fn new(
        subscriptions: SubscriptionService,
        messenger: Arc<dyn ChatMessenger>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            subscriptions,
            messenger,
            update_timeout: config.update_timeout,
            poll_retry_delay: config.poll_retry_delay,
        }
    }

    pub async fn handle_update(&self, update: &InboundUpdate) -> ListenerOutcome {
        if !update.private {
            return ListenerOutcome::Ignored;
        }

        match &update.kind {
            UpdateKind::ContactShared { phone_number } => {
                self.handle_contact(update.chat_id, phone_number).await
            }
            UpdateKind::Text(text) if text == START_COMMAND => {
                self.handle_start(update.chat_id).await
            }
            UpdateKind::Text(_) | UpdateKind::Other => ListenerOutcome::Ignored,
        }
    }

    async fn handle_start(&self, chat_id: i64) -> ListenerOutcome {
        let keyboard = ReplyKeyboard::request_contact(
            replies::SHARE_CONTACT_BUTTON,
            replies::SHARE_CONTACT_PLACEHOLDER,
        );
        let message = OutboundMessage::text(chat_id, replies::START).with_keyboard(keyboard);
        if self.reply(&message).await {
            ListenerOutcome::StartSent
        } else {
            ListenerOutcome::Failed
        }
    }

    async fn handle_contact(&self, chat_id: i64, raw_phone: &str) -> ListenerOutcome {
        let Some(phone) = normalize_phone(raw_phone) else {
            chat_event!(info, "contact_invalid_phone", chat_id = chat_id, phone = raw_phone);
            self.reply_text(chat_id, replies::not_registered(raw_phone)).await;
            return ListenerOutcome::UnknownSubscriber;
        };

        match self.subscriptions.find_subscriber_by_phone(&phone).await {
            Ok(_) => {}
            Err(ServiceError::NotFound { .. }) => {
                chat_event!(info, "contact_unknown", chat_id = chat_id, phone = phone);
                self.reply_text(chat_id, replies::not_registered(&phone)).await;
                return ListenerOutcome::UnknownSubscriber;
            }
            Err(err) => return self.fail(chat_id, &err).await,
        }

        if !self.reply_text(chat_id, replies::REGISTERING).await {
            return ListenerOutcome::Failed;
        }

        match self.subscriptions.link_chat_recipient(chat_id, &phone).await {
            Ok(LinkOutcome::Linked(subscriber_id)) => {
                chat_event!(
                    info,
                    "recipient_linked",
                    chat_id = chat_id,
                    subscriber_id = subscriber_id
                );
                self.reply_text(chat_id, replies::registered(&phone)).await;
                ListenerOutcome::Linked
            }
            Ok(LinkOutcome::AlreadyLinked(subscriber_id)) => {
                chat_event!(
                    debug,
                    "recipient_already_linked",
                    chat_id = chat_id,
                    subscriber_id = subscriber_id
                );
                self.reply_text(chat_id, replies::already_known(&phone)).await;
                ListenerOutcome::AlreadyLinked
            }
            Ok(LinkOutcome::UnknownSubscriber) => {
                self.reply_text(chat_id, replies::not_registered(&phone)).await;
                ListenerOutcome::UnknownSubscriber
            }
            Err(err) => self.fail(chat_id, &err).await,
        }
    }

    async fn fail(&self, chat_id: i64, err: &ServiceError) -> ListenerOutcome {
        chat_event!(error, "contact_failed", chat_id = chat_id, error = err);
        self.reply_text(chat_id, replies::SOMETHING_WENT_WRONG).await;
        ListenerOutcome::Failed
    }

    async fn reply_text(&self, chat_id: i64, text: impl Into<String>) -> bool {
        self.reply(&OutboundMessage::text(chat_id, text)).await
    }

    async fn reply(&self, message: &OutboundMessage) -> bool {
        match self.messenger.send(message).await {
            Ok(()) => true,
            Err(err) => {
                chat_event!(warn, "reply_failed", chat_id = message.recipient_id, error = err);
                false
            }
        }
    }

    /// Handles one update under the per-update deadline and a panic boundary.
    pub async fn process(&self, update: &InboundUpdate) -> ListenerOutcome {
        let guarded = AssertUnwindSafe(self.handle_update(update)).catch_unwind();
        let outcome = match tokio::time::timeout(self.update_timeout, guarded).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(payload)) => {
                MetricsCollector::global().inc_panics_recovered();
                chat_event!(
                    error,
                    "update_panicked",
                    chat_id = update.chat_id,
                    update_id = update.update_id,
                    panic = panic_message(payload.as_ref())
                );
                ListenerOutcome::Failed
            }
            Err(_) => {
                chat_event!(
                    warn,
                    "update_timed_out",
                    chat_id = update.chat_id,
                    update_id = update.update_id,
                    limit = humantime::format_duration(self.update_timeout)
                );
                ListenerOutcome::Failed
            }
        };

        MetricsCollector::global().record_chat_update(outcome != ListenerOutcome::Failed);
        outcome
    }

    /// Long-polls `feed` until `shutdown` is cancelled.
    pub async fn run(&self, feed: Arc<dyn UpdateFeed>, shutdown: CancellationToken) {
        let mut offset = 0_i64;
        tracing::info!(target: "notifier::chat", "chat listener started");

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = feed.poll(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.process(&update).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target: "notifier::chat",
                        error = %err,
                        retry_in = %humantime::format_duration(self.poll_retry_delay),
                        "chat update poll failed"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!(target: "notifier::chat", offset, "chat listener stopped");
    }
}
