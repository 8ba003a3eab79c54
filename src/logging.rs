//! Helper macros enforcing consistent notifier log fields.
//!
//! Dispatch and listener logs always carry `event_id` (and `recipient` where a send is
//! involved) so downstream parsing can correlate a fan-out with its individual sends.

/// Log a dispatch event for an event id, optionally scoped to one recipient.
#[macro_export]
macro_rules! dispatch_event {
    ($level:ident, $event:expr, event_id = $event_id:expr, recipient = $recipient:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: "notifier::dispatch",
            event = $event,
            event_id = $event_id,
            recipient = $recipient,
            $($field = %$value,)*
        )
    };
    ($level:ident, $event:expr, event_id = $event_id:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: "notifier::dispatch",
            event = $event,
            event_id = $event_id,
            $($field = %$value,)*
        )
    };
}

/// Log a chat listener event for a chat id.
#[macro_export]
macro_rules! chat_event {
    ($level:ident, $event:expr, chat_id = $chat_id:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: "notifier::chat",
            event = $event,
            chat_id = $chat_id,
            $($field = %$value,)*
        )
    };
}
