#![forbid(unsafe_code)]

use std::fmt::{self, Display, Formatter};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Infrastructure failures: I/O, storage drivers, HTTP clients, configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] crate::directory::StoreError),
    #[error("chat platform error: {0}")]
    Chat(#[from] crate::chat::ChatError),
    #[error("event catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),
    #[error("template error: {0}")]
    Template(#[from] crate::template::TemplateLoadError),
    #[error("duration parse error: {0}")]
    Duration(#[from] humantime::DurationError),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Walks `Context` wrappers down to the driver error, if there is one.
    pub fn as_sqlx(&self) -> Option<&sqlx::Error> {
        match self {
            Error::Sqlx(err) => Some(err),
            Error::Context { source, .. } => source.as_sqlx(),
            _ => None,
        }
    }
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ensure_err {
    ($cond:expr $(,)?) => {
        if !$cond {
            return Err($crate::err!(concat!("condition failed: ", stringify!($cond))));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::bail_err!($($arg)+);
        }
    };
}

/// Persisted or configured things a request can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Event,
    Subscriber,
    Subscription,
    ChatRecipient,
}

impl Entity {
    fn label(self) -> &'static str {
        match self {
            Entity::Event => "event",
            Entity::Subscriber => "subscriber",
            Entity::Subscription => "subscription",
            Entity::ChatRecipient => "chat recipient",
        }
    }

    fn not_found_reason(self) -> &'static str {
        match self {
            Entity::Event => "EVENT_NOT_FOUND",
            Entity::Subscriber => "SUBSCRIBER_NOT_FOUND",
            Entity::Subscription => "SUBSCRIPTION_NOT_FOUND",
            Entity::ChatRecipient => "CHAT_RECIPIENT_NOT_FOUND",
        }
    }

    fn conflict_reason(self) -> &'static str {
        match self {
            Entity::Event => "EVENT_EXISTS",
            Entity::Subscriber => "SUBSCRIBER_EXISTS",
            Entity::Subscription => "SUBSCRIPTION_EXISTS",
            Entity::ChatRecipient => "CHAT_RECIPIENT_LINKED",
        }
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    Unavailable,
    Internal,
    PanicRecovered,
}

/// Outcome taxonomy surfaced by the services to the transports.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} `{key}` does not exist")]
    NotFound { entity: Entity, key: String },
    #[error("{entity} `{key}` already exists")]
    AlreadyExists { entity: Entity, key: String },
    #[error("invalid input: {detail}")]
    InvalidInput { reason: &'static str, detail: String },
    #[error("service unavailable: {detail}")]
    Unavailable { reason: &'static str, detail: String },
    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: Error,
    },
    #[error("delivery aborted for event {event_id} after {delivered} sends: recipient {recipient_id} failed: {detail}")]
    DeliveryAborted {
        event_id: i64,
        recipient_id: i64,
        delivered: usize,
        detail: String,
    },
    #[error("recovered from panic: {detail}")]
    PanicRecovered { detail: String },
}

impl ServiceError {
    pub fn not_found(entity: Entity, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn already_exists(entity: Entity, key: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid(reason: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason,
            detail: detail.into(),
        }
    }

    pub fn unavailable(reason: &'static str, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            reason,
            detail: detail.into(),
        }
    }

    pub fn internal<E>(context: impl Into<String>, source: E) -> Self
    where
        Error: From<E>,
    {
        Self::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            ServiceError::InvalidInput { .. } => ErrorKind::InvalidInput,
            ServiceError::Unavailable { .. } => ErrorKind::Unavailable,
            ServiceError::Internal { .. } | ServiceError::DeliveryAborted { .. } => {
                ErrorKind::Internal
            }
            ServiceError::PanicRecovered { .. } => ErrorKind::PanicRecovered,
        }
    }

    /// Stable machine-readable code carried in every error response.
    pub fn reason(&self) -> &'static str {
        match self {
            ServiceError::NotFound { entity, .. } => entity.not_found_reason(),
            ServiceError::AlreadyExists { entity, .. } => entity.conflict_reason(),
            ServiceError::InvalidInput { reason, .. } => reason,
            ServiceError::Unavailable { reason, .. } => reason,
            ServiceError::Internal { .. } => "INTERNAL_ERROR",
            ServiceError::DeliveryAborted { .. } => "DELIVERY_ABORTED",
            ServiceError::PanicRecovered { .. } => "PANIC_RECOVERED",
        }
    }

    /// Text that is safe to hand back to a caller.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal | ErrorKind::PanicRecovered => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_stable_per_entity() {
        let err = ServiceError::not_found(Entity::Subscription, 42);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.reason(), "SUBSCRIPTION_NOT_FOUND");
        assert_eq!(err.to_string(), "subscription `42` does not exist");

        let err = ServiceError::already_exists(Entity::Subscription, "7/1");
        assert_eq!(err.reason(), "SUBSCRIPTION_EXISTS");
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::internal("failed to load subscribers", crate::err!("pool closed"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("pool closed"));
    }

    #[test]
    fn context_preserves_driver_error() {
        let result: std::result::Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = result.context("lookup").unwrap_err();
        assert!(matches!(err.as_sqlx(), Some(sqlx::Error::RowNotFound)));
    }
}
