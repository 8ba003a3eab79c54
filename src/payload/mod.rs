//! Payload shapes accepted when an event fires, keyed by event id.
//!
//! A [`PayloadSchema`] lists the typed fields of one event's payload, the business rules
//! run after structural decoding, and the order in which values are handed to the
//! event's template. [`build_payload_registry`] assembles the production set.

mod decode;

pub use decode::{DecodedPayload, FieldValue};

use crate::domain::EventId;
use crate::template::FormatValue;
use chrono::FixedOffset;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

pub const MASTER_ORDER_CREATED: EventId = 1;
pub const USER_ORDER_CREATED: EventId = 2;
pub const WORKER_LOGIN: EventId = 3;

const LOCAL_TIME_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("no payload schema registered for event {0}")]
    NotRegistered(EventId),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("field `{field}` failed validation: {detail}")]
    Rule { field: String, detail: String },
    #[error("schema refers to undeclared or mistyped field `{0}`")]
    UndeclaredField(String),
}

impl PayloadError {
    /// True when the caller's body is at fault rather than the schema definition.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            PayloadError::NotRegistered(_) | PayloadError::UndeclaredField(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    /// RFC 3339 string.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    PhoneNumber(String),
    UtcOffsetHours(String),
}

impl FieldRule {
    fn field(&self) -> &str {
        match self {
            FieldRule::PhoneNumber(field) | FieldRule::UtcOffsetHours(field) => field,
        }
    }

    fn expected_kind(&self) -> FieldKind {
        match self {
            FieldRule::PhoneNumber(_) => FieldKind::Text,
            FieldRule::UtcOffsetHours(_) => FieldKind::Integer,
        }
    }
}

/// One template argument and where its value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSource {
    Field(String),
    /// `at` shifted by `offset_hours` and formatted as `dd.mm.YYYY HH:MM`.
    LocalTime { at: String, offset_hours: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSchema {
    name: String,
    fields: Vec<FieldSpec>,
    rules: Vec<FieldRule>,
    args: Vec<ArgSource>,
}

impl PayloadSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            rules: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Appends a template argument. Without any, fields are rendered in declaration order.
    pub fn arg(mut self, source: ArgSource) -> Self {
        self.args.push(source);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn render_plan(&self) -> Vec<ArgSource> {
        if self.args.is_empty() {
            self.fields
                .iter()
                .map(|spec| ArgSource::Field(spec.name.clone()))
                .collect()
        } else {
            self.args.clone()
        }
    }

    pub fn argument_count(&self) -> usize {
        if self.args.is_empty() {
            self.fields.len()
        } else {
            self.args.len()
        }
    }

    /// Verifies that rules and render plan only refer to declared fields of the right kind.
    pub fn check(&self) -> Result<(), PayloadError> {
        for rule in &self.rules {
            self.require(rule.field(), rule.expected_kind())?;
        }
        for source in self.render_plan() {
            match source {
                ArgSource::Field(name) => {
                    if !self.fields.iter().any(|spec| spec.name == name) {
                        return Err(PayloadError::UndeclaredField(name));
                    }
                }
                ArgSource::LocalTime { at, offset_hours } => {
                    self.require(&at, FieldKind::Timestamp)?;
                    self.require(&offset_hours, FieldKind::Integer)?;
                }
            }
        }
        Ok(())
    }

    fn require(&self, name: &str, kind: FieldKind) -> Result<(), PayloadError> {
        if self
            .fields
            .iter()
            .any(|spec| spec.name == name && spec.kind == kind)
        {
            Ok(())
        } else {
            Err(PayloadError::UndeclaredField(name.to_string()))
        }
    }

    pub fn decode(&self, body: &JsonValue) -> Result<DecodedPayload, PayloadError> {
        decode::decode(self, body)
    }

    /// Template arguments for a decoded payload, in render-plan order.
    pub fn template_args(
        &self,
        payload: &DecodedPayload,
    ) -> Result<Vec<FormatValue>, PayloadError> {
        self.render_plan()
            .into_iter()
            .map(|source| match source {
                ArgSource::Field(name) => match payload.get(&name) {
                    Some(FieldValue::Integer(value)) => Ok(FormatValue::Integer(*value)),
                    Some(FieldValue::Text(value)) => Ok(FormatValue::Text(value.clone())),
                    Some(FieldValue::Timestamp(value)) => Ok(FormatValue::Text(value.to_rfc3339())),
                    None => Err(PayloadError::UndeclaredField(name)),
                },
                ArgSource::LocalTime { at, offset_hours } => {
                    local_time(payload, &at, &offset_hours).map(FormatValue::Text)
                }
            })
            .collect()
    }
}

fn local_time(
    payload: &DecodedPayload,
    at: &str,
    offset_hours: &str,
) -> Result<String, PayloadError> {
    let instant = payload
        .get(at)
        .and_then(FieldValue::as_timestamp)
        .ok_or_else(|| PayloadError::UndeclaredField(at.to_string()))?;
    let hours = payload
        .get(offset_hours)
        .and_then(FieldValue::as_integer)
        .ok_or_else(|| PayloadError::UndeclaredField(offset_hours.to_string()))?;

    let offset = i32::try_from(hours)
        .ok()
        .and_then(|hours| hours.checked_mul(3600))
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| PayloadError::Rule {
            field: offset_hours.to_string(),
            detail: format!("offset {hours} is not a valid UTC offset"),
        })?;

    Ok(instant
        .with_timezone(&offset)
        .format(LOCAL_TIME_FORMAT)
        .to_string())
}

/// Event id → payload schema. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PayloadRegistry {
    schemas: HashMap<EventId, PayloadSchema>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last registration for an id wins.
    pub fn register(&mut self, event_id: EventId, schema: PayloadSchema) {
        if let Some(previous) = self.schemas.insert(event_id, schema) {
            tracing::debug!(
                event_id,
                previous = previous.name(),
                "payload schema replaced"
            );
        }
    }

    pub fn with(mut self, event_id: EventId, schema: PayloadSchema) -> Self {
        self.register(event_id, schema);
        self
    }

    pub fn resolve(&self, event_id: EventId) -> Result<&PayloadSchema, PayloadError> {
        self.schemas
            .get(&event_id)
            .ok_or(PayloadError::NotRegistered(event_id))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Production schemas for the events the service ships with.
pub fn build_payload_registry() -> PayloadRegistry {
    PayloadRegistry::new()
        .with(
            MASTER_ORDER_CREATED,
            PayloadSchema::new("master_order_created")
                .field("order_id", FieldKind::Integer)
                .field("amount", FieldKind::Integer)
                .field("username", FieldKind::Text)
                .field("phone_number", FieldKind::Text)
                .rule(FieldRule::PhoneNumber("phone_number".to_string()))
                .arg(ArgSource::Field("order_id".to_string()))
                .arg(ArgSource::Field("username".to_string()))
                .arg(ArgSource::Field("phone_number".to_string()))
                .arg(ArgSource::Field("amount".to_string())),
        )
        .with(
            USER_ORDER_CREATED,
            PayloadSchema::new("user_order_created")
                .field("order_id", FieldKind::Integer)
                .field("amount", FieldKind::Integer),
        )
        .with(
            WORKER_LOGIN,
            PayloadSchema::new("worker_login")
                .field("username", FieldKind::Text)
                .field("login_at", FieldKind::Timestamp)
                .field("time_offset", FieldKind::Integer)
                .rule(FieldRule::UtcOffsetHours("time_offset".to_string()))
                .arg(ArgSource::Field("username".to_string()))
                .arg(ArgSource::LocalTime {
                    at: "login_at".to_string(),
                    offset_hours: "time_offset".to_string(),
                }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_created() -> PayloadSchema {
        PayloadSchema::new("order_created")
            .field("order_id", FieldKind::Integer)
            .field("username", FieldKind::Text)
            .field("amount", FieldKind::Integer)
    }

    #[test]
    fn decodes_fields_in_schema_order() {
        let schema = order_created();
        let payload = schema
            .decode(&json!({"amount": 1500, "username": "ann", "order_id": 7}))
            .unwrap();

        let args = schema.template_args(&payload).unwrap();
        assert_eq!(
            args,
            vec![
                FormatValue::Integer(7),
                FormatValue::Text("ann".to_string()),
                FormatValue::Integer(1500)
            ]
        );
    }

    #[test]
    fn rejects_unknown_missing_and_mistyped_fields() {
        let schema = order_created();

        assert_eq!(
            schema.decode(&json!({"order_id": 7, "username": "ann", "amount": 1, "extra": 1})),
            Err(PayloadError::UnknownField("extra".to_string()))
        );
        assert_eq!(
            schema.decode(&json!({"order_id": 7, "username": "ann"})),
            Err(PayloadError::MissingField("amount".to_string()))
        );
        assert_eq!(
            schema.decode(&json!({"order_id": 7, "username": null, "amount": 1})),
            Err(PayloadError::MissingField("username".to_string()))
        );
        assert!(matches!(
            schema.decode(&json!({"order_id": "7", "username": "ann", "amount": 1})),
            Err(PayloadError::WrongType { .. })
        ));
        assert!(matches!(
            schema.decode(&json!({"order_id": 7.5, "username": "ann", "amount": 1})),
            Err(PayloadError::WrongType { .. })
        ));
        assert_eq!(schema.decode(&json!([1, 2])), Err(PayloadError::NotAnObject));
    }

    #[test]
    fn master_order_requires_valid_phone() {
        let registry = build_payload_registry();
        let schema = registry.resolve(MASTER_ORDER_CREATED).unwrap();

        let err = schema
            .decode(&json!({
                "order_id": 1,
                "amount": 10,
                "username": "ivan",
                "phone_number": "not a phone"
            }))
            .unwrap_err();
        assert!(matches!(err, PayloadError::Rule { ref field, .. } if field == "phone_number"));
        assert!(err.is_client_error());

        let payload = schema
            .decode(&json!({
                "order_id": 1,
                "amount": 10,
                "username": "ivan",
                "phone_number": "+7 916 123-45-67"
            }))
            .unwrap();
        let args = schema.template_args(&payload).unwrap();
        assert_eq!(args[2], FormatValue::Text("+7 916 123-45-67".to_string()));
        assert_eq!(args[3], FormatValue::Integer(10));
    }

    #[test]
    fn worker_login_renders_local_time() {
        let registry = build_payload_registry();
        let schema = registry.resolve(WORKER_LOGIN).unwrap();

        let payload = schema
            .decode(&json!({
                "username": "olga",
                "login_at": "2024-03-01T21:30:00Z",
                "time_offset": 3
            }))
            .unwrap();
        let args = schema.template_args(&payload).unwrap();
        assert_eq!(
            args,
            vec![
                FormatValue::Text("olga".to_string()),
                FormatValue::Text("02.03.2024 00:30".to_string())
            ]
        );

        let err = schema
            .decode(&json!({
                "username": "olga",
                "login_at": "2024-03-01T21:30:00Z",
                "time_offset": 20
            }))
            .unwrap_err();
        assert!(matches!(err, PayloadError::Rule { .. }));
    }

    #[test]
    fn builtin_schemas_are_consistent() {
        let registry = build_payload_registry();
        for id in [MASTER_ORDER_CREATED, USER_ORDER_CREATED, WORKER_LOGIN] {
            registry.resolve(id).unwrap().check().unwrap();
        }
        assert_eq!(registry.resolve(WORKER_LOGIN).unwrap().argument_count(), 2);
        assert_eq!(registry.resolve(USER_ORDER_CREATED).unwrap().argument_count(), 2);
    }

    #[test]
    fn check_flags_undeclared_plan_fields() {
        let schema = PayloadSchema::new("broken")
            .field("a", FieldKind::Integer)
            .arg(ArgSource::Field("b".to_string()));
        assert_eq!(schema.check(), Err(PayloadError::UndeclaredField("b".to_string())));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = PayloadRegistry::new();
        registry.register(1, order_created());
        registry.register(1, PayloadSchema::new("replacement"));
        assert_eq!(registry.resolve(1).unwrap().name(), "replacement");
        assert_eq!(registry.resolve(2), Err(PayloadError::NotRegistered(2)));
    }
}
