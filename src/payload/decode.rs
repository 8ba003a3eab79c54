use super::{FieldKind, FieldRule, PayloadError, PayloadSchema};
use crate::phone::is_valid_phone;
use chrono::{DateTime, FixedOffset};
use serde_json::{Map as JsonMap, Value as JsonValue};

const MIN_UTC_OFFSET_HOURS: i64 = -12;
const MAX_UTC_OFFSET_HOURS: i64 = 14;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
}

impl FieldValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            FieldValue::Timestamp(value) => Some(value),
            _ => None,
        }
    }
}

/// Decoded payload in schema field order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedPayload {
    values: Vec<(String, FieldValue)>,
}

impl DecodedPayload {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(super) fn decode(
    schema: &PayloadSchema,
    body: &JsonValue,
) -> Result<DecodedPayload, PayloadError> {
    let object = body.as_object().ok_or(PayloadError::NotAnObject)?;
    reject_unknown_fields(schema, object)?;

    let mut values = Vec::with_capacity(schema.fields().len());
    for spec in schema.fields() {
        let raw = match object.get(&spec.name) {
            None | Some(JsonValue::Null) => {
                return Err(PayloadError::MissingField(spec.name.clone()))
            }
            Some(raw) => raw,
        };
        values.push((spec.name.clone(), decode_field(&spec.name, spec.kind, raw)?));
    }

    let payload = DecodedPayload { values };
    for rule in schema.rules() {
        apply_rule(rule, &payload)?;
    }
    Ok(payload)
}

fn reject_unknown_fields(
    schema: &PayloadSchema,
    object: &JsonMap<String, JsonValue>,
) -> Result<(), PayloadError> {
    let mut unknown: Vec<&String> = object
        .keys()
        .filter(|key| !schema.fields().iter().any(|spec| &spec.name == *key))
        .collect();
    unknown.sort();

    match unknown.first() {
        Some(key) => Err(PayloadError::UnknownField((*key).clone())),
        None => Ok(()),
    }
}

fn decode_field(name: &str, kind: FieldKind, raw: &JsonValue) -> Result<FieldValue, PayloadError> {
    let wrong_type = |expected: &'static str| PayloadError::WrongType {
        field: name.to_string(),
        expected,
    };

    match kind {
        FieldKind::Integer => raw
            .as_i64()
            .map(FieldValue::Integer)
            .ok_or_else(|| wrong_type("an integer")),
        FieldKind::Text => match raw.as_str() {
            Some(text) if !text.trim().is_empty() => Ok(FieldValue::Text(text.to_string())),
            _ => Err(wrong_type("a non-empty string")),
        },
        FieldKind::Timestamp => raw
            .as_str()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(FieldValue::Timestamp)
            .ok_or_else(|| wrong_type("an RFC 3339 timestamp")),
    }
}

fn apply_rule(rule: &FieldRule, payload: &DecodedPayload) -> Result<(), PayloadError> {
    match rule {
        FieldRule::PhoneNumber(field) => {
            let value = payload
                .get(field)
                .and_then(FieldValue::as_text)
                .ok_or_else(|| PayloadError::UndeclaredField(field.clone()))?;
            if !is_valid_phone(value) {
                return Err(PayloadError::Rule {
                    field: field.clone(),
                    detail: format!("`{value}` is not a valid phone number"),
                });
            }
        }
        FieldRule::UtcOffsetHours(field) => {
            let value = payload
                .get(field)
                .and_then(FieldValue::as_integer)
                .ok_or_else(|| PayloadError::UndeclaredField(field.clone()))?;
            if !(MIN_UTC_OFFSET_HOURS..=MAX_UTC_OFFSET_HOURS).contains(&value) {
                return Err(PayloadError::Rule {
                    field: field.clone(),
                    detail: format!(
                        "offset {value} is outside {MIN_UTC_OFFSET_HOURS}..={MAX_UTC_OFFSET_HOURS} hours"
                    ),
                });
            }
        }
    }
    Ok(())
}
