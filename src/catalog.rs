//! Static event catalog replayed into the event directory at startup.

use crate::document::{read_document, read_json, DocumentError};
use crate::domain::{Event, EventId};
use crate::payload::{PayloadError, PayloadRegistry};
use crate::template::TemplateStore;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("event {event_id} (`{name}`) has no payload schema registered")]
    MissingSchema { event_id: EventId, name: String },
    #[error("event {event_id} (`{name}`) has an inconsistent payload schema: {source}")]
    InvalidSchema {
        event_id: EventId,
        name: String,
        #[source]
        source: PayloadError,
    },
    #[error("event {event_id} (`{name}`) has no template")]
    MissingTemplate { event_id: EventId, name: String },
    #[error("catalog lists event id {0} more than once")]
    DuplicateId(EventId),
    #[error("catalog lists event name `{0}` more than once")]
    DuplicateName(String),
    #[error("catalog entry {event_id} has an empty name")]
    EmptyName { event_id: EventId },
    #[error("failed to register event {event_id}: {source}")]
    Store {
        event_id: EventId,
        #[source]
        source: crate::directory::StoreError,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { events: Vec<Event> },
    Bare(Vec<Event>),
}

impl From<CatalogDocument> for EventCatalog {
    fn from(document: CatalogDocument) -> Self {
        let events = match document {
            CatalogDocument::Wrapped { events } => events,
            CatalogDocument::Bare(events) => events,
        };
        Self { events }
    }
}

/// Template placeholders disagree with the schema's argument count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMismatch {
    pub event_id: EventId,
    pub placeholders: usize,
    pub arguments: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCatalog {
    events: Vec<Event>,
}

impl EventCatalog {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let document: CatalogDocument = read_document(path)?;
        Ok(document.into())
    }

    pub fn load<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let document: CatalogDocument = read_json(reader)?;
        Ok(document.into())
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Checks every entry against the payload registry and the template store.
    ///
    /// Missing schemas, missing templates and duplicate entries are errors; placeholder
    /// count mismatches are returned for the caller to report.
    pub fn validate(
        &self,
        payloads: &PayloadRegistry,
        templates: &TemplateStore,
    ) -> Result<Vec<PlaceholderMismatch>, CatalogError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut mismatches = Vec::new();

        for event in &self.events {
            if event.name.trim().is_empty() {
                return Err(CatalogError::EmptyName {
                    event_id: event.event_id,
                });
            }
            if !ids.insert(event.event_id) {
                return Err(CatalogError::DuplicateId(event.event_id));
            }
            if !names.insert(event.name.as_str()) {
                return Err(CatalogError::DuplicateName(event.name.clone()));
            }

            let schema =
                payloads
                    .resolve(event.event_id)
                    .map_err(|_| CatalogError::MissingSchema {
                        event_id: event.event_id,
                        name: event.name.clone(),
                    })?;
            schema.check().map_err(|source| CatalogError::InvalidSchema {
                event_id: event.event_id,
                name: event.name.clone(),
                source,
            })?;

            let template =
                templates
                    .find(event.event_id)
                    .map_err(|_| CatalogError::MissingTemplate {
                        event_id: event.event_id,
                        name: event.name.clone(),
                    })?;

            if template.placeholder_count() != schema.argument_count() {
                mismatches.push(PlaceholderMismatch {
                    event_id: event.event_id,
                    placeholders: template.placeholder_count(),
                    arguments: schema.argument_count(),
                });
            }
        }

        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{build_payload_registry, FieldKind, PayloadSchema};

    fn event(id: EventId, name: &str) -> Event {
        Event {
            event_id: id,
            name: name.to_string(),
            translate: name.replace('_', " "),
        }
    }

    #[test]
    fn parses_wrapped_catalog() {
        let raw = r#"{"events":[{"event_id":1,"name":"order_created","translate":"Order created"}]}"#;
        let catalog = EventCatalog::load(raw.as_bytes()).unwrap();
        assert_eq!(catalog.events(), &[Event {
            event_id: 1,
            name: "order_created".to_string(),
            translate: "Order created".to_string(),
        }]);
    }

    #[test]
    fn validate_requires_schema_and_template() {
        let payloads = PayloadRegistry::new().with(
            1,
            PayloadSchema::new("order_created").field("order_id", FieldKind::Integer),
        );
        let templates = TemplateStore::from_records([(1, "Order %d")]).unwrap();

        let ok = EventCatalog::new(vec![event(1, "order_created")]);
        assert!(ok.validate(&payloads, &templates).unwrap().is_empty());

        let no_schema = EventCatalog::new(vec![event(2, "refund")]);
        assert!(matches!(
            no_schema.validate(&payloads, &templates),
            Err(CatalogError::MissingSchema { event_id: 2, .. })
        ));

        let payloads = payloads.with(2, PayloadSchema::new("refund"));
        assert!(matches!(
            no_schema.validate(&payloads, &templates),
            Err(CatalogError::MissingTemplate { event_id: 2, .. })
        ));
    }

    #[test]
    fn validate_reports_placeholder_mismatch() {
        let payloads = build_payload_registry();
        let templates = TemplateStore::from_records([(2, "Order %d")]).unwrap();
        let catalog = EventCatalog::new(vec![event(2, "user_order_created")]);

        let mismatches = catalog.validate(&payloads, &templates).unwrap();
        assert_eq!(
            mismatches,
            vec![PlaceholderMismatch {
                event_id: 2,
                placeholders: 1,
                arguments: 2
            }]
        );
    }

    #[test]
    fn validate_rejects_duplicates() {
        let payloads = build_payload_registry();
        let templates =
            TemplateStore::from_records([(1, "%d %s %s %d"), (2, "%d %d")]).unwrap();

        let catalog = EventCatalog::new(vec![event(1, "a"), event(1, "b")]);
        assert!(matches!(
            catalog.validate(&payloads, &templates),
            Err(CatalogError::DuplicateId(1))
        ));

        let catalog = EventCatalog::new(vec![event(1, "a"), event(2, "a")]);
        assert!(matches!(
            catalog.validate(&payloads, &templates),
            Err(CatalogError::DuplicateName(name)) if name == "a"
        ));
    }
}
