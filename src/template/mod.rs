//! Message templates, one per event, loaded once at startup.

mod format;

pub use format::{FormatString, FormatValue, Verb};

use crate::document::{read_document, read_json, DocumentError};
use crate::domain::EventId;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no template registered for event {0}")]
    NotFound(EventId),
    #[error("unsupported verb `%{verb}` at byte {position}")]
    UnknownVerb { verb: char, position: usize },
    #[error("template ends with a dangling `%`")]
    DanglingPercent,
    #[error("template expects {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
    #[error("placeholder {index} (`%{verb}`) cannot format a {found} value")]
    VerbMismatch {
        index: usize,
        verb: char,
        found: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("template for event {event_id} is malformed: {source}")]
    Malformed {
        event_id: EventId,
        #[source]
        source: TemplateError,
    },
    #[error("event {0} has more than one template")]
    Duplicate(EventId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    event_id: EventId,
    text: String,
    format: FormatString,
}

impl Template {
    pub fn new(event_id: EventId, text: impl Into<String>) -> Result<Self, TemplateError> {
        let text = text.into();
        let format = FormatString::parse(&text)?;
        Ok(Self {
            event_id,
            text,
            format,
        })
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn placeholder_count(&self) -> usize {
        self.format.placeholder_count()
    }

    pub fn render(&self, args: &[FormatValue]) -> Result<String, TemplateError> {
        self.format.render(args)
    }
}

#[derive(Debug, Deserialize)]
struct TemplateRecord {
    event_id: EventId,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplateDocument {
    Wrapped { templates: Vec<TemplateRecord> },
    Bare(Vec<TemplateRecord>),
}

impl TemplateDocument {
    fn into_records(self) -> Vec<TemplateRecord> {
        match self {
            TemplateDocument::Wrapped { templates } => templates,
            TemplateDocument::Bare(templates) => templates,
        }
    }
}

/// Immutable event id → template map.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<EventId, Template>,
}

impl TemplateStore {
    pub fn from_path(path: &Path) -> Result<Self, TemplateLoadError> {
        let document: TemplateDocument = read_document(path)?;
        Self::from_records(
            document
                .into_records()
                .into_iter()
                .map(|record| (record.event_id, record.text)),
        )
    }

    /// Parses a JSON template document from any reader.
    pub fn load<R: Read>(reader: R) -> Result<Self, TemplateLoadError> {
        let document: TemplateDocument = read_json(reader)?;
        Self::from_records(
            document
                .into_records()
                .into_iter()
                .map(|record| (record.event_id, record.text)),
        )
    }

    pub fn from_records<I, S>(records: I) -> Result<Self, TemplateLoadError>
    where
        I: IntoIterator<Item = (EventId, S)>,
        S: Into<String>,
    {
        let mut templates = HashMap::new();
        for (event_id, text) in records {
            let template = Template::new(event_id, text)
                .map_err(|source| TemplateLoadError::Malformed { event_id, source })?;
            if templates.insert(event_id, template).is_some() {
                return Err(TemplateLoadError::Duplicate(event_id));
            }
        }
        Ok(Self { templates })
    }

    pub fn find(&self, event_id: EventId) -> Result<&Template, TemplateError> {
        self.templates
            .get(&event_id)
            .ok_or(TemplateError::NotFound(event_id))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
