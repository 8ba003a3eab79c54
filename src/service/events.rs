use crate::catalog::{CatalogError, EventCatalog};
use crate::directory::EventDirectory;
use crate::domain::{Event, EventId, EventIdentifier};
use crate::error::{Entity, ServiceError};
use crate::payload::PayloadRegistry;
use crate::template::TemplateStore;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogReport {
    pub registered: usize,
    pub already_known: usize,
}

/// Event catalog operations on top of the event directory.
#[derive(Clone)]
pub struct EventService {
    directory: Arc<dyn EventDirectory>,
    payloads: Arc<PayloadRegistry>,
    templates: Arc<TemplateStore>,
}

impl EventService {
    pub fn new(
        directory: Arc<dyn EventDirectory>,
        payloads: Arc<PayloadRegistry>,
        templates: Arc<TemplateStore>,
    ) -> Self {
        Self {
            directory,
            payloads,
            templates,
        }
    }

    pub fn payloads(&self) -> &Arc<PayloadRegistry> {
        &self.payloads
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    /// Validates the whole catalog first, then registers each entry in order.
    ///
    /// An event only becomes visible once its schema and template are known to exist,
    /// and an invalid catalog registers nothing.
    pub async fn load_catalog(
        &self,
        catalog: &EventCatalog,
    ) -> Result<CatalogReport, CatalogError> {
        let mismatches = catalog.validate(&self.payloads, &self.templates)?;
        for mismatch in &mismatches {
            warn!(
                event_id = mismatch.event_id,
                placeholders = mismatch.placeholders,
                arguments = mismatch.arguments,
                "template placeholder count does not match payload schema; firing will fail"
            );
        }

        let mut report = CatalogReport::default();
        for event in catalog.events() {
            let inserted = self
                .directory
                .register_event(event)
                .await
                .map_err(|source| CatalogError::Store {
                    event_id: event.event_id,
                    source,
                })?;
            if inserted {
                report.registered += 1;
            } else {
                report.already_known += 1;
            }
        }

        info!(
            registered = report.registered,
            already_known = report.already_known,
            "event catalog loaded"
        );
        Ok(report)
    }

    pub async fn does_exist(&self, identifier: &EventIdentifier) -> Result<EventId, ServiceError> {
        if identifier.is_blank() {
            return Err(ServiceError::invalid(
                "INVALID_EVENT_IDENTIFIER",
                "event identifier must not be empty",
            ));
        }

        match self.directory.find_event(identifier).await {
            Ok(Some(event_id)) => Ok(event_id),
            Ok(None) => Err(ServiceError::not_found(Entity::Event, identifier)),
            Err(err) => Err(ServiceError::internal(
                format!("failed to resolve event `{identifier}`"),
                err,
            )),
        }
    }

    pub async fn list_available(&self) -> Result<Vec<Event>, ServiceError> {
        self.directory
            .list_events()
            .await
            .map_err(|err| ServiceError::internal("failed to list events", err))
    }
}
