use crate::app_state::AppState;
use crate::catalog::{EventCatalog, PlaceholderMismatch};
use crate::chat::{ChatListener, TelegramClient};
use crate::config::{CatalogConfig, NotifierConfig};
use crate::directory::PostgresDirectory;
use crate::dispatch::DeliveryPolicy;
use crate::error::{Context, Result};
use crate::payload::{build_payload_registry, PayloadRegistry};
use crate::template::TemplateStore;
use crate::transport::chat_updates::ChatUpdateRuntime;
use crate::transport::http_server::HttpServerRuntime;
use crate::transport::{DynTransportRuntime, TransportRun};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Payload schemas, templates and the event catalog: everything startup needs before
/// touching the database.
pub struct StaticCatalog {
    pub payloads: Arc<PayloadRegistry>,
    pub templates: Arc<TemplateStore>,
    pub catalog: EventCatalog,
}

impl StaticCatalog {
    pub fn load(config: &CatalogConfig) -> Result<Self> {
        let templates = TemplateStore::from_path(&config.templates_path).with_context(|| {
            format!(
                "failed to load templates from {}",
                config.templates_path.display()
            )
        })?;
        let catalog = EventCatalog::from_path(&config.events_path).with_context(|| {
            format!(
                "failed to load event catalog from {}",
                config.events_path.display()
            )
        })?;

        Ok(Self {
            payloads: Arc::new(build_payload_registry()),
            templates: Arc::new(templates),
            catalog,
        })
    }

    /// Offline validation; fatal problems are errors, count mismatches are returned.
    pub fn check(&self) -> Result<Vec<PlaceholderMismatch>> {
        Ok(self.catalog.validate(&self.payloads, &self.templates)?)
    }
}

pub struct NotifierApp {
    state: AppState,
    directory: PostgresDirectory,
    transports: Vec<DynTransportRuntime>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl NotifierApp {
    pub async fn initialise(config: NotifierConfig) -> Result<Self> {
        let statics = StaticCatalog::load(&config.catalog)?;

        let directory = PostgresDirectory::connect(&config.database)
            .await
            .context("failed to construct event/subscription directory")?;
        if config.database.apply_schema {
            directory.ensure_schema().await?;
        }

        let telegram = Arc::new(
            TelegramClient::new(&config.telegram).context("failed to construct telegram client")?,
        );
        let shared = Arc::new(directory.clone());

        let state = AppState::assemble(
            shared.clone(),
            shared,
            Arc::clone(&statics.payloads),
            Arc::clone(&statics.templates),
            telegram.clone(),
            DeliveryPolicy::from(&config.delivery),
        );

        let report = state
            .events
            .load_catalog(&statics.catalog)
            .await
            .context("failed to load event catalog")?;
        tracing::info!(
            events = statics.catalog.len(),
            registered = report.registered,
            templates = statics.templates.len(),
            schemas = statics.payloads.len(),
            "event catalog ready"
        );

        let mut transports: Vec<DynTransportRuntime> = Vec::new();
        let http = HttpServerRuntime::build(state.clone(), &config.server)
            .context("failed to construct http api runtime")?;
        transports.push(Box::new(http));

        if config.telegram.enabled {
            let listener =
                ChatListener::new(state.subscriptions.clone(), telegram.clone(), &config.chat);
            transports.push(Box::new(ChatUpdateRuntime::new(listener, telegram)));
        } else {
            tracing::info!("telegram listener disabled; contacts will not be linked");
        }

        Ok(Self {
            state,
            directory,
            transports,
            shutdown: CancellationToken::new(),
            drain_timeout: config.server.drain_timeout,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            state: _,
            directory,
            transports,
            shutdown,
            drain_timeout,
        } = self;

        let mut transport_handles = transports;
        let mut transport_runs: Vec<TransportRun> = Vec::new();
        for handle in transport_handles.iter_mut() {
            handle.start(shutdown.clone()).await?;
            transport_runs.push(handle.run());
        }

        let mut transport_tasks = JoinSet::new();
        for run in transport_runs {
            let kind = run.kind();
            let name = run.name();
            transport_tasks.spawn(async move {
                match run.wait().await {
                    Ok(()) => {
                        tracing::info!(transport = %kind, name = name, "transport runtime stopped");
                        Ok(())
                    }
                    Err(err) => {
                        tracing::error!(
                            transport = %kind,
                            name = name,
                            error = %err,
                            "transport runtime terminated with error"
                        );
                        Err(err)
                    }
                }
            });
        }

        tracing::info!("notifier ready; press Ctrl+C to stop");

        tokio::select! {
            res = transport_tasks.join_next(), if !transport_tasks.is_empty() => {
                tracing::warn!("a transport runtime stopped before shutdown was requested");
                if let Some(res) = res {
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return Err(err),
                        Err(join_err) => {
                            return Err(crate::err!(
                                "transport runtime supervisor join error: {join_err}"
                            ))
                        }
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested by a transport");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
        }

        shutdown.cancel();

        let graceful_shutdown = async {
            for handle in transport_handles.iter_mut() {
                if let Err(err) = handle.shutdown().await {
                    tracing::warn!(
                        transport = %handle.kind(),
                        name = handle.name(),
                        error = %err,
                        "failed to shutdown transport gracefully"
                    );
                }
            }

            while let Some(res) = transport_tasks.join_next().await {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => {
                        tracing::warn!(error = %join_err, "transport monitor task cancelled");
                    }
                }
            }

            Ok::<(), crate::error::Error>(())
        };

        let result = match timeout(drain_timeout, graceful_shutdown).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    timeout_secs = drain_timeout.as_secs_f64(),
                    "graceful shutdown exceeded server.drain_timeout; aborting transports"
                );
                transport_tasks.shutdown().await;
                Err(crate::err!(
                    "graceful shutdown timed out after {}",
                    humantime::format_duration(drain_timeout)
                ))
            }
        };

        directory.close().await;
        result
    }
}
