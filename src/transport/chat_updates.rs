use crate::chat::{ChatListener, UpdateFeed};
use crate::error::Result;
use crate::transport::{
    TaskTransportRuntime, TransportHealth, TransportKind, TransportRun, TransportRuntime,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs the chat listener's long-poll loop as a supervised transport.
pub struct ChatUpdateRuntime {
    inner: TaskTransportRuntime,
}

impl ChatUpdateRuntime {
    pub fn new(listener: ChatListener, feed: Arc<dyn UpdateFeed>) -> Self {
        let inner = TaskTransportRuntime::new(
            TransportKind::ChatUpdates,
            "chat-updates",
            move |shutdown| vec![tokio::spawn(async move { listener.run(feed, shutdown).await })],
        );
        Self { inner }
    }
}

#[async_trait]
impl TransportRuntime for ChatUpdateRuntime {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn health(&self) -> TransportHealth {
        self.inner.health()
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.inner.start(shutdown).await
    }

    fn run(&mut self) -> TransportRun {
        self.inner.run()
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await
    }
}
