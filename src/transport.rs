use crate::error::Result;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod chat_updates;
pub mod http_server;
pub mod recovery;
pub mod response;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportKind {
    HttpIn,
    ChatUpdates,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::HttpIn => f.write_str("http-in"),
            TransportKind::ChatUpdates => f.write_str("chat-updates"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportHealth {
    Idle,
    Starting,
    Running,
    Degraded { reason: String },
    Shutdown,
}

/// The completion future of a started transport.
pub struct TransportRun {
    kind: TransportKind,
    name: &'static str,
    future: Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>,
}

impl TransportRun {
    pub fn new<F>(kind: TransportKind, name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            kind,
            name,
            future: Box::pin(future),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn wait(self) -> Result<()> {
        self.future.await
    }
}

#[async_trait]
pub trait TransportRuntime: Send {
    fn kind(&self) -> TransportKind;
    fn name(&self) -> &'static str;
    fn health(&self) -> TransportHealth;
    async fn start(&mut self, shutdown: CancellationToken) -> Result<()>;
    fn run(&mut self) -> TransportRun;
    async fn shutdown(&mut self) -> Result<()>;
}

pub type DynTransportRuntime = Box<dyn TransportRuntime>;

type RuntimeSpawner = Box<dyn FnOnce(CancellationToken) -> Vec<JoinHandle<()>> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runtime backed by tokio tasks produced once by a spawner closure.
pub struct TaskTransportRuntime {
    kind: TransportKind,
    name: &'static str,
    spawner: Option<RuntimeSpawner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    health: Arc<Mutex<TransportHealth>>,
    shutdown: Option<CancellationToken>,
    run_registered: bool,
}

impl TaskTransportRuntime {
    pub fn new<F>(kind: TransportKind, name: &'static str, spawner: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Vec<JoinHandle<()>> + Send + 'static,
    {
        Self {
            kind,
            name,
            spawner: Some(Box::new(spawner)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            health: Arc::new(Mutex::new(TransportHealth::Idle)),
            shutdown: None,
            run_registered: false,
        }
    }

    fn update_health(&self, value: TransportHealth) {
        *lock(&self.health) = value;
    }
}

#[async_trait]
impl TransportRuntime for TaskTransportRuntime {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn health(&self) -> TransportHealth {
        lock(&self.health).clone()
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        let Some(spawner) = self.spawner.take() else {
            return Err(crate::err!("transport `{}` already started", self.name));
        };

        self.update_health(TransportHealth::Starting);
        let spawned = spawner(shutdown.clone());
        lock(&self.tasks).extend(spawned);

        self.shutdown = Some(shutdown);
        self.update_health(TransportHealth::Running);
        Ok(())
    }

    fn run(&mut self) -> TransportRun {
        let name = self.name;
        let kind = self.kind;

        if self.run_registered {
            return TransportRun::new(kind, name, async move {
                Err(crate::err!("transport `{name}` run() called more than once"))
            });
        }
        self.run_registered = true;

        let tasks = Arc::clone(&self.tasks);
        let health = Arc::clone(&self.health);

        TransportRun::new(kind, name, async move {
            loop {
                let handle = lock(&tasks).pop();

                let Some(handle) = handle else {
                    *lock(&health) = TransportHealth::Shutdown;
                    return Ok(());
                };

                if let Err(join_err) = handle.await {
                    *lock(&health) = TransportHealth::Degraded {
                        reason: format!("task join error: {join_err}"),
                    };
                    return Err(crate::err!(
                        "transport `{name}` worker terminated unexpectedly: {join_err}"
                    ));
                }
            }
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(token) = self.shutdown.as_ref() {
            token.cancel();
        }
        self.update_health(TransportHealth::Shutdown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_runtime_reports_lifecycle() {
        let mut runtime = TaskTransportRuntime::new(TransportKind::ChatUpdates, "chat", |shutdown| {
            vec![tokio::spawn(async move { shutdown.cancelled().await })]
        });
        assert_eq!(runtime.health(), TransportHealth::Idle);

        let token = CancellationToken::new();
        runtime.start(token.clone()).await.unwrap();
        assert_eq!(runtime.health(), TransportHealth::Running);
        assert!(runtime.start(token.clone()).await.is_err());

        let run = runtime.run();
        assert_eq!(run.kind(), TransportKind::ChatUpdates);
        token.cancel();
        run.wait().await.unwrap();
        assert_eq!(runtime.health(), TransportHealth::Shutdown);

        assert!(runtime.run().wait().await.is_err());
    }
}
