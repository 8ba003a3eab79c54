#![forbid(unsafe_code)]
use super::recovery::{recover_panics, track_requests};
use super::response::{json, ApiError, ApiResult};
use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::domain::{EventIdentifier, SubscriptionId};
use crate::error::{Result, ServiceError};
use crate::metrics::MetricsCollector;
use crate::transport::{TaskTransportRuntime, TransportKind, TransportRuntime};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{Response, StatusCode};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::make::Shared;
use tracing::{error, info};

/// The public REST API plus `/health` and `/metrics`.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/events", get(list_events))
        .route("/events/fire/:event_identifier", post(fire_event))
        .route("/subscriptions", post(subscribe))
        .route("/subscriptions/:subscription_id", delete(cancel_subscription))
        .route(
            "/subscriptions/subscribers",
            get(subscribers_overview).post(register_subscriber),
        )
        .route("/subscriptions/subscribers/joined", get(subscribers_joined));

    let base = config.base_path.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    router
        .route("/health", get(handle_health_probe))
        .route("/metrics", get(handle_metrics))
        .layer(middleware::from_fn(recover_panics))
        .layer(middleware::from_fn(track_requests))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(state)
}

pub struct HttpServerRuntime {
    inner: TaskTransportRuntime,
    addr: SocketAddr,
}

impl HttpServerRuntime {
    pub fn build(state: AppState, config: &ServerConfig) -> Result<Self> {
        let addr = config.socket_addr().map_err(|err| {
            crate::err!(
                "invalid listen address `{}:{}`: {err}",
                config.host,
                config.port
            )
        })?;
        let router = build_router(state, config);

        let inner = TaskTransportRuntime::new(TransportKind::HttpIn, "http-in", move |shutdown| {
            vec![spawn_http_server(addr, router, shutdown)]
        });

        Ok(Self { inner, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

fn spawn_http_server(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(address = %addr, "http api listening");
                let make_service = Shared::new(router.into_service::<Body>());
                let server = axum::serve(listener, make_service).with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                });

                if let Err(err) = server.await {
                    error!(address = %addr, %err, "http api terminated with error");
                }
            }
            Err(err) => {
                error!(address = %addr, %err, "failed to bind http api listener");
                shutdown.cancel();
            }
        }
    })
}

#[async_trait]
impl TransportRuntime for HttpServerRuntime {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn health(&self) -> crate::transport::TransportHealth {
        self.inner.health()
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.inner.start(shutdown).await
    }

    fn run(&mut self) -> crate::transport::TransportRun {
        self.inner.run()
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await
    }
}

/// Parses a JSON body, reporting malformed input as `reason`.
fn parse_body<T: DeserializeOwned>(
    reason: &'static str,
    body: &Bytes,
) -> std::result::Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        ApiError(ServiceError::invalid(
            reason,
            format!("malformed request body: {err}"),
        ))
    })
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    event_identifier: EventIdentifier,
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct RegisterSubscriberRequest {
    phone_number: String,
}

async fn list_events(State(state): State<AppState>) -> ApiResult {
    let events = state.events.list_available().await?;
    Ok(json(StatusCode::OK, &events))
}

async fn fire_event(
    State(state): State<AppState>,
    Path(event_identifier): Path<String>,
    body: Bytes,
) -> ApiResult {
    let identifier = EventIdentifier::parse(&event_identifier);
    let outcome = state.pipeline.fire(&identifier, &body).await?;
    Ok(json(StatusCode::OK, &outcome))
}

async fn subscribe(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: SubscribeRequest = parse_body("INVALID_REQUEST", &body)?;
    let receipt = state
        .subscriptions
        .subscribe(&request.event_identifier, &request.phone_number)
        .await?;
    Ok(json(StatusCode::CREATED, &receipt))
}

async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> ApiResult {
    let subscription_id: SubscriptionId = subscription_id.trim().parse().map_err(|_| {
        ApiError(ServiceError::invalid(
            "INVALID_SUBSCRIPTION_ID",
            format!("`{subscription_id}` is not a subscription id"),
        ))
    })?;
    state.subscriptions.cancel(subscription_id).await?;
    Ok(json(
        StatusCode::OK,
        &serde_json::json!({ "subscription_id": subscription_id, "cancelled": true }),
    ))
}

async fn subscribers_overview(State(state): State<AppState>) -> ApiResult {
    let report = state.subscriptions.subscribers_overview().await?;
    Ok(json(StatusCode::OK, &report))
}

async fn subscribers_joined(State(state): State<AppState>) -> ApiResult {
    let report = state.subscriptions.subscribers_joined().await?;
    Ok(json(StatusCode::OK, &report))
}

async fn register_subscriber(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: RegisterSubscriberRequest = parse_body("INVALID_REQUEST", &body)?;
    let subscriber_id = state
        .subscriptions
        .register_subscriber(&request.phone_number)
        .await?;
    Ok(json(
        StatusCode::CREATED,
        &serde_json::json!({ "subscriber_id": subscriber_id }),
    ))
}

async fn handle_health_probe() -> std::result::Result<Response<Body>, StatusCode> {
    let payload = serde_json::json!({
        "status": "ok",
        "ts": Utc::now().to_rfc3339(),
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(CACHE_CONTROL, "no-store")
        .body(Body::from(payload.to_string()))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn handle_metrics() -> std::result::Result<Response<Body>, StatusCode> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .header(CACHE_CONTROL, "no-store")
        .body(Body::from(MetricsCollector::global().render_text()))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
