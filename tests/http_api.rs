#[path = "support/mod.rs"]
mod support;

use axum::body::{to_bytes, Body};
use axum::routing::get;
use axum::{middleware, Router};
use http::{header, Method, Request, StatusCode};
use notifier::config::ServerConfig;
use notifier::dispatch::DeliveryPolicy;
use notifier::domain::EventIdentifier;
use notifier::transport::http_server::build_router;
use notifier::transport::recovery::recover_panics;
use serde_json::{json, Value};
use support::{harness, Harness, ORDER_CREATED};
use tower::ServiceExt;

fn router(harness: &Harness) -> Router {
    build_router(harness.state.clone(), &ServerConfig::default())
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn call(router: Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_then_fire_over_http() {
    let harness = harness(DeliveryPolicy::default()).await;

    let (status, _, body) = call(
        router(&harness),
        json_request(
            Method::POST,
            "/api/subscriptions",
            json!({"event_identifier": "order_created", "phone_number": "+15551234"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["event_id"], ORDER_CREATED);
    assert_eq!(body["new_subscriber"], true);

    harness
        .state
        .subscriptions
        .link_chat_recipient(31337, "+15551234")
        .await
        .unwrap();

    let (status, _, body) = call(
        router(&harness),
        json_request(
            Method::POST,
            "/api/events/fire/1",
            json!({"order_id": 7, "username": "ann", "amount": 1500}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["delivered"], 1);
    assert_eq!(
        harness.messenger.texts_for(31337),
        vec!["Order 7 for ann: 1500".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_subscription_is_a_conflict() {
    let harness = harness(DeliveryPolicy::default()).await;
    let request = || {
        json_request(
            Method::POST,
            "/api/subscriptions",
            json!({"event_identifier": 1, "phone_number": "+15551234"}),
        )
    };

    let (status, _, _) = call(router(&harness), request()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, body) = call(router(&harness), request()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "SUBSCRIPTION_EXISTS");
    assert!(body["ts"].is_string());
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_map_to_bad_request() {
    let harness = harness(DeliveryPolicy::default()).await;

    let cases = [
        (
            json_request(Method::POST, "/api/events/fire/unknown_event", json!({})),
            "EVENT_NOT_FOUND",
        ),
        (
            json_request(Method::POST, "/api/events/fire/1", json!({})),
            // No subscribers yet, so the payload is never read.
            "",
        ),
        (
            json_request(
                Method::POST,
                "/api/subscriptions",
                json!({"event_identifier": 1, "phone_number": "call me"}),
            ),
            "INVALID_PHONE",
        ),
        (
            json_request(Method::POST, "/api/subscriptions", json!({"phone_number": "+15551234"})),
            "INVALID_REQUEST",
        ),
        (
            empty_request(Method::DELETE, "/api/subscriptions/abc"),
            "INVALID_SUBSCRIPTION_ID",
        ),
        (
            empty_request(Method::DELETE, "/api/subscriptions/99"),
            "SUBSCRIPTION_NOT_FOUND",
        ),
    ];

    for (request, reason) in cases {
        let uri = request.uri().to_string();
        let (status, _, body) = call(router(&harness), request).await;
        if reason.is_empty() {
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["status"], "no_subscribers");
        } else {
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], reason, "{uri}");
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_payload_is_rejected_with_reason() {
    let harness = harness(DeliveryPolicy::default()).await;
    harness
        .directory
        .seed_subscriber("+15551234", ORDER_CREATED, Some(5));

    let (status, _, body) = call(
        router(&harness),
        json_request(Method::POST, "/api/events/fire/order_created", json!({"order_id": 7})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_PAYLOAD");
    assert!(harness.messenger.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn store_outage_is_an_opaque_server_error() {
    let harness = harness(DeliveryPolicy::default()).await;
    harness.directory.set_unavailable(true);

    let (status, _, body) = call(router(&harness), empty_request(Method::GET, "/api/events")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "INTERNAL_ERROR");
    assert_eq!(body["message"], "internal error");
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_and_reports() {
    let harness = harness(DeliveryPolicy::default()).await;

    let (status, _, body) = call(
        router(&harness),
        json_request(
            Method::POST,
            "/api/subscriptions/subscribers",
            json!({"phone_number": "+15559876"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["subscriber_id"].is_i64());

    let (status, _, body) = call(
        router(&harness),
        json_request(
            Method::POST,
            "/api/subscriptions/subscribers",
            json!({"phone_number": "+15559876"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "SUBSCRIBER_EXISTS");

    let (status, _, body) = call(
        router(&harness),
        empty_request(Method::GET, "/api/subscriptions/subscribers"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["phone_number"], "+15559876");
    assert_eq!(body[0]["has_chat_link"], false);

    let (status, _, body) = call(
        router(&harness),
        empty_request(Method::GET, "/api/subscriptions/subscribers/joined"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _, body) = call(router(&harness), empty_request(Method::GET, "/api/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "order_created");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_returns_confirmation() {
    let harness = harness(DeliveryPolicy::default()).await;
    let receipt = harness
        .state
        .subscriptions
        .subscribe(&EventIdentifier::Id(ORDER_CREATED), "+15551234")
        .await
        .unwrap();

    let uri = format!("/api/subscriptions/{}", receipt.subscription_id);
    let (status, _, body) = call(router(&harness), empty_request(Method::DELETE, &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["subscription_id"], receipt.subscription_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_and_metrics_sit_outside_the_base_path() {
    let harness = harness(DeliveryPolicy::default()).await;

    let (status, headers, body) =
        call(router(&harness), empty_request(Method::GET, "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");

    let (status, headers, body) =
        call(router(&harness), empty_request(Method::GET, "/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert!(body.as_str().unwrap().contains("notifier_fires_total"));
}

async fn exploding_handler() -> &'static str {
    panic!("handler exploded")
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_handler_becomes_panic_recovered() {
    let router = Router::new()
        .route("/boom", get(exploding_handler))
        .layer(middleware::from_fn(recover_panics));

    let (status, _, body) = call(router, empty_request(Method::GET, "/boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "PANIC_RECOVERED");
    assert_eq!(body["message"], "internal error");
}
