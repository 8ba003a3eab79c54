//! JSON response shapes shared by every HTTP handler.

use crate::error::{ErrorKind, ServiceError};
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal | ErrorKind::PanicRecovered => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Serialises `value` with `status`; serialisation failure becomes a bare 500.
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => json_response(status, body),
        Err(err) => {
            error!(error = %err, "failed to serialise response body");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

pub fn error_body(reason: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": reason,
        "message": message,
        "ts": Utc::now().to_rfc3339(),
    })
}

/// Handler-level error wrapper rendering `{"error", "message", "ts"}`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let err = self.0;
        let status = status_for(err.kind());

        if status.is_server_error() {
            error!(reason = err.reason(), error = %err, "request failed");
        } else {
            warn!(reason = err.reason(), error = %err, "request rejected");
        }

        let mut response = json(status, &error_body(err.reason(), &err.public_message()));
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

pub type ApiResult<T = axum::response::Response> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Entity;

    #[test]
    fn taxonomy_maps_to_documented_statuses() {
        let cases = [
            (ServiceError::not_found(Entity::Event, "x"), StatusCode::BAD_REQUEST),
            (
                ServiceError::already_exists(Entity::Subscription, 1),
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::invalid("INVALID_PHONE", "nope"),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::unavailable("TEMPLATE_NOT_FOUND", "gap"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServiceError::internal("boom", crate::err!("pool closed")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::PanicRecovered {
                    detail: "oops".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(status_for(err.kind()), expected, "{err}");
        }
    }

    #[test]
    fn error_responses_are_not_cached() {
        let response = ApiError(ServiceError::not_found(Entity::Subscription, 9)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
