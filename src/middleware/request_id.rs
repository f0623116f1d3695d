//! Request correlation and HTTP metrics.
//!
//! Every request gets an `X-Request-Id` (the caller's, when it sent a usable
//! one), a tracing span carrying it, and the same id inside JSON error bodies.

use std::{fmt, time::Instant};

use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use http::{HeaderValue, header};
use http_body_util::BodyExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id that is propagated as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id, available to handlers through request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a caller's id when it is short, visible ASCII.
    fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        let usable = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        usable.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);
    req.extensions_mut().insert(request_id.clone());

    let method = req.method().clone();
    // Route templates keep the metric label set bounded.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_string();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %route,
    );

    let started = Instant::now();
    let response = next.run(req).instrument(span).await;
    metrics::record_http_request(
        method.as_str(),
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );

    let mut response = if is_json_error(&response) {
        stamp_error_body(response, &request_id).await
    } else {
        response
    };
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn is_json_error(response: &Response) -> bool {
    let status = response.status();
    (status.is_client_error() || status.is_server_error())
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Rewrite `{"error": {...}}` to carry `request_id`. Bodies of any other
/// shape pass through unchanged.
async fn stamp_error_body(response: Response, request_id: &RequestId) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to buffer error body");
            Bytes::new()
        }
    };

    let stamped = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|mut json| {
            json.get_mut("error")?
                .as_object_mut()?
                .insert("request_id".into(), request_id.as_str().into());
            serde_json::to_vec(&json).ok()
        });

    let body = match stamped {
        Some(stamped) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::from(stamped)
        }
        None => Body::from(bytes),
    };
    Response::from_parts(parts, body)
}
