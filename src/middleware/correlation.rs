//! Correlation-id propagation (spec.md §6: "every request surfaces a
//! correlation id ... echoed on every log line and event header").
//!
//! Generalizes the teacher's `request_logging` span-per-request shape: one
//! more middleware layer, run ahead of it, that reads `X-Correlation-ID` if
//! the caller sent one or mints a fresh one, stashes it in request
//! extensions for handlers to pull into `AppError`/saga calls, and echoes
//! it back on the response header.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::error::CorrelationId;

const HEADER: &str = "x-correlation-id";

pub async fn correlation_id(mut req: Request<Body>, next: Next) -> Response {
    let incoming = req
        .headers()
        .get(HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let correlation_id = CorrelationId(incoming.unwrap_or_else(|| CorrelationId::default().0));

    req.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.0) {
        response.headers_mut().insert(HEADER, value);
    }
    response
}

/// Pulls the correlation id a handler's request carries, falling back to a
/// fresh one if the middleware somehow wasn't installed (keeps every
/// handler infallible to call this).
pub fn extract(req: &Request<Body>) -> String {
    req.extensions()
        .get::<CorrelationId>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| CorrelationId::default().0)
}
