use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const RESPONSE_TIME_HEADER: HeaderName = HeaderName::from_static("x-response-time");
pub const SERVER_NAME_HEADER: HeaderName = HeaderName::from_static("x-server-name");

const SERVER_NAME: HeaderValue = HeaderValue::from_static("uart-proxy");

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    // If the incoming request already has a request-id, preserve it; otherwise generate one
    let req_id_value = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let Some(req_id_value) = req_id_value else {
        return next.run(req).await;
    };

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(REQUEST_ID_HEADER, req_id_value);
    res
}

/// Stamps `X-Response-Time` (milliseconds) and `X-Server-Name` on every response.
pub async fn response_headers(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let mut res = next.run(req).await;

    let elapsed_ms = started.elapsed().as_millis().to_string();
    if let Ok(value) = HeaderValue::from_str(&elapsed_ms) {
        res.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
    res.headers_mut().insert(SERVER_NAME_HEADER, SERVER_NAME);
    res
}
