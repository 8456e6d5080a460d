use crate::{Decision, RateLimiterService};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, Response, StatusCode},
    middleware::Next,
};
use std::sync::Arc;

/// Shared state for the rate limiter middleware
#[derive(Clone)]
pub struct RateLimitState {
    pub service: Arc<RateLimiterService>,
}

impl RateLimitState {
    pub fn new(service: Arc<RateLimiterService>) -> Self {
        Self { service }
    }
}

/// Rate limiting middleware function
/// This runs BEFORE your route handlers
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let identity = extract_client_id(request.headers());
    let path = request.uri().path().to_string();
    // only paths with their own override get an isolated counter
    let endpoint = state
        .service
        .has_endpoint_override(&path)
        .then_some(path.as_str());

    let decision = state
        .service
        .check_rate_limit(&identity, endpoint, None, None)
        .await;

    if decision.allowed {
        let mut response = next.run(request).await;
        apply_headers(response.headers_mut(), &decision);
        response
    } else {
        let mut response = Response::new(Body::from("Rate limit exceeded. Please try again later."));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        let headers = response.headers_mut();
        apply_headers(headers, &decision);
        headers.insert("Retry-After", HeaderValue::from(decision.retry_after_seconds));
        response
    }
}

/// Degraded decisions only advertise the limit; remaining/reset are unknown
fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    if let Some(remaining) = decision.remaining {
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    }
    if let Some(reset) = decision.reset_seconds {
        headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));
    }
}

/// Extract a client identifier: first X-Forwarded-For hop, then X-Real-IP
fn extract_client_id(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .unwrap_or("anonymous")
        .to_string()
}
