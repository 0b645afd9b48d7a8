use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{error, info, Instrument};

use crate::error::ApiError;
use crate::key_generator;
use crate::rate_limit_config::LimiterConfig;
use crate::rate_limiter::RateLimiter;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// State shared by the admission middleware
#[derive(Clone)]
pub struct AdmissionState {
    pub limiter: RateLimiter,
    pub config: Arc<LimiterConfig>,
    pub trust_proxy_headers: bool,
}

impl AdmissionState {
    pub fn new(limiter: RateLimiter, config: LimiterConfig, trust_proxy_headers: bool) -> Self {
        Self {
            limiter,
            config: Arc::new(config),
            trust_proxy_headers,
        }
    }
}

/// Admit or reject each request according to its identity's rate limit.
///
/// Storage failures are logged and answered with a generic 500; requests
/// over the limit get a 429. Neither reaches the next handler.
pub async fn rate_limit_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = key_generator::request_client_ip(&request, state.trust_proxy_headers);
    let token = key_generator::token_from_headers(request.headers());
    let info = key_generator::resolve(token, &client_ip, &state.config);

    match state.limiter.allow(&info).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            info!(
                target: "gatekeeper::middleware",
                key = %info.key,
                "Request rejected by rate limiter"
            );
            ApiError::RateLimitExceeded.into_response()
        }
        Err(e) => {
            error!(
                target: "gatekeeper::middleware",
                key = %info.key,
                error = %e,
                "Rate limiter failed"
            );
            ApiError::Internal.into_response()
        }
    }
}

/// Logging middleware for request/response tracking.
///
/// The state is whether proxy headers are trusted when resolving the
/// client address recorded on the request span.
pub async fn logging_middleware(
    State(trust_proxy_headers): State<bool>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = key_generator::request_client_ip(&request, trust_proxy_headers);
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        %method,
        %uri,
        client_ip = %client_ip,
        request_id = %request_id
    );

    async move {
        info!(target: "gatekeeper::middleware", "Incoming request");

        let mut response = next.run(request).await;

        info!(
            target: "gatekeeper::middleware",
            status = %response.status(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}
