use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::health::HealthChecker;
use crate::key_generator;

/// State for the demo routes behind the gate
#[derive(Clone)]
pub struct AppState {
    pub health: HealthChecker,
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub message: String,
    pub ip: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub message: String,
    pub time: u64,
}

/// Echo the identity the gate saw for this request
pub async fn index(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);

    Json(IndexResponse {
        message: "Hello World!".to_string(),
        ip: key_generator::client_ip(&headers, peer, state.trust_proxy_headers),
        token: key_generator::token_from_headers(&headers)
            .unwrap_or_default()
            .to_string(),
    })
}

pub async fn test_endpoint() -> impl IntoResponse {
    Json(TestResponse {
        message: "Test endpoint".to_string(),
        time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health())
}
