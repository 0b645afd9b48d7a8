use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, StorageBackend};
use crate::error::Result;
use crate::handlers::{health_check, index, test_endpoint, AppState};
use crate::health::HealthChecker;
use crate::middleware::{logging_middleware, rate_limit_middleware, AdmissionState};
use crate::rate_limit_config::LimiterConfig;
use crate::rate_limiter::RateLimiter;
use crate::storage;

/// Build the router with the admission gate in front of every route.
pub fn create_app(limiter: RateLimiter, config: LimiterConfig, trust_proxy_headers: bool) -> Router {
    let app_state = AppState {
        health: HealthChecker::new(limiter.storage_name()),
        trust_proxy_headers,
    };
    let admission = AdmissionState::new(limiter, config, trust_proxy_headers);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/test", get(test_endpoint))
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(
                    trust_proxy_headers,
                    logging_middleware,
                ))
                .layer(middleware::from_fn_with_state(admission, rate_limit_middleware)),
        )
}

pub struct Server {
    app: Router,
    port: u16,
    limiter: RateLimiter,
}

impl Server {
    /// Connect the selected storage backend and assemble the app
    pub async fn new(config: &Config, backend: StorageBackend) -> Result<Self> {
        let storage = storage::connect(config, backend).await?;
        let limiter = RateLimiter::new(storage);

        let app = create_app(
            limiter.clone(),
            config.limiter_config(),
            config.env.trust_proxy_headers,
        );

        Ok(Self {
            app,
            port: config.env.server_port,
            limiter,
        })
    }

    pub async fn run(self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", self.port)).await?;

        tracing::info!(
            port = self.port,
            storage = self.limiter.storage_name(),
            "Gatekeeper server starting"
        );

        let served = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        // Release storage even when serving failed.
        if let Err(e) = self.limiter.close().await {
            tracing::warn!(error = %e, "Failed to close storage");
        }

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
