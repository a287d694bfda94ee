use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
pub mod error;
mod handlers;
mod models;
mod schema;
mod store;

use crate::auth::AuthEngine;
use crate::config::{AppConfig, LogFormat, StoreBackend};
use crate::store::{DynStore, MemoryStore, PgStore};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthEngine>,
    pub store: DynStore,
    pub store_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config);

    tracing::info!("Starting {} ({})", config.app_name, config.env);

    if config.auth.secrets_from_fallback {
        tracing::warn!(
            "ACCESS_SECRET/REFRESH_SECRET not set, using well-known fallback secrets (development only)"
        );
    }

    let store: DynStore = match &config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory credential store; all state is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres { database_url } => {
            let pool = store::postgres::establish_connection_pool(database_url)?;
            tracing::info!("Database connection pool initialized");
            Arc::new(PgStore::new(pool))
        }
    };

    let sweeper = if config.registry_sweep_interval.is_zero() {
        tracing::info!("Registry sweeper disabled");
        None
    } else {
        Some(store::spawn_registry_sweeper(
            store.clone(),
            config.registry_sweep_interval,
        ))
    };

    let engine = AuthEngine::new(store.clone(), &config.auth, config.store_timeout)?;
    let state = AppState {
        engine: Arc::new(engine),
        store,
        store_timeout: config.store_timeout,
    };

    let cors = build_cors_layer(config.cors_allowed_origins.as_deref());
    let app = build_router(state, cors).layer(TimeoutLayer::new(config.request_timeout));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/signup", post(auth::handlers::sign_up))
        .route("/signin", post(auth::handlers::sign_in))
        .route("/refresh", post(auth::handlers::refresh))
        .route("/revoke", post(auth::handlers::revoke))
        .route("/me", get(auth::handlers::me))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(auth::middleware::correlation_id))
        .layer(cors)
        .with_state(state)
}

/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` picks the filter.
fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_directive().into());

    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received, draining connections...");
}

/// Build CORS layer from the configured origin list.
///
/// With no list configured, CORS is permissive (for development only).
fn build_cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    match allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!("CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS");
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .expose_headers([auth::middleware::CORRELATION_ID_HEADER])
            }
        }
        None => {
            tracing::debug!("CORS_ALLOWED_ORIGINS not set, using permissive CORS");
            CorsLayer::permissive()
        }
    }
}
