//! Bibliosync Gateway
//!
//! Operations API in front of the orchestrators.
//! Handles:
//! - Liveness / readiness probes
//! - Per-collection processing status
//! - Migration and publication run triggers
//! - Observability (logging, metrics)

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use bibliosync_common::{
    config::AppConfig,
    metrics,
    queue::{Queue, QueueSettings},
    Actor, Repository, Services, VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Services,
    pub repository: Arc<Repository>,
    /// Acting user for triggered runs
    pub actor: Actor,
    /// Article task queue; runs fall back to an in-process pool without it
    pub queue: Option<Arc<Queue>>,
    /// Migration and publication runs in flight
    pub runs: handlers::runs::RunRegistry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load_validated().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    init_observability(&config)?;

    info!(service = %config.observability.service_name, "Starting Bibliosync Gateway v{}", VERSION);

    let config = Arc::new(config);

    // Initialize database-backed services
    info!("Connecting to database...");
    let (services, repository) = Services::connect(&config).await?;

    let queue = match QueueSettings::for_articles(&config.queue) {
        Some(settings) => {
            info!(url = %settings.url, "Article tasks go to the queue");
            Some(Arc::new(Queue::new(settings).await?))
        }
        None => {
            warn!("queue.article_queue_url not set, article tasks run in-process");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        services,
        repository,
        actor: Actor::from(&config.actor),
        queue,
        runs: handlers::runs::RunRegistry::default(),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = config.server.bind_address();
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Collection endpoints
        .route(
            "/collections/{acron}/status",
            get(handlers::collections::status),
        )
        .route(
            "/collections/{acron}/migrate",
            post(handlers::runs::migrate),
        )
        .route(
            "/collections/{acron}/publish",
            post(handlers::runs::publish),
        );

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

fn init_observability(config: &AppConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }

    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "Metrics exporter listening");
    }
    metrics::register_metrics();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
