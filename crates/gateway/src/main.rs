//! SkinCare RAG API Gateway
//!
//! The HTTP entry point for the RAG pipeline.
//! Handles:
//! - Document ingestion and embedding
//! - Corpus search
//! - Routine generation, publication and archival
//! - Observability (logging, metrics)

mod extract;
mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use skincare_common::{config::AppConfig, db::DbPool, metrics, RagServices};
use std::net::SocketAddr;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: RagServices,
    /// Absent when running on in-memory storage
    pub db: Option<DbPool>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    init_tracing(&config);

    info!("Starting SkinCare RAG Gateway v{}", skincare_common::VERSION);
    config.validate().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;

    // Prometheus exporter on its own port
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()?;
    metrics::register_metrics();

    let db = if config.uses_database() {
        info!("Connecting to database...");
        let pool = DbPool::new(&config.database).await?;
        if config.database.run_migrations {
            info!("Running migrations");
            pool.migrate().await?;
        }
        Some(pool)
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let services = RagServices::from_config(config, db.clone())?;
    let app = create_router(AppState { services, db });

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
pub(crate) fn create_router(state: AppState) -> Router {
    let config = state.services.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Document endpoints
        .route("/documents", post(handlers::documents::ingest_document))
        .route("/documents/{id}/embed", post(handlers::documents::embed_document))

        // Search endpoints
        .route("/rag/search", post(handlers::search::search))

        // Routine endpoints
        .route("/ai/routines/drafts", post(handlers::routines::generate_routine))
        .route("/ai/routines/drafts/text", post(handlers::routines::generate_from_text))
        .route("/ai/routines/{id}/publish", post(handlers::routines::publish_routine))
        .route("/ai/routines/{id}/archive", post(handlers::routines::archive_routine));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::request_metrics::track_requests))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests.max(1)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use skincare_common::context::{LlmClient, ScriptedLlmClient};
    use skincare_common::embeddings::HashEmbedder;
    use std::sync::Arc;

    /// Router over in-memory storage with the given scripted replies
    pub fn router(replies: Vec<&str>) -> Router {
        router_with_llm(Arc::new(ScriptedLlmClient::new(
            replies.into_iter().map(String::from).collect(),
        )))
    }

    /// Router over in-memory storage with a caller-supplied chat client
    pub fn router_with_llm(llm: Arc<dyn LlmClient>) -> Router {
        let services = RagServices::in_memory(
            AppConfig::default(),
            Arc::new(HashEmbedder::new("text-embedding-3-small", 1536)),
            llm,
        );
        create_router(AppState { services, db: None })
    }
}
