use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use Savora_backend::api::{self, ApiState};
use Savora_backend::config::AppConfig;
use Savora_backend::database::init_pool_from_config;
use Savora_backend::gateways::GatewayFactory;
use Savora_backend::logging::init_tracing;
use Savora_backend::middleware::logging::{
    request_logging_middleware, UuidRequestId, REQUEST_ID_HEADER,
};
use Savora_backend::services::rewards::{RewardsConfig, RewardsCoordinator};
use Savora_backend::services::settlement::{SettlementConfig, SettlementOrchestrator};
use Savora_backend::workers::intent_expiry::{self, IntentExpiryConfig};
use Savora_backend::workers::refund_processor::{RefundProcessor, RefundProcessorConfig};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting settlement backend"
    );

    let pool = init_pool_from_config(&config.database).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let gateways = Arc::new(GatewayFactory::from_env()?);
    let rewards = RewardsCoordinator::new(RewardsConfig::from_env());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        pool.clone(),
        gateways.clone(),
        rewards,
        SettlementConfig::from_env(),
    ));

    // Workers share one shutdown channel with the HTTP server.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let expiry_handle = tokio::spawn(intent_expiry::run(
        orchestrator.clone(),
        IntentExpiryConfig::from_env(),
        shutdown_rx.clone(),
    ));
    let refund_handle = tokio::spawn(
        RefundProcessor::new(
            pool.clone(),
            gateways.clone(),
            RefundProcessorConfig::from_env(),
        )
        .run(shutdown_rx.clone()),
    );

    let state = Arc::new(ApiState {
        orchestrator,
        pool,
    });
    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                REQUEST_ID_HEADER.parse::<http::HeaderName>()?,
                UuidRequestId,
            ))
            .layer(PropagateRequestIdLayer::new(
                REQUEST_ID_HEADER.parse::<http::HeaderName>()?,
            ))
            .layer(axum::middleware::from_fn(request_logging_middleware)),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await?;

    for (name, handle) in [("intent_expiry", expiry_handle), ("refund_processor", refund_handle)] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "worker terminated abnormally");
        }
    }

    info!("shutdown complete");
    Ok(())
}
