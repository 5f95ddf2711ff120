use guard_service::{
    build_router,
    config::GuardConfig,
    services::{
        metrics::init_metrics, AuditRecorder, CsrfTokenStore, MongoAuditStore, TokenSweeper,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = GuardConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting guard service"
    );

    let mongo = MongoAuditStore::connect(
        &config.mongodb.uri,
        &config.mongodb.database,
        config.audit.retention(),
    )
    .await?;
    mongo.initialize_indexes().await?;
    tracing::info!(
        retention_days = config.audit.retention_days,
        "Audit store initialized"
    );

    let audit_store = Arc::new(mongo);
    let audit = AuditRecorder::new(audit_store.clone());
    let tokens = CsrfTokenStore::new(config.csrf.token_ttl());
    let sweeper = TokenSweeper::start(tokens.clone(), config.csrf.sweep_interval());

    let state = AppState {
        config: config.clone(),
        tokens,
        audit,
        audit_store,
    };
    let app = build_router(state);

    let addr = config.common.bind_address();
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(grace))
    .await?;

    sweeper.stop().await;
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Let in-flight requests drain before the listener closes.
    tokio::time::sleep(grace).await;
}
