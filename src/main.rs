use std::net::SocketAddr;
use std::sync::Arc;

use makazi_payments::config::AppConfig;
use makazi_payments::database::{
    init_pool_from_config, run_migrations, InMemoryPaymentStore, PaymentStore, PgPaymentStore,
};
use makazi_payments::logging::init_tracing;
use makazi_payments::payments::credentials::CALLBACK_PATH;
use makazi_payments::payments::registry::builtin_records;
use makazi_payments::payments::{PaymentProviderFactory, ProviderEnv, ProviderRegistry};
use makazi_payments::{router, AppState};
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🚀 Starting Makazi payments gateway"
    );

    let store: Arc<dyn PaymentStore> = match &config.database {
        Some(database) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(database).await?;
            if config.run_migrations {
                run_migrations(&pool).await?;
            }
            info!(
                max_connections = database.max_connections,
                "✅ Database connection pool initialized"
            );
            Arc::new(PgPaymentStore::new(pool))
        }
        None => {
            warn!("⏭️  No DATABASE_URL, using the in-memory store");
            Arc::new(InMemoryPaymentStore::new())
        }
    };

    for record in builtin_records() {
        store.upsert_provider(&record).await?;
    }
    let registry = Arc::new(ProviderRegistry::new(store.list_providers().await?)?);
    info!(providers = registry.len(), "✅ Provider registry loaded");

    let env = Arc::new(ProviderEnv::from_env());
    info!(summary = %env.summary_line(), "💳 Payment gateway configured");
    if !env.is_complete() {
        warn!(
            missing = ?env.missing_keys(),
            "⚠️  AzamPay credentials incomplete, checkouts will be refused"
        );
    }

    let providers = PaymentProviderFactory::azampay(&env)?;
    let state = AppState::new(store, env, registry, providers, config.gateway.clone());
    let app = router(state);

    info!("✅ Routes configured");

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║          🚀 MAKAZI PAYMENTS GATEWAY IS RUNNING 🚀            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🌐 Server Address:  http://{}", addr);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:");
    println!("║  GET  /health                                 - Health check");
    println!("║  GET  /api/v1/properties/{{id}}/visit/status/   - Visit fee status");
    println!("║  POST /api/v1/properties/{{id}}/visit/initiate/ - Start checkout");
    println!("║  POST /api/v1/properties/{{id}}/visit/verify/   - Check a transaction");
    println!("║  POST {}                - AzamPay callback", CALLBACK_PATH);
    println!("║  GET  /api/v1/payments/diagnostics            - Gateway diagnostics");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");

    Ok(())
}
