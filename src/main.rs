use anyhow::Context;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_ledger::{
    clock::SystemClock,
    config::Config,
    controllers,
    database::Database,
    services::{BookingService, ExpirationSweeper},
    store::PgLedger,
    AppState,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(environment = %config.app.environment, "Starting seat ledger");

    // Connect to the database
    let db = Database::from_config(&config.database)
        .await
        .context("failed to connect to database")?;
    info!("Database connected");

    db.run_migrations().await.context("failed to run migrations")?;

    let service = BookingService::new(Arc::new(PgLedger::new(db.pool.clone())), Arc::new(SystemClock))
        .with_cancel_requires_owner(config.booking.cancel_requires_owner);

    // --- Start background tasks ---
    let shutdown = CancellationToken::new();
    let sweeper = ExpirationSweeper::new(
        service.clone(),
        config.sweeper.interval_secs,
        config.sweeper.run_timeout(),
    )
    .spawn(shutdown.child_token());

    // --- Start the web server ---
    let app = controllers::router(AppState::new(service, config.app.request_timeout()));

    let ip = config
        .app
        .host
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("HOST {:?} is not an IP address", config.app.host))?;
    let addr = SocketAddr::new(ip, config.app.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    // Сервер мог упасть сам, фоновые задачи гасим в любом случае
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "sweeper task panicked");
    }
    db.close().await;

    served.context("server error")?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = shutdown.cancelled() => {},
    }
    info!("Shutdown signal received");
}
