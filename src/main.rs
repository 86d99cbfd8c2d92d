//! Ticket Miner - Main Application
//!
//! Serves the mining session API until interrupted, then stops every search
//! within the configured grace period.

use std::sync::Arc;
use std::time::Duration;
use ticket_miner::{
    config::Config,
    engine::CpuSearchEngine,
    ledger::LedgerClient,
    logging::init_logging,
    persistence::StateStore,
    server, BroadcastPolicy, Result, SessionCoordinator, APP_NAME, APP_VERSION,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ticket-miner")
        .build()?;

    let config = runtime.block_on(Config::load())?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _logging = init_logging(config.log_level, config.log_format, config.log_dir.as_deref())?;
    let grace = config.shutdown_grace_duration()?;

    let result = runtime.block_on(run(config));
    if let Err(e) = &result {
        error!(category = e.category(), "Fatal error: {}", e);
    }

    // Searches still running after the grace period are not waited for
    runtime.shutdown_timeout(grace);
    result
}

async fn run(config: Config) -> Result<()> {
    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        listen = %config.listen,
        ledger = %config.ledger_endpoint(),
        state_dir = %config.state_dir.display(),
        auto_broadcast = config.auto_broadcast,
        "Configuration loaded"
    );

    let coordinator = build_coordinator(&config)?;
    let listener = TcpListener::bind(config.listen).await?;
    let shutdown = CancellationToken::new();

    let evictor = spawn_evictor(
        coordinator.clone(),
        config.session_ttl_duration()?,
        config.eviction_interval_duration()?,
        shutdown.clone(),
    );

    let server_shutdown = shutdown.clone();
    server::serve(listener, coordinator.clone(), async move {
        tokio::select! {
            _ = shutdown_signal() => info!("Shutdown signal received"),
            _ = server_shutdown.cancelled() => {}
        }
    })
    .await?;

    shutdown.cancel();
    if let Err(e) = evictor.await {
        warn!("Eviction task failed: {}", e);
    }

    let report = coordinator.shutdown(config.shutdown_grace_duration()?).await;
    if report.abandoned > 0 {
        warn!(abandoned = report.abandoned, "Some searches were still running at exit");
    }
    Ok(())
}

/// Wire the engine, state store and ledger client into a coordinator
fn build_coordinator(config: &Config) -> Result<SessionCoordinator> {
    let engine = Arc::new(CpuSearchEngine::new(config.cpu_batch_size));
    let store = StateStore::new(&config.state_dir);

    let mut policy = BroadcastPolicy {
        enabled: config.auto_broadcast,
        on_resume: config.broadcast_on_resume,
    };

    let mut builder = SessionCoordinator::builder(engine, store);
    if policy.enabled {
        match config.credentials() {
            Some(credentials) => {
                let client = LedgerClient::new(
                    config.ledger_endpoint(),
                    credentials,
                    config.http_timeout_duration(),
                )?
                .with_method(config.ledger_method.clone())
                .with_backoff_config(config.backoff_config());
                builder = builder.broadcaster(Arc::new(client));
            }
            None => {
                warn!("RPC user or password not set; solved tickets will not be broadcast");
                policy = BroadcastPolicy::disabled();
            }
        }
    }

    Ok(builder.policy(policy).build())
}

/// Periodically drop finished sessions older than `ttl`
fn spawn_evictor(
    coordinator: SessionCoordinator,
    ttl: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.evict_finished(ttl);
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(&config.redacted())?;
    println!("{}", config_yaml);
    Ok(())
}
