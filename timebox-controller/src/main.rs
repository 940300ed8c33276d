//! timeboxd: the time-boxed resource lifecycle controller daemon

use std::sync::Arc;
use timebox_controller::clock::SystemClock;
use timebox_controller::config::TimeboxConfig;
use timebox_controller::escalation::EscalationManager;
use timebox_controller::notify::NotificationDispatcher;
use timebox_controller::shutdown::{BackgroundTasks, ShutdownCoordinator};
use timebox_controller::{api, logging, provision, store, AppState, LifecycleController};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", TimeboxConfig::generate_sample());
        return Ok(());
    }

    let config = TimeboxConfig::load()?;
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation failed: {}", e);
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }

    // Held until exit so buffered file logs are flushed
    let _log_guard = logging::init(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting timeboxd");

    let store = store::open(&config.database.url, config.database.max_connections).await?;
    info!(backend = store.backend(), "Lifecycle store ready");

    let notifier = Arc::new(NotificationDispatcher::from_config(&config.notifier)?);
    let provisioner = provision::from_config(&config.provisioner)?;

    let mut escalation = EscalationManager::new(config.controller.escalation_threshold);
    if let Some(url) = &config.notifier.alert_webhook_url {
        escalation = escalation.with_webhook(url.clone())?;
        info!(%url, "Alert webhook enabled");
    }

    let controller = Arc::new(LifecycleController::new(
        store,
        Arc::new(SystemClock),
        notifier,
        provisioner,
        Arc::new(escalation),
        config.controller.clone(),
    ));

    // Bounds the trigger loop's exit once the in-flight tick is done
    let shutdown = ShutdownCoordinator::with_timeout(
        config.controller.call_timeout() + std::time::Duration::from_secs(5),
    );
    let mut tasks = BackgroundTasks::new();

    let signal_waiter = shutdown.clone();
    tokio::spawn(async move { signal_waiter.wait_for_signal().await });

    tasks.register(
        "trigger_loop",
        tokio::spawn(controller.clone().run(shutdown.subscribe())),
    );

    let state = Arc::new(AppState::new(controller.clone(), config.server.api_token.clone()));
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("timeboxd listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.signalled())
        .await;

    // Stop the trigger loop even when the server exits on its own
    shutdown.shutdown();

    // Destroy calls already issued run to completion, however long the tick takes
    if controller.tick_in_flight() {
        info!("Waiting for the in-flight tick to finish");
    }
    controller.wait_idle().await;
    tasks.join_all(shutdown.timeout()).await;

    if let Err(e) = served {
        error!("HTTP server failed: {}", e);
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
