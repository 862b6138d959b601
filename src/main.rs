use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hallbook::config::Config;
use hallbook::engine::Engine;
use hallbook::http::{self, AppState};
use hallbook::notify::{LogNotifier, NotificationQueue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    if config.uses_default_admin_token() {
        warn!("admin routes use the built-in dev token; set HALLBOOK_ADMIN_TOKEN");
    }
    hallbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notifier = Arc::new(LogNotifier::new(config.admin_email.clone()));
    let notifications = NotificationQueue::start(notifier, config.retry);
    let engine = Arc::new(Engine::new(
        config.journal_path(),
        config.schedule.clone(),
        notifications,
    )?);
    tokio::spawn(hallbook::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    let app = http::router(AppState::new(engine, config.admin_token.as_str()));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("hallbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  hours: {:02}:00-{:02}:00, {} min slots, utc offset {}",
        config.schedule.open_hour, config.schedule.close_hour, config.schedule.slot_minutes, config.schedule.utc_offset
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("hallbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM; in-flight requests are then drained by axum.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
