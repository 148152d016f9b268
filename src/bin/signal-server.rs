//! Signalmeter server
//!
//! Accepts TradingView webhook alerts, tracks each accepted signal through
//! its checkpoints and resets the daily counters on schedule.

use dotenvy::dotenv;
use signalmeter::config::AppConfig;
use signalmeter::core::http::{start_server, AppState};
use signalmeter::core::runtime::SignalRuntime;
use signalmeter::logging;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();

    let config = AppConfig::from_env();
    info!(
        environment = %config.environment,
        port = config.port,
        row_store = ?config.row_store,
        notifications = config.telegram.is_some(),
        "Starting Signalmeter server"
    );

    let runtime = SignalRuntime::from_config(config).await?;
    runtime.start().await;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let state = AppState::new(runtime.service().clone(), runtime.metrics().clone());
    let port = runtime.config().port;
    let mut server_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        };
        if let Err(e) = start_server(port, state, shutdown).await {
            error!(error = %e, "HTTP server error");
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = &mut server_handle => {
            error!("HTTP server stopped unexpectedly");
        }
    }

    let _ = stop_tx.send(true);
    runtime.shutdown().await;
    if !server_handle.is_finished() {
        let _ = server_handle.await;
    }

    info!("Signalmeter server stopped");
    Ok(())
}
