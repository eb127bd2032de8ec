//! Gate monitor entry point.
//!
//! Connects to the backend event stream, drives one gate state machine per
//! configured gate and logs every gate transition until Ctrl+C.

mod config;

use anyhow::Result;
use common::{ConnectionConfig, EventBus, EventName, StreamConnection};
use config::MonitorConfig;
use gate_events::{EventHistory, GateAccessEvent, GateEventHandler};
use gates::GatePanel;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting gate monitor");

    let config = MonitorConfig::from_env()?;
    config.log();

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()?;
        info!("Prometheus metrics available at http://0.0.0.0:{}/metrics", port);
    }

    let bus: Arc<EventBus<GateAccessEvent>> = Arc::new(EventBus::new());

    let history = EventHistory::attach(&bus, config.history_capacity);
    let event_log = bus.subscribe(EventName::GateEvent, |event: &GateAccessEvent| {
        info!(
            "{} on gate {} (camera {}): {}",
            event.event_type, event.gate_id, event.camera_id, event.message
        );
        Ok(())
    });

    let panel = GatePanel::new(bus.clone(), config.panel)?;
    let mut watchers: Vec<JoinHandle<()>> = panel
        .gates()
        .iter()
        .map(|gate| {
            let gate_id = gate.gate_id().to_string();
            let mut open_rx = gate.watch_open();
            tokio::spawn(async move {
                while open_rx.changed().await.is_ok() {
                    let is_open = *open_rx.borrow_and_update();
                    info!("Gate {} {}", gate_id, if is_open { "OPEN" } else { "CLOSED" });
                }
            })
        })
        .collect();

    let connection = StreamConnection::new(
        GateEventHandler::new(config.ws_url.clone(), bus.clone()),
        ConnectionConfig {
            reconnect: config.reconnect.clone(),
            ..ConnectionConfig::default()
        },
    );

    let mut status_rx = connection.watch_status();
    watchers.push(tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            match status.error {
                Some(message) => warn!("Connection {}: {}", status.status, message),
                None => info!("Connection {}", status.status),
            }
        }
    }));

    connection.connect()?;

    shutdown_signal().await;

    info!("Shutting down...");
    connection.disconnect();
    event_log.unsubscribe();
    drop(panel);

    info!(
        "Recorded {} events (keeping the last {})",
        history.len(),
        history.capacity()
    );
    if let Some(latest) = history.latest() {
        info!(
            "Last event: {} on gate {} at {}",
            latest.event_type, latest.gate_id, latest.timestamp
        );
    }
    drop(history);
    for watcher in watchers {
        watcher.abort();
    }

    info!("Gate monitor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
