//! Environment configuration for the monitor binaries.

use anyhow::{Context, Result};
use common::ReconnectPolicy;
use gate_events::{DEFAULT_HISTORY_CAPACITY, DEFAULT_WS_URL};
use gates::config::{DEFAULT_AUTO_CLOSE, DEFAULT_GATE_COUNT};
use gates::PanelConfig;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub ws_url: String,
    pub panel: PanelConfig,
    pub reconnect: ReconnectPolicy,
    /// Number of recent events kept in memory.
    pub history_capacity: usize,
    /// Prometheus exporter port; the exporter is not started when unset.
    pub metrics_port: Option<u16>,
}

impl MonitorConfig {
    /// Read the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`.
    ///
    /// Unparseable numbers fall back to their defaults with a warning; parseable
    /// but out-of-range panel settings are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ws_url = lookup("GATE_WS_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());

        let gate_count = parse_or(&lookup, "GATE_COUNT", DEFAULT_GATE_COUNT);
        let auto_close_ms = parse_or(
            &lookup,
            "GATE_AUTO_CLOSE_MS",
            DEFAULT_AUTO_CLOSE.as_millis() as u64,
        );
        let panel = PanelConfig::new(gate_count, Duration::from_millis(auto_close_ms))
            .context("Invalid gate panel configuration")?;

        let reconnect = if lookup("GATE_RECONNECT").is_some_and(|v| is_truthy(&v)) {
            ReconnectPolicy::backoff(parse_or(
                &lookup,
                "GATE_RECONNECT_MAX_ATTEMPTS",
                DEFAULT_RECONNECT_MAX_ATTEMPTS,
            ))
        } else {
            ReconnectPolicy::Disabled
        };

        let history_capacity = parse_or(&lookup, "GATE_EVENT_HISTORY", DEFAULT_HISTORY_CAPACITY);

        let metrics_port = lookup("METRICS_PORT").and_then(|v| match v.parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!("Ignoring invalid METRICS_PORT {:?}", v);
                None
            }
        });

        Ok(Self {
            ws_url,
            panel,
            reconnect,
            history_capacity,
            metrics_port,
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  GATE_WS_URL: {}", self.ws_url);
        info!("  GATE_COUNT: {}", self.panel.gate_count);
        info!("  GATE_AUTO_CLOSE_MS: {}", self.panel.auto_close.as_millis());
        info!("  GATE_RECONNECT: {:?}", self.reconnect);
        info!("  GATE_EVENT_HISTORY: {}", self.history_capacity);
        match self.metrics_port {
            Some(port) => info!("  METRICS_PORT: {}", port),
            None => info!("  METRICS_PORT: unset (exporter disabled)"),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {} {:?}, using default {:?}", key, raw, default);
            default
        }),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
