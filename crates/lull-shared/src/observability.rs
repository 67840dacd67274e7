//! Observability features: structured logging and optional metrics

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Global observability system
static OBSERVABILITY: OnceCell<ObservabilitySystem> = OnceCell::new();

/// Observability system for centralized logging and metrics
#[derive(Debug)]
pub struct ObservabilitySystem {
    metrics_enabled: bool,
}

impl ObservabilitySystem {
    /// Initialize the observability system
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        if OBSERVABILITY.get().is_some() {
            anyhow::bail!("Observability system already initialized");
        }

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        OBSERVABILITY
            .set(Self {
                metrics_enabled: config.metrics.enabled,
            })
            .map_err(|_| anyhow::anyhow!("Observability system already initialized"))?;

        info!(
            level = %config.logging.level,
            format = %config.logging.format,
            metrics = config.metrics.enabled,
            "Observability system initialized"
        );
        Ok(())
    }

    /// Initialize structured logging on stdout
    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let env_filter = EnvFilter::builder()
            .with_default_directive(parse_level(&config.level).into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?,
            "pretty" => registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?,
            _ => registry
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .try_init()?,
        }

        Ok(())
    }

    /// Install the Prometheus exporter with its own HTTP listener
    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!("Prometheus metrics initialized on {}", bind_addr);
        Ok(())
    }

    /// Get the global observability system
    pub fn get() -> Option<&'static ObservabilitySystem> {
        OBSERVABILITY.get()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Orchestrator counters. Without an installed recorder these are no-ops.
pub struct EventMetrics;

impl EventMetrics {
    /// A change event resolved to a tracked table
    pub fn event_received(table: &str, operation: &str) {
        counter!("lull_events_total",
                "table" => table.to_string(),
                "operation" => operation.to_string())
            .increment(1);
    }

    /// A message dropped before reaching the activity tracker
    pub fn event_dropped(reason: &str) {
        counter!("lull_events_dropped_total", "reason" => reason.to_string()).increment(1);
    }

    /// Result of one dispatch decision or attempt
    pub fn dispatch(table: &str, outcome: &str) {
        counter!("lull_dispatch_total",
                "table" => table.to_string(),
                "outcome" => outcome.to_string())
            .increment(1);
    }

    /// Tables expired by one sweep
    pub fn sweep_expired(count: usize) {
        counter!("lull_sweep_expired_total").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_metrics_without_recorder() {
        // no recorder installed: must not panic
        EventMetrics::event_received("students", "c");
        EventMetrics::event_dropped("unknown_topic");
        EventMetrics::dispatch("students", "started");
        EventMetrics::sweep_expired(3);
    }
}
