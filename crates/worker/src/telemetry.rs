// Logging setup
//
// Structured logs through tracing-subscriber. Plain text by default, one
// JSON object per line when LOG_FORMAT=json.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither RUST_LOG nor LOG_LEVEL is set
pub const DEFAULT_LOG_FILTER: &str =
    "inbound_worker=debug,inbound_durable=debug,inbound_capabilities=debug,info";

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info", "inbound_durable=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human readable text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "inbound-worker".to_string(),
            log_filter: None,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "inbound-worker")
    /// - `RUST_LOG`: Full filter directive
    /// - `LOG_LEVEL`: Level applied to the inbound crates when `RUST_LOG` is unset
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        let log_filter = std::env::var("RUST_LOG").ok().or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .map(|level| level_filter(&level))
        });
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "inbound-worker".to_string()),
            log_filter,
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Filter directive applying `level` to every inbound crate
fn level_filter(level: &str) -> String {
    let level = level.trim();
    format!("inbound_worker={level},inbound_durable={level},inbound_capabilities={level},info")
}

/// Install the global subscriber
///
/// Fails if a subscriber has already been installed.
pub fn init_telemetry(
    config: &TelemetryConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let (text_layer, json_layer) = if config.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_filter(config.filter()),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_filter(config.filter()),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .try_init()?;

    tracing::debug!(service = %config.service_name, json = config.json, "logging initialized");
    Ok(())
}
