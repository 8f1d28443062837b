//! Worker configuration
//!
//! Everything is read once at startup. Capability endpoints are optional;
//! a step whose capabilities are missing is simply not subscribed.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use inbound_capabilities::ServiceConfig;
use inbound_durable::config::ConfigError;
use inbound_durable::EngineConfig;

/// Endpoints and keys of the external analysis services
#[derive(Debug, Clone, Default)]
pub struct CapabilityConfig {
    pub language: Option<ServiceConfig>,
    pub translator: Option<ServiceConfig>,
    pub translator_region: Option<String>,
    pub document: Option<ServiceConfig>,
    pub vision: Option<ServiceConfig>,
    pub chat: Option<ServiceConfig>,
    pub chat_deployment: Option<String>,
    /// PII redaction endpoint; falls back to the language endpoint
    pub pii: Option<ServiceConfig>,
}

impl CapabilityConfig {
    /// Redaction service, preferring the dedicated endpoint
    pub fn pii_service(&self) -> Option<&ServiceConfig> {
        self.pii.as_ref().or(self.language.as_ref())
    }
}

/// Worker process configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub engine: EngineConfig,

    /// Postgres transport; the in-memory transport is used when unset
    pub database_url: Option<String>,

    /// Root directory of the filesystem object store
    pub storage_root: String,

    /// Address of the object-created notification endpoint
    pub intake_bind_address: String,

    /// Worker id reported in logs; generated when unset
    pub worker_id: Option<String>,

    pub max_concurrency: usize,
    pub visibility_timeout: Duration,
    pub max_dequeue_count: u32,

    pub capabilities: CapabilityConfig,
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Create configuration from an explicit variable set
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let engine = EngineConfig::from_vars(vars).context("Invalid engine configuration")?;

        let capabilities = CapabilityConfig {
            language: service(vars, "AI_LANGUAGE_ENDPOINT", "AI_LANGUAGE_KEY")?,
            translator: service(vars, "AI_TRANSLATOR_ENDPOINT", "AI_TRANSLATOR_KEY")?,
            translator_region: get("AI_TRANSLATOR_REGION"),
            document: service(
                vars,
                "DOCUMENT_INTELLIGENCE_ENDPOINT",
                "DOCUMENT_INTELLIGENCE_KEY",
            )?,
            vision: service(vars, "AI_VISION_ENDPOINT", "AI_VISION_KEY")?,
            chat: service(vars, "GPT4_VISION_ENDPOINT", "GPT4_VISION_KEY")?,
            chat_deployment: get("GPT4_VISION_DEPLOYMENT_NAME"),
            pii: service(vars, "PII_DETECTION_ENDPOINT", "PII_DETECTION_KEY")?,
        };

        Ok(Self {
            engine,
            database_url: get("DATABASE_URL"),
            storage_root: get("STORAGE_ROOT").unwrap_or_else(|| "./data".to_string()),
            intake_bind_address: get("INTAKE_BIND_ADDRESS")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            worker_id: get("WORKER_ID"),
            max_concurrency: parse_or(vars, "WORKER_MAX_CONCURRENCY", 10)?,
            visibility_timeout: Duration::from_secs(parse_or(
                vars,
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                300,
            )?),
            max_dequeue_count: parse_or(vars, "QUEUE_MAX_DEQUEUE_COUNT", 5)?,
            capabilities,
        })
    }
}

fn service(
    vars: &BTreeMap<String, String>,
    endpoint_var: &str,
    key_var: &str,
) -> Result<Option<ServiceConfig>> {
    let Some(endpoint) = vars.get(endpoint_var).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let mut config =
        ServiceConfig::new(endpoint).with_context(|| format!("Invalid {endpoint_var}"))?;
    if let Some(key) = vars.get(key_var) {
        config = config.with_api_key(key.clone());
    }
    Ok(Some(config))
}

fn parse_or<T>(vars: &BTreeMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
        }),
        None => Ok(default),
    }
}
