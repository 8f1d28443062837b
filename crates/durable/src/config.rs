//! Engine configuration
//!
//! Built once at process start and shared by reference. Nothing in the
//! engine reads the environment after this point.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::envelope::parse_step_list;

/// Canonical step names
pub mod step_names {
    pub const TRANSLATION: &str = "translation";
    pub const DOCUMENT_INTELLIGENCE: &str = "documentintelligence";
    pub const AI_VISION: &str = "aivision";
    pub const GPT_VISION: &str = "gptvision";
    pub const PII: &str = "pii";
    pub const PDF_IMAGES: &str = "pdfimages";
}

/// Prefix of environment variables that override a step's queue
pub const STEP_QUEUE_ENV_PREFIX: &str = "STEP_QUEUE_";

/// Errors from reading configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A setting had a value that could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    /// A required setting was absent
    #[error("missing required setting: {0}")]
    Missing(String),
}

/// Step name to transport queue table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<String, String>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        use step_names::*;

        Self::empty()
            .with_route(TRANSLATION, "translation-in")
            .with_route(DOCUMENT_INTELLIGENCE, "documentintelligence-in")
            .with_route(AI_VISION, "aivision-in")
            .with_route(GPT_VISION, "gptvision-in")
            .with_route(PII, "pii-in")
            .with_route(PDF_IMAGES, "pdfimages-in")
    }
}

impl RoutingTable {
    /// A table with no routes
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Add or replace the queue of a step
    pub fn with_route(mut self, step: impl AsRef<str>, queue: impl Into<String>) -> Self {
        self.routes
            .insert(step.as_ref().trim().to_lowercase(), queue.into());
        self
    }

    /// Apply `STEP_QUEUE_<STEP>=<queue>` overrides
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(step) = key.as_ref().strip_prefix(STEP_QUEUE_ENV_PREFIX) else {
                continue;
            };
            let queue = value.as_ref().trim();
            if step.is_empty() || queue.is_empty() {
                continue;
            }
            self = self.with_route(step, queue);
        }
        self
    }

    /// Queue for a step, if one is configured
    pub fn queue_for(&self, step: &str) -> Option<&str> {
        self.routes
            .get(&step.trim().to_lowercase())
            .map(String::as_str)
    }

    /// All `(step, queue)` pairs
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(s, q)| (s.as_str(), q.as_str()))
    }
}

/// Settings for the translation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationConfig {
    /// Language everything is translated into
    pub target_language: String,

    /// Fixed source language; detected per document when unset
    pub source_language: Option<String>,

    /// Drop the first line of multi-line input text
    pub strip_first_line: bool,

    /// Only drop the first line when it starts with this marker
    pub leading_line_marker: Option<String>,

    /// Characters sampled from the start of the text for detection
    pub detection_sample_chars: usize,

    /// Maximum characters per translation request
    pub chunk_chars: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            source_language: None,
            strip_first_line: true,
            leading_line_marker: None,
            detection_sample_chars: 5120,
            chunk_chars: 5000,
        }
    }
}

/// Settings for the PII redaction step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiConfig {
    /// Language hint passed to the redaction service
    pub language: String,

    /// Maximum characters per redaction request
    pub chunk_chars: usize,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            chunk_chars: 5120,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Container whose object-created notifications start workflows
    pub intake_container: String,

    /// Container step artifacts are written to
    pub output_container: String,

    /// Queue alerts are published on
    pub alert_queue: String,

    /// Queue carrying poll messages for long-running operations
    pub operation_queue: String,

    /// Workflow used when an object carries no `workflow_steps`
    pub default_workflow_steps: Vec<String>,

    /// Step to queue table
    pub routing: RoutingTable,

    /// Delay before a still-running operation is polled again
    pub poll_delay: Duration,

    /// Delay before a freshly started operation is polled the first time
    pub initial_poll_delay: Duration,

    /// Analysis profile used when the object does not name one
    pub default_document_model: String,

    pub translation: TranslationConfig,

    pub pii: PiiConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            intake_container: "input".to_string(),
            output_container: "output".to_string(),
            alert_queue: "workflow-alerts".to_string(),
            operation_queue: "documentintelligence-events".to_string(),
            default_workflow_steps: vec![],
            routing: RoutingTable::default(),
            poll_delay: Duration::from_secs(30),
            initial_poll_delay: Duration::from_secs(10),
            default_document_model: "prebuilt-document".to_string(),
            translation: TranslationConfig::default(),
            pii: PiiConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Create configuration from an explicit variable set
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let translation = TranslationConfig {
            target_language: get("TRANSLATION_TARGET_LANGUAGE")
                .map(|l| l.to_lowercase())
                .unwrap_or(defaults.translation.target_language),
            source_language: get("TRANSLATION_SOURCE_LANGUAGE").map(|l| l.to_lowercase()),
            strip_first_line: parse_or(
                vars,
                "TRANSLATION_STRIP_FIRST_LINE",
                defaults.translation.strip_first_line,
            )?,
            leading_line_marker: get("TRANSLATION_LEADING_LINE_MARKER"),
            detection_sample_chars: parse_or(
                vars,
                "TRANSLATION_DETECTION_SAMPLE_CHARS",
                defaults.translation.detection_sample_chars,
            )?,
            chunk_chars: parse_or(
                vars,
                "TRANSLATION_CHUNK_CHARS",
                defaults.translation.chunk_chars,
            )?,
        };

        let pii = PiiConfig {
            language: get("PII_LANGUAGE").unwrap_or(defaults.pii.language),
            chunk_chars: parse_or(vars, "PII_CHUNK_CHARS", defaults.pii.chunk_chars)?,
        };

        Ok(Self {
            intake_container: get("INTAKE_CONTAINER").unwrap_or(defaults.intake_container),
            output_container: get("OUTPUT_CONTAINER").unwrap_or(defaults.output_container),
            alert_queue: get("ALERT_QUEUE_NAME").unwrap_or(defaults.alert_queue),
            operation_queue: get("OPERATION_QUEUE_NAME").unwrap_or(defaults.operation_queue),
            default_workflow_steps: get("DEFAULT_WORKFLOW_STEPS")
                .map(|raw| parse_step_list(&raw))
                .unwrap_or_default(),
            routing: RoutingTable::default().with_overrides(vars.iter()),
            poll_delay: Duration::from_secs(parse_or(
                vars,
                "OPERATION_POLL_DELAY_SECS",
                defaults.poll_delay.as_secs(),
            )?),
            initial_poll_delay: Duration::from_secs(parse_or(
                vars,
                "OPERATION_INITIAL_DELAY_SECS",
                defaults.initial_poll_delay.as_secs(),
            )?),
            default_document_model: get("DEFAULT_DOCUMENT_MODEL")
                .unwrap_or(defaults.default_document_model),
            translation,
            pii,
        })
    }

    /// Set the default workflow
    pub fn with_default_workflow<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.default_workflow_steps = crate::envelope::normalize_steps(steps);
        self
    }

    /// Replace the routing table
    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    /// Set the translation settings
    pub fn with_translation(mut self, translation: TranslationConfig) -> Self {
        self.translation = translation;
        self
    }
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
