//! Trigger intake: turns object-created notifications into workflows

use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::EngineConfig;
use crate::engine::{AlertPublisher, DispatchError, Dispatcher, RouteOutcome};
use crate::envelope::{keys, parse_step_list, Metadata, WorkflowEnvelope};
use crate::storage::{BlobPath, ObjectProperties, ObjectStore, StorageError};

/// Event type of an object-created notification
pub const BLOB_CREATED_EVENT: &str = "Microsoft.Storage.BlobCreated";

/// Step name used in alerts raised by intake
pub const INTAKE_STEP: &str = "intake";

/// Object-created notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreatedEvent {
    pub event_type: String,
    /// URL of the object; the first path segment is the container
    pub url: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ObjectCreatedEvent {
    pub fn new(event_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            url: url.into(),
            metadata: Metadata::new(),
        }
    }

    /// Whether this is a creation event
    pub fn is_created(&self) -> bool {
        self.event_type.eq_ignore_ascii_case(BLOB_CREATED_EVENT)
            || self.event_type.ends_with(".ObjectCreated")
            || self.event_type.ends_with("BlobCreated")
    }

    /// Object location named by the URL
    pub fn blob_path(&self) -> Result<BlobPath, StorageError> {
        let invalid = || StorageError::InvalidPath(self.url.clone());
        let url = url::Url::parse(&self.url).map_err(|_| invalid())?;

        let segments: Vec<String> = url
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();

        let (container, name) = segments.split_first().ok_or_else(invalid)?;
        BlobPath::new(container.clone(), name.join("/"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("failed to read object properties: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to dispatch initial envelope: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Result of [`TriggerIntake::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Workflow started
    Started {
        envelope: WorkflowEnvelope,
        route: RouteOutcome,
    },
    /// Not a notification intake cares about
    Ignored(String),
    /// Notification was invalid; alerted and dropped
    Rejected(String),
}

pub struct TriggerIntake {
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<Dispatcher>,
    alerts: Arc<AlertPublisher>,
    config: Arc<EngineConfig>,
}

impl TriggerIntake {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        dispatcher: Arc<Dispatcher>,
        alerts: Arc<AlertPublisher>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            alerts,
            config,
        }
    }

    /// Start a workflow for a created object
    ///
    /// Redelivering the same notification builds an equivalent envelope
    /// and dispatches it again.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, url = %event.url))]
    pub async fn handle(&self, event: &ObjectCreatedEvent) -> Result<IntakeOutcome, IntakeError> {
        if !event.is_created() {
            debug!("ignoring non-creation event");
            return Ok(IntakeOutcome::Ignored(format!(
                "event type {} is not a creation event",
                event.event_type
            )));
        }

        let path = match event.blob_path() {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "unusable object url");
                return Ok(self.reject(&event.url, None, &e.to_string()).await);
            }
        };

        if path.container() != self.config.intake_container {
            debug!(container = path.container(), "ignoring object outside the intake container");
            return Ok(IntakeOutcome::Ignored(format!(
                "{path} is not in the intake container"
            )));
        }

        let properties = match self.store.properties(&path).await {
            Ok(properties) => properties,
            Err(e) => {
                error!(error = %e, "failed to read object properties");
                self.alerts
                    .publish_alert(&path.to_string(), None, INTAKE_STEP, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let lookup = |key: &str| lookup_key(&properties, &event.metadata, key);
        let reference_id = lookup(keys::REFERENCE_ID);
        let steps = lookup(keys::WORKFLOW_STEPS)
            .map(|raw| parse_step_list(&raw))
            .filter(|steps| !steps.is_empty())
            .unwrap_or_else(|| self.config.default_workflow_steps.clone());

        let mut metadata = properties.tags.clone();
        metadata.insert(keys::SOURCE_BLOB, path.to_string());

        let envelope = match WorkflowEnvelope::start(
            reference_id.clone().unwrap_or_default(),
            path.to_string(),
            &steps,
            metadata,
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "cannot start workflow");
                return Ok(self
                    .reject(&path.to_string(), reference_id.as_deref(), &e.to_string())
                    .await);
            }
        };

        let route = self.dispatcher.route(&envelope).await?;
        info!(
            reference_id = %envelope.reference_id,
            first_step = %envelope.current_step,
            remaining = envelope.remaining_steps.len(),
            "workflow started"
        );
        Ok(IntakeOutcome::Started { envelope, route })
    }

    async fn reject(
        &self,
        blob_path: &str,
        reference_id: Option<&str>,
        reason: &str,
    ) -> IntakeOutcome {
        self.alerts
            .publish_alert(blob_path, reference_id, INTAKE_STEP, reason)
            .await;
        IntakeOutcome::Rejected(reason.to_string())
    }
}

/// Object metadata first, then tags, then the notification's own metadata
fn lookup_key(properties: &ObjectProperties, event: &Metadata, key: &str) -> Option<String> {
    properties
        .metadata
        .get_non_blank(key)
        .or_else(|| properties.tags.get_non_blank(key))
        .or_else(|| event.get_non_blank(key))
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_path_from_url() {
        let event = ObjectCreatedEvent::new(
            BLOB_CREATED_EVENT,
            "https://acct.blob.core.windows.net/input/claims/My%20Claim.txt",
        );
        let path = event.blob_path().unwrap();
        assert_eq!(path.container(), "input");
        assert_eq!(path.name(), "claims/My Claim.txt");
    }

    #[test]
    fn test_blob_path_needs_container_and_name() {
        for url in ["https://acct.blob.core.windows.net/input", "not a url", "https://host/"] {
            assert!(
                ObjectCreatedEvent::new(BLOB_CREATED_EVENT, url)
                    .blob_path()
                    .is_err(),
                "{url}"
            );
        }
    }

    #[test]
    fn test_is_created() {
        assert!(ObjectCreatedEvent::new("Microsoft.Storage.BlobCreated", "x").is_created());
        assert!(ObjectCreatedEvent::new("Storage.ObjectCreated", "x").is_created());
        assert!(!ObjectCreatedEvent::new("Microsoft.Storage.BlobDeleted", "x").is_created());
    }
}
