//! Best-effort failure notifications

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::dispatcher::QueueSender;
use crate::envelope::{codec, UNKNOWN_REFERENCE};

/// Alert message published on the alert queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Correlation id, or `"unknown"`
    pub reference_id: String,
    pub blob_path: String,
    pub failed_step: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        blob_path: impl Into<String>,
        reference_id: Option<&str>,
        failed_step: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let reference_id = reference_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(UNKNOWN_REFERENCE);
        Self {
            reference_id: reference_id.to_string(),
            blob_path: blob_path.into(),
            failed_step: failed_step.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Publishes alerts on the configured alert queue
///
/// Publishing never fails from the caller's point of view: problems are
/// logged and swallowed so that alerting cannot abort step processing.
pub struct AlertPublisher {
    sender: Arc<QueueSender>,
    queue: String,
}

impl AlertPublisher {
    pub fn new(sender: Arc<QueueSender>, queue: impl Into<String>) -> Self {
        Self {
            sender,
            queue: queue.into(),
        }
    }

    /// Name of the alert queue
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish an alert
    pub async fn publish_alert(
        &self,
        blob_path: &str,
        reference_id: Option<&str>,
        step: &str,
        reason: &str,
    ) {
        self.publish(Alert::new(blob_path, reference_id, step, reason))
            .await;
    }

    pub async fn publish(&self, alert: Alert) {
        warn!(
            reference_id = %alert.reference_id,
            blob_path = %alert.blob_path,
            step = %alert.failed_step,
            error = %alert.error,
            "publishing workflow alert"
        );

        let body = match codec::encode(&alert) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to encode alert");
                return;
            }
        };

        if let Err(e) = self.sender.send(&self.queue, &body, Duration::ZERO).await {
            error!(queue = %self.queue, error = %e, "failed to publish alert");
        }
    }
}
