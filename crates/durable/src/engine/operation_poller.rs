//! Async operation poller
//!
//! A long-running document analysis is tracked by nothing but its poll
//! message. Each delivery asks the service once; while the operation is
//! still running the same body is put back on the queue with a delay, so
//! no worker ever waits on it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::controller::{AdvanceOutcome, WorkflowController};
use super::dispatcher::QueueSender;
use super::executor::{ExecuteError, StepContext, StepError};
use crate::capability::{DocumentAnalyzer, OperationStatus};
use crate::envelope::{codec, AsyncOperationHandle};
use crate::storage::{BlobPath, OutcomeWriter, StepArtifact};

/// Output folder of document analysis artifacts
pub const DOCUMENT_ANALYSIS_FOLDER: &str = "documentintelligence";

/// Processor name recorded in document analysis artifacts
pub const DOCUMENT_ANALYSIS_PROCESSOR: &str = "document intelligence";

/// Error recorded when a finished operation has nothing to show
pub const NO_RESULT_ERROR: &str = "operation completed without a result";

/// Artifact file name for an analyzed object
pub fn document_analysis_file_name(original_filename: &str) -> String {
    format!("{original_filename}_document_intelligence_output.json")
}

/// Result of [`OperationPoller::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still running; the message was re-enqueued
    Requeued { message_id: Uuid },
    /// Output written and the workflow moved on
    Advanced(AdvanceOutcome),
    /// Finished without a result; the workflow was failed
    Failed,
    /// Message was unusable and dropped
    Rejected(String),
}

pub struct OperationPoller {
    analyzer: Arc<dyn DocumentAnalyzer>,
    sender: Arc<QueueSender>,
    outcomes: Arc<OutcomeWriter>,
    controller: Arc<WorkflowController>,
    queue: String,
    poll_delay: Duration,
}

impl OperationPoller {
    pub fn new(
        analyzer: Arc<dyn DocumentAnalyzer>,
        sender: Arc<QueueSender>,
        outcomes: Arc<OutcomeWriter>,
        controller: Arc<WorkflowController>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            analyzer,
            sender,
            outcomes,
            controller,
            queue: queue.into(),
            poll_delay: Duration::from_secs(30),
        }
    }

    /// Set the delay before a still-running operation is polled again
    pub fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    /// The polling queue
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Handle one poll message
    #[instrument(skip(self, body, ctx), fields(queue = %self.queue))]
    pub async fn poll(&self, body: &str, ctx: &StepContext) -> Result<PollOutcome, ExecuteError> {
        let handle: AsyncOperationHandle = match codec::decode(body) {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "rejecting poll message");
                self.controller
                    .alerts()
                    .publish_alert("", None, DOCUMENT_ANALYSIS_FOLDER, &e.to_string())
                    .await;
                return Ok(PollOutcome::Rejected(e.to_string()));
            }
        };

        let step = handle.step.clone();
        match self.resume(&handle, body, ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(StepError::Cancelled) => Err(ExecuteError::Cancelled { step }),
            Err(source) => {
                error!(operation_id = %handle.operation_id, error = %source, "poll failed");
                self.controller
                    .fail(handle.envelope, &step, &source.to_string())
                    .await;
                Err(ExecuteError::StepFailed { step, source })
            }
        }
    }

    async fn resume(
        &self,
        handle: &AsyncOperationHandle,
        body: &str,
        ctx: &StepContext,
    ) -> Result<PollOutcome, StepError> {
        let status = ctx
            .run(self.analyzer.operation_status(&handle.operation_id))
            .await?;

        let result = match status {
            OperationStatus::Running => {
                let message_id = self.sender.send(&self.queue, body, self.poll_delay).await?;
                info!(
                    operation_id = %handle.operation_id,
                    delay_secs = self.poll_delay.as_secs(),
                    "operation still running, requeued"
                );
                return Ok(PollOutcome::Requeued { message_id });
            }
            OperationStatus::Completed(None) => {
                warn!(operation_id = %handle.operation_id, "operation finished without a result");
                self.controller
                    .fail(handle.envelope.clone(), &handle.step, NO_RESULT_ERROR)
                    .await;
                return Ok(PollOutcome::Failed);
            }
            OperationStatus::Completed(Some(result)) => result,
        };

        let target = BlobPath::parse(&handle.target_blob)?;
        let original = target.file_name();
        let artifact = StepArtifact::new(
            &handle.envelope.reference_id,
            DOCUMENT_ANALYSIS_PROCESSOR,
            DOCUMENT_ANALYSIS_FOLDER,
            original,
        )
        .with_main_content(result.content)
        .with_message(result.raw);

        let location = self
            .outcomes
            .write_artifact(&document_analysis_file_name(original), &artifact)
            .await?;

        let mut envelope = handle.envelope.clone();
        envelope.record_output(&handle.step, location.to_string());
        info!(operation_id = %handle.operation_id, output = %location, "operation completed");

        let outcome = self.controller.advance(&envelope).await?;
        Ok(PollOutcome::Advanced(outcome))
    }
}
