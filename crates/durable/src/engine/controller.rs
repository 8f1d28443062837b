//! Workflow controller: advance or fail an envelope

use std::sync::Arc;

use tracing::{info, instrument};

use super::alerting::AlertPublisher;
use super::dispatcher::{DispatchError, Dispatcher, RouteOutcome};
use crate::envelope::WorkflowEnvelope;

/// Result of [`WorkflowController::advance`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// No steps were left; the workflow has ended successfully
    Finished,
    /// The next step was handed to the dispatcher
    Dispatched(RouteOutcome),
}

pub struct WorkflowController {
    dispatcher: Arc<Dispatcher>,
    alerts: Arc<AlertPublisher>,
}

impl WorkflowController {
    pub fn new(dispatcher: Arc<Dispatcher>, alerts: Arc<AlertPublisher>) -> Self {
        Self { dispatcher, alerts }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn alerts(&self) -> &Arc<AlertPublisher> {
        &self.alerts
    }

    /// Move the workflow to its next step
    ///
    /// An empty `remaining_steps` ends the workflow; this is the only way
    /// a workflow succeeds.
    #[instrument(
        skip(self, envelope),
        fields(reference_id = %envelope.reference_id, step = %envelope.current_step)
    )]
    pub async fn advance(
        &self,
        envelope: &WorkflowEnvelope,
    ) -> Result<AdvanceOutcome, DispatchError> {
        let Some(next) = envelope.next() else {
            info!("workflow finished");
            return Ok(AdvanceOutcome::Finished);
        };
        let outcome = self.dispatcher.route(&next).await?;
        Ok(AdvanceOutcome::Dispatched(outcome))
    }

    /// Stamp a terminal failure and alert; the envelope is never dispatched again
    #[instrument(skip(self, envelope), fields(reference_id = %envelope.reference_id))]
    pub async fn fail(
        &self,
        mut envelope: WorkflowEnvelope,
        step: &str,
        error: &str,
    ) -> WorkflowEnvelope {
        envelope.mark_failed(step, error);
        self.alerts
            .publish_alert(&envelope.blob_path, Some(&envelope.reference_id), step, error)
            .await;
        envelope
    }
}
