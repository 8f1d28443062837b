//! Step executor: the uniform wrapper around every step implementation
//!
//! The executor owns everything a step should not have to think about:
//! decoding and validating the envelope, enforcing the output contract,
//! advancing or fanning out afterwards, and turning errors into workflow
//! failures. A step error is both reported through the controller and
//! returned to the caller, so the transport's redelivery and dead-letter
//! policy still applies on top.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::controller::{AdvanceOutcome, WorkflowController};
use super::dispatcher::{DispatchError, RouteOutcome};
use crate::capability::CapabilityError;
use crate::envelope::{codec, keys, EnvelopeError, WorkflowEnvelope};
use crate::storage::StorageError;
use crate::transport::QueueError;

/// Error raised by a step implementation
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Input the step cannot work with
    #[error("{0}")]
    InvalidInput(String),

    /// Step reported completion without recording its output location
    #[error("step '{0}' completed without recording an output location")]
    MissingOutput(String),

    /// Deployment is shutting down
    #[error("step cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// What a step did with its envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Output recorded; advance to the next step
    Completed,
    /// A long-running operation was started; the poller resumes the workflow
    Suspended,
    /// Independent sibling envelopes to dispatch; the parent counts as advanced
    FannedOut(Vec<WorkflowEnvelope>),
    /// Nothing to continue with; alert but do not fail
    Halted(String),
}

/// Context provided to steps during execution
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Transport message id, when running off a queue
    pub message_id: Option<Uuid>,

    /// Delivery attempt (1-based)
    pub attempt: u32,

    cancel: CancellationToken,
}

impl StepContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            message_id: None,
            attempt: 1,
            cancel,
        }
    }

    /// Record the transport delivery this execution runs for
    pub fn with_delivery(mut self, message_id: Uuid, attempt: u32) -> Self {
        self.message_id = Some(message_id);
        self.attempt = attempt;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run an external call, abandoning it if the deployment shuts down
    pub async fn run<F, T, E>(&self, call: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StepError>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
            result = call => result.map_err(Into::into),
        }
    }
}

/// A named processing stage
///
/// On success the step must record `{step}-output` in the envelope
/// metadata (see [`WorkflowEnvelope::record_output`]) and return
/// [`StepOutcome::Completed`]. Steps may be replayed, so writes must be
/// idempotent.
#[async_trait]
pub trait Step: Send + Sync + 'static {
    /// Canonical step name, matched against `current_step`
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError>;
}

/// Error returned to the transport so its redelivery policy applies
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// Step failed; the workflow has already been failed and alerted
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },

    /// Shut down mid-step; the message should be redelivered untouched
    #[error("step '{step}' cancelled")]
    Cancelled { step: String },
}

/// Why a message was dropped without running the step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(String),
    WrongStep { expected: String, actual: String },
    AlreadyFailed,
}

/// Result of [`StepExecutor::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Advanced(AdvanceOutcome),
    Suspended,
    FannedOut(Vec<RouteOutcome>),
    Halted,
    Dropped(DropReason),
}

/// Runs one step against queue messages
pub struct StepExecutor {
    step: Arc<dyn Step>,
    controller: Arc<WorkflowController>,
}

impl StepExecutor {
    pub fn new(step: Arc<dyn Step>, controller: Arc<WorkflowController>) -> Self {
        Self { step, controller }
    }

    pub fn step_name(&self) -> &'static str {
        self.step.name()
    }

    /// Execute the step for one queue message body
    #[instrument(skip(self, body, ctx), fields(step = self.step.name()))]
    pub async fn execute(
        &self,
        body: &str,
        ctx: &StepContext,
    ) -> Result<ExecuteOutcome, ExecuteError> {
        let step = self.step.name();
        let alerts = self.controller.alerts();

        let envelope = match codec::decode_envelope(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "dropping undecodable message");
                alerts.publish_alert("", None, step, &e.to_string()).await;
                return Ok(ExecuteOutcome::Dropped(DropReason::Malformed(e.to_string())));
            }
        };

        if envelope.is_terminal() {
            warn!(
                reference_id = %envelope.reference_id,
                "dropping envelope that has already failed"
            );
            return Ok(ExecuteOutcome::Dropped(DropReason::AlreadyFailed));
        }

        if envelope.current_step != step {
            let reason = format!(
                "message for step '{}' delivered to step '{}'",
                envelope.current_step, step
            );
            error!(reference_id = %envelope.reference_id, "{reason}");
            alerts
                .publish_alert(&envelope.blob_path, Some(&envelope.reference_id), step, &reason)
                .await;
            return Ok(ExecuteOutcome::Dropped(DropReason::WrongStep {
                expected: step.to_string(),
                actual: envelope.current_step,
            }));
        }

        info!(
            reference_id = %envelope.reference_id,
            blob_path = %envelope.blob_path,
            attempt = ctx.attempt,
            "executing step"
        );

        let mut working = envelope;
        match self.run_step(ctx, &mut working).await {
            Ok(outcome) => Ok(outcome),
            Err(StepError::Cancelled) => {
                warn!(
                    reference_id = %working.reference_id,
                    "step cancelled, leaving message for redelivery"
                );
                Err(ExecuteError::Cancelled {
                    step: step.to_string(),
                })
            }
            Err(source) => {
                error!(reference_id = %working.reference_id, error = %source, "step failed");
                self.controller
                    .fail(working, step, &source.to_string())
                    .await;
                Err(ExecuteError::StepFailed {
                    step: step.to_string(),
                    source,
                })
            }
        }
    }

    async fn run_step(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<ExecuteOutcome, StepError> {
        let step = self.step.name();

        match self.step.execute(ctx, envelope).await? {
            StepOutcome::Completed => {
                if !envelope.metadata.contains_key(&keys::step_output(step)) {
                    return Err(StepError::MissingOutput(step.to_string()));
                }
                let outcome = self.controller.advance(envelope).await?;
                Ok(ExecuteOutcome::Advanced(outcome))
            }
            StepOutcome::Suspended => {
                info!(
                    reference_id = %envelope.reference_id,
                    "step suspended on external operation"
                );
                Ok(ExecuteOutcome::Suspended)
            }
            StepOutcome::FannedOut(children) => {
                let dispatcher = self.controller.dispatcher();
                let mut routed = Vec::with_capacity(children.len());
                for child in &children {
                    routed.push(dispatcher.route(child).await?);
                }
                info!(reference_id = %envelope.reference_id, children = routed.len(), "fanned out");
                Ok(ExecuteOutcome::FannedOut(routed))
            }
            StepOutcome::Halted(reason) => {
                warn!(reference_id = %envelope.reference_id, %reason, "step halted");
                self.controller
                    .alerts()
                    .publish_alert(&envelope.blob_path, Some(&envelope.reference_id), step, &reason)
                    .await;
                Ok(ExecuteOutcome::Halted)
            }
        }
    }
}
