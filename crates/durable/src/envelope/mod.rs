//! Workflow envelope: the complete state of one in-flight workflow
//!
//! This module contains:
//! - [`WorkflowEnvelope`] - the state threaded through queue messages
//! - [`Metadata`] - case-insensitive extension map
//! - [`StepSequence`] - immutable list of pending steps
//! - [`AsyncOperationHandle`] - envelope parked behind a long-running operation
//! - [`codec`] - queue message encoding
//!
//! There is no workflow table anywhere. Whatever is in the message is the
//! workflow; delivery is at-least-once, so every consumer of an envelope
//! must tolerate seeing the same one twice.

pub mod codec;
mod handle;
mod metadata;
mod steps;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use handle::AsyncOperationHandle;
pub use metadata::Metadata;
pub use steps::{normalize_steps, parse_step_list, StepSequence};

/// Well-known metadata keys
pub mod keys {
    /// External correlation id supplied on the uploaded object
    pub const REFERENCE_ID: &str = "reference_id";
    /// Comma-separated workflow definition supplied on the uploaded object
    pub const WORKFLOW_STEPS: &str = "workflow_steps";
    /// Analysis profile override for document analysis
    pub const DOCUMENT_MODEL: &str = "document-model";
    /// Location of the most recent step output
    pub const LAST_OUTPUT: &str = "last-output";
    /// Object that started the workflow
    pub const SOURCE_BLOB: &str = "source-blob";
    /// Page a fanned-out artifact was extracted from (1-based)
    pub const SOURCE_PAGE: &str = "source-page";
    /// Position of a fanned-out artifact within its page (0-based)
    pub const SOURCE_IMAGE_INDEX: &str = "source-image-index";

    /// Key under which a step records its output location
    pub fn step_output(step: &str) -> String {
        format!("{}-output", step.to_lowercase())
    }
}

/// Reference id used in alerts when the real one cannot be determined
pub const UNKNOWN_REFERENCE: &str = "unknown";

/// Errors from building or validating an envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Correlation id absent or blank
    #[error("missing correlation id")]
    MissingReferenceId,

    /// Step list absent or blank after normalization
    #[error("workflow steps missing")]
    MissingSteps,

    /// Envelope has no step to run
    #[error("envelope has no current step")]
    MissingCurrentStep,

    /// Pending steps repeat the current one
    #[error("step '{0}' is both current and pending")]
    RepeatedStep(String),

    /// Message could not be decoded
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Terminal failure stamped onto an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Step that failed
    pub step: String,

    /// Error description
    pub error: String,

    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// The state unit threaded through every queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEnvelope {
    /// External correlation id
    pub reference_id: String,

    /// `container/name` of the artifact the current step acts on
    pub blob_path: String,

    /// Step about to run
    pub current_step: String,

    /// Steps still pending after the current one
    #[serde(default)]
    pub remaining_steps: StepSequence,

    /// Output locations and ingestion tags
    #[serde(default)]
    pub metadata: Metadata,

    /// Set once the workflow has failed; the envelope is then terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl WorkflowEnvelope {
    /// Build the initial envelope of a workflow
    ///
    /// Step names are normalized here; the first becomes the current step.
    pub fn start<I, S>(
        reference_id: impl Into<String>,
        blob_path: impl Into<String>,
        steps: I,
        metadata: Metadata,
    ) -> Result<Self, EnvelopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let reference_id = reference_id.into().trim().to_string();
        if reference_id.is_empty() {
            return Err(EnvelopeError::MissingReferenceId);
        }

        let normalized = StepSequence::from_normalized(normalize_steps(steps));
        let (current_step, remaining_steps) = normalized
            .split_first()
            .ok_or(EnvelopeError::MissingSteps)?;

        Ok(Self {
            reference_id,
            blob_path: blob_path.into(),
            current_step,
            remaining_steps,
            metadata,
            failure: None,
        })
    }

    /// Check the structural invariants of a decoded envelope
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.reference_id.trim().is_empty() {
            return Err(EnvelopeError::MissingReferenceId);
        }
        if self.current_step.trim().is_empty() {
            return Err(EnvelopeError::MissingCurrentStep);
        }
        if self.remaining_steps.contains(&self.current_step) {
            return Err(EnvelopeError::RepeatedStep(self.current_step.clone()));
        }
        Ok(())
    }

    /// The envelope for the next step, or `None` when the workflow is done
    pub fn next(&self) -> Option<Self> {
        let (current_step, remaining_steps) = self.remaining_steps.split_first()?;
        Some(Self {
            current_step,
            remaining_steps,
            ..self.clone()
        })
    }

    /// A sibling envelope acting on a different artifact
    ///
    /// The sibling continues with the next step after the current one and
    /// carries a copy of the metadata plus `extra`. Its `last-output` points
    /// at its own artifact, never at an output recorded before the branch.
    /// Returns `None` when no steps are left to continue with.
    pub fn branch<I, K, V>(&self, blob_path: impl Into<String>, extra: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut sibling = self.next()?;
        sibling.blob_path = blob_path.into();
        sibling
            .metadata
            .insert(keys::LAST_OUTPUT, sibling.blob_path.clone());
        sibling.metadata.extend(extra);
        Some(sibling)
    }

    /// Record where a step wrote its output
    pub fn record_output(&mut self, step: &str, location: impl Into<String>) {
        let location = location.into();
        self.metadata
            .insert(keys::step_output(step), location.clone());
        self.metadata.insert(keys::LAST_OUTPUT, location);
    }

    /// Output location recorded by a step
    pub fn output_of(&self, step: &str) -> Option<&str> {
        self.metadata.get(&keys::step_output(step))
    }

    /// Most recent output location recorded by any step
    pub fn last_output(&self) -> Option<&str> {
        self.metadata.get_non_blank(keys::LAST_OUTPUT)
    }

    /// Stamp a terminal failure
    pub fn mark_failed(&mut self, step: impl Into<String>, error: impl Into<String>) {
        self.failure = Some(Failure {
            step: step.into(),
            error: error.into(),
            timestamp: Utc::now(),
        });
    }

    /// Whether the envelope has failed and must not move again
    pub fn is_terminal(&self) -> bool {
        self.failure.is_some()
    }
}
