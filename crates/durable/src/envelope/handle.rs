//! Envelope parked behind a long-running external operation

use serde::{Deserialize, Serialize};

use super::{EnvelopeError, WorkflowEnvelope};

/// Poll message for an external operation that has not finished yet
///
/// The handle is the only record that the operation belongs to a
/// workflow. It rides the polling queue until the operation completes,
/// at which point the embedded envelope resumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHandle")]
pub struct AsyncOperationHandle {
    /// Opaque id issued by the external service
    pub operation_id: String,

    /// Object the operation analyzes
    pub target_blob: String,

    /// Step that started the operation
    pub step: String,

    /// Analysis profile the operation runs with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Workflow to resume once the operation completes
    pub envelope: WorkflowEnvelope,
}

impl AsyncOperationHandle {
    pub fn new(
        operation_id: impl Into<String>,
        target_blob: impl Into<String>,
        model: Option<String>,
        envelope: WorkflowEnvelope,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            target_blob: target_blob.into(),
            step: envelope.current_step.clone(),
            model,
            envelope,
        }
    }
}

/// Wire shape with every field optional so missing ones can be named
#[derive(Deserialize)]
struct RawHandle {
    operation_id: Option<String>,
    target_blob: Option<String>,
    step: Option<String>,
    model: Option<String>,
    envelope: Option<WorkflowEnvelope>,
}

fn required(value: Option<String>, field: &str) -> Result<String, EnvelopeError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EnvelopeError::Malformed(format!("poll message is missing {field}")))
}

impl TryFrom<RawHandle> for AsyncOperationHandle {
    type Error = EnvelopeError;

    fn try_from(raw: RawHandle) -> Result<Self, Self::Error> {
        let operation_id = required(raw.operation_id, "operation_id")?;
        let target_blob = required(raw.target_blob, "target_blob")?;
        let envelope = raw.envelope.ok_or_else(|| {
            EnvelopeError::Malformed("poll message is missing envelope".to_string())
        })?;
        envelope.validate()?;

        let step = raw
            .step
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| envelope.current_step.clone());

        Ok(Self {
            operation_id,
            target_blob,
            step,
            model: raw.model,
            envelope,
        })
    }
}
