//! Document analysis step
//!
//! Starts a long-running analysis and parks the workflow on the operation
//! queue. The operation poller records the output and advances once the
//! analysis finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inbound_durable::capability::DocumentAnalyzer;
use inbound_durable::config::step_names;
use inbound_durable::engine::{QueueSender, Step, StepContext, StepError, StepOutcome};
use inbound_durable::envelope::{codec, keys, AsyncOperationHandle};
use inbound_durable::storage::ObjectStore;
use inbound_durable::WorkflowEnvelope;
use tracing::info;

use super::source_path;

pub struct DocumentIntelligenceStep {
    store: Arc<dyn ObjectStore>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    sender: Arc<QueueSender>,
    operation_queue: String,
    initial_poll_delay: Duration,
    default_model: String,
}

impl DocumentIntelligenceStep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn DocumentAnalyzer>,
        sender: Arc<QueueSender>,
        operation_queue: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            analyzer,
            sender,
            operation_queue: operation_queue.into(),
            initial_poll_delay: Duration::from_secs(10),
            default_model: default_model.into(),
        }
    }

    /// Set the delay before the first status poll
    pub fn with_initial_poll_delay(mut self, delay: Duration) -> Self {
        self.initial_poll_delay = delay;
        self
    }
}

#[async_trait]
impl Step for DocumentIntelligenceStep {
    fn name(&self) -> &'static str {
        step_names::DOCUMENT_INTELLIGENCE
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        let source = source_path(envelope)?;
        let properties = self.store.properties(&source).await?;
        let model = properties
            .tags
            .get_non_blank(keys::DOCUMENT_MODEL)
            .or_else(|| envelope.metadata.get_non_blank(keys::DOCUMENT_MODEL))
            .unwrap_or(self.default_model.as_str())
            .to_string();

        let content = self.store.read(&source).await?;
        let operation_id = ctx
            .run(self.analyzer.begin_analysis(&model, content))
            .await?;

        let handle = AsyncOperationHandle::new(
            operation_id,
            source.to_string(),
            Some(model.clone()),
            envelope.clone(),
        );
        self.sender
            .send(
                &self.operation_queue,
                &codec::encode(&handle)?,
                self.initial_poll_delay,
            )
            .await?;

        info!(
            model = %model,
            operation_id = %handle.operation_id,
            queue = %self.operation_queue,
            "document analysis started, workflow parked"
        );
        Ok(StepOutcome::Suspended)
    }
}
