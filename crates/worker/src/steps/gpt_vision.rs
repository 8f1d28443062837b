//! Image description step backed by a multimodal chat model

use std::sync::Arc;

use async_trait::async_trait;
use inbound_durable::capability::{DescribePrompt, ImageDescriber};
use inbound_durable::config::step_names;
use inbound_durable::engine::{Step, StepContext, StepError, StepOutcome};
use inbound_durable::storage::{ObjectStore, OutcomeWriter, StepArtifact};
use inbound_durable::WorkflowEnvelope;
use serde_json::Value;
use tracing::info;

use super::{image_content_type, source_path};

pub const GPT_VISION_PROCESSOR: &str = "gpt4o vision";
pub const GPT_VISION_FOLDER: &str = "gptvision";

pub struct GptVisionStep {
    store: Arc<dyn ObjectStore>,
    outcomes: Arc<OutcomeWriter>,
    describer: Arc<dyn ImageDescriber>,
    prompt: DescribePrompt,
}

impl GptVisionStep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        outcomes: Arc<OutcomeWriter>,
        describer: Arc<dyn ImageDescriber>,
    ) -> Self {
        Self {
            store,
            outcomes,
            describer,
            prompt: DescribePrompt::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: DescribePrompt) -> Self {
        self.prompt = prompt;
        self
    }
}

#[async_trait]
impl Step for GptVisionStep {
    fn name(&self) -> &'static str {
        step_names::GPT_VISION
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        let source = source_path(envelope)?;
        let properties = self.store.properties(&source).await?;
        let content_type = image_content_type(&properties.content_type, &source);
        let image = self.store.read(&source).await?;

        let description = ctx
            .run(self.describer.describe(image, &content_type, &self.prompt))
            .await?;

        let original = source.file_name();
        let artifact = StepArtifact::new(
            &envelope.reference_id,
            GPT_VISION_PROCESSOR,
            GPT_VISION_FOLDER,
            original,
        )
        .with_main_content(description.clone())
        .with_message(Value::String(description));
        let location = self
            .outcomes
            .write_artifact(&format!("{original}_gpt4ovision_output.json"), &artifact)
            .await?;

        info!(content_type = %content_type, output = %location, "image description written");
        envelope.record_output(self.name(), location.to_string());
        Ok(StepOutcome::Completed)
    }
}
