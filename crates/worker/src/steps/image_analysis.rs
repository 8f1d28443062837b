//! Image analysis step: tags, caption and printed text of an image

use std::sync::Arc;

use async_trait::async_trait;
use inbound_durable::capability::ImageAnalyzer;
use inbound_durable::config::step_names;
use inbound_durable::engine::{Step, StepContext, StepError, StepOutcome};
use inbound_durable::storage::{ObjectStore, OutcomeWriter, StepArtifact};
use inbound_durable::WorkflowEnvelope;
use tracing::info;

use super::source_path;

pub const AI_VISION_PROCESSOR: &str = "aivision";
pub const AI_VISION_FOLDER: &str = "aivision";

pub struct ImageAnalysisStep {
    store: Arc<dyn ObjectStore>,
    outcomes: Arc<OutcomeWriter>,
    analyzer: Arc<dyn ImageAnalyzer>,
}

impl ImageAnalysisStep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        outcomes: Arc<OutcomeWriter>,
        analyzer: Arc<dyn ImageAnalyzer>,
    ) -> Self {
        Self {
            store,
            outcomes,
            analyzer,
        }
    }
}

#[async_trait]
impl Step for ImageAnalysisStep {
    fn name(&self) -> &'static str {
        step_names::AI_VISION
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        let source = source_path(envelope)?;
        let image = self.store.read(&source).await?;
        let analysis = ctx.run(self.analyzer.analyze(image)).await?;

        let original = source.file_name();
        let artifact = StepArtifact::new(
            &envelope.reference_id,
            AI_VISION_PROCESSOR,
            AI_VISION_FOLDER,
            original,
        )
        .with_main_content(analysis.tag_summary())
        .with_message(analysis.raw);
        let location = self
            .outcomes
            .write_artifact(&format!("{original}_aivision_output.json"), &artifact)
            .await?;

        info!(tags = analysis.tags.len(), output = %location, "image analysis written");
        envelope.record_output(self.name(), location.to_string());
        Ok(StepOutcome::Completed)
    }
}
