//! Personal data redaction step
//!
//! Runs on the artifact of the previous step, never on the original
//! object. The text is redacted in chunks and the concatenated result
//! becomes the new main content.

use std::sync::Arc;

use async_trait::async_trait;
use inbound_durable::capability::{chunk_text, PiiRedactor};
use inbound_durable::config::{step_names, PiiConfig};
use inbound_durable::engine::{Step, StepContext, StepError, StepOutcome};
use inbound_durable::storage::{BlobPath, ObjectStore, OutcomeWriter, StepArtifact};
use inbound_durable::WorkflowEnvelope;
use serde_json::{json, Value};
use tracing::info;

pub const PII_PROCESSOR: &str = "pii detection";
pub const PII_FOLDER: &str = "pii_detection";

pub struct PiiStep {
    store: Arc<dyn ObjectStore>,
    outcomes: Arc<OutcomeWriter>,
    redactor: Arc<dyn PiiRedactor>,
    config: PiiConfig,
}

impl PiiStep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        outcomes: Arc<OutcomeWriter>,
        redactor: Arc<dyn PiiRedactor>,
        config: PiiConfig,
    ) -> Self {
        Self {
            store,
            outcomes,
            redactor,
            config,
        }
    }
}

#[async_trait]
impl Step for PiiStep {
    fn name(&self) -> &'static str {
        step_names::PII
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        let previous = envelope
            .last_output()
            .ok_or_else(|| StepError::invalid_input("no previous step output to redact"))?;
        let input = BlobPath::parse(previous)?;

        let raw = self.store.read(&input).await?;
        let content = StepArtifact::main_content_of(&raw).ok_or_else(|| {
            StepError::invalid_input(format!("{input} has no main_content to redact"))
        })?;

        let mut redacted = String::with_capacity(content.len());
        let mut results = Vec::new();
        for chunk in chunk_text(&content, self.config.chunk_chars) {
            let result = ctx
                .run(self.redactor.redact(chunk, &self.config.language))
                .await?;
            redacted.push_str(&result.redacted_text);
            results.push(json!({
                "redactedText": result.redacted_text,
                "entities": result.entities,
            }));
        }

        let original = input.file_name();
        let artifact =
            StepArtifact::new(&envelope.reference_id, PII_PROCESSOR, PII_FOLDER, original)
                .with_main_content(redacted)
            .with_message(Value::Array(results));
        let location = self
            .outcomes
            .write_artifact(&format!("{original}_pii_detection_result.json"), &artifact)
            .await?;

        info!(input = %input, output = %location, "redacted text written");
        envelope.record_output(self.name(), location.to_string());
        Ok(StepOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelope, FakeRedactor};
    use inbound_durable::storage::{InMemoryObjectStore, NewObject};
    use tokio_util::sync::CancellationToken;

    fn step(
        store: Arc<InMemoryObjectStore>,
        redactor: Arc<FakeRedactor>,
        chunk_chars: usize,
    ) -> PiiStep {
        let config = PiiConfig {
            chunk_chars,
            ..Default::default()
        };
        PiiStep::new(
            store.clone(),
            Arc::new(OutcomeWriter::new(store, "output")),
            redactor,
            config,
        )
    }

    fn previous(store: &InMemoryObjectStore, path: &str, main_content: &str) {
        let artifact = StepArtifact::new("R1", "translation", "translation", "claim1.txt")
            .with_main_content(main_content);
        store.insert(
            &BlobPath::parse(path).unwrap(),
            NewObject::new(serde_json::to_vec(&artifact).unwrap(), "application/json"),
        );
    }

    #[tokio::test]
    async fn test_redacts_previous_output_in_chunks() {
        let store = Arc::new(InMemoryObjectStore::new());
        previous(
            &store,
            "output/translation/claim1.txt_translated.json",
            "call me at 555 1234 today",
        );
        let redactor = Arc::new(FakeRedactor::new());
        let step = step(store.clone(), redactor.clone(), 12);

        let mut env = envelope("input/claim1.txt", &["translation", "pii"])
            .next()
            .unwrap();
        env.record_output("translation", "output/translation/claim1.txt_translated.json");

        let outcome = step
            .execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Completed);
        assert!(redactor.chunks().len() > 1);

        let location = "output/pii_detection/claim1.txt_translated.json_pii_detection_result.json";
        assert_eq!(env.output_of("pii"), Some(location));
        assert_eq!(
            env.output_of("translation"),
            Some("output/translation/claim1.txt_translated.json")
        );

        let bytes = store
            .read(&BlobPath::parse(location).unwrap())
            .await
            .unwrap();
        let artifact: StepArtifact = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(artifact.processor, PII_PROCESSOR);
        assert_eq!(artifact.main_content, "call me at *** **** today");
        let chunks = artifact.message.as_array().unwrap();
        assert_eq!(chunks.len(), redactor.chunks().len());
        assert!(chunks[0].get("redactedText").is_some());
    }

    #[tokio::test]
    async fn test_requires_previous_output() {
        let store = Arc::new(InMemoryObjectStore::new());
        let redactor = Arc::new(FakeRedactor::new());
        let step = step(store, redactor.clone(), 5120);

        let mut env = envelope("input/claim1.txt", &["pii"]);
        let result = step
            .execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await;
        assert!(matches!(result, Err(StepError::InvalidInput(_))));
        assert!(redactor.chunks().is_empty());
    }

    #[tokio::test]
    async fn test_requires_main_content() {
        let store = Arc::new(InMemoryObjectStore::new());
        previous(&store, "output/aivision/photo.json", "   ");
        let step = step(store, Arc::new(FakeRedactor::new()), 5120);

        let mut env = envelope("input/photo.jpg", &["pii"]);
        env.record_output("aivision", "output/aivision/photo.json");
        let result = step
            .execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await;
        assert!(matches!(result, Err(StepError::InvalidInput(_))));
    }
}
