//! Translation step
//!
//! Detects the language of the text and translates it into the target
//! language in chunks. Text already in the target language is passed
//! through unchanged and written under a separate folder.

use std::sync::Arc;

use async_trait::async_trait;
use inbound_durable::capability::{chunk_text, leading_sample, LanguageDetector, Translator};
use inbound_durable::config::{step_names, TranslationConfig};
use inbound_durable::engine::{Step, StepContext, StepError, StepOutcome};
use inbound_durable::storage::{BlobPath, ObjectStore, OutcomeWriter, StepArtifact};
use inbound_durable::WorkflowEnvelope;
use serde_json::Value;
use tracing::{debug, info};

use super::read_text;

pub const TRANSLATION_PROCESSOR: &str = "translation";
pub const TRANSLATION_FOLDER: &str = "translation";
pub const PASSTHROUGH_PROCESSOR: &str = "text passthrough";
pub const PASSTHROUGH_FOLDER: &str = "textpassthrough";

pub struct TranslationStep {
    store: Arc<dyn ObjectStore>,
    outcomes: Arc<OutcomeWriter>,
    detector: Arc<dyn LanguageDetector>,
    translator: Arc<dyn Translator>,
    config: TranslationConfig,
}

impl TranslationStep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        outcomes: Arc<OutcomeWriter>,
        detector: Arc<dyn LanguageDetector>,
        translator: Arc<dyn Translator>,
        config: TranslationConfig,
    ) -> Self {
        Self {
            store,
            outcomes,
            detector,
            translator,
            config,
        }
    }

    /// Drop the first line of multi-line text, subject to the optional marker
    fn strip_leading_line<'a>(&self, text: &'a str) -> &'a str {
        if !self.config.strip_first_line {
            return text;
        }
        let Some((first, rest)) = text.split_once('\n') else {
            return text;
        };
        match self.config.leading_line_marker.as_deref() {
            Some(marker) if !first.starts_with(marker) => text,
            _ => rest,
        }
    }

    async fn source_language(&self, ctx: &StepContext, text: &str) -> Result<String, StepError> {
        if let Some(language) = &self.config.source_language {
            return Ok(language.clone());
        }
        let sample = leading_sample(text, self.config.detection_sample_chars);
        let detected = ctx.run(self.detector.detect(sample)).await?;
        debug!(
            language = %detected.iso_code,
            confidence = detected.confidence,
            "detected language"
        );
        Ok(detected.iso_code)
    }
}

#[async_trait]
impl Step for TranslationStep {
    fn name(&self) -> &'static str {
        step_names::TRANSLATION
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        // A previous step's artifact takes precedence over the original object
        let input = envelope
            .last_output()
            .unwrap_or(envelope.blob_path.as_str());
        let input = BlobPath::parse(input)?;
        let raw = read_text(self.store.as_ref(), &input).await?;
        let content = StepArtifact::main_content_of(raw.as_bytes()).unwrap_or(raw);
        let text = self.strip_leading_line(&content);

        let target = self.config.target_language.as_str();
        let source = if text.trim().is_empty() {
            target.to_string()
        } else {
            self.source_language(ctx, text).await?
        };

        let (translated, processor, folder) = if source.eq_ignore_ascii_case(target) {
            (text.to_string(), PASSTHROUGH_PROCESSOR, PASSTHROUGH_FOLDER)
        } else {
            let mut translated = String::with_capacity(text.len());
            for chunk in chunk_text(text, self.config.chunk_chars) {
                translated.push_str(
                    &ctx.run(self.translator.translate(chunk, Some(source.as_str()), target))
                        .await?,
                );
            }
            (translated, TRANSLATION_PROCESSOR, TRANSLATION_FOLDER)
        };

        let original = input.file_name();
        let artifact = StepArtifact::new(&envelope.reference_id, processor, folder, original)
            .with_main_content(translated.clone())
            .with_message(Value::String(translated));
        let location = self
            .outcomes
            .write_artifact(&format!("{original}_translated.json"), &artifact)
            .await?;

        info!(from = %source, to = target, output = %location, "translation written");
        envelope.record_output(self.name(), location.to_string());
        Ok(StepOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelope, FakeLanguage};
    use inbound_durable::storage::{InMemoryObjectStore, NewObject};
    use tokio_util::sync::CancellationToken;

    fn step(
        store: Arc<InMemoryObjectStore>,
        language: Arc<FakeLanguage>,
        config: TranslationConfig,
    ) -> TranslationStep {
        let outcomes = Arc::new(OutcomeWriter::new(store.clone(), "output"));
        TranslationStep::new(store, outcomes, language.clone(), language, config)
    }

    async fn artifact(store: &InMemoryObjectStore, path: &str) -> StepArtifact {
        let bytes = store.read(&BlobPath::parse(path).unwrap()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_same_language_is_passed_through() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert(
            &BlobPath::parse("input/note.txt").unwrap(),
            NewObject::new("hello there", "text/plain"),
        );
        let language = Arc::new(FakeLanguage::detecting("en"));
        let step = step(store.clone(), language.clone(), TranslationConfig::default());

        let mut env = envelope("input/note.txt", &["translation", "pii"]);
        let outcome = step
            .execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Completed);
        assert_eq!(
            env.output_of("translation"),
            Some("output/textpassthrough/note.txt_translated.json")
        );
        let written = artifact(&store, "output/textpassthrough/note.txt_translated.json").await;
        assert_eq!(written.processor, PASSTHROUGH_PROCESSOR);
        assert_eq!(written.main_content, "hello there");
        assert!(language.translated_chunks().is_empty());
    }

    #[tokio::test]
    async fn test_marker_line_and_artifact_input() {
        let store = Arc::new(InMemoryObjectStore::new());
        let previous = StepArtifact::new(
            "R1",
            "document intelligence",
            "documentintelligence",
            "scan.pdf",
        )
        .with_main_content("#meta: skip me\nbonjour");
        store.insert(
            &BlobPath::parse("output/documentintelligence/scan.json").unwrap(),
            NewObject::new(serde_json::to_vec(&previous).unwrap(), "application/json"),
        );
        let language = Arc::new(FakeLanguage::detecting("fr"));
        let config = TranslationConfig {
            leading_line_marker: Some("#meta:".to_string()),
            ..Default::default()
        };
        let step = step(store.clone(), language.clone(), config);

        let mut env = envelope("input/scan.pdf", &["translation"]);
        env.record_output("documentintelligence", "output/documentintelligence/scan.json");
        step.execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await
            .unwrap();

        assert_eq!(language.translated_chunks(), vec!["bonjour".to_string()]);
        let written = artifact(&store, "output/translation/scan.json_translated.json").await;
        assert_eq!(written.processor, TRANSLATION_PROCESSOR);
        assert_eq!(written.main_content, "[en] bonjour");
        assert_eq!(env.last_output(), Some("output/translation/scan.json_translated.json"));
    }

    #[tokio::test]
    async fn test_default_config_drops_header_line() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert(
            &BlobPath::parse("input/mail.txt").unwrap(),
            NewObject::new("From: intake-mailer\nbonjour", "text/plain"),
        );
        let language = Arc::new(FakeLanguage::detecting("fr"));
        let step = step(store, language.clone(), TranslationConfig::default());

        let mut env = envelope("input/mail.txt", &["translation"]);
        step.execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await
            .unwrap();
        assert_eq!(language.translated_chunks(), vec!["bonjour".to_string()]);
    }

    #[tokio::test]
    async fn test_marker_mismatch_keeps_first_line() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert(
            &BlobPath::parse("input/mail.txt").unwrap(),
            NewObject::new("salut\nbonjour", "text/plain"),
        );
        let language = Arc::new(FakeLanguage::detecting("fr"));
        let config = TranslationConfig {
            leading_line_marker: Some("#meta:".to_string()),
            ..Default::default()
        };
        let step = step(store, language.clone(), config);

        let mut env = envelope("input/mail.txt", &["translation"]);
        step.execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await
            .unwrap();
        assert_eq!(language.translated_chunks(), vec!["salut\nbonjour".to_string()]);
    }

    #[tokio::test]
    async fn test_configured_source_skips_detection() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert(
            &BlobPath::parse("input/brief.txt").unwrap(),
            NewObject::new("guten Tag", "text/plain"),
        );
        let language = Arc::new(FakeLanguage::failing_detection());
        let config = TranslationConfig {
            source_language: Some("de".to_string()),
            ..Default::default()
        };
        let step = step(store, language.clone(), config);

        let mut env = envelope("input/brief.txt", &["translation"]);
        step.execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await
            .unwrap();
        assert_eq!(language.translated_chunks(), vec!["guten Tag".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let store = Arc::new(InMemoryObjectStore::new());
        let step = step(
            store,
            Arc::new(FakeLanguage::detecting("fr")),
            TranslationConfig::default(),
        );

        let mut env = envelope("input/missing.txt", &["translation"]);
        let result = step
            .execute(&StepContext::new(CancellationToken::new()), &mut env)
            .await;
        assert!(matches!(result, Err(StepError::Storage(_))));
    }
}
