//! PDF image fan-out step
//!
//! Extracts every embedded raster image of a PDF, stores each one under
//! the output container, and continues the workflow once per image. The
//! siblings are independent; nothing joins them back together.

use std::sync::Arc;

use async_trait::async_trait;
use inbound_durable::capability::PdfImageExtractor;
use inbound_durable::config::step_names;
use inbound_durable::engine::{Step, StepContext, StepError, StepOutcome};
use inbound_durable::envelope::keys;
use inbound_durable::storage::{NewObject, ObjectStore, OutcomeWriter};
use inbound_durable::{Metadata, WorkflowEnvelope};
use tracing::{info, warn};

use super::source_path;

pub const PDF_IMAGES_FOLDER: &str = "pdfimages";

pub struct PdfImagesStep {
    store: Arc<dyn ObjectStore>,
    outcomes: Arc<OutcomeWriter>,
    extractor: Arc<dyn PdfImageExtractor>,
}

impl PdfImagesStep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        outcomes: Arc<OutcomeWriter>,
        extractor: Arc<dyn PdfImageExtractor>,
    ) -> Self {
        Self {
            store,
            outcomes,
            extractor,
        }
    }
}

#[async_trait]
impl Step for PdfImagesStep {
    fn name(&self) -> &'static str {
        step_names::PDF_IMAGES
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        let source = source_path(envelope)?;
        if source.extension().as_deref() != Some("pdf") {
            return Err(StepError::invalid_input(format!("{source} is not a PDF")));
        }

        let pdf = self.store.read(&source).await?;
        let extractor = self.extractor.clone();
        let images = ctx
            .run(async move {
                tokio::task::spawn_blocking(move || extractor.extract(&pdf))
                    .await
                    .map_err(|e| StepError::Other(format!("image extraction panicked: {e}")))?
                    .map_err(StepError::from)
            })
            .await?;

        if images.is_empty() {
            warn!(source = %source, "no embedded images found");
            return Ok(StepOutcome::Halted(format!("no images found in {source}")));
        }

        let stem = source.file_stem().to_string();
        let uploaded = images.len();
        let mut children = Vec::with_capacity(images.len());
        for image in images {
            let page = image.page.to_string();
            let index = image.index.to_string();

            let mut tags = Metadata::new();
            tags.insert(keys::SOURCE_BLOB, source.to_string());
            tags.insert(keys::SOURCE_PAGE, page.clone());
            tags.insert(keys::SOURCE_IMAGE_INDEX, index.clone());

            let name = format!(
                "{PDF_IMAGES_FOLDER}/{stem}_p{}_i{}.{}",
                image.page, image.index, image.extension
            );
            let location = self
                .outcomes
                .write_object(
                    &name,
                    NewObject::new(image.data, image.content_type).with_tags(tags),
                )
                .await?
                .to_string();

            match envelope.branch(
                location.clone(),
                [
                    (keys::SOURCE_BLOB, source.to_string()),
                    (keys::SOURCE_PAGE, page),
                    (keys::SOURCE_IMAGE_INDEX, index),
                ],
            ) {
                Some(child) => children.push(child),
                None => envelope.record_output(self.name(), location),
            }
        }

        info!(
            source = %source,
            images = uploaded,
            siblings = children.len(),
            "images extracted"
        );
        if children.is_empty() {
            // Last step of the workflow: the images themselves are the output
            Ok(StepOutcome::Completed)
        } else {
            Ok(StepOutcome::FannedOut(children))
        }
    }
}
