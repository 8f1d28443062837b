//! Concrete workflow steps
//!
//! Each step reads the object it is pointed at, calls one capability,
//! writes a [`StepArtifact`](inbound_durable::storage::StepArtifact)
//! and records where it went. Routing, failure handling and advancing are
//! the executor's business.

mod document_intelligence;
mod gpt_vision;
mod image_analysis;
mod pdf_images;
mod pii;
mod translation;

pub use document_intelligence::DocumentIntelligenceStep;
pub use gpt_vision::{GptVisionStep, GPT_VISION_FOLDER, GPT_VISION_PROCESSOR};
pub use image_analysis::{ImageAnalysisStep, AI_VISION_FOLDER, AI_VISION_PROCESSOR};
pub use pdf_images::{PdfImagesStep, PDF_IMAGES_FOLDER};
pub use pii::{PiiStep, PII_FOLDER, PII_PROCESSOR};
pub use translation::{
    TranslationStep, PASSTHROUGH_FOLDER, PASSTHROUGH_PROCESSOR, TRANSLATION_FOLDER,
    TRANSLATION_PROCESSOR,
};

use inbound_durable::engine::StepError;
use inbound_durable::storage::{BlobPath, ObjectStore};
use inbound_durable::WorkflowEnvelope;

/// Location of the object the envelope points at
pub(crate) fn source_path(envelope: &WorkflowEnvelope) -> Result<BlobPath, StepError> {
    Ok(BlobPath::parse(&envelope.blob_path)?)
}

/// Read an object as UTF-8 text
pub(crate) async fn read_text(
    store: &dyn ObjectStore,
    path: &BlobPath,
) -> Result<String, StepError> {
    let bytes = store.read(path).await?;
    String::from_utf8(bytes)
        .map_err(|_| StepError::invalid_input(format!("{path} is not valid UTF-8 text")))
}

/// Image content type, from the stored properties or the file extension
pub(crate) fn image_content_type(recorded: &str, path: &BlobPath) -> String {
    if recorded.starts_with("image/") {
        return recorded.to_string();
    }
    match path.extension().as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("tif" | "tiff") => "image/tiff",
        _ => "image/jpeg",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_content_type() {
        let png = BlobPath::parse("input/photo.PNG").unwrap();
        let unknown = BlobPath::parse("input/photo").unwrap();

        assert_eq!(image_content_type("", &png), "image/png");
        assert_eq!(image_content_type("image/webp", &png), "image/webp");
        assert_eq!(image_content_type("application/octet-stream", &unknown), "image/jpeg");
    }
}
