//! Capability fakes shared by the unit tests

use async_trait::async_trait;
use inbound_durable::capability::{
    CapabilityError, DescribePrompt, DetectedLanguage, DocumentAnalyzer, ExtractedArtifact,
    ImageAnalysis, ImageAnalyzer, ImageDescriber, ImageTag, LanguageDetector, OperationStatus,
    PdfImageExtractor, PiiRedactor, RedactionResult, Translator,
};
use inbound_durable::{Metadata, WorkflowEnvelope};
use parking_lot::Mutex;
use serde_json::json;

pub fn envelope(blob_path: &str, steps: &[&str]) -> WorkflowEnvelope {
    WorkflowEnvelope::start("R1", blob_path, steps.iter(), Metadata::new()).unwrap()
}

/// Detects a fixed language; translates by prefixing the target language
pub struct FakeLanguage {
    language: Option<String>,
    chunks: Mutex<Vec<String>>,
}

impl FakeLanguage {
    pub fn detecting(language: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_detection() -> Self {
        Self {
            language: None,
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn translated_chunks(&self) -> Vec<String> {
        self.chunks.lock().clone()
    }
}

#[async_trait]
impl LanguageDetector for FakeLanguage {
    async fn detect(&self, _text: &str) -> Result<DetectedLanguage, CapabilityError> {
        let iso_code = self
            .language
            .clone()
            .ok_or_else(|| CapabilityError::Request("detection unavailable".to_string()))?;
        Ok(DetectedLanguage {
            name: iso_code.clone(),
            iso_code,
            confidence: 1.0,
        })
    }
}

#[async_trait]
impl Translator for FakeLanguage {
    async fn translate(
        &self,
        text: &str,
        _from: Option<&str>,
        to: &str,
    ) -> Result<String, CapabilityError> {
        self.chunks.lock().push(text.to_string());
        Ok(format!("[{to}] {text}"))
    }
}

/// Masks every digit
pub struct FakeRedactor {
    chunks: Mutex<Vec<String>>,
}

impl FakeRedactor {
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().clone()
    }
}

#[async_trait]
impl PiiRedactor for FakeRedactor {
    async fn redact(
        &self,
        text: &str,
        _language: &str,
    ) -> Result<RedactionResult, CapabilityError> {
        self.chunks.lock().push(text.to_string());
        let redacted: String = text
            .chars()
            .map(|c| if c.is_ascii_digit() { '*' } else { c })
            .collect();
        let entities = if redacted == text {
            json!([])
        } else {
            json!([{"category": "PhoneNumber"}])
        };
        Ok(RedactionResult {
            redacted_text: redacted,
            entities,
        })
    }
}

/// Tags every image with `car`
pub struct FakeImageAnalyzer;

#[async_trait]
impl ImageAnalyzer for FakeImageAnalyzer {
    async fn analyze(&self, image: Vec<u8>) -> Result<ImageAnalysis, CapabilityError> {
        Ok(ImageAnalysis {
            tags: vec![ImageTag {
                name: "car".to_string(),
                confidence: 0.9,
            }],
            caption: Some("a car".to_string()),
            raw: json!({"bytes": image.len()}),
        })
    }
}

/// Describes every image the same way and remembers the content types
pub struct FakeDescriber {
    content_types: Mutex<Vec<String>>,
}

impl FakeDescriber {
    pub fn new() -> Self {
        Self {
            content_types: Mutex::new(Vec::new()),
        }
    }

    pub fn content_types(&self) -> Vec<String> {
        self.content_types.lock().clone()
    }
}

#[async_trait]
impl ImageDescriber for FakeDescriber {
    async fn describe(
        &self,
        _image: Vec<u8>,
        content_type: &str,
        _prompt: &DescribePrompt,
    ) -> Result<String, CapabilityError> {
        self.content_types.lock().push(content_type.to_string());
        Ok("A dented bumper.".to_string())
    }
}

/// Accepts every analysis and remembers the models
pub struct FakeDocumentAnalyzer {
    models: Mutex<Vec<String>>,
}

impl FakeDocumentAnalyzer {
    pub fn new() -> Self {
        Self {
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().clone()
    }
}

#[async_trait]
impl DocumentAnalyzer for FakeDocumentAnalyzer {
    async fn begin_analysis(
        &self,
        model: &str,
        _content: Vec<u8>,
    ) -> Result<String, CapabilityError> {
        self.models.lock().push(model.to_string());
        Ok("https://docs.example.com/analyzeResults/op-1".to_string())
    }

    async fn operation_status(
        &self,
        _operation_id: &str,
    ) -> Result<OperationStatus, CapabilityError> {
        Ok(OperationStatus::Running)
    }
}

/// Returns a fixed list of images
pub struct FakeExtractor(pub Vec<ExtractedArtifact>);

impl FakeExtractor {
    /// `count` PNG images spread over consecutive pages
    pub fn with_images(count: u32) -> Self {
        Self(
            (0..count)
                .map(|i| ExtractedArtifact {
                    data: vec![0x89, b'P', b'N', b'G', i as u8],
                    page: i + 1,
                    index: 0,
                    content_type: "image/png".to_string(),
                    extension: "png".to_string(),
                })
                .collect(),
        )
    }
}

impl PdfImageExtractor for FakeExtractor {
    fn extract(&self, _pdf: &[u8]) -> Result<Vec<ExtractedArtifact>, CapabilityError> {
        Ok(self.0.clone())
    }
}
