//! External analysis capabilities
//!
//! Steps talk to the outside world only through these traits. The HTTP
//! implementations live in `inbound-capabilities`; tests use fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for capability calls
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// Request could not be sent or the connection failed
    #[error("capability request failed: {0}")]
    Request(String),

    /// Service answered with a non-success status
    #[error("capability returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Service answered with something we could not understand
    #[error("unexpected capability response: {0}")]
    InvalidResponse(String),

    /// Input the capability cannot process
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}

/// Result of language detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    /// ISO 639-1 code, lowercase
    pub iso_code: String,
    pub name: String,
    pub confidence: f64,
}

#[async_trait]
pub trait LanguageDetector: Send + Sync + 'static {
    async fn detect(&self, text: &str) -> Result<DetectedLanguage, CapabilityError>;
}

#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Translate `text` into `to`; the service detects the source when `from` is `None`
    async fn translate(
        &self,
        text: &str,
        from: Option<&str>,
        to: &str,
    ) -> Result<String, CapabilityError>;
}

/// Result of a finished document analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Extracted text content
    pub content: String,
    /// Full service result
    pub raw: serde_json::Value,
}

/// Status of a long-running analysis
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Running,
    /// Finished; `None` when the service produced no result
    Completed(Option<AnalysisResult>),
}

/// Long-running document analysis
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync + 'static {
    /// Start analyzing `content` with the given profile; returns the operation id
    async fn begin_analysis(&self, model: &str, content: Vec<u8>)
        -> Result<String, CapabilityError>;

    /// Query an operation started by [`DocumentAnalyzer::begin_analysis`]
    async fn operation_status(&self, operation_id: &str)
        -> Result<OperationStatus, CapabilityError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub name: String,
    pub confidence: f64,
}

/// Tag, caption and text-read analysis of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub tags: Vec<ImageTag>,
    pub caption: Option<String>,
    pub raw: serde_json::Value,
}

impl ImageAnalysis {
    /// Tags rendered as `name:confidence`, comma separated
    pub fn tag_summary(&self) -> String {
        self.tags
            .iter()
            .map(|t| format!("{}:{}", t.name, t.confidence))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[async_trait]
pub trait ImageAnalyzer: Send + Sync + 'static {
    async fn analyze(&self, image: Vec<u8>) -> Result<ImageAnalysis, CapabilityError>;
}

/// Prompt for a multimodal description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribePrompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl Default for DescribePrompt {
    fn default() -> Self {
        Self {
            system: "You are a helpful assistant that helps describe images.".to_string(),
            user: "describe this image, focus on details which are relevant for insurances and claims"
                .to_string(),
            max_tokens: 2048,
        }
    }
}

/// Large multimodal model describing an image in prose
#[async_trait]
pub trait ImageDescriber: Send + Sync + 'static {
    async fn describe(
        &self,
        image: Vec<u8>,
        content_type: &str,
        prompt: &DescribePrompt,
    ) -> Result<String, CapabilityError>;
}

/// Redacted text plus detected entities for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub redacted_text: String,
    pub entities: serde_json::Value,
}

#[async_trait]
pub trait PiiRedactor: Send + Sync + 'static {
    async fn redact(&self, text: &str, language: &str) -> Result<RedactionResult, CapabilityError>;
}

/// One raster image pulled out of a PDF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArtifact {
    pub data: Vec<u8>,
    /// Page the image sits on, 1-based
    pub page: u32,
    /// Position within the page, 0-based
    pub index: u32,
    pub content_type: String,
    /// File extension without the dot
    pub extension: String,
}

/// Enumerates embedded raster images of a PDF
///
/// Synchronous and CPU bound; callers run it on a blocking thread.
pub trait PdfImageExtractor: Send + Sync + 'static {
    fn extract(&self, pdf: &[u8]) -> Result<Vec<ExtractedArtifact>, CapabilityError>;
}

/// Split text into chunks of at most `max_chars` characters
///
/// A chunk boundary is moved back to the last whitespace inside the
/// window when there is one, so words are not cut in half. Concatenating
/// the chunks gives back the input.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(i, _)| i);
        if window_end == rest.len() {
            chunks.push(rest);
            break;
        }

        let window = &rest[..window_end];
        let split = window
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .filter(|&i| i < window_end && i > 0)
            .unwrap_or(window_end);

        chunks.push(&rest[..split]);
        rest = &rest[split..];
    }
    chunks
}

/// Leading sample of at most `max_chars` characters
pub fn leading_sample(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(i, _)| &text[..i])
}
