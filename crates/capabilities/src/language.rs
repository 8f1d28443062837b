// Language service client
//
// Language detection and PII redaction both go through the synchronous
// `:analyze-text` operation, one document per request.

use async_trait::async_trait;
use inbound_durable::capability::{
    CapabilityError, DetectedLanguage, LanguageDetector, PiiRedactor, RedactionResult,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::client::{http_client, send_json, ServiceConfig, SUBSCRIPTION_KEY_HEADER};

pub const LANGUAGE_API_VERSION: &str = "2023-04-01";

const ANALYZE_TEXT_PATH: &str = "language/:analyze-text";

/// Client for the language service
pub struct LanguageClient {
    client: Client,
    config: ServiceConfig,
}

impl LanguageClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn analyze(&self, kind: &str, document: Value) -> Result<Value, CapabilityError> {
        let mut url = self.config.url(ANALYZE_TEXT_PATH)?;
        url.query_pairs_mut()
            .append_pair("api-version", LANGUAGE_API_VERSION);

        let request = AnalyzeTextRequest {
            kind,
            analysis_input: AnalysisInput {
                documents: vec![document],
            },
        };
        let response: AnalyzeTextResponse = send_json(
            self.config
                .authorize(self.client.post(url), SUBSCRIPTION_KEY_HEADER)
                .json(&request),
        )
        .await?;

        if let Some(error) = response.results.errors.first() {
            return Err(CapabilityError::InvalidResponse(format!(
                "{kind} rejected the document: {}",
                error["error"]["message"].as_str().unwrap_or("unknown error")
            )));
        }

        response
            .results
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| {
                CapabilityError::InvalidResponse(format!("{kind} returned no documents"))
            })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeTextRequest<'a> {
    kind: &'a str,
    analysis_input: AnalysisInput,
}

#[derive(Serialize)]
struct AnalysisInput {
    documents: Vec<Value>,
}

#[derive(Deserialize)]
struct AnalyzeTextResponse {
    results: AnalyzeTextResults,
}

#[derive(Deserialize)]
struct AnalyzeTextResults {
    #[serde(default)]
    documents: Vec<Value>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguageDocument {
    detected_language: WireLanguage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLanguage {
    name: String,
    iso6391_name: String,
    confidence_score: f64,
}

#[async_trait]
impl LanguageDetector for LanguageClient {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn detect(&self, text: &str) -> Result<DetectedLanguage, CapabilityError> {
        let document = self
            .analyze("LanguageDetection", json!({"id": "1", "text": text}))
            .await?;
        let parsed: LanguageDocument = serde_json::from_value(document)
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        let language = DetectedLanguage {
            iso_code: parsed.detected_language.iso6391_name.to_lowercase(),
            name: parsed.detected_language.name,
            confidence: parsed.detected_language.confidence_score,
        };
        debug!(
            language = %language.iso_code,
            confidence = language.confidence,
            "detected language"
        );
        Ok(language)
    }
}

#[async_trait]
impl PiiRedactor for LanguageClient {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn redact(&self, text: &str, language: &str) -> Result<RedactionResult, CapabilityError> {
        let document = self
            .analyze(
                "PiiEntityRecognition",
                json!({"id": "1", "language": language, "text": text}),
            )
            .await?;

        let redacted_text = document["redactedText"]
            .as_str()
            .ok_or_else(|| CapabilityError::InvalidResponse("missing redactedText".to_string()))?
            .to_string();
        let entities = document.get("entities").cloned().unwrap_or(json!([]));

        Ok(RedactionResult {
            redacted_text,
            entities,
        })
    }
}
