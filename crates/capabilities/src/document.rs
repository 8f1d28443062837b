// Document analysis client
//
// Analysis is long-running. `begin_analysis` uploads the bytes and
// returns the Operation-Location URL as the operation id; the engine
// polls it through `operation_status` from a queue message.

use async_trait::async_trait;
use inbound_durable::capability::{
    AnalysisResult, CapabilityError, DocumentAnalyzer, OperationStatus,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

use crate::client::{http_client, send, send_json, ServiceConfig, SUBSCRIPTION_KEY_HEADER};

pub const DOCUMENT_API_VERSION: &str = "2023-07-31";

const OPERATION_LOCATION: &str = "Operation-Location";

/// Client for the document analysis service
pub struct DocumentAnalysisClient {
    client: Client,
    config: ServiceConfig,
}

impl DocumentAnalysisClient {
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

    /// Parse an operation id and make sure it points back at this service
    fn operation_url(&self, operation_id: &str) -> Result<Url, CapabilityError> {
        let url = Url::parse(operation_id).map_err(|e| {
            CapabilityError::InvalidResponse(format!("invalid operation id {operation_id:?}: {e}"))
        })?;
        if !self.config.owns(&url) {
            return Err(CapabilityError::InvalidResponse(format!(
                "operation {operation_id} does not belong to {}",
                self.config.endpoint
            )));
        }
        Ok(url)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationBody {
    status: String,
    #[serde(default)]
    analyze_result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[async_trait]
impl DocumentAnalyzer for DocumentAnalysisClient {
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    async fn begin_analysis(
        &self,
        model: &str,
        content: Vec<u8>,
    ) -> Result<String, CapabilityError> {
        let mut url = self
            .config
            .url(&format!("formrecognizer/documentModels/{model}:analyze"))?;
        url.query_pairs_mut()
            .append_pair("api-version", DOCUMENT_API_VERSION);

        let response = send(
            self.config
                .authorize(self.client.post(url), SUBSCRIPTION_KEY_HEADER)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(content),
        )
        .await?;

        let operation = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                CapabilityError::InvalidResponse(
                    "analysis accepted without an Operation-Location".to_string(),
                )
            })?
            .to_string();

        info!(model, operation_id = %operation, "document analysis started");
        Ok(operation)
    }

    #[instrument(skip(self))]
    async fn operation_status(
        &self,
        operation_id: &str,
    ) -> Result<OperationStatus, CapabilityError> {
        let url = self.operation_url(operation_id)?;
        let body: OperationBody = send_json(
            self.config
                .authorize(self.client.get(url), SUBSCRIPTION_KEY_HEADER),
        )
        .await?;

        match body.status.to_ascii_lowercase().as_str() {
            "notstarted" | "running" => Ok(OperationStatus::Running),
            "succeeded" => Ok(OperationStatus::Completed(body.analyze_result.map(|raw| {
                AnalysisResult {
                    content: raw["content"].as_str().unwrap_or_default().to_string(),
                    raw,
                }
            }))),
            "failed" | "canceled" => {
                warn!(
                    status = %body.status,
                    error = ?body.error,
                    "document analysis did not succeed"
                );
                Ok(OperationStatus::Completed(None))
            }
            other => Err(CapabilityError::InvalidResponse(format!(
                "unknown operation status {other:?}"
            ))),
        }
    }
}
