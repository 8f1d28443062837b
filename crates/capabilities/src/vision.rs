// Image analysis client

use async_trait::async_trait;
use inbound_durable::capability::{CapabilityError, ImageAnalysis, ImageAnalyzer, ImageTag};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::{http_client, send_json, ServiceConfig, SUBSCRIPTION_KEY_HEADER};

pub const VISION_API_VERSION: &str = "2023-10-01";

/// Visual features requested for every image
pub const VISION_FEATURES: &str = "tags,read,objects,caption";

/// Client for the image analysis service
pub struct ImageAnalysisClient {
    client: Client,
    config: ServiceConfig,
}

impl ImageAnalysisClient {
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
}

/// Pull tags and caption out of an analysis result
fn parse_analysis(raw: Value) -> ImageAnalysis {
    let tags = raw["tagsResult"]["values"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|tag| {
                    Some(ImageTag {
                        name: tag["name"].as_str()?.to_string(),
                        confidence: tag["confidence"].as_f64().unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let caption = raw["captionResult"]["text"].as_str().map(str::to_string);

    ImageAnalysis { tags, caption, raw }
}

#[async_trait]
impl ImageAnalyzer for ImageAnalysisClient {
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    async fn analyze(&self, image: Vec<u8>) -> Result<ImageAnalysis, CapabilityError> {
        let mut url = self.config.url("computervision/imageanalysis:analyze")?;
        url.query_pairs_mut()
            .append_pair("api-version", VISION_API_VERSION)
            .append_pair("features", VISION_FEATURES);

        let raw: Value = send_json(
            self.config
                .authorize(self.client.post(url), SUBSCRIPTION_KEY_HEADER)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(image),
        )
        .await?;

        let analysis = parse_analysis(raw);
        debug!(tags = analysis.tags.len(), "image analyzed");
        Ok(analysis)
    }
}
