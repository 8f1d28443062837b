// Text translation client

use async_trait::async_trait;
use inbound_durable::capability::{CapabilityError, Translator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::{http_client, send_json, ServiceConfig, SUBSCRIPTION_KEY_HEADER};

pub const TRANSLATOR_API_VERSION: &str = "3.0";

const REGION_HEADER: &str = "Ocp-Apim-Subscription-Region";

/// Client for the translator service
pub struct TranslatorClient {
    client: Client,
    config: ServiceConfig,
    region: Option<String>,
}

impl TranslatorClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: http_client(),
            config,
            region: None,
        }
    }

    /// Region of a multi-service key
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        let region = region.into();
        self.region = (!region.trim().is_empty()).then_some(region);
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[derive(Serialize)]
struct TranslateInput<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
struct TranslateItem {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

#[async_trait]
impl Translator for TranslatorClient {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(
        &self,
        text: &str,
        from: Option<&str>,
        to: &str,
    ) -> Result<String, CapabilityError> {
        let mut url = self.config.url("translate")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", TRANSLATOR_API_VERSION);
            query.append_pair("to", to);
            if let Some(from) = from {
                query.append_pair("from", from);
            }
        }

        let mut request = self
            .config
            .authorize(self.client.post(url), SUBSCRIPTION_KEY_HEADER)
            .json(&[TranslateInput { text }]);
        if let Some(region) = &self.region {
            request = request.header(REGION_HEADER, region);
        }

        let items: Vec<TranslateItem> = send_json(request).await?;
        let translated = items
            .into_iter()
            .next()
            .and_then(|item| item.translations.into_iter().next())
            .map(|t| t.text)
            .ok_or_else(|| {
                CapabilityError::InvalidResponse("no translation returned".to_string())
            })?;

        debug!(to, "translated chunk");
        Ok(translated)
    }
}
