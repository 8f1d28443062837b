// Multimodal chat completion client
//
// Describes an image by sending it inline as a base64 data URI next to
// the text prompt.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use inbound_durable::capability::{CapabilityError, DescribePrompt, ImageDescriber};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::client::{http_client, send_json, ServiceConfig};

pub const CHAT_API_VERSION: &str = "2024-06-01";

const API_KEY_HEADER: &str = "api-key";

/// Client for a chat completion deployment
pub struct ChatDescriber {
    client: Client,
    config: ServiceConfig,
    deployment: String,
}

impl ChatDescriber {
    pub fn new(config: ServiceConfig, deployment: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            config,
            deployment: deployment.into(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }
}

/// Build the chat request for one image
fn describe_request(image: &[u8], content_type: &str, prompt: &DescribePrompt) -> Value {
    let data_uri = format!("data:{content_type};base64,{}", STANDARD.encode(image));
    json!({
        "messages": [
            {"role": "system", "content": prompt.system},
            {"role": "user", "content": [
                {"type": "text", "text": prompt.user},
                {"type": "image_url", "image_url": {"url": data_uri}}
            ]}
        ],
        "max_tokens": prompt.max_tokens,
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ImageDescriber for ChatDescriber {
    #[instrument(
        skip(self, image, prompt),
        fields(deployment = %self.deployment, bytes = image.len())
    )]
    async fn describe(
        &self,
        image: Vec<u8>,
        content_type: &str,
        prompt: &DescribePrompt,
    ) -> Result<String, CapabilityError> {
        let mut url = self.config.url(&format!(
            "openai/deployments/{}/chat/completions",
            self.deployment
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", CHAT_API_VERSION);

        let response: ChatResponse = send_json(
            self.config
                .authorize(self.client.post(url), API_KEY_HEADER)
                .json(&describe_request(&image, content_type, prompt)),
        )
        .await?;

        let description = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                CapabilityError::InvalidResponse("No choices in chat response".to_string())
            })?;

        debug!(chars = description.len(), "image described");
        Ok(description)
    }
}
