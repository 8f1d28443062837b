// Shared HTTP plumbing for the service clients

use inbound_durable::capability::CapabilityError;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

/// Header carrying the key for the analysis services
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Endpoint and key of one external service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
}

impl ServiceConfig {
    pub fn new(endpoint: &str) -> Result<Self, CapabilityError> {
        let mut endpoint = Url::parse(endpoint.trim())
            .map_err(|e| CapabilityError::Request(format!("invalid endpoint {endpoint:?}: {e}")))?;
        // Url::join drops the last segment unless the path ends in a slash
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }

    /// Read `endpoint_var` and `key_var`; `None` when the endpoint is unset
    pub fn from_env(endpoint_var: &str, key_var: &str) -> Result<Option<Self>, CapabilityError> {
        let Some(endpoint) = std::env::var(endpoint_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
        else {
            return Ok(None);
        };
        let mut config = Self::new(&endpoint)?;
        if let Ok(key) = std::env::var(key_var) {
            config = config.with_api_key(key);
        }
        Ok(Some(config))
    }

    /// Resolve a path relative to the endpoint
    pub fn url(&self, path: &str) -> Result<Url, CapabilityError> {
        self.endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| CapabilityError::Request(format!("invalid request path {path:?}: {e}")))
    }

    /// Whether `url` points at this service
    pub fn owns(&self, url: &Url) -> bool {
        url.scheme() == self.endpoint.scheme()
            && url.host_str() == self.endpoint.host_str()
            && url.port_or_known_default() == self.endpoint.port_or_known_default()
    }

    /// Attach the key under `header`, if one is configured
    pub fn authorize(&self, request: RequestBuilder, header: &str) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(header, key),
            None => request,
        }
    }
}

/// Client shared by every service wrapper
pub fn http_client() -> Client {
    Client::new()
}

pub(crate) fn request_error(err: reqwest::Error) -> CapabilityError {
    CapabilityError::Request(err.to_string())
}

/// Send a request and fail on a non-success status
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, CapabilityError> {
    let response = request.send().await.map_err(request_error)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CapabilityError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Send a request and decode its JSON body
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, CapabilityError> {
    let response = send(request).await?;
    response
        .json()
        .await
        .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))
}
