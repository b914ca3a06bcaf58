use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::config::ClientConfig;

/// One call against the forum API, independent of the HTTP library.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// The fetch primitive. Dropping the returned future must abandon the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport used outside of tests.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        // POST endpoints expect a JSON content type even without a body
        builder = match &request.body {
            Some(body) => builder.json(body),
            None if request.method == Method::POST => {
                builder.header(reqwest::header::CONTENT_TYPE, "application/json")
            }
            None => builder,
        };

        let response = builder
            .send()
            .await
            .with_context(|| format!("{} {} failed", request.method, request.url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", request.url))?;

        tracing::trace!(url = %request.url, status, "response received");
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builders() {
        let req = ApiRequest::post("http://api.test/threads")
            .bearer("abc")
            .json(json!({"title": "t"}));

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.bearer.as_deref(), Some("abc"));
        assert_eq!(req.body, Some(json!({"title": "t"})));
        assert_eq!(ApiRequest::get("http://api.test/users").method, Method::GET);
    }

    #[test]
    fn http_transport_builds_from_defaults() {
        assert!(HttpTransport::new(&ClientConfig::default()).is_ok());
    }
}
