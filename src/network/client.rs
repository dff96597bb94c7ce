//! HTTP collaborator used by the request manager
//!
//! The manager only needs "GET this URL with these headers and give me the
//! body", so that is the whole trait. `ReqwestClient` is the production
//! implementation; tests substitute their own.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;

use super::request::RequestError;

/// Performs HTTP GET requests on behalf of the request manager
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetches `url` and returns the response body
    ///
    /// Non-success statuses are returned as `RequestError::Status`.
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, RequestError>;
}

/// `HttpClient` backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a preconfigured `reqwest::Client` (timeouts, proxies, default headers).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, RequestError> {
        let response = self
            .client
            .get(url)
            .headers(header_map(headers)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "HTTP GET complete");

        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Converts request headers into a `HeaderMap`.
fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, RequestError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RequestError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RequestError::InvalidHeader(format!("{}: {}", name, e)))?;
        map.append(name, value);
    }
    Ok(map)
}
