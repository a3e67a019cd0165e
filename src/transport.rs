//! Network transport seam
//!
//! The scheduler and crawler only ever issue plain GET requests, so the seam is a
//! single method. Tests substitute an in-memory implementation.

use crate::config::HttpConfig;
use crate::error::{CatalogError, Error, Result};

/// Abstraction over HTTP GET, enabling testability
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the body at `url`; non-success statuses are errors
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetch `url` and decode the body as UTF-8 text
pub async fn get_text(transport: &dyn Transport, url: &str) -> Result<String> {
    let body = transport.get(url).await?;
    String::from_utf8(body).map_err(|_| {
        CatalogError::InvalidUtf8 {
            url: url.to_string(),
        }
        .into()
    })
}

/// Fetch `url` and decode the body as JSON
pub async fn get_json<T>(transport: &dyn Transport, url: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let body = transport.get(url).await?;
    serde_json::from_slice(&body).map_err(|source| {
        CatalogError::Decode {
            url: url.to_string(),
            source,
        }
        .into()
    })
}

/// Production [`Transport`] backed by a shared reqwest client
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the client from HTTP settings
    ///
    /// `max_idle_per_host` should match the gate capacity so admitted requests can
    /// reuse connections.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &HttpConfig, max_idle_per_host: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(max_idle_per_host)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        // Check HTTP status before reading the body
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
