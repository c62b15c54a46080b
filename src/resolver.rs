//! Pool endpoint resolution
//!
//! The pool publishes its current address as a two-line text file
//! (`host\nport`). Resolution never fails loudly: any problem yields
//! [`ServerEndpoint::unresolved`] and the pool controller decides what to do.

use crate::{Error, Result, ServerEndpoint};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Default location of the published pool address
pub const DEFAULT_ENDPOINT_URL: &str =
    "https://raw.githubusercontent.com/revoxhere/duino-coin/gh-pages/serverip.txt";

/// Supplies the pool address
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Resolve the endpoint; an unresolved value signals failure
    async fn resolve(&self) -> ServerEndpoint;
}

/// Fetches the address file over HTTP
#[derive(Debug)]
pub struct HttpEndpointResolver {
    client: Client,
    url: Url,
}

impl HttpEndpointResolver {
    /// Create a resolver for `url`
    pub fn new(url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| Error::config(format!("Invalid endpoint URL: {}", e)))?;

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::from)?;

        Ok(Self { client, url })
    }

    /// URL being fetched
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self) -> Result<ServerEndpoint> {
        let response = self.client.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::resolution(format!(
                "endpoint file request failed: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let endpoint = ServerEndpoint::from_lines(&body);
        if !endpoint.is_resolved() {
            return Err(Error::resolution("endpoint file is malformed"));
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl EndpointResolver for HttpEndpointResolver {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn resolve(&self) -> ServerEndpoint {
        match self.fetch().await {
            Ok(endpoint) => {
                debug!("Resolved pool endpoint {}", endpoint);
                endpoint
            }
            Err(e) => {
                warn!("Failed to resolve pool endpoint: {}", e);
                ServerEndpoint::unresolved()
            }
        }
    }
}

/// Always returns the configured endpoint
#[derive(Debug, Clone)]
pub struct StaticEndpointResolver {
    endpoint: ServerEndpoint,
}

impl StaticEndpointResolver {
    /// Create a resolver for a fixed endpoint
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpointResolver {
    async fn resolve(&self) -> ServerEndpoint {
        self.endpoint.clone()
    }
}
