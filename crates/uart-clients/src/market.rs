//! Marketplace catalog client.

use std::time::Duration;

use async_trait::async_trait;
use uart_core::MarketItem;
use url::Url;

use crate::endpoint;
use crate::error::{ClientError, check_status};

/// Read access to catalog pages.
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Fetch one page of catalog items.
    async fn get_page(&self, page: u32) -> Result<Vec<MarketItem>, ClientError>;
}

/// Configuration for [`HttpMarketClient`].
#[derive(Debug, Clone)]
pub struct MarketClientConfig {
    /// Root of the marketplace service.
    pub base_url: Url,

    /// Per-request timeout (default: 10 seconds).
    pub timeout: Duration,

    /// Items appended after the upstream items on every page.
    pub pinned_items: Vec<MarketItem>,
}

impl MarketClientConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(10),
            pinned_items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_pinned_items(mut self, items: Vec<MarketItem>) -> Self {
        self.pinned_items = items;
        self
    }
}

/// [`MarketClient`] backed by the marketplace REST API.
#[derive(Debug, Clone)]
pub struct HttpMarketClient {
    http: reqwest::Client,
    config: MarketClientConfig,
}

impl HttpMarketClient {
    pub fn new(config: MarketClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self { http, config })
    }

    fn page_url(&self, page: u32) -> Result<Url, ClientError> {
        endpoint(
            &self.config.base_url,
            &format!("/marketplace/v1/items/{page}"),
        )
    }
}

#[async_trait]
impl MarketClient for HttpMarketClient {
    async fn get_page(&self, page: u32) -> Result<Vec<MarketItem>, ClientError> {
        let url = self.page_url(page)?;
        tracing::debug!(%url, page, "fetching market page");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        check_status(response.status())?;

        let mut items: Vec<MarketItem> =
            response.json().await.map_err(ClientError::from_reqwest)?;
        let upstream_count = items.len();
        items.extend(self.config.pinned_items.iter().cloned());

        tracing::debug!(
            page,
            upstream_count,
            pinned = self.config.pinned_items.len(),
            "market page fetched"
        );
        Ok(items)
    }
}
