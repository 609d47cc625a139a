//! Orchestration between the gateway routes and the upstream clients.
//!
//! [`GatewayService`] owns the page cache and the worker pool it was built
//! with. Catalog reads go through the cache; on a miss the fetched page is
//! returned right away and written back by a pool task, so the next read
//! within the TTL is served without an upstream call. The OAuth relay is
//! driven leg by leg through [`relay::RelaySession`].

pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use uart_clients::{
    ClientError, HttpIdentityClient, HttpMarketClient, IdentityClient, IdentityClientConfig,
    MarketClient, MarketClientConfig,
};
use uart_core::{AuthGrant, CallbackParams, MarketItem, PageCache, PoolError, WorkerPool};
use url::Url;

use crate::config::AppConfig;
use crate::error::{GatewayError, Leg, Upstream};
use relay::RelaySession;

/// Knobs the service needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub cache_ttl: Duration,
    pub post_login_redirect: String,
    pub validate_state: bool,
}

impl ServiceSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            cache_ttl: cfg.cache.ttl(),
            post_login_redirect: cfg.identity.post_login_redirect.clone(),
            validate_state: cfg.identity.validate_state,
        }
    }
}

/// Where to send the browser to log in, plus the `state` it will come back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRedirect {
    pub url: Url,
    pub state: Option<String>,
}

pub struct GatewayService {
    market: Arc<dyn MarketClient>,
    identity: Arc<dyn IdentityClient>,
    cache: Arc<PageCache>,
    pool: Arc<WorkerPool>,
    settings: ServiceSettings,
}

impl GatewayService {
    pub fn new(
        market: Arc<dyn MarketClient>,
        identity: Arc<dyn IdentityClient>,
        cache: Arc<PageCache>,
        pool: Arc<WorkerPool>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            market,
            identity,
            cache,
            pool,
            settings,
        }
    }

    /// Build the HTTP clients, cache and pool described by `cfg`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        let market_url = Url::parse(&cfg.market.url)
            .map_err(|e| GatewayError::Internal(format!("market.url: {e}")))?;
        let identity_url = Url::parse(&cfg.identity.url)
            .map_err(|e| GatewayError::Internal(format!("identity.url: {e}")))?;

        let market = HttpMarketClient::new(
            MarketClientConfig::new(market_url)
                .with_timeout(cfg.market.timeout())
                .with_pinned_items(cfg.market.pinned_items.clone()),
        )
        .map_err(|e| GatewayError::Internal(format!("market client: {e}")))?;

        let identity = HttpIdentityClient::new(
            IdentityClientConfig::new(identity_url)
                .with_timeout(cfg.identity.timeout())
                .with_paths(
                    cfg.identity.authorize_path.clone(),
                    cfg.identity.exchange_path.clone(),
                    cfg.identity.lookup_path.clone(),
                )
                .with_session_cookie_name(cfg.identity.session_cookie_name.clone()),
        )
        .map_err(|e| GatewayError::Internal(format!("identity client: {e}")))?;

        tracing::info!(
            market = %cfg.market.url,
            identity = %cfg.identity.url,
            cache_ttl_secs = cfg.cache.ttl_secs,
            pool_size = cfg.workers.pool_size,
            "gateway service configured"
        );

        Ok(Self::new(
            Arc::new(market),
            Arc::new(identity),
            Arc::new(PageCache::new(cfg.cache.sweep_interval())),
            Arc::new(WorkerPool::new(cfg.workers.pool_size)),
            ServiceSettings::from_config(cfg),
        ))
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Read-through catalog lookup.
    pub async fn get_market_page(&self, page: u32) -> Result<Arc<Vec<MarketItem>>, GatewayError> {
        if let Some(items) = self.cache.read(&page) {
            tracing::debug!(page, "market page cache hit");
            return Ok(items);
        }
        tracing::debug!(page, "market page cache miss");

        let items = self
            .market
            .get_page(page)
            .await
            .map(Arc::new)
            .map_err(|e| GatewayError::upstream(Upstream::Market, Leg::CatalogRead, e))?;

        let cache = self.cache.clone();
        let value = items.clone();
        let ttl = self.settings.cache_ttl;
        // The write-back never holds up the response.
        match self.pool.try_submit(async move { cache.write(page, value, ttl) }) {
            Ok(()) => {}
            Err(PoolError::Full) => tracing::debug!(page, "worker queue full, page not cached"),
            Err(e) => tracing::warn!(page, error = %e, "market page not cached"),
        }

        Ok(items)
    }

    /// First half of the relay: ask the provider where the browser should go.
    pub async fn get_auth_page(&self) -> Result<AuthRedirect, GatewayError> {
        let mut relay = RelaySession::new();

        let url = match self.identity.begin_auth().await {
            Ok(url) => url,
            Err(e) => return Err(abandon(&mut relay, Leg::BeginAuth, e)),
        };
        relay.begin(url.clone())?;

        if self.settings.validate_state && relay.expected_state().is_none() {
            relay.fail(Leg::BeginAuth)?;
            return Err(GatewayError::UpstreamProtocolViolation {
                upstream: Upstream::Identity,
                leg: Leg::BeginAuth,
                detail: "authorization redirect carries no state parameter".into(),
            });
        }

        tracing::debug!(authorize_url = %url, "auth redirect issued");
        Ok(AuthRedirect {
            state: relay.expected_state().map(str::to_owned),
            url,
        })
    }

    /// Second half of the relay: code exchange, then identity lookup.
    ///
    /// `expected_state` is the `state` issued by [`get_auth_page`](Self::get_auth_page)
    /// for this browser, if any.
    pub async fn get_auth_token(
        &self,
        callback: CallbackParams,
        expected_state: Option<String>,
    ) -> Result<AuthGrant, GatewayError> {
        let mut relay = RelaySession::resume(expected_state);
        let params = callback.clone();
        relay.receive_callback(callback, self.settings.validate_state)?;

        let session = match self.identity.exchange_code(&params).await {
            Ok(session) => session,
            Err(e) => return Err(abandon(&mut relay, Leg::CodeExchange, e)),
        };
        relay.session_exchanged(session.clone())?;

        let token = match self.identity.lookup_identity(&session).await {
            Ok(token) => token,
            Err(e) => return Err(abandon(&mut relay, Leg::IdentityLookup, e)),
        };
        relay.complete(token)?;

        tracing::info!("oauth relay completed");
        Ok(relay.into_grant(&self.settings.post_login_redirect)?)
    }

    /// Stop the worker pool, then the cache sweep.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.cache.shutdown().await;
        tracing::debug!("gateway service stopped");
    }
}

fn abandon(relay: &mut RelaySession, leg: Leg, err: ClientError) -> GatewayError {
    if let Err(e) = relay.fail(leg) {
        return e.into();
    }
    GatewayError::upstream(Upstream::Identity, leg, err)
}
