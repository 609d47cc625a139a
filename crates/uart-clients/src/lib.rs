//! # uart-clients
//!
//! Adapters for the two upstream services fronted by the gateway:
//!
//! - [`MarketClient`] - paged reads from the marketplace catalog
//! - [`IdentityClient`] - the legs of the OAuth2 relay against the identity provider
//!
//! Both traits are object safe so the orchestration layer can hold
//! `Arc<dyn MarketClient>` / `Arc<dyn IdentityClient>` and tests can swap in doubles.
//! The reqwest implementations never follow redirects on the identity side,
//! because the relay needs to read headers off the redirect responses themselves.

mod error;
pub mod identity;
pub mod market;

pub use error::ClientError;
pub use identity::{
    BearerToken, HttpIdentityClient, IdentityClient, IdentityClientConfig, SessionCookie,
    SessionGrant,
};
pub use market::{HttpMarketClient, MarketClient, MarketClientConfig};

/// Joins `path` onto `base` by plain concatenation, keeping any path prefix on `base`.
pub(crate) fn endpoint(base: &url::Url, path: &str) -> Result<url::Url, ClientError> {
    let base = base.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Ok(url::Url::parse(&format!("{base}/{path}"))?)
}
