//! OAuth2 identity provider client.
//!
//! The provider runs the browser-facing part of the authorization code flow
//! and keeps its own session. The gateway talks to it in three legs:
//!
//! 1. **Begin** - `GET {authorize_path}`, read the `Location` of the redirect
//! 2. **Exchange** - `GET {exchange_path}?state&code&scope&authuser&prompt`,
//!    read the session cookie(s) from `Set-Cookie`
//! 3. **Lookup** - `GET {lookup_path}` with that `Cookie`, read `Authorization`
//!
//! None of the requests follow redirects.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cookie::Cookie;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use uart_core::CallbackParams;
use url::Url;

use crate::endpoint;
use crate::error::{ClientError, check_status};

/// Session credential obtained from the code exchange, ready to be sent as a
/// `Cookie` header value (`name=value; name2=value2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie(String);

impl SessionCookie {
    /// Build a session credential from raw `Set-Cookie` header values.
    ///
    /// Attributes such as `Path`, `HttpOnly` or `Expires` are discarded and
    /// only the `name=value` pairs are kept. With `only` set, every other
    /// cookie is ignored. Returns `None` if nothing usable remains.
    pub fn from_set_cookie<'a, I>(values: I, only: Option<&str>) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let pairs: Vec<String> = values
            .into_iter()
            .filter_map(|raw| Cookie::parse(raw).ok())
            .filter(|c| only.is_none_or(|name| c.name() == name))
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(Self(pairs.join("; ")))
        }
    }

    pub fn header_value(&self) -> &str {
        &self.0
    }
}

/// Bearer credential read from the identity lookup response.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Both credentials produced by [`IdentityClient::redeem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub session_cookie: SessionCookie,
    pub bearer_token: BearerToken,
}

/// The identity provider operations used by the OAuth relay.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Ask the provider where to send the browser to authenticate.
    async fn begin_auth(&self) -> Result<Url, ClientError>;

    /// Trade the callback parameters for the provider's session cookie.
    async fn exchange_code(&self, callback: &CallbackParams)
    -> Result<SessionCookie, ClientError>;

    /// Resolve a session cookie into a bearer token.
    async fn lookup_identity(&self, session: &SessionCookie) -> Result<BearerToken, ClientError>;

    /// Run the exchange and lookup legs back to back.
    async fn redeem(&self, callback: &CallbackParams) -> Result<SessionGrant, ClientError> {
        let session_cookie = self.exchange_code(callback).await?;
        let bearer_token = self.lookup_identity(&session_cookie).await?;
        Ok(SessionGrant {
            session_cookie,
            bearer_token,
        })
    }
}

/// Configuration for [`HttpIdentityClient`].
#[derive(Debug, Clone)]
pub struct IdentityClientConfig {
    /// Root of the identity provider.
    pub base_url: Url,

    /// Per-request timeout (default: 10 seconds).
    pub timeout: Duration,

    /// Authorization endpoint (default: `/oauth2/authorization/google`).
    pub authorize_path: String,

    /// Code exchange endpoint (default: `/login/oauth2/code/google`).
    pub exchange_path: String,

    /// Identity lookup endpoint (default: `/id`).
    pub lookup_path: String,

    /// Forward only this cookie from the exchange response. `None` forwards all.
    pub session_cookie_name: Option<String>,
}

impl IdentityClientConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(10),
            authorize_path: "/oauth2/authorization/google".to_string(),
            exchange_path: "/login/oauth2/code/google".to_string(),
            lookup_path: "/id".to_string(),
            session_cookie_name: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_paths(
        mut self,
        authorize: impl Into<String>,
        exchange: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        self.authorize_path = authorize.into();
        self.exchange_path = exchange.into();
        self.lookup_path = lookup.into();
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: Option<String>) -> Self {
        self.session_cookie_name = name;
        self
    }
}

/// [`IdentityClient`] speaking HTTP to the provider.
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    http: reqwest::Client,
    config: IdentityClientConfig,
}

impl HttpIdentityClient {
    pub fn new(config: IdentityClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self { http, config })
    }

    async fn get(&self, url: Url, headers: HeaderMap) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        tracing::debug!(%url, status = %response.status(), "identity provider responded");
        check_status(response.status())?;
        Ok(response)
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn begin_auth(&self) -> Result<Url, ClientError> {
        let url = endpoint(&self.config.base_url, &self.config.authorize_path)?;
        let response = self.get(url.clone(), HeaderMap::new()).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or(ClientError::MissingHeader("Location"))?
            .to_str()
            .map_err(|_| ClientError::InvalidHeader("Location"))?;

        // Relative locations resolve against the request URL; absolute ones pass through.
        url.join(location)
            .map_err(|_| ClientError::InvalidHeader("Location"))
    }

    async fn exchange_code(
        &self,
        callback: &CallbackParams,
    ) -> Result<SessionCookie, ClientError> {
        let mut url = endpoint(&self.config.base_url, &self.config.exchange_path)?;
        url.query_pairs_mut().extend_pairs(callback.query_pairs());

        let response = self.get(url, HeaderMap::new()).await?;

        let raw: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if raw.is_empty() {
            return Err(ClientError::MissingHeader("Set-Cookie"));
        }

        SessionCookie::from_set_cookie(raw, self.config.session_cookie_name.as_deref())
            .ok_or(ClientError::InvalidHeader("Set-Cookie"))
    }

    async fn lookup_identity(&self, session: &SessionCookie) -> Result<BearerToken, ClientError> {
        let url = endpoint(&self.config.base_url, &self.config.lookup_path)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            session
                .header_value()
                .parse()
                .map_err(|_| ClientError::InvalidHeader("Cookie"))?,
        );

        let response = self.get(url, headers).await?;

        let token = response
            .headers()
            .get(AUTHORIZATION)
            .ok_or(ClientError::MissingHeader("Authorization"))?
            .to_str()
            .map_err(|_| ClientError::InvalidHeader("Authorization"))?
            .trim();
        if token.is_empty() {
            return Err(ClientError::InvalidHeader("Authorization"));
        }

        Ok(BearerToken::new(token))
    }
}
