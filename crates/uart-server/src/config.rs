use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use uart_core::MarketItem;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Marketplace catalog upstream
    #[serde(default)]
    pub market: MarketConfig,
    /// OAuth2 identity provider upstream
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Catalog page cache
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        // Upstream validations
        validate_base_url("market.url", &self.market.url)?;
        validate_base_url("identity.url", &self.identity.url)?;
        if self.market.timeout_ms == 0 || self.identity.timeout_ms == 0 {
            return Err("upstream timeouts must be > 0".into());
        }
        if !self.identity.callback_path.starts_with('/') {
            return Err("identity.callback_path must start with '/'".into());
        }
        let reserved = ["/healthz", "/readyz", "/v1/auth"];
        if reserved.contains(&self.identity.callback_path.as_str())
            || self.identity.callback_path.starts_with("/v1/market/")
        {
            return Err("identity.callback_path collides with a built-in route".into());
        }
        validate_base_url("identity.post_login_redirect", &self.identity.post_login_redirect)?;
        // Cache validations
        if self.cache.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

fn validate_base_url(key: &str, value: &str) -> Result<(), String> {
    let url = Url::parse(value).map_err(|e| format!("{key} is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{key} must use http or https"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on handling one inbound request, upstream legs included.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_url")]
    pub url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    /// Entries appended to every catalog page after the upstream items.
    #[serde(default)]
    pub pinned_items: Vec<MarketItem>,
}

fn default_market_url() -> String {
    "http://localhost:8081".into()
}
fn default_upstream_timeout_ms() -> u64 {
    10_000
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            url: default_market_url(),
            timeout_ms: default_upstream_timeout_ms(),
            pinned_items: Vec::new(),
        }
    }
}

impl MarketConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Identity provider endpoints and relay behaviour.
///
/// Example:
/// ```toml
/// [identity]
/// url = "https://auth.example.com"
/// post_login_redirect = "https://app.example.com"
/// session_cookie_name = "JSESSIONID"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_url")]
    pub url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_authorize_path")]
    pub authorize_path: String,
    #[serde(default = "default_callback_path")]
    pub exchange_path: String,
    #[serde(default = "default_lookup_path")]
    pub lookup_path: String,
    /// Route on this gateway the provider redirects the browser back to.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Where the browser lands once the relay completes.
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,
    /// Forward only this cookie from the code exchange. Unset forwards all of them.
    #[serde(default)]
    pub session_cookie_name: Option<String>,
    /// Require the callback `state` to match the one issued with the auth redirect.
    #[serde(default = "default_true")]
    pub validate_state: bool,
}

fn default_identity_url() -> String {
    "http://localhost:8082".into()
}
fn default_authorize_path() -> String {
    "/oauth2/authorization/google".into()
}
fn default_callback_path() -> String {
    "/login/oauth2/code/google".into()
}
fn default_lookup_path() -> String {
    "/id".into()
}
fn default_post_login_redirect() -> String {
    "http://localhost:8888".into()
}
fn default_true() -> bool {
    true
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: default_identity_url(),
            timeout_ms: default_upstream_timeout_ms(),
            authorize_path: default_authorize_path(),
            exchange_path: default_callback_path(),
            lookup_path: default_lookup_path(),
            callback_path: default_callback_path(),
            post_login_redirect: default_post_login_redirect(),
            session_cookie_name: None,
            validate_state: true,
        }
    }
}

impl IdentityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached catalog page.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    15
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of background executors. Values below 1 are raised to 1.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `["*"]` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "uart-proxy.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., UART__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("UART")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
