pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod service;

pub use config::{
    AppConfig, CacheConfig, CorsConfig, IdentityConfig, MarketConfig, ServerConfig, WorkersConfig,
};
pub use error::{GatewayError, Leg, Upstream};
pub use observability::init_tracing;
pub use server::{ServerBuilder, UartServer, build_app};
pub use service::relay::{RelayError, RelaySession, RelayState};
pub use service::{AuthRedirect, GatewayService, ServiceSettings};
