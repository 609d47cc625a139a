use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE},
    middleware,
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::AppConfig,
    error::GatewayError,
    handlers,
    middleware::{self as app_middleware, RESPONSE_TIME_HEADER, SERVER_NAME_HEADER},
    service::GatewayService,
};

pub struct UartServer {
    addr: SocketAddr,
    app: Router,
    service: Arc<GatewayService>,
}

pub fn build_app(service: Arc<GatewayService>, cfg: &AppConfig) -> Router {
    Router::new()
        // Health endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        // Catalog and OAuth relay
        .route("/v1/market/{page}", get(handlers::market_page))
        .route("/v1/auth", get(handlers::auth))
        .route(&cfg.identity.callback_path, get(handlers::auth_callback))
        .with_state(service)
        // Middleware stack, innermost first: timeout -> response headers -> cors -> trace -> request id
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(middleware::from_fn(app_middleware::response_headers))
        .layer(cors_layer(cfg))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
}

fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let origins = if cfg.cors.allows_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            cfg.cors
                .allowed_origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "ignoring invalid CORS origin");
                        None
                    }
                }),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::DELETE,
            Method::PUT,
        ])
        .allow_headers([HeaderName::from_static("x-requested-with"), CONTENT_TYPE])
        .expose_headers([
            RESPONSE_TIME_HEADER,
            SERVER_NAME_HEADER,
            handlers::TOKEN_HEADER,
        ])
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    service: Option<Arc<GatewayService>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            service: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use a prebuilt service instead of constructing one from the config.
    pub fn with_service(mut self, service: Arc<GatewayService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn build(self) -> Result<UartServer, GatewayError> {
        let service = match self.service {
            Some(service) => service,
            None => Arc::new(GatewayService::from_config(&self.config)?),
        };
        let app = build_app(service.clone(), &self.config);

        Ok(UartServer {
            addr: self.addr,
            app,
            service,
        })
    }
}

impl UartServer {
    pub fn service(&self) -> &Arc<GatewayService> {
        &self.service
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.service.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
