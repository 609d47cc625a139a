use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use serde::Serialize;
use time::Duration;
use uart_core::{CallbackParams, MarketItem};

use crate::error::GatewayError;
use crate::service::GatewayService;

/// Cookie carrying the `state` issued with the auth redirect.
pub const STATE_COOKIE: &str = "uart_oauth_state";

/// Response header carrying the bearer token after a completed relay.
pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("token");

const STATE_COOKIE_MAX_AGE_MINUTES: i64 = 10;

pub type AppState = Arc<GatewayService>;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Serialize)]
pub struct MarketPageResponse<'a> {
    page: u32,
    items: &'a [MarketItem],
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz(State(service): State<AppState>) -> impl IntoResponse {
    if service.pool().is_stopped() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "stopping" }),
        )
    } else {
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    }
}

/// `GET /v1/market/{page}`
pub async fn market_page(
    State(service): State<AppState>,
    Path(page): Path<String>,
) -> Result<Response, GatewayError> {
    let page: u32 = page.parse().map_err(|_| {
        GatewayError::InvalidInput(format!("page must be an integer from 0 to {}", u32::MAX))
    })?;

    let items = service.get_market_page(page).await?;
    Ok(Json(MarketPageResponse {
        page,
        items: items.as_slice(),
    })
    .into_response())
}

/// `GET /v1/auth`: redirect the browser to the identity provider.
pub async fn auth(
    State(service): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), GatewayError> {
    let redirect = service.get_auth_page().await?;

    let jar = match redirect.state {
        Some(state) if service.settings().validate_state => jar.add(
            Cookie::build((STATE_COOKIE, state))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(Duration::minutes(STATE_COOKIE_MAX_AGE_MINUTES)),
        ),
        _ => jar,
    };

    Ok((jar, Redirect::to(redirect.url.as_str())))
}

/// The provider's redirect back to the gateway after login.
pub async fn auth_callback(
    State(service): State<AppState>,
    jar: CookieJar,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    let Query(callback) = query.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "malformed callback query");
        GatewayError::InvalidInput("malformed callback query".into())
    })?;
    let expected_state = jar.get(STATE_COOKIE).map(|c| c.value().to_owned());

    let grant = service.get_auth_token(callback, expected_state).await?;

    let token = HeaderValue::from_str(&grant.bearer_token)
        .map_err(|_| GatewayError::Internal("bearer token is not a valid header value".into()))?;
    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));

    Ok((jar, [(TOKEN_HEADER, token)], Redirect::to(&grant.redirect_url)).into_response())
}
