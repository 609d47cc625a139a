//! Gateway error type and its mapping to HTTP responses.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uart_clients::ClientError;

use crate::service::relay::RelayError;

/// Which upstream service a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Market,
    Identity,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Identity => write!(f, "identity provider"),
        }
    }
}

/// The network round-trip that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    CatalogRead,
    BeginAuth,
    CodeExchange,
    IdentityLookup,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CatalogRead => write!(f, "catalog read"),
            Self::BeginAuth => write!(f, "auth begin"),
            Self::CodeExchange => write!(f, "code exchange"),
            Self::IdentityLookup => write!(f, "identity lookup"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The inbound request itself is unusable (400).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport failure, timeout or error status from an upstream (502).
    #[error("{upstream} unavailable during {leg}: {source}")]
    UpstreamUnavailable {
        upstream: Upstream,
        leg: Leg,
        #[source]
        source: ClientError,
    },

    /// The upstream answered but without what the gateway needs (502).
    #[error("{upstream} protocol violation during {leg}: {detail}")]
    UpstreamProtocolViolation {
        upstream: Upstream,
        leg: Leg,
        detail: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify a client failure on the given leg.
    pub fn upstream(upstream: Upstream, leg: Leg, source: ClientError) -> Self {
        if source.is_protocol_violation() {
            Self::UpstreamProtocolViolation {
                upstream,
                leg,
                detail: source.to_string(),
            }
        } else {
            Self::UpstreamUnavailable {
                upstream,
                leg,
                source,
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable { .. } | Self::UpstreamProtocolViolation { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamProtocolViolation { .. } => "upstream_protocol_violation",
            Self::Internal(_) => "internal",
        }
    }

    /// The leg the failure happened on, for upstream failures.
    pub fn leg(&self) -> Option<Leg> {
        match self {
            Self::UpstreamUnavailable { leg, .. } | Self::UpstreamProtocolViolation { leg, .. } => {
                Some(*leg)
            }
            _ => None,
        }
    }

    // Only input errors describe themselves to the caller; everything else stays server-side.
    fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::UpstreamUnavailable { .. } => "an upstream service is unavailable".into(),
            Self::UpstreamProtocolViolation { .. } => {
                "an upstream service returned an unexpected response".into()
            }
            Self::Internal(_) => "internal server error".into(),
        }
    }
}

impl From<RelayError> for GatewayError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::MissingState | RelayError::StateMismatch => {
                Self::InvalidInput(err.to_string())
            }
            RelayError::InvalidTransition { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::warn!(error = %self, code = self.code(), "request rejected");
        }

        let body = json!({
            "error": self.code(),
            "message": self.public_message(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_client_errors_are_classified() {
        let err = GatewayError::upstream(
            Upstream::Identity,
            Leg::CodeExchange,
            ClientError::MissingHeader("Set-Cookie"),
        );
        assert!(matches!(
            err,
            GatewayError::UpstreamProtocolViolation {
                leg: Leg::CodeExchange,
                ..
            }
        ));

        let err = GatewayError::upstream(Upstream::Market, Leg::CatalogRead, ClientError::Timeout);
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));

        let err = GatewayError::upstream(
            Upstream::Identity,
            Leg::IdentityLookup,
            ClientError::Status(StatusCode::UNAUTHORIZED),
        );
        assert_eq!(err.code(), "upstream_unavailable");
        assert_eq!(err.leg(), Some(Leg::IdentityLookup));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::upstream(Upstream::Market, Leg::CatalogRead, ClientError::Timeout)
                .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_relay_errors_map_to_input_or_internal() {
        assert!(matches!(
            GatewayError::from(RelayError::StateMismatch),
            GatewayError::InvalidInput(_)
        ));
        assert!(matches!(
            GatewayError::from(RelayError::InvalidTransition {
                from: crate::service::relay::RelayState::Idle,
                to: crate::service::relay::RelayState::Completed,
            }),
            GatewayError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn test_response_body_hides_details() {
        let err = GatewayError::UpstreamProtocolViolation {
            upstream: Upstream::Identity,
            leg: Leg::BeginAuth,
            detail: "secret upstream detail".into(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "upstream_protocol_violation");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }
}
