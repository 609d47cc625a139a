//! State machine for one OAuth relay.
//!
//! ```text
//! Idle -> AuthRequested -> CallbackReceived -> SessionExchanged -> Completed
//!   \            \                 \                  \
//!    +------------+-----------------+------------------+--> Errored
//! ```
//!
//! A relay spans two inbound requests: `/v1/auth` walks `Idle -> AuthRequested`,
//! and the browser's return to the callback route resumes at `AuthRequested`
//! carrying only the `state` value stored in a cookie. Nothing else survives
//! between the two requests.

use std::fmt;

use uart_clients::{BearerToken, SessionCookie};
use uart_core::{AuthGrant, CallbackParams};
use url::Url;

use crate::error::Leg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    AuthRequested,
    CallbackReceived,
    SessionExchanged,
    Completed,
    Errored,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AuthRequested => "auth-requested",
            Self::CallbackReceived => "callback-received",
            Self::SessionExchanged => "session-exchanged",
            Self::Completed => "completed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("invalid relay transition from {from} to {to}")]
    InvalidTransition { from: RelayState, to: RelayState },

    #[error("callback arrived without a pending authorization state")]
    MissingState,

    #[error("callback state does not match the issued authorization state")]
    StateMismatch,
}

/// Everything one relay accumulates on its way to a bearer token.
#[derive(Debug)]
pub struct RelaySession {
    state: RelayState,
    authorize_url: Option<Url>,
    expected_state: Option<String>,
    callback: Option<CallbackParams>,
    session_cookie: Option<SessionCookie>,
    bearer_token: Option<BearerToken>,
    failed_leg: Option<Leg>,
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            state: RelayState::Idle,
            authorize_url: None,
            expected_state: None,
            callback: None,
            session_cookie: None,
            bearer_token: None,
            failed_leg: None,
        }
    }

    /// Pick up a relay at the callback, given the `state` issued with the auth redirect.
    pub fn resume(expected_state: Option<String>) -> Self {
        Self {
            state: RelayState::AuthRequested,
            expected_state: expected_state.filter(|s| !s.is_empty()),
            ..Self::new()
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn authorize_url(&self) -> Option<&Url> {
        self.authorize_url.as_ref()
    }

    pub fn expected_state(&self) -> Option<&str> {
        self.expected_state.as_deref()
    }

    pub fn callback(&self) -> Option<&CallbackParams> {
        self.callback.as_ref()
    }

    pub fn session_cookie(&self) -> Option<&SessionCookie> {
        self.session_cookie.as_ref()
    }

    pub fn bearer_token(&self) -> Option<&BearerToken> {
        self.bearer_token.as_ref()
    }

    pub fn failed_leg(&self) -> Option<Leg> {
        self.failed_leg
    }

    fn advance(&mut self, from: RelayState, to: RelayState) -> Result<(), RelayError> {
        if self.state != from {
            return Err(RelayError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(%from, %to, "relay transition");
        self.state = to;
        Ok(())
    }

    /// `Idle -> AuthRequested`. Records the authorize URL and its `state` parameter.
    pub fn begin(&mut self, authorize_url: Url) -> Result<(), RelayError> {
        self.advance(RelayState::Idle, RelayState::AuthRequested)?;
        self.expected_state = authorize_url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty());
        self.authorize_url = Some(authorize_url);
        Ok(())
    }

    /// `AuthRequested -> CallbackReceived`.
    ///
    /// With `validate_state`, the callback's `state` must equal the one issued
    /// by [`begin`](Self::begin). A failed check moves the relay to `Errored`.
    pub fn receive_callback(
        &mut self,
        callback: CallbackParams,
        validate_state: bool,
    ) -> Result<(), RelayError> {
        if self.state != RelayState::AuthRequested {
            return Err(RelayError::InvalidTransition {
                from: self.state,
                to: RelayState::CallbackReceived,
            });
        }

        if validate_state {
            let check = match self.expected_state.as_deref() {
                None => Err(RelayError::MissingState),
                Some(expected) if expected != callback.state => Err(RelayError::StateMismatch),
                Some(_) => Ok(()),
            };
            if let Err(e) = check {
                self.state = RelayState::Errored;
                return Err(e);
            }
        }

        self.advance(RelayState::AuthRequested, RelayState::CallbackReceived)?;
        self.callback = Some(callback);
        Ok(())
    }

    /// `CallbackReceived -> SessionExchanged`.
    pub fn session_exchanged(&mut self, cookie: SessionCookie) -> Result<(), RelayError> {
        self.advance(RelayState::CallbackReceived, RelayState::SessionExchanged)?;
        self.session_cookie = Some(cookie);
        Ok(())
    }

    /// `SessionExchanged -> Completed`.
    pub fn complete(&mut self, token: BearerToken) -> Result<(), RelayError> {
        self.advance(RelayState::SessionExchanged, RelayState::Completed)?;
        self.bearer_token = Some(token);
        Ok(())
    }

    /// Abandon the relay. Allowed from any non-terminal state.
    pub fn fail(&mut self, leg: Leg) -> Result<(), RelayError> {
        if self.state.is_terminal() {
            return Err(RelayError::InvalidTransition {
                from: self.state,
                to: RelayState::Errored,
            });
        }
        tracing::trace!(from = %self.state, %leg, "relay errored");
        self.state = RelayState::Errored;
        self.failed_leg = Some(leg);
        Ok(())
    }

    /// Turn a completed relay into the grant handed back to the browser.
    pub fn into_grant(self, redirect_url: &str) -> Result<AuthGrant, RelayError> {
        match (self.state, self.bearer_token) {
            (RelayState::Completed, Some(token)) => Ok(AuthGrant {
                redirect_url: redirect_url.to_string(),
                bearer_token: token.into_string(),
            }),
            (from, _) => Err(RelayError::InvalidTransition {
                from,
                to: RelayState::Completed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(state: &str) -> CallbackParams {
        CallbackParams {
            state: state.into(),
            code: "c1".into(),
            ..Default::default()
        }
    }

    fn cookie() -> SessionCookie {
        SessionCookie::from_set_cookie(["SESSION=abc; Path=/"], None).unwrap()
    }

    #[test]
    fn test_full_relay_happy_path() {
        let mut relay = RelaySession::new();
        assert_eq!(relay.state(), RelayState::Idle);

        relay
            .begin(Url::parse("https://idp.example/auth?client_id=x&state=s1").unwrap())
            .unwrap();
        assert_eq!(relay.state(), RelayState::AuthRequested);
        assert_eq!(relay.expected_state(), Some("s1"));

        relay.receive_callback(callback("s1"), true).unwrap();
        assert_eq!(relay.state(), RelayState::CallbackReceived);

        relay.session_exchanged(cookie()).unwrap();
        assert_eq!(relay.state(), RelayState::SessionExchanged);
        assert_eq!(relay.session_cookie().unwrap().header_value(), "SESSION=abc");

        relay.complete(BearerToken::new("Bearer t")).unwrap();
        assert_eq!(relay.state(), RelayState::Completed);

        let grant = relay.into_grant("http://localhost:8888").unwrap();
        assert_eq!(grant.redirect_url, "http://localhost:8888");
        assert_eq!(grant.bearer_token, "Bearer t");
    }

    #[test]
    fn test_legs_cannot_be_skipped_or_reordered() {
        let mut relay = RelaySession::resume(Some("s1".into()));

        assert_eq!(
            relay.complete(BearerToken::new("t")),
            Err(RelayError::InvalidTransition {
                from: RelayState::AuthRequested,
                to: RelayState::Completed,
            })
        );
        assert!(relay.session_exchanged(cookie()).is_err());
        assert!(relay.begin(Url::parse("https://idp/x").unwrap()).is_err());
        assert_eq!(relay.state(), RelayState::AuthRequested);
    }

    #[test]
    fn test_state_mismatch_errors_the_relay() {
        let mut relay = RelaySession::resume(Some("s1".into()));

        assert_eq!(
            relay.receive_callback(callback("forged"), true),
            Err(RelayError::StateMismatch)
        );
        assert_eq!(relay.state(), RelayState::Errored);
        assert!(relay.callback().is_none());
    }

    #[test]
    fn test_missing_expected_state() {
        let mut relay = RelaySession::resume(Some(String::new()));
        assert_eq!(
            relay.receive_callback(callback("s1"), true),
            Err(RelayError::MissingState)
        );

        // Without validation the callback is taken verbatim.
        let mut relay = RelaySession::resume(None);
        relay.receive_callback(callback("anything"), false).unwrap();
        assert_eq!(relay.callback().unwrap().state, "anything");
    }

    #[test]
    fn test_begin_without_state_parameter() {
        let mut relay = RelaySession::new();
        relay
            .begin(Url::parse("https://idp.example/auth?x=1").unwrap())
            .unwrap();
        assert_eq!(relay.expected_state(), None);
        assert_eq!(
            relay.authorize_url().unwrap().as_str(),
            "https://idp.example/auth?x=1"
        );
    }

    #[test]
    fn test_errored_is_absorbing() {
        let mut relay = RelaySession::resume(None);
        relay.receive_callback(callback(""), false).unwrap();
        relay.fail(Leg::CodeExchange).unwrap();

        assert_eq!(relay.state(), RelayState::Errored);
        assert_eq!(relay.failed_leg(), Some(Leg::CodeExchange));
        assert!(relay.session_exchanged(cookie()).is_err());
        assert!(relay.fail(Leg::IdentityLookup).is_err());
        assert_eq!(relay.failed_leg(), Some(Leg::CodeExchange));
        assert!(relay.into_grant("http://x").is_err());
    }

    #[test]
    fn test_completed_cannot_fail() {
        let mut relay = RelaySession::resume(None);
        relay.receive_callback(callback(""), false).unwrap();
        relay.session_exchanged(cookie()).unwrap();
        relay.complete(BearerToken::new("t")).unwrap();

        assert!(relay.fail(Leg::IdentityLookup).is_err());
        assert_eq!(relay.state(), RelayState::Completed);
    }
}
