//! Error type shared by the upstream clients.

use reqwest::StatusCode;

/// Errors returned by upstream client calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection or I/O failure talking to the upstream.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The upstream answered with a status outside 2xx/3xx.
    #[error("unexpected status {0}")]
    Status(StatusCode),

    /// An otherwise successful response lacked a required header.
    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    /// A required header was present but could not be used.
    #[error("response carries an unusable {0} header")]
    InvalidHeader(&'static str),

    /// The response body did not decode into the expected shape.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ClientError {
    /// Classifies a failed `send()` or body read.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err)
        } else {
            Self::Transport(err)
        }
    }

    /// `true` when the upstream replied but not in the agreed shape.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingHeader(_) | Self::InvalidHeader(_) | Self::Decode(_)
        )
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Accepts 2xx and 3xx; anything else fails the call.
pub(crate) fn check_status(status: StatusCode) -> Result<(), ClientError> {
    if status.is_success() || status.is_redirection() {
        Ok(())
    } else {
        Err(ClientError::Status(status))
    }
}
