//! Value types exchanged between the gateway, the orchestration service and
//! the upstream clients.

use serde::{Deserialize, Serialize};

/// A single catalog entry served by the marketplace.
///
/// Upstream payloads have used both lowercase and Go-style capitalised keys,
/// so both are accepted on input. Output always uses the lowercase form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketItem {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Price")]
    pub price: f64,
    #[serde(
        rename = "photo",
        alias = "Photo",
        alias = "photoURL",
        alias = "photoUrl",
        default
    )]
    pub photo_url: String,
}

impl MarketItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        price: f64,
        photo_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            photo_url: photo_url.into(),
        }
    }
}

/// Query parameters the identity provider attaches when it redirects the
/// browser back to the gateway. Absent parameters decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub state: String,
    pub code: String,
    pub scope: String,
    pub authuser: String,
    pub prompt: String,
}

impl CallbackParams {
    /// The parameters in the order they are re-issued to the code exchange endpoint.
    pub fn query_pairs(&self) -> [(&'static str, &str); 5] {
        [
            ("state", self.state.as_str()),
            ("code", self.code.as_str()),
            ("scope", self.scope.as_str()),
            ("authuser", self.authuser.as_str()),
            ("prompt", self.prompt.as_str()),
        ]
    }
}

/// Outcome of a completed OAuth relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    /// Where the browser goes after login.
    pub redirect_url: String,
    /// Value of the identity provider's `Authorization` header.
    pub bearer_token: String,
}
