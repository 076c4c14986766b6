//! Bearer-token identity: the user id comes from upstream token claims; this
//! module only defines the seam and a static-token implementation for dev.

use axum::http::HeaderMap;

/// Maps a bearer token to a user id. Real deployments plug the upstream
/// identity provider in here; requests without a resolvable token are
/// rejected before any work starts.
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, bearer_token: &str) -> Option<String>;
}

/// Single static token → single user. Dev and test only.
pub struct StaticTokenIdentity {
    token: String,
    user_id: String,
}

impl StaticTokenIdentity {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }

    /// Reads `MORADA_AUTH_TOKEN` and `MORADA_AUTH_USER` (defaults user to
    /// `"dev"`). Returns `None` when no token is configured.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("MORADA_AUTH_TOKEN").ok().filter(|t| !t.is_empty())?;
        let user_id =
            std::env::var("MORADA_AUTH_USER").unwrap_or_else(|_| "dev".to_string());
        Some(Self::new(token, user_id))
    }
}

impl IdentityProvider for StaticTokenIdentity {
    fn verify(&self, bearer_token: &str) -> Option<String> {
        if bearer_token == self.token {
            Some(self.user_id.clone())
        } else {
            None
        }
    }
}

/// Extracts the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
